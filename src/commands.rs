// Copyright © 2021-2022
// Author: Antonio Caggiano <info@antoniocaggiano.eu>
// SPDX-License-Identifier: MIT

use std::rc::Rc;

use ash::vk;

use crate::{buffer::Buffer, image::Image};

pub struct CommandBuffer {
    pub command_buffer: vk::CommandBuffer,
    pool: vk::CommandPool,
    device: Rc<ash::Device>,
}

impl CommandBuffer {
    pub fn new(pool: &CommandPool) -> Self {
        let create_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let mut command_buffers = unsafe { pool.device.allocate_command_buffers(&create_info) }
            .expect("Failed to create Vulkan command buffer");
        let command_buffer = command_buffers.pop().unwrap();

        Self {
            command_buffer,
            pool: pool.pool,
            device: pool.device.clone(),
        }
    }

    pub fn begin(&self, flags: vk::CommandBufferUsageFlags) {
        let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
        unsafe {
            self.device
                .begin_command_buffer(self.command_buffer, &begin_info)
        }
        .expect("Failed to begin Vulkan command buffer");
    }

    /// Set index here corresponds to the descriptor_set index in the shader
    pub fn bind_descriptor_sets(
        &self,
        layout: vk::PipelineLayout,
        sets: &[vk::DescriptorSet],
        set_index: u32,
    ) {
        let graphics_bind_point = vk::PipelineBindPoint::GRAPHICS;
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                self.command_buffer,
                graphics_bind_point,
                layout,
                set_index,
                sets,
                &[],
            )
        };
    }

    pub fn bind_vertex_buffer(&self, buffer: &Buffer) {
        let first_binding = 0;
        let buffers = [buffer.buffer];
        let offsets = [vk::DeviceSize::default()];
        unsafe {
            self.device.cmd_bind_vertex_buffers(
                self.command_buffer,
                first_binding,
                &buffers,
                &offsets,
            );
        }
    }

    pub fn bind_index_buffer(&self, buffer: &Buffer, index_type: vk::IndexType) {
        unsafe {
            self.device
                .cmd_bind_index_buffer(self.command_buffer, buffer.buffer, 0, index_type);
        }
    }

    pub fn push_constants(
        &self,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        constants: &[u8],
    ) {
        unsafe {
            self.device.cmd_push_constants(
                self.command_buffer,
                layout,
                stages,
                offset,
                constants,
            )
        }
    }

    pub fn draw_indexed(&self, index_count: u32, index_offset: u32, vertex_offset: i32) {
        unsafe {
            self.device.cmd_draw_indexed(
                self.command_buffer,
                index_count,
                1,
                index_offset,
                vertex_offset,
                0,
            );
        }
    }

    pub fn pipeline_barriers(
        &self,
        src_stage_mask: vk::PipelineStageFlags,
        dst_stage_mask: vk::PipelineStageFlags,
        image_memory_barriers: &[vk::ImageMemoryBarrier],
    ) {
        unsafe {
            self.device.cmd_pipeline_barrier(
                self.command_buffer,
                src_stage_mask,
                dst_stage_mask,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                image_memory_barriers,
            );
        }
    }

    pub fn copy_buffer(&self, src: &Buffer, dst: &Buffer, size: vk::DeviceSize) {
        let regions = [vk::BufferCopy::default().size(size)];
        unsafe {
            self.device
                .cmd_copy_buffer(self.command_buffer, src.buffer, dst.buffer, &regions);
        }
    }

    pub fn copy_buffer_to_image(
        &self,
        buffer: &Buffer,
        image: &Image,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                self.command_buffer,
                buffer.buffer,
                image.image,
                image.layout,
                regions,
            );
        }
    }

    pub fn end(&self) {
        unsafe { self.device.end_command_buffer(self.command_buffer) }
            .expect("Failed to end command buffer");
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device
                .free_command_buffers(self.pool, &[self.command_buffer])
        }
    }
}

pub struct CommandPool {
    pub pool: vk::CommandPool,
    device: Rc<ash::Device>,
}

impl CommandPool {
    pub fn new(device: &Rc<ash::Device>, queue_family_index: u32) -> Self {
        let device = device.clone();
        let create_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family_index);

        let pool = {
            unsafe {
                device
                    .create_command_pool(&create_info, None)
                    .expect("Failed to create Vulkan command pool")
            }
        };

        Self { pool, device }
    }

    pub fn destroy(&mut self) {
        if self.pool != vk::CommandPool::null() {
            unsafe {
                self.device.destroy_command_pool(self.pool, None);
            }
            self.pool = vk::CommandPool::null();
        }
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        self.destroy();
    }
}
