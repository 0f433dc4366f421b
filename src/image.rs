// Copyright © 2021-2022
// Author: Antonio Caggiano <info@antoniocaggiano.eu>
// SPDX-License-Identifier: MIT

use std::{cell::RefCell, rc::Rc};

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use gpu_allocator::MemoryLocation;

use crate::{commands::CommandBuffer, decoder::MipLevel, gfx::Dev};

pub struct Image {
    pub image: vk::Image,
    pub layout: vk::ImageLayout,
    pub extent: vk::Extent3D,
    pub format: vk::Format,
    pub mip_levels: u32,
    allocation: Option<Allocation>,
    allocator: Rc<RefCell<Allocator>>,
    device: Rc<ash::Device>,
}

impl Image {
    /// Creates a new empty sampled image with a full mip chain of
    /// `mip_levels` levels
    pub fn new(dev: &Dev, width: u32, height: u32, format: vk::Format, mip_levels: u32) -> Self {
        let extent = vk::Extent3D {
            width,
            height,
            depth: 1,
        };

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(extent)
            .mip_levels(mip_levels)
            .array_layers(1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .format(format)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);

        let image = unsafe { dev.device.create_image(&image_info, None) }
            .expect("Failed to create Vulkan image");

        let requirements = unsafe { dev.device.get_image_memory_requirements(image) };

        let allocation = dev
            .allocator
            .borrow_mut()
            .allocate(&AllocationCreateDesc {
                name: "image",
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .expect("Failed to allocate Vulkan image memory");

        unsafe {
            dev.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        }
        .expect("Failed to bind Vulkan image memory");

        Self {
            image,
            layout: vk::ImageLayout::UNDEFINED,
            extent,
            format,
            mip_levels,
            allocation: Some(allocation),
            allocator: Rc::clone(&dev.allocator),
            device: Rc::clone(&dev.device),
        }
    }

    fn subresource_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: self.mip_levels,
            base_array_layer: 0,
            layer_count: 1,
        }
    }

    /// Records a copy of every mip level from `staging` into this image,
    /// leaving it ready for sampling. Only commands are recorded here: the
    /// copy executes when the uploader submits the shared command sequence.
    pub fn record_copy_from(
        &mut self,
        cmd: &CommandBuffer,
        staging: &crate::buffer::Buffer,
        levels: &[MipLevel],
    ) {
        // Undefined -> Transfer dst optimal, all levels at once
        let new_layout = vk::ImageLayout::TRANSFER_DST_OPTIMAL;
        let barriers = [vk::ImageMemoryBarrier::default()
            .old_layout(self.layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(self.subresource_range())
            .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)];
        cmd.pipeline_barriers(
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
            &barriers,
        );
        self.layout = new_layout;

        let regions: Vec<vk::BufferImageCopy> = levels
            .iter()
            .enumerate()
            .map(|(level, mip)| {
                vk::BufferImageCopy::default()
                    .buffer_offset(mip.offset as vk::DeviceSize)
                    .image_subresource(vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: level as u32,
                        base_array_layer: 0,
                        layer_count: 1,
                    })
                    .image_extent(vk::Extent3D {
                        width: (self.extent.width >> level).max(1),
                        height: (self.extent.height >> level).max(1),
                        depth: 1,
                    })
            })
            .collect();
        cmd.copy_buffer_to_image(staging, self, &regions);

        // Transfer dst optimal -> Shader read only optimal
        let new_layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
        let barriers = [vk::ImageMemoryBarrier::default()
            .old_layout(self.layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(self.subresource_range())
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::SHADER_READ)];
        cmd.pipeline_barriers(
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            &barriers,
        );
        self.layout = new_layout;
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            self.allocator
                .borrow_mut()
                .free(allocation)
                .expect("Failed to free Vulkan image memory");
        }
        unsafe {
            self.device.destroy_image(self.image, None);
        }
    }
}

pub struct ImageView {
    pub view: vk::ImageView,
    device: Rc<ash::Device>,
}

impl ImageView {
    pub fn new(device: &Rc<ash::Device>, image: &Image) -> Self {
        let device = device.clone();

        let create_info = vk::ImageViewCreateInfo::default()
            .image(image.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(image.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: image.mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = unsafe { device.create_image_view(&create_info, None) }
            .expect("Failed to create Vulkan image view");

        Self { view, device }
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
        }
    }
}
