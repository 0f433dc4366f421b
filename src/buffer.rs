// Copyright © 2021-2022
// Author: Antonio Caggiano <info@antoniocaggiano.eu>
// SPDX-License-Identifier: MIT

use std::{cell::RefCell, rc::Rc};

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use gpu_allocator::MemoryLocation;

use crate::gfx::Dev;

pub struct Buffer {
    allocation: Option<Allocation>,
    pub buffer: vk::Buffer,
    pub size: vk::DeviceSize,
    allocator: Rc<RefCell<Allocator>>,
    device: Rc<ash::Device>,
}

impl Buffer {
    fn create(
        dev: &Dev,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Self {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { dev.device.create_buffer(&buffer_info, None) }
            .expect("Failed to create Vulkan buffer");

        let requirements = unsafe { dev.device.get_buffer_memory_requirements(buffer) };

        let allocation = dev
            .allocator
            .borrow_mut()
            .allocate(&AllocationCreateDesc {
                name: "buffer",
                requirements,
                location,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .expect("Failed to allocate Vulkan memory");

        unsafe {
            dev.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        }
        .expect("Failed to bind Vulkan buffer memory");

        Self {
            allocation: Some(allocation),
            buffer,
            size,
            allocator: Rc::clone(&dev.allocator),
            device: Rc::clone(&dev.device),
        }
    }

    /// Host-visible buffer populated synchronously with `data`, only ever
    /// used as the source of a transfer
    pub fn staging(dev: &Dev, data: &[u8]) -> Self {
        let buffer = Self::create(
            dev,
            data.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
        );

        let mapped = buffer
            .allocation
            .as_ref()
            .unwrap()
            .mapped_ptr()
            .expect("Staging buffer memory is not host visible")
            .as_ptr() as *mut u8;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped, data.len());
        }

        buffer
    }

    /// Device-local destination buffer. Its content arrives through a copy
    /// command recorded by the uploader.
    pub fn device_local(dev: &Dev, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> Self {
        Self::create(
            dev,
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
        )
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            self.allocator
                .borrow_mut()
                .free(allocation)
                .expect("Failed to free Vulkan buffer memory");
        }
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
        }
    }
}
