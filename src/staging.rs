// Copyright © 2022
// Author: Antonio Caggiano <info@antoniocaggiano.eu>
// SPDX-License-Identifier: MIT

use ash::vk;

use crate::{
    buffer::Buffer, commands::CommandBuffer, decoder::DecodedImage, gfx::Dev, image::Image,
    sync::Fence,
};

/// Owns the one-shot transfer command sequence of a single ingestion pass.
/// Every staged copy parks its host-visible source buffer here, so staging
/// memory cannot be released before the device has finished consuming it:
/// the buffers drop only when `flush` returns, after the fence has fired.
/// `flush` consumes the uploader, which makes a second submission of the
/// same sequence unrepresentable.
pub struct Uploader {
    staging: Vec<Buffer>,
    pub command_buffer: CommandBuffer,
    fence: Fence,
    copies: u32,
}

impl Uploader {
    pub fn new(dev: &Dev) -> Self {
        let command_buffer = CommandBuffer::new(&dev.graphics_command_pool);
        command_buffer.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        Self {
            staging: vec![],
            command_buffer,
            fence: Fence::unsignaled(&dev.device),
            copies: 0,
        }
    }

    /// Copies `data` into a new staging buffer and records a transfer into
    /// a new device-local buffer, which is returned immediately. The data
    /// only actually lands on the device when `flush` runs.
    pub fn stage_buffer<T: Copy>(
        &mut self,
        dev: &Dev,
        usage: vk::BufferUsageFlags,
        data: &[T],
    ) -> Buffer {
        let bytes = unsafe {
            std::slice::from_raw_parts(data.as_ptr() as *const u8, std::mem::size_of_val(data))
        };

        let staging = Buffer::staging(dev, bytes);
        let buffer = Buffer::device_local(dev, bytes.len() as vk::DeviceSize, usage);
        self.command_buffer
            .copy_buffer(&staging, &buffer, bytes.len() as vk::DeviceSize);

        self.staging.push(staging);
        self.copies += 1;
        buffer
    }

    /// Creates the device-local image for `decoded` and records the copy of
    /// all its mip levels
    pub fn stage_image(&mut self, dev: &Dev, decoded: &DecodedImage) -> Image {
        let mut image = Image::new(
            dev,
            decoded.width,
            decoded.height,
            decoded.format,
            decoded.levels.len() as u32,
        );

        let staging = Buffer::staging(dev, &decoded.data);
        image.record_copy_from(&self.command_buffer, &staging, &decoded.levels);

        self.staging.push(staging);
        self.copies += 1;
        image
    }

    /// Closes and submits the sequence exactly once, then blocks until the
    /// completion signal fires. All staging buffers die with the uploader
    /// when this returns.
    pub fn flush(mut self, dev: &Dev) {
        if self.copies == 0 {
            // Submitting an empty sequence would be a programming error, so
            // a fully-skipped scene simply never submits
            log::debug!("No transfers recorded, skipping submission");
            return;
        }

        self.command_buffer.end();

        let command_buffers = [self.command_buffer.command_buffer];
        let submits = [vk::SubmitInfo::default().command_buffers(&command_buffers)];
        dev.graphics_queue.submit(&submits, Some(&mut self.fence));
        self.fence.wait();

        log::debug!(
            "{} transfers completed, releasing {} staging buffers",
            self.copies,
            self.staging.len()
        );
    }
}
