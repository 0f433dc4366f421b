// Copyright © 2021-2022
// Author: Antonio Caggiano <info@antoniocaggiano.eu>
// SPDX-License-Identifier: MIT

use std::rc::Rc;

use ash::vk;

use crate::sync::Fence;

pub struct Queue {
    pub queue: vk::Queue,
    device: Rc<ash::Device>,
}

impl Queue {
    pub fn new(device: &Rc<ash::Device>, queue_family_index: u32) -> Self {
        let device = device.clone();

        let queue = unsafe { device.get_device_queue(queue_family_index, 0) };

        Queue { queue, device }
    }

    pub fn submit(&self, submits: &[vk::SubmitInfo], fence: Option<&mut Fence>) {
        let fence = match fence {
            Some(fence) => {
                fence.reset();
                fence.can_wait = true;
                fence.fence
            }
            None => vk::Fence::null(),
        };

        unsafe { self.device.queue_submit(self.queue, submits, fence) }
            .expect("Failed to submit to Vulkan queue")
    }
}
