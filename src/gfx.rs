// Copyright © 2021-2022
// Author: Antonio Caggiano <info@antoniocaggiano.eu>
// SPDX-License-Identifier: MIT

use std::{
    borrow::Cow,
    cell::RefCell,
    ffi::{CStr, CString},
    mem::ManuallyDrop,
    rc::Rc,
};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};

use super::*;

unsafe extern "system" fn vk_debug(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    if message_severity.intersects(
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
    ) {
        let callback_data = *p_callback_data;
        let message = if callback_data.p_message.is_null() {
            Cow::from("No message")
        } else {
            CStr::from_ptr(callback_data.p_message).to_string_lossy()
        };
        log::warn!("{}", message);
    }
    vk::FALSE
}

pub struct Debug {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl Debug {
    fn new(entry: &ash::Entry, instance: &ash::Instance) -> Self {
        let loader = ash::ext::debug_utils::Instance::new(entry, instance);
        let messenger = unsafe {
            loader
                .create_debug_utils_messenger(
                    &vk::DebugUtilsMessengerCreateInfoEXT::default()
                        .message_severity(
                            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
                        )
                        .message_type(
                            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                        )
                        .pfn_user_callback(Some(vk_debug)),
                    None,
                )
                .expect("Failed to create Vulkan debug messenger")
        };

        Self { loader, messenger }
    }
}

impl Drop for Debug {
    fn drop(&mut self) {
        unsafe {
            self.loader
                .destroy_debug_utils_messenger(self.messenger, None);
        }
    }
}

pub struct CtxBuilder {
    debug: bool,
}

impl CtxBuilder {
    pub fn new() -> Self {
        Self { debug: true }
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn build(self) -> Ctx {
        let mut extension_names = vec![];
        if self.debug {
            extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
        }
        Ctx::new(&extension_names)
    }
}

/// Vulkan entry point and instance. No surface is involved: ingestion only
/// needs a device and a queue, presentation belongs to the caller.
pub struct Ctx {
    debug: Option<Debug>,
    pub entry: ash::Entry,
    pub instance: ash::Instance,
}

impl Ctx {
    pub fn builder() -> CtxBuilder {
        CtxBuilder::new()
    }

    pub fn new(extension_names: &[*const std::os::raw::c_char]) -> Self {
        let is_debug = extension_names.contains(&ash::ext::debug_utils::NAME.as_ptr());

        let mut layers = vec![];
        if is_debug {
            layers.push(CString::new("VK_LAYER_KHRONOS_validation").unwrap());
        }
        let layer_names: Vec<*const std::os::raw::c_char> =
            layers.iter().map(|name| name.as_ptr()).collect();

        let entry = unsafe { ash::Entry::load() }.expect("Failed to load Vulkan entry");
        let name = CString::new("vks").unwrap();
        let app_info = vk::ApplicationInfo::default()
            .application_name(&name)
            .api_version(vk::make_api_version(0, 1, 2, 0));
        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(extension_names)
            .enabled_layer_names(&layer_names);
        let instance = unsafe { entry.create_instance(&create_info, None) }
            .expect("Failed to create Vulkan instance");

        let debug = if is_debug {
            Some(Debug::new(&entry, &instance))
        } else {
            None
        };

        Self {
            debug,
            entry,
            instance,
        }
    }
}

impl Drop for Ctx {
    fn drop(&mut self) {
        drop(self.debug.take());
        unsafe {
            self.instance.destroy_instance(None);
        }
    }
}

/// What the device can do for the formats and features ingestion cares
/// about. Queried once at device creation; decode tasks read it concurrently
/// but never write it.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceCaps {
    /// ETC2 block formats usable as sampled images
    pub etc2: bool,
    /// BC7 block formats usable as sampled images
    pub bc7: bool,
    /// ASTC 4x4 block formats usable as sampled images
    pub astc: bool,
    pub anisotropy: bool,
    pub max_anisotropy: f32,
    /// VK_EXT_index_type_uint8 is enabled on the device
    pub index_uint8: bool,
}

impl DeviceCaps {
    fn sampled(instance: &ash::Instance, physical: vk::PhysicalDevice, format: vk::Format) -> bool {
        let props = unsafe { instance.get_physical_device_format_properties(physical, format) };
        props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE)
    }

    pub fn query(instance: &ash::Instance, physical: vk::PhysicalDevice) -> Self {
        let features = unsafe { instance.get_physical_device_features(physical) };
        let properties = unsafe { instance.get_physical_device_properties(physical) };

        Self {
            etc2: Self::sampled(instance, physical, vk::Format::ETC2_R8G8B8A8_UNORM_BLOCK),
            bc7: Self::sampled(instance, physical, vk::Format::BC7_UNORM_BLOCK),
            astc: Self::sampled(instance, physical, vk::Format::ASTC_4X4_UNORM_BLOCK),
            anisotropy: features.sampler_anisotropy != vk::FALSE,
            max_anisotropy: properties.limits.max_sampler_anisotropy,
            index_uint8: false,
        }
    }
}

pub struct Dev {
    pub caps: DeviceCaps,
    pub graphics_command_pool: CommandPool,
    pub graphics_queue: Queue,
    /// Shared between the buffers and images allocated from it, so resources
    /// can release their memory on drop. Dropped ahead of the device.
    pub allocator: ManuallyDrop<Rc<RefCell<Allocator>>>,
    pub device: Rc<ash::Device>,
    pub physical: vk::PhysicalDevice,
}

impl Dev {
    fn get_graphics_queue_index(instance: &ash::Instance, physical: vk::PhysicalDevice) -> u32 {
        let queue_properties =
            unsafe { instance.get_physical_device_queue_family_properties(physical) };

        let mut graphics_queue_index = std::u32::MAX;

        for (i, queue) in queue_properties.iter().enumerate() {
            if queue.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                graphics_queue_index = i as u32;
                break;
            }
        }

        assert!(
            graphics_queue_index != std::u32::MAX,
            "Failed to find graphics queue"
        );

        graphics_queue_index
    }

    pub fn new(ctx: &Ctx) -> Self {
        // Physical device
        let physical = {
            let phydevs = unsafe {
                ctx.instance
                    .enumerate_physical_devices()
                    .expect("Failed to enumerate Vulkan physical devices")
            };

            for physical in &phydevs {
                let properties = unsafe { ctx.instance.get_physical_device_properties(*physical) };
                let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };
                log::debug!("Physical device: {:?}", name);
            }

            // Choose first one for now
            phydevs[0]
        };

        let graphics_queue_index = Dev::get_graphics_queue_index(&ctx.instance, physical);

        let mut caps = DeviceCaps::query(&ctx.instance, physical);

        let queue_priorities = [1.0];
        let queue_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(graphics_queue_index)
            .queue_priorities(&queue_priorities)];

        // Enable the narrow-index extension when the device offers it
        let index_uint8_name = CString::new("VK_EXT_index_type_uint8").unwrap();
        let extension_properties =
            unsafe { ctx.instance.enumerate_device_extension_properties(physical) }
                .expect("Failed to enumerate Vulkan device extension properties");
        caps.index_uint8 = extension_properties.iter().any(|prop| {
            (unsafe { CStr::from_ptr(prop.extension_name.as_ptr()) }) == index_uint8_name.as_c_str()
        });

        let mut enabled_extensions: Vec<*const std::os::raw::c_char> = vec![];
        if caps.index_uint8 {
            enabled_extensions.push(index_uint8_name.as_ptr());
        }

        let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(caps.anisotropy);
        let mut index_uint8_features =
            vk::PhysicalDeviceIndexTypeUint8FeaturesEXT::default().index_type_uint8(true);

        let mut device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&enabled_extensions)
            .enabled_features(&features);
        if caps.index_uint8 {
            device_create_info = device_create_info.push_next(&mut index_uint8_features);
        }

        let device = unsafe {
            ctx.instance
                .create_device(physical, &device_create_info, None)
                .expect("Failed to create Vulkan logical device")
        };
        let device = Rc::new(device);

        let graphics_queue = Queue::new(&device, graphics_queue_index);
        let graphics_command_pool = CommandPool::new(&device, graphics_queue_index);

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: ctx.instance.clone(),
            device: (*device).clone(),
            physical_device: physical,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .expect("Failed to create Vulkan allocator");

        Self {
            caps,
            graphics_command_pool,
            graphics_queue,
            allocator: ManuallyDrop::new(Rc::new(RefCell::new(allocator))),
            device,
            physical,
        }
    }

    pub fn wait(&self) {
        unsafe {
            self.device
                .device_wait_idle()
                .expect("Failed to wait for Vulkan device");
        }
    }
}

impl Drop for Dev {
    fn drop(&mut self) {
        self.wait();
        unsafe {
            ManuallyDrop::drop(&mut self.allocator);
        }
        self.graphics_command_pool.destroy();
        unsafe {
            self.device.destroy_device(None);
        }
    }
}
