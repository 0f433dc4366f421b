// Copyright © 2022
// Author: Antonio Caggiano <info@antoniocaggiano.eu>
// SPDX-License-Identifier: MIT

use std::rc::Rc;

use ash::vk;

use crate::mesh::Material;

/// Descriptor pool for material sets. Sized by the caller from the final
/// count of supported materials, so excluded materials consume no slots.
pub struct DescriptorPool {
    pool: vk::DescriptorPool,
    pub device: Rc<ash::Device>,
}

impl DescriptorPool {
    /// `set_count`: how many descriptor sets can be allocated from this pool
    /// `uniform_count`: total uniform descriptors among all sets
    /// `sampler_count`: total combined image sampler descriptors among all sets
    pub fn new(
        device: &Rc<ash::Device>,
        set_count: u32,
        uniform_count: u32,
        sampler_count: u32,
    ) -> Self {
        let pool = unsafe {
            let uniform_pool_size = vk::DescriptorPoolSize::default()
                .descriptor_count(uniform_count)
                .ty(vk::DescriptorType::UNIFORM_BUFFER);

            let sampler_pool_size = vk::DescriptorPoolSize::default()
                .descriptor_count(sampler_count)
                .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER);

            let pool_sizes = [uniform_pool_size, sampler_pool_size];
            let create_info = vk::DescriptorPoolCreateInfo::default()
                .pool_sizes(&pool_sizes)
                .max_sets(set_count);
            device.create_descriptor_pool(&create_info, None)
        }
        .expect("Failed to create Vulkan descriptor pool");

        Self {
            pool,
            device: device.clone(),
        }
    }

    pub fn allocate(&mut self, layouts: &[vk::DescriptorSetLayout]) -> Vec<vk::DescriptorSet> {
        let create_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);

        unsafe { self.device.allocate_descriptor_sets(&create_info) }
            .expect("Failed to allocate Vulkan descriptor sets")
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe { self.device.destroy_descriptor_pool(self.pool, None) };
    }
}

/// Set layout for material bindings plus the pipeline layout the renderer
/// collaborator builds its pipelines against: one vertex-stage push range
/// for the model matrix and one fragment-stage range for a view-dependent
/// value.
pub struct SceneLayout {
    pub set_layout: vk::DescriptorSetLayout,
    pub pipeline_layout: vk::PipelineLayout,
    device: Rc<ash::Device>,
}

impl SceneLayout {
    pub fn push_constant_ranges() -> [vk::PushConstantRange; 2] {
        let model = vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .offset(0)
            .size(std::mem::size_of::<nalgebra::Matrix4<f32>>() as u32);

        let view = vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)
            .offset(std::mem::size_of::<nalgebra::Matrix4<f32>>() as u32)
            .size(std::mem::size_of::<nalgebra::Vector4<f32>>() as u32);

        [model, view]
    }

    pub fn new(device: &Rc<ash::Device>) -> Self {
        let bindings = Material::get_set_layout_bindings();
        let set_layout = {
            let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
            unsafe { device.create_descriptor_set_layout(&create_info, None) }
                .expect("Failed to create Vulkan descriptor set layout")
        };

        let constants = Self::push_constant_ranges();
        let set_layouts = [set_layout];
        let pipeline_layout = {
            let create_info = vk::PipelineLayoutCreateInfo::default()
                .set_layouts(&set_layouts)
                .push_constant_ranges(&constants);
            unsafe { device.create_pipeline_layout(&create_info, None) }
                .expect("Failed to create Vulkan pipeline layout")
        };

        Self {
            set_layout,
            pipeline_layout,
            device: device.clone(),
        }
    }
}

impl Drop for SceneLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .destroy_pipeline_layout(self.pipeline_layout, None);
            self.device
                .destroy_descriptor_set_layout(self.set_layout, None);
        }
    }
}
