// Copyright © 2021-2022
// Author: Antonio Caggiano <info@antoniocaggiano.eu>
// SPDX-License-Identifier: MIT

use std::{collections::HashMap, rc::Rc};

use ash::vk;

use crate::util::{Handle, Pack};

/// Complete sampler configuration. Two configurations comparing equal are
/// required to resolve to the very same sampler object, so every field that
/// influences sampling is part of the key; the anisotropy level is stored as
/// raw bits to keep the whole thing hashable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SamplerConfig {
    pub mag_filter: vk::Filter,
    pub min_filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
    pub address_mode_u: vk::SamplerAddressMode,
    pub address_mode_v: vk::SamplerAddressMode,
    pub address_mode_w: vk::SamplerAddressMode,
    pub anisotropy_enable: bool,
    max_anisotropy_bits: u32,
}

impl SamplerConfig {
    pub fn new() -> Self {
        Self {
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode_u: vk::SamplerAddressMode::REPEAT,
            address_mode_v: vk::SamplerAddressMode::REPEAT,
            address_mode_w: vk::SamplerAddressMode::REPEAT,
            anisotropy_enable: false,
            max_anisotropy_bits: 1.0f32.to_bits(),
        }
    }

    pub fn anisotropy(mut self, max_anisotropy: f32) -> Self {
        self.anisotropy_enable = true;
        self.max_anisotropy_bits = max_anisotropy.to_bits();
        self
    }

    pub fn max_anisotropy(&self) -> f32 {
        f32::from_bits(self.max_anisotropy_bits)
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Sampler {
    pub sampler: vk::Sampler,
    device: Rc<ash::Device>,
}

impl Sampler {
    pub fn new(device: &Rc<ash::Device>, config: &SamplerConfig) -> Self {
        let device = device.clone();

        let create_info = vk::SamplerCreateInfo::default()
            .mag_filter(config.mag_filter)
            .min_filter(config.min_filter)
            .mipmap_mode(config.mipmap_mode)
            .address_mode_u(config.address_mode_u)
            .address_mode_v(config.address_mode_v)
            .address_mode_w(config.address_mode_w)
            .anisotropy_enable(config.anisotropy_enable)
            .max_anisotropy(config.max_anisotropy())
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mip_lod_bias(0.0)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE);

        let sampler = unsafe { device.create_sampler(&create_info, None) }
            .expect("Failed to create Vulkan sampler");

        Self { sampler, device }
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.sampler, None);
        }
    }
}

/// Deduplicates samplers by configuration for the duration of one ingestion.
/// Only the single-threaded build phase writes to it.
pub struct SamplerCache {
    cache: HashMap<SamplerConfig, Handle<Sampler>>,
}

impl SamplerCache {
    pub fn new() -> Self {
        Self {
            cache: HashMap::new(),
        }
    }

    pub fn get_or_create(
        &mut self,
        device: &Rc<ash::Device>,
        config: SamplerConfig,
        samplers: &mut Pack<Sampler>,
    ) -> Handle<Sampler> {
        if let Some(handle) = self.cache.get(&config) {
            return *handle;
        }
        let handle = samplers.push(Sampler::new(device, &config));
        self.cache.insert(config, handle);
        handle
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn equal_configs_share_a_key() {
        let a = SamplerConfig::new().anisotropy(8.0);
        let b = SamplerConfig::new().anisotropy(8.0);
        assert_eq!(a, b);

        let mut map = HashMap::new();
        map.insert(a, 0usize);
        assert_eq!(map.get(&b), Some(&0));
    }

    #[test]
    fn differing_configs_do_not_collide() {
        let a = SamplerConfig::new();
        let mut b = SamplerConfig::new();
        b.mag_filter = vk::Filter::NEAREST;
        assert_ne!(a, b);

        let mut c = SamplerConfig::new();
        c.address_mode_u = vk::SamplerAddressMode::CLAMP_TO_EDGE;
        assert_ne!(a, c);

        let d = SamplerConfig::new().anisotropy(4.0);
        assert_ne!(a, d);
    }

    #[test]
    fn anisotropy_round_trips() {
        let config = SamplerConfig::new().anisotropy(16.0);
        assert!(config.anisotropy_enable);
        assert_eq!(config.max_anisotropy(), 16.0);
    }
}
