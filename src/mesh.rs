// Copyright © 2021-2022
// Author: Antonio Caggiano <info@antoniocaggiano.eu>
// SPDX-License-Identifier: MIT

use ash::vk;
use byteorder::{LittleEndian, WriteBytesExt};
use memoffset::offset_of;
use nalgebra as na;

use crate::{buffer::Buffer, texture::Texture, util::Handle};

pub trait VertexInput {
    fn get_bindings() -> vk::VertexInputBindingDescription;
    fn get_attributes() -> Vec<vk::VertexInputAttributeDescription>;
}

/// The attributes every renderable primitive must provide. There are no
/// defaults: a source primitive missing one of these is not constructed.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Vertex {
    pub pos: na::Vector3<f32>,
    pub normal: na::Vector3<f32>,
    pub tangent: na::Vector4<f32>,
    pub uv: na::Vector2<f32>,
}

impl Vertex {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self {
            pos: na::Vector3::new(x, y, z),
            // From the screen towards the viewer
            normal: na::Vector3::new(0.0, 0.0, 1.0),
            tangent: na::Vector4::new(1.0, 0.0, 0.0, 1.0),
            uv: na::Vector2::new(0.0, 0.0),
        }
    }
}

impl VertexInput for Vertex {
    fn get_bindings() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::default()
            .binding(0)
            .stride(std::mem::size_of::<Vertex>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
    }

    fn get_attributes() -> Vec<vk::VertexInputAttributeDescription> {
        vec![
            // position
            vk::VertexInputAttributeDescription::default()
                .binding(0)
                .location(0)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(offset_of!(Vertex, pos) as u32),
            // normal
            vk::VertexInputAttributeDescription::default()
                .binding(0)
                .location(1)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(offset_of!(Vertex, normal) as u32),
            // tangent
            vk::VertexInputAttributeDescription::default()
                .binding(0)
                .location(2)
                .format(vk::Format::R32G32B32A32_SFLOAT)
                .offset(offset_of!(Vertex, tangent) as u32),
            // texture coordinates
            vk::VertexInputAttributeDescription::default()
                .binding(0)
                .location(3)
                .format(vk::Format::R32G32_SFLOAT)
                .offset(offset_of!(Vertex, uv) as u32),
        ]
    }
}

/// Factors uploaded next to the material textures
#[repr(C)]
#[derive(Clone, Copy)]
pub struct MaterialProps {
    pub base_color_factor: [f32; 4],
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    pub normal_scale: f32,
    padding: f32,
}

impl MaterialProps {
    pub fn new(
        base_color_factor: [f32; 4],
        metallic_factor: f32,
        roughness_factor: f32,
        normal_scale: f32,
    ) -> Self {
        Self {
            base_color_factor,
            metallic_factor,
            roughness_factor,
            normal_scale,
            padding: 0.0,
        }
    }
}

impl Default for MaterialProps {
    fn default() -> Self {
        Self::new([1.0, 1.0, 1.0, 1.0], 1.0, 1.0, 1.0)
    }
}

/// A fully built material: either all three textures resolved and decoded,
/// or the material does not exist at all. Partial materials are never
/// constructed.
pub struct Material {
    pub props: MaterialProps,
    pub base_color: Handle<Texture>,
    pub metallic_roughness: Handle<Texture>,
    pub normal: Handle<Texture>,
    /// Device-local properties buffer bound at binding 0
    pub ubo: Buffer,
    pub set: vk::DescriptorSet,
}

impl Material {
    pub fn get_set_layout_bindings() -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
        let props = vk::DescriptorSetLayoutBinding::default()
            .binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT);

        let mut bindings = vec![props];

        // base color, metallic roughness, normal
        for binding in 1..=3 {
            bindings.push(
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::FRAGMENT),
            );
        }

        bindings
    }

    /// Writes the properties buffer and the three image-sampler pairs into
    /// `set`. Called exactly once per material, right after allocation.
    pub fn write_set(
        device: &ash::Device,
        set: vk::DescriptorSet,
        ubo: &Buffer,
        textures: &[(vk::ImageView, vk::Sampler); 3],
    ) {
        let buffer_info = [vk::DescriptorBufferInfo::default()
            .range(std::mem::size_of::<MaterialProps>() as vk::DeviceSize)
            .buffer(ubo.buffer)];

        let image_infos: Vec<[vk::DescriptorImageInfo; 1]> = textures
            .iter()
            .map(|(view, sampler)| {
                [vk::DescriptorImageInfo::default()
                    .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                    .image_view(*view)
                    .sampler(*sampler)]
            })
            .collect();

        let mut writes = vec![vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(0)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(&buffer_info)];

        for (i, image_info) in image_infos.iter().enumerate() {
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(1 + i as u32)
                    .dst_array_element(0)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(image_info),
            );
        }

        unsafe {
            device.update_descriptor_sets(&writes, &[]);
        }
    }
}

pub struct Primitive {
    pub vertices: Buffer,
    pub indices: Buffer,
    pub index_type: vk::IndexType,
    pub index_count: u32,
    pub material: Handle<Material>,
}

impl Primitive {
    pub fn new(
        vertices: Buffer,
        indices: Buffer,
        index_type: vk::IndexType,
        index_count: u32,
        material: Handle<Material>,
    ) -> Self {
        Self {
            vertices,
            indices,
            index_type,
            index_count,
            material,
        }
    }
}

/// Ordered collection of primitives. A mesh whose primitives were all
/// skipped still exists, it just renders nothing.
pub struct Mesh {
    pub name: String,
    pub primitives: Vec<Handle<Primitive>>,
}

impl Mesh {
    pub fn new(name: String, primitives: Vec<Handle<Primitive>>) -> Self {
        Self { name, primitives }
    }
}

/// Narrowest index width in bits whose range can address `max_index`,
/// i.e. the smallest W of {8, 16, 32} with 2^W > max_index
pub fn index_width(max_index: u32) -> u32 {
    if max_index < (1 << 8) {
        8
    } else if max_index < (1 << 16) {
        16
    } else {
        32
    }
}

/// Packs `indices` into the narrowest representation the device can bind.
/// 8-bit index buffers need a device capability; without it the width is
/// promoted to 16.
pub fn pack_indices(indices: &[u32], allow_uint8: bool) -> (vk::IndexType, Vec<u8>) {
    let max = indices.iter().copied().max().unwrap_or(0);

    let mut width = index_width(max);
    if width == 8 && !allow_uint8 {
        width = 16;
    }

    match width {
        8 => {
            let bytes = indices.iter().map(|&index| index as u8).collect();
            (vk::IndexType::UINT8_EXT, bytes)
        }
        16 => {
            let mut bytes = Vec::with_capacity(indices.len() * 2);
            for &index in indices {
                bytes.write_u16::<LittleEndian>(index as u16).unwrap();
            }
            (vk::IndexType::UINT16, bytes)
        }
        _ => {
            let mut bytes = Vec::with_capacity(indices.len() * 4);
            for &index in indices {
                bytes.write_u32::<LittleEndian>(index).unwrap();
            }
            (vk::IndexType::UINT32, bytes)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn index_width_is_minimal() {
        let cases = [
            (0u32, 8u32),
            (2, 8),
            (255, 8),
            (256, 16),
            (65535, 16),
            (65536, 32),
            (std::u32::MAX, 32),
        ];
        for &(max, expected) in &cases {
            let width = index_width(max);
            assert_eq!(width, expected);
            // 2^W > max, and no narrower supported width satisfies that
            if width < 32 {
                assert!((1u64 << width) > u64::from(max));
            }
            if width > 8 {
                let narrower = if width == 32 { 16 } else { 8 };
                assert!((1u64 << narrower) <= u64::from(max));
            }
        }
    }

    #[test]
    fn triangle_packs_to_16_bits_without_uint8_support() {
        let (index_type, bytes) = pack_indices(&[0, 1, 2], false);
        assert_eq!(index_type, vk::IndexType::UINT16);
        assert_eq!(bytes, vec![0, 0, 1, 0, 2, 0]);
    }

    #[test]
    fn narrow_indices_pack_to_8_bits_when_supported() {
        let (index_type, bytes) = pack_indices(&[0, 1, 2], true);
        assert_eq!(index_type, vk::IndexType::UINT8_EXT);
        assert_eq!(bytes, vec![0, 1, 2]);
    }

    #[test]
    fn wide_indices_pack_to_32_bits() {
        let (index_type, bytes) = pack_indices(&[0, 70000], true);
        assert_eq!(index_type, vk::IndexType::UINT32);
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[4..], &[0x70, 0x11, 0x01, 0x00]);
    }

    #[test]
    fn vertex_attributes_cover_all_required_inputs() {
        let attributes = Vertex::get_attributes();
        assert_eq!(attributes.len(), 4);
        assert_eq!(
            Vertex::get_bindings().stride as usize,
            std::mem::size_of::<Vertex>()
        );
    }
}
