// Copyright © 2022
// Author: Antonio Caggiano <info@antoniocaggiano.eu>
// SPDX-License-Identifier: MIT

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use ash::vk;
use nalgebra as na;

use crate::{
    asset::Asset,
    decoder::{ColorSpace, ContainerReader, DecodeKey, DecodePool, NoContainers},
    descriptor::{DescriptorPool, SceneLayout},
    error::{DecodeError, LoadError},
    gfx::{Dev, DeviceCaps},
    image::ImageView,
    mesh::{pack_indices, Material, MaterialProps, Mesh, Primitive, Vertex},
    sampler::{SamplerCache, SamplerConfig},
    scene::{Light, Node, Scene},
    staging::Uploader,
    texture::Texture,
    util::Handle,
};

fn display_name(name: Option<&str>) -> &str {
    name.unwrap_or("undefined")
}

/// The three textures a renderable material must provide, each with the
/// color space it is sampled in
struct PbrTextureRefs<'a> {
    base_color: gltf::Texture<'a>,
    metallic_roughness: gltf::Texture<'a>,
    normal: gltf::Texture<'a>,
}

impl<'a> PbrTextureRefs<'a> {
    fn entries(&self) -> [(gltf::Texture<'a>, ColorSpace); 3] {
        [
            (self.base_color.clone(), ColorSpace::Srgb),
            (self.metallic_roughness.clone(), ColorSpace::Linear),
            (self.normal.clone(), ColorSpace::Linear),
        ]
    }
}

/// A material is renderable only with all three of base color, metallic
/// roughness and normal on board. Anything less and it is excluded as a
/// whole; partially bound materials do not exist.
fn pbr_texture_refs<'a>(material: &gltf::Material<'a>) -> Option<PbrTextureRefs<'a>> {
    let pbr = material.pbr_metallic_roughness();
    Some(PbrTextureRefs {
        base_color: pbr.base_color_texture()?.texture(),
        metallic_roughness: pbr.metallic_roughness_texture()?.texture(),
        normal: material.normal_texture()?.texture(),
    })
}

fn address_mode(mode: gltf::texture::WrappingMode) -> vk::SamplerAddressMode {
    use gltf::texture::WrappingMode;
    match mode {
        WrappingMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        WrappingMode::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
        WrappingMode::Repeat => vk::SamplerAddressMode::REPEAT,
    }
}

/// Full sampler configuration for a source sampler. The file has no say on
/// anisotropy, so that follows the device.
fn sampler_config(sampler: &gltf::texture::Sampler, caps: &DeviceCaps) -> SamplerConfig {
    use gltf::texture::{MagFilter, MinFilter};

    let mut config = SamplerConfig::new();

    if let Some(mag) = sampler.mag_filter() {
        config.mag_filter = match mag {
            MagFilter::Nearest => vk::Filter::NEAREST,
            MagFilter::Linear => vk::Filter::LINEAR,
        };
    }

    if let Some(min) = sampler.min_filter() {
        let (filter, mipmap_mode) = match min {
            MinFilter::Nearest | MinFilter::NearestMipmapNearest => {
                (vk::Filter::NEAREST, vk::SamplerMipmapMode::NEAREST)
            }
            MinFilter::NearestMipmapLinear => (vk::Filter::NEAREST, vk::SamplerMipmapMode::LINEAR),
            MinFilter::LinearMipmapNearest => (vk::Filter::LINEAR, vk::SamplerMipmapMode::NEAREST),
            MinFilter::Linear | MinFilter::LinearMipmapLinear => {
                (vk::Filter::LINEAR, vk::SamplerMipmapMode::LINEAR)
            }
        };
        config.min_filter = filter;
        config.mipmap_mode = mipmap_mode;
    }

    config.address_mode_u = address_mode(sampler.wrap_s());
    config.address_mode_v = address_mode(sampler.wrap_t());

    if caps.anisotropy {
        config = config.anisotropy(caps.max_anisotropy);
    }

    config
}

fn build_primitive(
    dev: &Dev,
    asset: &Asset,
    mesh_name: &str,
    primitive: &gltf::Primitive,
    materials: &HashMap<usize, Handle<Material>>,
    uploader: &mut Uploader,
) -> Option<Primitive> {
    if primitive.mode() != gltf::mesh::Mode::Triangles {
        log::warn!(
            "Skipping a primitive of mesh {}: topology {:?} is not supported",
            mesh_name,
            primitive.mode()
        );
        return None;
    }

    let material = match primitive
        .material()
        .index()
        .and_then(|index| materials.get(&index))
    {
        Some(&handle) => handle,
        None => {
            log::warn!(
                "Skipping a primitive of mesh {}: its material is not renderable",
                mesh_name
            );
            return None;
        }
    };

    let reader = primitive.reader(|buffer| asset.buffer_data(buffer));

    let positions: Vec<[f32; 3]> = match reader.read_positions() {
        Some(iter) => iter.collect(),
        None => {
            log::warn!(
                "Skipping a primitive of mesh {}: missing attribute POSITION",
                mesh_name
            );
            return None;
        }
    };
    let normals: Vec<[f32; 3]> = match reader.read_normals() {
        Some(iter) => iter.collect(),
        None => {
            log::warn!(
                "Skipping a primitive of mesh {}: missing attribute NORMAL",
                mesh_name
            );
            return None;
        }
    };
    let tangents: Vec<[f32; 4]> = match reader.read_tangents() {
        Some(iter) => iter.collect(),
        None => {
            log::warn!(
                "Skipping a primitive of mesh {}: missing attribute TANGENT",
                mesh_name
            );
            return None;
        }
    };
    let uvs: Vec<[f32; 2]> = match reader.read_tex_coords(0) {
        Some(iter) => iter.into_f32().collect(),
        None => {
            log::warn!(
                "Skipping a primitive of mesh {}: missing attribute TEXCOORD_0",
                mesh_name
            );
            return None;
        }
    };

    let count = positions.len();
    if count == 0 {
        log::warn!("Skipping a primitive of mesh {}: no vertices", mesh_name);
        return None;
    }
    if normals.len() != count || tangents.len() != count || uvs.len() != count {
        log::warn!(
            "Skipping a primitive of mesh {}: attribute counts do not match",
            mesh_name
        );
        return None;
    }

    let indices: Vec<u32> = match reader.read_indices() {
        Some(iter) => iter.into_u32().collect(),
        None => {
            log::warn!(
                "Skipping a primitive of mesh {}: missing index accessor",
                mesh_name
            );
            return None;
        }
    };
    if indices.is_empty() {
        log::warn!("Skipping a primitive of mesh {}: no indices", mesh_name);
        return None;
    }
    if indices.iter().any(|&index| index as usize >= count) {
        log::warn!(
            "Skipping a primitive of mesh {}: index out of vertex range",
            mesh_name
        );
        return None;
    }

    let vertices: Vec<Vertex> = (0..count)
        .map(|i| Vertex {
            pos: na::Vector3::from(positions[i]),
            normal: na::Vector3::from(normals[i]),
            tangent: na::Vector4::from(tangents[i]),
            uv: na::Vector2::from(uvs[i]),
        })
        .collect();

    let (index_type, index_bytes) = pack_indices(&indices, dev.caps.index_uint8);

    let vertex_buffer = uploader.stage_buffer(dev, vk::BufferUsageFlags::VERTEX_BUFFER, &vertices);
    let index_buffer = uploader.stage_buffer(dev, vk::BufferUsageFlags::INDEX_BUFFER, &index_bytes);

    Some(Primitive::new(
        vertex_buffer,
        index_buffer,
        index_type,
        indices.len() as u32,
        material,
    ))
}

/// Builds a `Scene` out of an asset: decodes textures in parallel, records
/// every upload into one transfer sequence, and wires the node tree. All
/// GPU work happens on the calling thread.
pub struct Loader {
    containers: Arc<dyn ContainerReader>,
}

impl Loader {
    pub fn new() -> Self {
        Self {
            containers: Arc::new(NoContainers),
        }
    }

    /// Ingestion with support for compressed texture containers provided by
    /// the caller
    pub fn with_containers(containers: Arc<dyn ContainerReader>) -> Self {
        Self { containers }
    }

    pub fn load(&self, dev: &Dev, path: impl AsRef<Path>) -> Result<Scene, LoadError> {
        let asset = Asset::open(path)?;
        self.load_asset(dev, &asset)
    }

    pub fn load_asset(&self, dev: &Dev, asset: &Asset) -> Result<Scene, LoadError> {
        // Structural check first: if there is nothing to render, fail
        // before any GPU resource exists
        let scene_ref = asset.default_scene()?;

        // Complete materials decide which images are worth decoding
        let mut complete = vec![];
        for material in asset.document.materials() {
            let index = match material.index() {
                Some(index) => index,
                None => continue,
            };
            match pbr_texture_refs(&material) {
                Some(refs) => complete.push((index, material.clone(), refs)),
                None => log::warn!(
                    "Excluding material {}: a required texture is missing",
                    display_name(material.name())
                ),
            }
        }

        // One decode task per distinct (image, color space), fanned out
        // over the worker pool; results are shared by every material
        // referencing the pair
        let mut pool = DecodePool::new(dev.caps, Arc::clone(&self.containers));
        let mut fetch_failures = vec![];
        let mut requested = std::collections::HashSet::new();
        for (_, _, refs) in &complete {
            for (texture, color_space) in &refs.entries() {
                let key: DecodeKey = (texture.source().index(), *color_space);
                if !requested.insert(key) {
                    continue;
                }
                match asset.image_bytes(&texture.source()) {
                    Ok(bytes) => pool.submit(key, bytes.into_owned()),
                    Err(err) => fetch_failures.push((key, err.to_string())),
                }
            }
        }
        let mut decoded = pool.collect();
        for (key, message) in fetch_failures {
            decoded.insert(key, Err(DecodeError::Source(message)));
        }

        // A material survives only if all three of its textures decoded
        let supported: Vec<_> = complete
            .into_iter()
            .filter(|(_, material, refs)| {
                let ok = refs.entries().iter().all(|(texture, color_space)| {
                    matches!(
                        decoded.get(&(texture.source().index(), *color_space)),
                        Some(Ok(_))
                    )
                });
                if !ok {
                    log::warn!(
                        "Excluding material {}: a texture failed to decode",
                        display_name(material.name())
                    );
                }
                ok
            })
            .collect();

        let layout = SceneLayout::new(&dev.device);

        // Descriptor slots exist for supported materials only. Vulkan does
        // not allow an empty pool, hence the floor of one set.
        let set_count = supported.len().max(1) as u32;
        let pool = DescriptorPool::new(&dev.device, set_count, set_count, set_count * 3);

        let mut scene = Scene::new(layout, pool);
        let mut uploader = Uploader::new(dev);
        let mut sampler_cache = SamplerCache::new();

        // image (index, color space) -> view over the uploaded image
        let mut view_map: HashMap<DecodeKey, Handle<ImageView>> = HashMap::new();
        // texture (index, color space) -> view + sampler pair
        let mut texture_map: HashMap<(usize, ColorSpace), Handle<Texture>> = HashMap::new();
        let mut material_map: HashMap<usize, Handle<Material>> = HashMap::new();

        for (index, material, refs) in &supported {
            let mut texture_handles = vec![];
            let mut bindings = vec![];

            for (texture, color_space) in &refs.entries() {
                let image_key: DecodeKey = (texture.source().index(), *color_space);

                let hview = match view_map.get(&image_key) {
                    Some(&hview) => hview,
                    None => {
                        let data = decoded[&image_key].as_ref().unwrap();
                        let image = uploader.stage_image(dev, data);
                        let view = ImageView::new(&dev.device, &image);
                        scene.images.push(image);
                        let hview = scene.views.push(view);
                        view_map.insert(image_key, hview);
                        hview
                    }
                };

                let texture_key = (texture.index(), *color_space);
                let htexture = match texture_map.get(&texture_key) {
                    Some(&htexture) => htexture,
                    None => {
                        let config = sampler_config(&texture.sampler(), &dev.caps);
                        let hsampler =
                            sampler_cache.get_or_create(&dev.device, config, &mut scene.samplers);
                        let htexture = scene.textures.push(Texture::new(hview, hsampler));
                        texture_map.insert(texture_key, htexture);
                        htexture
                    }
                };

                let built = scene.textures.get(htexture).unwrap();
                bindings.push((
                    scene.views.get(built.view).unwrap().view,
                    scene.samplers.get(built.sampler).unwrap().sampler,
                ));
                texture_handles.push(htexture);
            }

            let pbr = material.pbr_metallic_roughness();
            let props = MaterialProps::new(
                pbr.base_color_factor(),
                pbr.metallic_factor(),
                pbr.roughness_factor(),
                material
                    .normal_texture()
                    .map(|normal| normal.scale())
                    .unwrap_or(1.0),
            );

            let ubo = uploader.stage_buffer(dev, vk::BufferUsageFlags::UNIFORM_BUFFER, &[props]);

            let set = scene.pool.allocate(&[scene.layout.set_layout])[0];
            Material::write_set(
                &dev.device,
                set,
                &ubo,
                &[bindings[0], bindings[1], bindings[2]],
            );

            let hmaterial = scene.materials.push(Material {
                props,
                base_color: texture_handles[0],
                metallic_roughness: texture_handles[1],
                normal: texture_handles[2],
                ubo,
                set,
            });
            material_map.insert(*index, hmaterial);
        }

        // Decoded pixel data is done for: only the GPU images survive
        drop(decoded);

        // Meshes and their primitives
        let mut mesh_map = vec![];
        for mesh in asset.document.meshes() {
            let name = display_name(mesh.name()).to_string();

            let mut primitives = vec![];
            for primitive in mesh.primitives() {
                if let Some(primitive) =
                    build_primitive(dev, asset, &name, &primitive, &material_map, &mut uploader)
                {
                    primitives.push(scene.primitives.push(primitive));
                }
            }

            if primitives.is_empty() {
                log::warn!("Mesh {} has no renderable primitives", name);
            }

            mesh_map.push(scene.meshes.push(Mesh::new(name, primitives)));
        }

        // Lights
        let mut light_map = vec![];
        if let Some(lights) = asset.document.lights() {
            for light in lights {
                use gltf::khr_lights_punctual::Kind;

                let color = na::Vector3::from(light.color());
                let handle = match light.kind() {
                    Kind::Directional => scene.lights.push(Light::directional(color)),
                    Kind::Point => scene.lights.push(Light::point(color)),
                    Kind::Spot { .. } => {
                        log::warn!(
                            "Skipping light {}: spot lights are not supported",
                            display_name(light.name())
                        );
                        Handle::none()
                    }
                };
                light_map.push(handle);
            }
        }

        // Nodes are built in two passes: materialize them all first, then
        // wire children, so a node can appear as a child before it has been
        // visited as a parent
        let mut node_map = vec![];
        for node in asset.document.nodes() {
            let mut out = Node::new();
            out.name = display_name(node.name()).to_string();

            let columns = node.transform().matrix();
            out.transform = na::Matrix4::from_fn(|row, column| columns[column][row]);

            if let Some(mesh) = node.mesh() {
                out.mesh = mesh_map[mesh.index()];
            }
            if let Some(light) = node.light() {
                out.light = light_map[light.index()];
            }

            node_map.push(scene.nodes.push(out));
        }
        for node in asset.document.nodes() {
            let children = node
                .children()
                .map(|child| node_map[child.index()])
                .collect();
            scene.nodes.get_mut(node_map[node.index()]).unwrap().children = children;
        }

        scene.roots = scene_ref.nodes().map(|node| node_map[node.index()]).collect();

        // Nothing built above may be read by the device before this returns
        uploader.flush(dev);

        log::info!(
            "Scene ready: {} nodes, {} meshes, {} primitives, {} materials, {} lights",
            scene.nodes.len(),
            scene.meshes.len(),
            scene.primitives.len(),
            scene.materials.len(),
            scene.lights.len(),
        );

        Ok(scene)
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    // A document with two materials: one fully textured, one without a
    // normal map
    const TWO_MATERIALS: &str = r#"{
        "asset": {"version": "2.0"},
        "scenes": [{"nodes": []}],
        "images": [
            {"uri": "base.png"},
            {"uri": "mr.png"},
            {"uri": "normal.png"}
        ],
        "samplers": [{"magFilter": 9728, "wrapS": 33071}],
        "textures": [
            {"source": 0, "sampler": 0},
            {"source": 1, "sampler": 0},
            {"source": 2, "sampler": 0}
        ],
        "materials": [
            {
                "name": "full",
                "pbrMetallicRoughness": {
                    "baseColorTexture": {"index": 0},
                    "metallicRoughnessTexture": {"index": 1}
                },
                "normalTexture": {"index": 2}
            },
            {
                "name": "no-normal",
                "pbrMetallicRoughness": {
                    "baseColorTexture": {"index": 0},
                    "metallicRoughnessTexture": {"index": 1}
                }
            }
        ]
    }"#;

    #[test]
    fn incomplete_materials_are_not_renderable() {
        let asset = Asset::from_slice(TWO_MATERIALS.as_bytes(), ".").unwrap();

        let complete: Vec<_> = asset
            .document
            .materials()
            .filter(|material| pbr_texture_refs(material).is_some())
            .collect();

        assert_eq!(complete.len(), 1);
        assert_eq!(complete[0].name(), Some("full"));
    }

    #[test]
    fn texture_color_spaces_follow_their_use() {
        let asset = Asset::from_slice(TWO_MATERIALS.as_bytes(), ".").unwrap();
        let material = asset.document.materials().next().unwrap();
        let refs = pbr_texture_refs(&material).unwrap();

        let entries = refs.entries();
        assert_eq!(entries[0].1, ColorSpace::Srgb);
        assert_eq!(entries[1].1, ColorSpace::Linear);
        assert_eq!(entries[2].1, ColorSpace::Linear);
    }

    #[test]
    fn sampler_configs_translate_filters_and_wrapping() {
        let asset = Asset::from_slice(TWO_MATERIALS.as_bytes(), ".").unwrap();
        let sampler = asset.document.samplers().next().unwrap();

        let config = sampler_config(&sampler, &DeviceCaps::default());
        assert_eq!(config.mag_filter, vk::Filter::NEAREST);
        assert_eq!(config.address_mode_u, vk::SamplerAddressMode::CLAMP_TO_EDGE);
        assert_eq!(config.address_mode_v, vk::SamplerAddressMode::REPEAT);
        assert!(!config.anisotropy_enable);
    }

    #[test]
    fn device_anisotropy_joins_the_sampler_config() {
        let asset = Asset::from_slice(TWO_MATERIALS.as_bytes(), ".").unwrap();
        let sampler = asset.document.samplers().next().unwrap();

        let caps = DeviceCaps {
            anisotropy: true,
            max_anisotropy: 16.0,
            ..Default::default()
        };
        let config = sampler_config(&sampler, &caps);
        assert!(config.anisotropy_enable);
        assert_eq!(config.max_anisotropy(), 16.0);
    }
}
