// Copyright © 2022
// Author: Antonio Caggiano <info@antoniocaggiano.eu>
// SPDX-License-Identifier: MIT

use ash::vk;
use nalgebra as na;

use crate::{
    commands::CommandBuffer,
    descriptor::{DescriptorPool, SceneLayout},
    image::{Image, ImageView},
    mesh::{Material, Mesh, Primitive},
    sampler::Sampler,
    texture::Texture,
    util::{Handle, Pack},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LightKind {
    Directional,
    Point,
}

/// Only color and kind are stored. Where the light acts from is a property
/// of its node: direction and position are derived from the node's global
/// transform during traversal and never cached.
pub struct Light {
    pub color: na::Vector3<f32>,
    pub kind: LightKind,
}

impl Light {
    pub fn directional(color: na::Vector3<f32>) -> Self {
        Self {
            color,
            kind: LightKind::Directional,
        }
    }

    pub fn point(color: na::Vector3<f32>) -> Self {
        Self {
            color,
            kind: LightKind::Point,
        }
    }

    /// Effective direction of a directional light: the normalized third
    /// column of its node's global transform
    pub fn direction(global: &na::Matrix4<f32>) -> na::Vector3<f32> {
        na::Vector3::new(global[(0, 2)], global[(1, 2)], global[(2, 2)]).normalize()
    }

    /// Effective position of a point light: the translation column of its
    /// node's global transform
    pub fn position(global: &na::Matrix4<f32>) -> na::Vector3<f32> {
        na::Vector3::new(global[(0, 3)], global[(1, 3)], global[(2, 3)])
    }
}

/// A node of the scene tree: local transform plus optional references into
/// the mesh and light packs. The global transform is not here on purpose,
/// it exists only while a traversal is running.
pub struct Node {
    pub name: String,
    pub transform: na::Matrix4<f32>,
    pub mesh: Handle<Mesh>,
    pub light: Handle<Light>,
    pub children: Vec<Handle<Node>>,
}

impl Node {
    pub fn new() -> Self {
        Self {
            name: String::from("undefined"),
            transform: na::Matrix4::identity(),
            mesh: Handle::none(),
            light: Handle::none(),
            children: vec![],
        }
    }
}

impl Default for Node {
    fn default() -> Self {
        Self::new()
    }
}

/// Called once per node per traversal with the node's freshly computed
/// global transform
pub trait NodeVisitor {
    fn visit(&mut self, scene: &Scene, node: &Node, global: &na::Matrix4<f32>);
}

/// Visitor which gathers the frame's effective light parameters for the
/// frame-loop collaborator
#[derive(Default)]
pub struct LightCollector {
    pub directional: Vec<DirectionalLight>,
    pub point: Vec<PointLight>,
}

pub struct DirectionalLight {
    pub color: na::Vector3<f32>,
    pub direction: na::Vector3<f32>,
}

pub struct PointLight {
    pub color: na::Vector3<f32>,
    pub position: na::Vector3<f32>,
}

impl LightCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.directional.clear();
        self.point.clear();
    }
}

impl NodeVisitor for LightCollector {
    fn visit(&mut self, scene: &Scene, node: &Node, global: &na::Matrix4<f32>) {
        if let Some(light) = scene.lights.get(node.light) {
            match light.kind {
                LightKind::Directional => self.directional.push(DirectionalLight {
                    color: light.color,
                    direction: Light::direction(global),
                }),
                LightKind::Point => self.point.push(PointLight {
                    color: light.color,
                    position: Light::position(global),
                }),
            }
        }
    }
}

/// One primitive to draw this frame with its resolved global transform
pub struct DrawCall {
    pub material: Handle<Material>,
    pub primitive: Handle<Primitive>,
    pub transform: na::Matrix4<f32>,
}

/// Depth-first pre-order walk computing each node's global transform
/// exactly once and threading it down to the children
pub fn walk_nodes(
    nodes: &Pack<Node>,
    handle: Handle<Node>,
    parent: &na::Matrix4<f32>,
    visit: &mut dyn FnMut(&Node, &na::Matrix4<f32>),
) {
    let node = match nodes.get(handle) {
        Some(node) => node,
        None => return,
    };

    let global = parent * node.transform;
    visit(node, &global);

    for &child in &node.children {
        walk_nodes(nodes, child, &global, visit);
    }
}

/// Draws sharing a material become contiguous, so rendering binds each
/// material's descriptor set exactly once
fn sort_by_material(draws: &mut [DrawCall]) {
    draws.sort_by_key(|draw| draw.material.id);
}

/// Everything ingestion produced, ready for per-frame traversal. All GPU
/// resources are owned by the packs; the source asset is gone by the time
/// a scene exists.
pub struct Scene {
    pub nodes: Pack<Node>,
    pub roots: Vec<Handle<Node>>,
    pub meshes: Pack<Mesh>,
    pub primitives: Pack<Primitive>,
    pub materials: Pack<Material>,
    pub lights: Pack<Light>,
    pub textures: Pack<Texture>,
    pub views: Pack<ImageView>,
    pub images: Pack<Image>,
    pub samplers: Pack<Sampler>,
    pub layout: SceneLayout,
    pub pool: DescriptorPool,
    draws: Vec<DrawCall>,
}

impl Scene {
    pub fn new(layout: SceneLayout, pool: DescriptorPool) -> Self {
        Self {
            nodes: Pack::new(),
            roots: vec![],
            meshes: Pack::new(),
            primitives: Pack::new(),
            materials: Pack::new(),
            lights: Pack::new(),
            textures: Pack::new(),
            views: Pack::new(),
            images: Pack::new(),
            samplers: Pack::new(),
            layout,
            pool,
            draws: vec![],
        }
    }

    /// Frame-start traversal: recomputes global transforms top-down, lets
    /// the visitor observe every node, and rebuilds the draw list grouped
    /// by material
    pub fn update(&mut self, visitor: &mut dyn NodeVisitor) {
        let mut draws = Vec::new();

        let roots = self.roots.clone();
        for root in roots {
            let scene = &*self;
            walk_nodes(
                &scene.nodes,
                root,
                &na::Matrix4::identity(),
                &mut |node, global| {
                    visitor.visit(scene, node, global);

                    if let Some(mesh) = scene.meshes.get(node.mesh) {
                        for &hprimitive in &mesh.primitives {
                            if let Some(primitive) = scene.primitives.get(hprimitive) {
                                draws.push(DrawCall {
                                    material: primitive.material,
                                    primitive: hprimitive,
                                    transform: *global,
                                });
                            }
                        }
                    }
                },
            );
        }

        sort_by_material(&mut draws);
        self.draws = draws;
    }

    /// Emits the draw commands for the last `update`: one descriptor bind
    /// per material group, one model-matrix push per primitive
    pub fn render(&self, cmd: &CommandBuffer) {
        let mut bound = Handle::<Material>::none();

        for draw in &self.draws {
            let material = match self.materials.get(draw.material) {
                Some(material) => material,
                None => continue,
            };
            let primitive = match self.primitives.get(draw.primitive) {
                Some(primitive) => primitive,
                None => continue,
            };

            if draw.material != bound {
                cmd.bind_descriptor_sets(self.layout.pipeline_layout, &[material.set], 0);
                bound = draw.material;
            }

            let constants = unsafe {
                std::slice::from_raw_parts(
                    draw.transform.as_slice().as_ptr() as *const u8,
                    std::mem::size_of::<na::Matrix4<f32>>(),
                )
            };
            cmd.push_constants(
                self.layout.pipeline_layout,
                vk::ShaderStageFlags::VERTEX,
                0,
                constants,
            );

            cmd.bind_vertex_buffer(&primitive.vertices);
            cmd.bind_index_buffer(&primitive.indices, primitive.index_type);
            cmd.draw_indexed(primitive.index_count, 0, 0);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn translation(x: f32, y: f32, z: f32) -> na::Matrix4<f32> {
        na::Matrix4::new_translation(&na::Vector3::new(x, y, z))
    }

    fn chain() -> (Pack<Node>, Handle<Node>, Handle<Node>) {
        // root -> a -> b
        let mut nodes = Pack::new();

        let mut b = Node::new();
        b.transform = translation(0.0, 0.0, 4.0);
        let hb = nodes.push(b);

        let mut a = Node::new();
        a.transform = translation(0.0, 2.0, 0.0);
        a.children.push(hb);
        let ha = nodes.push(a);

        let mut root = Node::new();
        root.transform = translation(1.0, 0.0, 0.0);
        root.children.push(ha);
        let hroot = nodes.push(root);

        (nodes, hroot, hb)
    }

    #[test]
    fn globals_compose_along_the_chain() {
        let (nodes, hroot, _) = chain();

        let mut globals = vec![];
        walk_nodes(&nodes, hroot, &na::Matrix4::identity(), &mut |_, global| {
            globals.push(*global)
        });

        assert_eq!(globals.len(), 3);
        let expected =
            translation(1.0, 0.0, 0.0) * translation(0.0, 2.0, 0.0) * translation(0.0, 0.0, 4.0);
        assert_eq!(globals[2], expected);
        assert_eq!(globals[2], translation(1.0, 2.0, 4.0));
    }

    #[test]
    fn repeated_traversal_does_not_drift() {
        let (nodes, hroot, _) = chain();

        let mut first = vec![];
        walk_nodes(&nodes, hroot, &na::Matrix4::identity(), &mut |_, global| {
            first.push(*global)
        });

        for _ in 0..10 {
            let mut again = vec![];
            walk_nodes(&nodes, hroot, &na::Matrix4::identity(), &mut |_, global| {
                again.push(*global)
            });
            assert_eq!(first, again);
        }
    }

    #[test]
    fn light_parameters_derive_from_the_global_transform() {
        // Rotate 90 degrees around x: the z axis ends up along y
        let rotation =
            na::Matrix4::from_axis_angle(&na::Vector3::x_axis(), std::f32::consts::FRAC_PI_2);
        let global = translation(3.0, 0.0, 0.0) * rotation;

        let direction = Light::direction(&global);
        assert!((direction - na::Vector3::new(0.0, 1.0, 0.0)).norm() < 1e-5);

        let position = Light::position(&global);
        assert_eq!(position, na::Vector3::new(3.0, 0.0, 0.0));
    }

    #[test]
    fn draws_group_by_material() {
        let transform = na::Matrix4::identity();
        let mut draws = vec![
            DrawCall {
                material: Handle::new(1),
                primitive: Handle::new(0),
                transform,
            },
            DrawCall {
                material: Handle::new(0),
                primitive: Handle::new(1),
                transform,
            },
            DrawCall {
                material: Handle::new(1),
                primitive: Handle::new(2),
                transform,
            },
        ];

        sort_by_material(&mut draws);

        // One descriptor bind per material group
        let mut binds = 0;
        let mut bound = Handle::<Material>::none();
        for draw in &draws {
            if draw.material != bound {
                binds += 1;
                bound = draw.material;
            }
        }
        assert_eq!(binds, 2);
    }
}
