// Copyright © 2021-2022
// Author: Antonio Caggiano <info@antoniocaggiano.eu>
// SPDX-License-Identifier: MIT

pub use ash;
pub use gltf;
pub use nalgebra as na;

pub mod util;
pub use util::*;

pub mod error;
pub use error::*;

pub mod gfx;
pub use gfx::*;

pub mod sync;
pub use sync::*;

pub mod queue;
pub use queue::*;

pub mod commands;
pub use commands::*;

pub mod buffer;
pub use buffer::*;

pub mod image;
pub use image::*;

pub mod sampler;
pub use sampler::*;

pub mod texture;
pub use texture::*;

pub mod decoder;
pub use decoder::*;

pub mod staging;
pub use staging::*;

pub mod descriptor;
pub use descriptor::*;

pub mod mesh;
pub use mesh::*;

pub mod scene;
pub use scene::*;

pub mod asset;
pub use asset::*;

pub mod loader;
pub use loader::*;
