// Copyright © 2021-2022
// Author: Antonio Caggiano <info@antoniocaggiano.eu>
// SPDX-License-Identifier: MIT

use crate::{image::ImageView, sampler::Sampler, util::Handle};

/// A sampled image as the shader sees it: a view paired with a sampler.
/// The underlying image and sampler objects live in the scene packs.
pub struct Texture {
    pub view: Handle<ImageView>,
    pub sampler: Handle<Sampler>,
}

impl Texture {
    pub fn new(view: Handle<ImageView>, sampler: Handle<Sampler>) -> Self {
        Self { view, sampler }
    }
}
