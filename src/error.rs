// Copyright © 2022
// Author: Antonio Caggiano <info@antoniocaggiano.eu>
// SPDX-License-Identifier: MIT

use thiserror::Error;

/// Asset-structure failures which abort ingestion of the whole scene.
/// Per-element failures (a bad material, an odd primitive) never surface
/// here: those are logged and the element is excluded from the result.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read scene file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse scene file: {0}")]
    Parse(#[from] gltf::Error),

    #[error("scene file declares no scene")]
    NoScene,

    #[error("buffer {0} has no resolvable data")]
    MissingBuffer(usize),

    #[error("unsupported external reference: {0}")]
    UnsupportedUri(String),
}

/// Failure to decode a single texture. Contained by the loader: the
/// affected materials are excluded and ingestion continues.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to decode image: {0}")]
    Png(#[from] png::DecodingError),

    #[error("malformed texture container: {0}")]
    Container(String),

    #[error("image source is not available: {0}")]
    Source(String),
}
