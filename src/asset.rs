// Copyright © 2022
// Author: Antonio Caggiano <info@antoniocaggiano.eu>
// SPDX-License-Identifier: MIT

use std::{
    borrow::Cow,
    fs,
    path::{Path, PathBuf},
};

use base64::Engine;

use crate::error::LoadError;

/// Parsed scene description plus its resolved binary buffers. Read-only for
/// the whole build: every element is addressed by its stable glTF index.
pub struct Asset {
    pub document: gltf::Document,
    buffers: Vec<Vec<u8>>,
    dir: PathBuf,
}

impl Asset {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let gltf::Gltf { document, blob } = gltf::Gltf::open(path)?;
        let dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
        Self::new(document, blob, dir)
    }

    /// Parses an in-memory glTF or GLB document. External references are
    /// resolved relative to `dir`.
    pub fn from_slice(bytes: &[u8], dir: impl AsRef<Path>) -> Result<Self, LoadError> {
        let gltf::Gltf { document, blob } = gltf::Gltf::from_slice(bytes)?;
        Self::new(document, blob, dir.as_ref().to_path_buf())
    }

    fn new(
        document: gltf::Document,
        mut blob: Option<Vec<u8>>,
        dir: PathBuf,
    ) -> Result<Self, LoadError> {
        let mut buffers = vec![];
        for buffer in document.buffers() {
            let data = match buffer.source() {
                gltf::buffer::Source::Bin => blob
                    .take()
                    .ok_or_else(|| LoadError::MissingBuffer(buffer.index()))?,
                gltf::buffer::Source::Uri(uri) => read_uri(&dir, uri)?,
            };
            // Sources may be padded, but can never be shorter than declared
            if data.len() < buffer.length() {
                return Err(LoadError::MissingBuffer(buffer.index()));
            }
            buffers.push(data);
        }

        Ok(Self {
            document,
            buffers,
            dir,
        })
    }

    pub fn buffer_data(&self, buffer: gltf::Buffer) -> Option<&[u8]> {
        self.buffers.get(buffer.index()).map(|data| data.as_slice())
    }

    /// Raw bytes of an image, wherever the file put them: a buffer view, a
    /// data URI, or a file next to the document
    pub fn image_bytes(&self, image: &gltf::Image) -> Result<Cow<[u8]>, LoadError> {
        match image.source() {
            gltf::image::Source::View { view, .. } => {
                let index = view.buffer().index();
                let buffer = self
                    .buffers
                    .get(index)
                    .ok_or(LoadError::MissingBuffer(index))?;
                buffer
                    .get(view.offset()..view.offset() + view.length())
                    .map(Cow::Borrowed)
                    .ok_or(LoadError::MissingBuffer(index))
            }
            gltf::image::Source::Uri { uri, .. } => read_uri(&self.dir, uri).map(Cow::Owned),
        }
    }

    /// The explicitly marked default scene, else the first declared one.
    /// A file without any scene has nothing to render and is a hard error.
    pub fn default_scene(&self) -> Result<gltf::Scene, LoadError> {
        self.document
            .default_scene()
            .or_else(|| self.document.scenes().next())
            .ok_or(LoadError::NoScene)
    }
}

fn read_uri(dir: &Path, uri: &str) -> Result<Vec<u8>, LoadError> {
    if let Some(rest) = uri.strip_prefix("data:") {
        let comma = rest
            .find(',')
            .ok_or_else(|| LoadError::UnsupportedUri(uri.to_string()))?;
        let (meta, payload) = rest.split_at(comma);
        if !meta.ends_with(";base64") {
            return Err(LoadError::UnsupportedUri(uri.to_string()));
        }
        base64::engine::general_purpose::STANDARD
            .decode(&payload[1..])
            .map_err(|_| LoadError::UnsupportedUri(uri.to_string()))
    } else if uri.contains("://") {
        Err(LoadError::UnsupportedUri(uri.to_string()))
    } else {
        Ok(fs::read(dir.join(uri))?)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(json: &str) -> Asset {
        Asset::from_slice(json.as_bytes(), ".").unwrap()
    }

    #[test]
    fn explicit_default_scene_wins() {
        let asset = parse(
            r#"{
                "asset": {"version": "2.0"},
                "scenes": [{"nodes": []}, {"nodes": []}],
                "scene": 1
            }"#,
        );
        assert_eq!(asset.default_scene().unwrap().index(), 1);
    }

    #[test]
    fn first_scene_is_the_fallback() {
        let asset = parse(
            r#"{
                "asset": {"version": "2.0"},
                "scenes": [{"nodes": []}, {"nodes": []}]
            }"#,
        );
        assert_eq!(asset.default_scene().unwrap().index(), 0);
    }

    #[test]
    fn no_scene_is_a_hard_error() {
        let asset = parse(r#"{"asset": {"version": "2.0"}}"#);
        match asset.default_scene() {
            Err(LoadError::NoScene) => (),
            other => panic!("Expected NoScene, got {:?}", other.map(|s| s.index())),
        }
    }

    #[test]
    fn data_uris_resolve_to_buffer_bytes() {
        let asset = parse(
            r#"{
                "asset": {"version": "2.0"},
                "buffers": [
                    {"uri": "data:application/octet-stream;base64,AAECAw==", "byteLength": 4}
                ]
            }"#,
        );
        let buffer = asset.document.buffers().next().unwrap();
        assert_eq!(asset.buffer_data(buffer).unwrap(), &[0, 1, 2, 3]);
    }

    #[test]
    fn short_buffers_are_rejected() {
        let result = Asset::from_slice(
            r#"{
                "asset": {"version": "2.0"},
                "buffers": [
                    {"uri": "data:application/octet-stream;base64,AAECAw==", "byteLength": 16}
                ]
            }"#
            .as_bytes(),
            ".",
        );
        assert!(matches!(result, Err(LoadError::MissingBuffer(0))));
    }
}
