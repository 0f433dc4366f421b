// Copyright © 2022
// Author: Antonio Caggiano <info@antoniocaggiano.eu>
// SPDX-License-Identifier: MIT

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use ash::vk;
use crossbeam_channel::{Receiver, Sender};

use crate::error::DecodeError;
use crate::gfx::DeviceCaps;

/// How the sampled values are interpreted by the shader. Base color wants
/// sRGB, data textures (normals, metallic-roughness) want linear.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColorSpace {
    Linear,
    Srgb,
}

/// Color model of a compressed texture container that still needs
/// transcoding to a GPU-native block format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColorModel {
    /// Basis ETC1S: low-rate universal model, best served by ETC2
    Etc1s,
    /// Basis UASTC: high-quality universal model, best served by ASTC
    Uastc,
}

/// GPU-native families a container can be transcoded to. `Rgba8` is the
/// guaranteed fallback and is assumed universally supported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TranscodeTarget {
    Etc2,
    Bc7,
    Astc,
    Rgba8,
}

/// Byte range of one mip level within a decoded data blob
#[derive(Clone, Copy, Debug)]
pub struct MipLevel {
    pub offset: usize,
    pub size: usize,
}

/// Decoded pixels ready for staging: a concrete Vulkan format, the full
/// data blob, and one byte range per mip level.
pub struct DecodedImage {
    pub format: vk::Format,
    pub width: u32,
    pub height: u32,
    pub levels: Vec<MipLevel>,
    pub data: Vec<u8>,
}

/// Pixel data coming out of a texture container, format not yet assigned
pub struct ContainerData {
    pub width: u32,
    pub height: u32,
    pub levels: Vec<MipLevel>,
    pub data: Vec<u8>,
}

/// Collaborator boundary: opens compressed texture containers found in the
/// asset. Implementations must be callable from many decode threads at once.
pub trait ContainerReader: Send + Sync {
    /// Whether `bytes` look like a container this reader understands
    fn probe(&self, bytes: &[u8]) -> bool;

    fn open(&self, bytes: &[u8]) -> Result<Box<dyn ContainerImage>, DecodeError>;
}

/// One opened container image
pub trait ContainerImage: Send {
    /// False when the payload is already in a fixed GPU format
    fn needs_transcode(&self) -> bool;

    fn color_model(&self) -> ColorModel;

    fn component_count(&self) -> u32;

    fn transcode(&mut self, target: TranscodeTarget) -> Result<ContainerData, DecodeError>;

    /// Payload of a container that does not require transcoding
    fn native(&mut self) -> Result<(vk::Format, ContainerData), DecodeError>;
}

/// Reader used when the application brings no container support: every
/// compressed container is rejected and the affected material is excluded.
pub struct NoContainers;

impl ContainerReader for NoContainers {
    fn probe(&self, _bytes: &[u8]) -> bool {
        false
    }

    fn open(&self, _bytes: &[u8]) -> Result<Box<dyn ContainerImage>, DecodeError> {
        Err(DecodeError::Container(
            "no container reader configured".to_string(),
        ))
    }
}

/// Picks the transcode target for `model`: first entry of the per-model
/// preference list the device supports for sampled images, falling back to
/// uncompressed RGBA which always succeeds.
pub fn select_target(model: ColorModel, caps: &DeviceCaps) -> TranscodeTarget {
    let preference = match model {
        ColorModel::Etc1s => [TranscodeTarget::Etc2, TranscodeTarget::Bc7, TranscodeTarget::Astc],
        ColorModel::Uastc => [TranscodeTarget::Astc, TranscodeTarget::Bc7, TranscodeTarget::Etc2],
    };

    for target in &preference {
        let supported = match target {
            TranscodeTarget::Etc2 => caps.etc2,
            TranscodeTarget::Bc7 => caps.bc7,
            TranscodeTarget::Astc => caps.astc,
            TranscodeTarget::Rgba8 => true,
        };
        if supported {
            return *target;
        }
    }

    TranscodeTarget::Rgba8
}

/// Maps a transcode target to the concrete format for the requested color
/// space. A three-component ETC2 payload keeps its RGB block layout.
pub fn target_format(
    target: TranscodeTarget,
    components: u32,
    color_space: ColorSpace,
) -> vk::Format {
    let srgb = color_space == ColorSpace::Srgb;
    match target {
        TranscodeTarget::Etc2 => {
            if components == 3 {
                if srgb {
                    vk::Format::ETC2_R8G8B8_SRGB_BLOCK
                } else {
                    vk::Format::ETC2_R8G8B8_UNORM_BLOCK
                }
            } else if srgb {
                vk::Format::ETC2_R8G8B8A8_SRGB_BLOCK
            } else {
                vk::Format::ETC2_R8G8B8A8_UNORM_BLOCK
            }
        }
        TranscodeTarget::Bc7 => {
            if srgb {
                vk::Format::BC7_SRGB_BLOCK
            } else {
                vk::Format::BC7_UNORM_BLOCK
            }
        }
        TranscodeTarget::Astc => {
            if srgb {
                vk::Format::ASTC_4X4_SRGB_BLOCK
            } else {
                vk::Format::ASTC_4X4_UNORM_BLOCK
            }
        }
        TranscodeTarget::Rgba8 => {
            if srgb {
                vk::Format::R8G8B8A8_SRGB
            } else {
                vk::Format::R8G8B8A8_UNORM
            }
        }
    }
}

/// Decodes one texture to GPU-consumable pixels. Containers go through the
/// collaborator and the target-selection above; anything else is treated as
/// a PNG raster and force-expanded to four channels.
pub fn decode(
    bytes: &[u8],
    color_space: ColorSpace,
    caps: &DeviceCaps,
    containers: &dyn ContainerReader,
) -> Result<DecodedImage, DecodeError> {
    if containers.probe(bytes) {
        let mut container = containers.open(bytes)?;
        if container.needs_transcode() {
            let model = container.color_model();
            let target = select_target(model, caps);
            if target == TranscodeTarget::Rgba8 {
                log::warn!(
                    "No supported compressed format for {:?} texture, transcoding to uncompressed RGBA",
                    model
                );
            }
            let pixels = container.transcode(target)?;
            let format = target_format(target, container.component_count(), color_space);
            Ok(DecodedImage {
                format,
                width: pixels.width,
                height: pixels.height,
                levels: pixels.levels,
                data: pixels.data,
            })
        } else {
            let (format, pixels) = container.native()?;
            Ok(DecodedImage {
                format,
                width: pixels.width,
                height: pixels.height,
                levels: pixels.levels,
                data: pixels.data,
            })
        }
    } else {
        decode_png(bytes, color_space)
    }
}

fn decode_png(bytes: &[u8], color_space: ColorSpace) -> Result<DecodedImage, DecodeError> {
    let mut decoder = png::Decoder::new(std::io::Cursor::new(bytes));
    decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
    let (info, mut reader) = decoder.read_info()?;

    let mut buf = vec![0; reader.output_buffer_size()];
    reader.next_frame(&mut buf)?;

    let data = expand_rgba(buf, info.color_type)?;

    let format = match color_space {
        ColorSpace::Srgb => vk::Format::R8G8B8A8_SRGB,
        ColorSpace::Linear => vk::Format::R8G8B8A8_UNORM,
    };

    let levels = vec![MipLevel {
        offset: 0,
        size: data.len(),
    }];

    Ok(DecodedImage {
        format,
        width: info.width,
        height: info.height,
        levels,
        data,
    })
}

/// Shaders sample four channels, so narrower rasters get widened here
fn expand_rgba(buf: Vec<u8>, color_type: png::ColorType) -> Result<Vec<u8>, DecodeError> {
    let data = match color_type {
        png::ColorType::RGBA => buf,
        png::ColorType::RGB => {
            let mut data = Vec::with_capacity(buf.len() / 3 * 4);
            for rgb in buf.chunks(3) {
                data.extend_from_slice(rgb);
                data.push(std::u8::MAX);
            }
            data
        }
        png::ColorType::Grayscale => {
            let mut data = Vec::with_capacity(buf.len() * 4);
            for gray in buf {
                data.extend_from_slice(&[gray, gray, gray, std::u8::MAX]);
            }
            data
        }
        png::ColorType::GrayscaleAlpha => {
            let mut data = Vec::with_capacity(buf.len() * 2);
            for ga in buf.chunks(2) {
                data.extend_from_slice(&[ga[0], ga[0], ga[0], ga[1]]);
            }
            data
        }
        png::ColorType::Indexed => {
            return Err(DecodeError::Container(
                "indexed color survived palette expansion".to_string(),
            ))
        }
    };
    Ok(data)
}

/// One decode job per distinct (image, color space) pair
pub type DecodeKey = (usize, ColorSpace);

struct Job {
    key: DecodeKey,
    bytes: Vec<u8>,
}

/// Fans texture decoding out over worker threads. Each job is independent;
/// workers share only the read-only device capabilities and the container
/// reader. Results are gathered in one blocking step by `collect`.
pub struct DecodePool {
    jobs: Option<Sender<Job>>,
    results: Receiver<(DecodeKey, Result<DecodedImage, DecodeError>)>,
    workers: Vec<thread::JoinHandle<()>>,
    submitted: usize,
}

impl DecodePool {
    pub fn new(caps: DeviceCaps, containers: Arc<dyn ContainerReader>) -> Self {
        let (jobs_tx, jobs_rx) = crossbeam_channel::unbounded::<Job>();
        let (results_tx, results_rx) = crossbeam_channel::unbounded();

        let worker_count = thread::available_parallelism()
            .map(|count| count.get())
            .unwrap_or(1);

        let mut workers = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let jobs = jobs_rx.clone();
            let results = results_tx.clone();
            let containers = Arc::clone(&containers);
            workers.push(thread::spawn(move || {
                for job in jobs.iter() {
                    let decoded = decode(&job.bytes, job.key.1, &caps, containers.as_ref());
                    if results.send((job.key, decoded)).is_err() {
                        break;
                    }
                }
            }));
        }

        Self {
            jobs: Some(jobs_tx),
            results: results_rx,
            workers,
            submitted: 0,
        }
    }

    pub fn submit(&mut self, key: DecodeKey, bytes: Vec<u8>) {
        self.jobs
            .as_ref()
            .unwrap()
            .send(Job { key, bytes })
            .expect("Decode workers are gone");
        self.submitted += 1;
    }

    /// Blocks until every submitted job has a result, then tears the
    /// workers down
    pub fn collect(mut self) -> HashMap<DecodeKey, Result<DecodedImage, DecodeError>> {
        drop(self.jobs.take());

        let mut out = HashMap::with_capacity(self.submitted);
        for _ in 0..self.submitted {
            let (key, result) = self
                .results
                .recv()
                .expect("Decode worker died before delivering its result");
            out.insert(key, result);
        }

        for worker in self.workers.drain(..) {
            worker.join().expect("Failed to join decode worker");
        }

        out
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct StubReader {
        model: ColorModel,
    }

    struct StubImage {
        model: ColorModel,
    }

    const STUB_MAGIC: &[u8] = b"STUB";

    impl ContainerReader for StubReader {
        fn probe(&self, bytes: &[u8]) -> bool {
            bytes.starts_with(STUB_MAGIC)
        }

        fn open(&self, _bytes: &[u8]) -> Result<Box<dyn ContainerImage>, DecodeError> {
            Ok(Box::new(StubImage { model: self.model }))
        }
    }

    impl ContainerImage for StubImage {
        fn needs_transcode(&self) -> bool {
            true
        }

        fn color_model(&self) -> ColorModel {
            self.model
        }

        fn component_count(&self) -> u32 {
            4
        }

        fn transcode(&mut self, _target: TranscodeTarget) -> Result<ContainerData, DecodeError> {
            Ok(ContainerData {
                width: 4,
                height: 4,
                levels: vec![MipLevel {
                    offset: 0,
                    size: 64,
                }],
                data: vec![0; 64],
            })
        }

        fn native(&mut self) -> Result<(vk::Format, ContainerData), DecodeError> {
            unreachable!()
        }
    }

    fn encode_png(color: png::ColorType, channels: usize) -> Vec<u8> {
        let mut bytes = vec![];
        {
            let mut encoder = png::Encoder::new(&mut bytes, 2, 2);
            encoder.set_color(color);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header().unwrap();
            let data = vec![128u8; 4 * channels];
            writer.write_image_data(&data).unwrap();
        }
        bytes
    }

    #[test]
    fn preference_follows_the_color_model() {
        let all = DeviceCaps {
            etc2: true,
            bc7: true,
            astc: true,
            ..Default::default()
        };
        assert_eq!(select_target(ColorModel::Etc1s, &all), TranscodeTarget::Etc2);
        assert_eq!(select_target(ColorModel::Uastc, &all), TranscodeTarget::Astc);

        let bc7_only = DeviceCaps {
            bc7: true,
            ..Default::default()
        };
        assert_eq!(
            select_target(ColorModel::Etc1s, &bc7_only),
            TranscodeTarget::Bc7
        );
        assert_eq!(
            select_target(ColorModel::Uastc, &bc7_only),
            TranscodeTarget::Bc7
        );
    }

    #[test]
    fn unsupported_device_always_falls_back() {
        let none = DeviceCaps::default();
        assert_eq!(
            select_target(ColorModel::Etc1s, &none),
            TranscodeTarget::Rgba8
        );

        // And the full decode path terminates with the uncompressed format
        // instead of an error
        let reader = StubReader {
            model: ColorModel::Etc1s,
        };
        let decoded = decode(STUB_MAGIC, ColorSpace::Srgb, &none, &reader).unwrap();
        assert_eq!(decoded.format, vk::Format::R8G8B8A8_SRGB);
    }

    #[test]
    fn three_component_etc2_keeps_rgb() {
        assert_eq!(
            target_format(TranscodeTarget::Etc2, 3, ColorSpace::Srgb),
            vk::Format::ETC2_R8G8B8_SRGB_BLOCK
        );
        assert_eq!(
            target_format(TranscodeTarget::Etc2, 4, ColorSpace::Linear),
            vk::Format::ETC2_R8G8B8A8_UNORM_BLOCK
        );
    }

    #[test]
    fn rgb_png_gains_an_alpha_channel() {
        let bytes = encode_png(png::ColorType::RGB, 3);
        let decoded = decode(&bytes, ColorSpace::Srgb, &DeviceCaps::default(), &NoContainers)
            .unwrap();
        assert_eq!(decoded.format, vk::Format::R8G8B8A8_SRGB);
        assert_eq!(decoded.width, 2);
        assert_eq!(decoded.height, 2);
        assert_eq!(decoded.data.len(), 16);
        assert!(decoded.data.chunks(4).all(|px| px[3] == std::u8::MAX));
    }

    #[test]
    fn grayscale_png_expands_to_four_channels() {
        let bytes = encode_png(png::ColorType::Grayscale, 1);
        let decoded = decode(
            &bytes,
            ColorSpace::Linear,
            &DeviceCaps::default(),
            &NoContainers,
        )
        .unwrap();
        assert_eq!(decoded.format, vk::Format::R8G8B8A8_UNORM);
        assert_eq!(decoded.data.len(), 16);
        assert_eq!(&decoded.data[..4], &[128, 128, 128, 255]);
    }

    #[test]
    fn pool_decodes_concurrently_and_delivers_everything() {
        let reader: Arc<dyn ContainerReader> = Arc::new(StubReader {
            model: ColorModel::Uastc,
        });
        let mut pool = DecodePool::new(DeviceCaps::default(), reader);

        let png_bytes = encode_png(png::ColorType::RGB, 3);
        for i in 0..8 {
            let bytes = if i % 2 == 0 {
                STUB_MAGIC.to_vec()
            } else {
                png_bytes.clone()
            };
            pool.submit((i, ColorSpace::Linear), bytes);
        }

        let results = pool.collect();
        assert_eq!(results.len(), 8);
        assert!(results.values().all(|result| result.is_ok()));
    }
}
