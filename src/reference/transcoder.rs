//! Reference transcoder
//!
//! Decodes a container's BC7 payload and re-encodes it into the requested
//! target with `image_dds`. Only targets with an `image_dds` equivalent are
//! serviced.

use image::RgbaImage;
use image_dds::{ImageFormat, Mipmaps, Quality, Surface, SurfaceRgba8};

use crate::engine::{EngineFailure, TranscodingEngine};
use crate::formats::TranscodeFormat;

use super::container::{TbcContainer, PAYLOAD_FORMAT};

/// Encoder effort for re-encoding transcoded slices
const TRANSCODE_QUALITY: Quality = Quality::Fast;

/// Transcoding engine for `.tbc` containers
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceTranscoder;

impl TranscodingEngine for ReferenceTranscoder {
    type Container = TbcContainer;

    fn supports(&self, format: TranscodeFormat) -> bool {
        format.info().image_format.is_some()
    }

    fn load_container(&self, bytes: Vec<u8>) -> Result<TbcContainer, EngineFailure> {
        TbcContainer::parse(bytes)
    }
}

/// Decode block data of one level to RGBA
pub fn decode_blocks(
    format: ImageFormat,
    width: u32,
    height: u32,
    data: &[u8],
) -> Result<RgbaImage, EngineFailure> {
    let surface = Surface {
        width,
        height,
        depth: 1,
        layers: 1,
        mipmaps: 1,
        image_format: format,
        data,
    };

    let decoded = surface
        .decode_rgba8()
        .map_err(|e| EngineFailure(format!("failed decoding {:?}: {}", format, e)))?;

    RgbaImage::from_raw(width, height, decoded.data)
        .ok_or_else(|| EngineFailure(format!("decoded {:?} data has wrong size", format)))
}

/// Encode an RGBA image to one level of block data
pub fn encode_blocks(
    image: &RgbaImage,
    format: ImageFormat,
    quality: Quality,
) -> Result<Vec<u8>, EngineFailure> {
    if format == ImageFormat::Rgba8Unorm {
        return Ok(image.as_raw().clone());
    }

    let encoded = SurfaceRgba8::from_image(image)
        .encode(format, quality, Mipmaps::Disabled)
        .map_err(|e| EngineFailure(format!("failed encoding {:?}: {}", format, e)))?;
    Ok(encoded.data)
}

/// Transcode one payload slice into `dst`
pub fn transcode_blocks(
    width: u32,
    height: u32,
    payload: &[u8],
    format: TranscodeFormat,
    dst: &mut [u8],
) -> Result<(), EngineFailure> {
    let target = format
        .info()
        .image_format
        .ok_or_else(|| EngineFailure(format!("{} is not supported", format)))?;

    let source = PAYLOAD_FORMAT
        .info()
        .image_format
        .ok_or_else(|| EngineFailure("payload format has no decoder".to_string()))?;

    let data = if target == source {
        payload.to_vec()
    } else {
        let rgba = decode_blocks(source, width, height, payload)?;
        encode_blocks(&rgba, target, TRANSCODE_QUALITY)?
    };

    if data.len() != dst.len() {
        return Err(EngineFailure(format!(
            "{} output is {} bytes, expected {}",
            format,
            data.len(),
            dst.len()
        )));
    }
    dst.copy_from_slice(&data);
    Ok(())
}
