//! Engine contracts
//!
//! The orchestrators only talk to engines through these traits. An engine
//! may parallelize internally, but every call here blocks until done.
//!
//! - [`CompressionEngine`]: raster sources -> compressed container
//! - [`TranscodingEngine`] / [`Container`]: container -> GPU block buffers
//! - [`RasterCodec`]: raster decode/encode and block buffer unpacking
//! - [`NativeContainerWriter`]: block buffers -> GPU-native container file

#[cfg(test)]
pub(crate) mod fakes;

use std::path::{Path, PathBuf};

use image::RgbaImage;

use crate::config::{CompressionParams, ConfigError, TextureType};
use crate::error::BatchResult;
use crate::formats::TranscodeFormat;
use crate::listing::BatchItem;

/// Decoded raster image
pub type RasterImage = RgbaImage;

/// Pattern written into block buffers before transcoding, so regions the
/// engine never wrote stand out in the output
pub const FILL_PATTERN: [u8; 4] = [0xDE, 0xAD, 0xBE, 0xEF];

/// Internal failure reported by an engine
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct EngineFailure(pub String);

// ---------------------------------------------------------------------------
// Compression
// ---------------------------------------------------------------------------

/// One compression-engine invocation
#[derive(Debug, Clone, PartialEq)]
pub struct CompressionJob {
    /// Position of the job in the run
    pub index: usize,
    /// Items covered: one in independent mode, all in sequence mode
    pub items: Vec<BatchItem>,
    /// Destination container path
    pub output: PathBuf,
}

/// Result codes reported by the compression engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Success,
    FailedReadingSourceImages,
    /// Array/cubemap/video composition checks failed
    FailedValidating,
    FailedFrontEnd,
    FailedFrontEndExtract,
    FailedBackend,
    FailedCreateContainer,
    FailedWritingOutput,
}

/// Per-slice quality record, passed through to the ledger unexamined
#[derive(Debug, Clone, PartialEq)]
pub struct SliceMetric {
    pub width: u32,
    pub height: u32,
    pub has_alpha: bool,
    pub bits_per_texel: f32,
    /// Fidelity numbers (PSNR values); empty when statistics are off
    pub fidelity: Vec<f32>,
}

/// What a compression job produced
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub code: ResultCode,
    pub slices: Vec<SliceMetric>,
}

impl JobReport {
    pub fn failed(code: ResultCode) -> Self {
        Self {
            code,
            slices: Vec::new(),
        }
    }
}

/// Turns raster sources into a compressed container
pub trait CompressionEngine {
    /// Read-only resource loaded once per run and shared by every job
    type Codebook;

    /// Accept or reject the run's configuration
    fn init(&mut self, params: &CompressionParams) -> Result<(), ConfigError>;

    /// Load the shared selector codebook
    fn load_codebook(&self) -> BatchResult<Self::Codebook>;

    /// Run one job to completion, writing its container on success
    fn run(&mut self, job: &CompressionJob, codebook: &Self::Codebook) -> JobReport;
}

// ---------------------------------------------------------------------------
// Transcoding
// ---------------------------------------------------------------------------

/// Header flags of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContainerFlags {
    pub y_flipped: bool,
    pub has_alpha: bool,
}

/// Container-wide facts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderFacts {
    pub image_count: u32,
    /// Mip level count of each image
    pub level_counts: Vec<u32>,
    pub texture_type: TextureType,
    pub flags: ContainerFlags,
    pub us_per_frame: u32,
    pub userdata: [u32; 2],
}

/// Geometry of one (image, level)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelGeometry {
    pub width: u32,
    pub height: u32,
    pub blocks_x: u32,
    pub blocks_y: u32,
    pub has_alpha: bool,
}

/// A loaded container
pub trait Container {
    /// Re-derive the file checksum and compare with the stored one
    fn verify_checksum(&self) -> bool;

    fn header_facts(&self) -> &HeaderFacts;

    fn level_geometry(&self, image: u32, level: u32) -> Option<LevelGeometry>;

    /// Transcode one level into `dst`, which is sized for the format
    fn transcode(
        &self,
        image: u32,
        level: u32,
        format: TranscodeFormat,
        dst: &mut [u8],
    ) -> Result<(), EngineFailure>;
}

/// Opens containers for transcoding
pub trait TranscodingEngine {
    type Container: Container;

    /// Whether the engine can produce a format at all
    fn supports(&self, format: TranscodeFormat) -> bool;

    /// Parse container bytes; failures are structural
    fn load_container(&self, bytes: Vec<u8>) -> Result<Self::Container, EngineFailure>;
}

/// Transcoded blocks for one (image, level, format)
#[derive(Debug, Clone, PartialEq)]
pub struct BlockBuffer {
    pub format: TranscodeFormat,
    pub width: u32,
    pub height: u32,
    pub blocks_x: u32,
    pub blocks_y: u32,
    pub data: Vec<u8>,
}

impl BlockBuffer {
    /// Allocate a buffer for a level, pre-filled with [`FILL_PATTERN`]
    pub fn allocate(format: TranscodeFormat, width: u32, height: u32) -> Self {
        let info = format.info();
        let (blocks_x, blocks_y) = info.blocks_for(width, height);
        let len = info.buffer_len(width, height);
        let data = FILL_PATTERN.iter().copied().cycle().take(len).collect();

        Self {
            format,
            width,
            height,
            blocks_x,
            blocks_y,
            data,
        }
    }

    pub fn total_blocks(&self) -> u32 {
        self.blocks_x * self.blocks_y
    }
}

// ---------------------------------------------------------------------------
// Raster and native export
// ---------------------------------------------------------------------------

/// Which channels a raster export keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterChannels {
    /// RGB, alpha dropped
    Color,
    /// Alpha as a single grey channel
    Alpha,
}

/// Raster image I/O and block buffer decoding
pub trait RasterCodec {
    fn decode(&self, path: &Path) -> BatchResult<RasterImage>;

    fn encode(&self, image: &RasterImage, channels: RasterChannels, path: &Path) -> BatchResult<()>;

    /// Decode blocks to pixels; `false` means part of the data was invalid
    fn unpack(&self, buffer: &BlockBuffer) -> (RasterImage, bool);
}

/// Writes GPU-native container files
pub trait NativeContainerWriter {
    /// File extension of written containers (without the dot)
    fn extension(&self) -> &'static str;

    /// Write one export unit: each entry is an image's full mip chain
    fn write(&self, path: &Path, images: &[Vec<&BlockBuffer>], is_cubemap: bool) -> BatchResult<()>;
}
