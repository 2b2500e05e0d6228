//! Run configuration
//!
//! Compression parameters are an opaque pass-through for the compression
//! engine; the orchestrators only read the handful of fields that end up in
//! ledger rows. The resolution rules at the bottom mirror how the option
//! surface has always combined quality, cluster and mip settings.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::formats::FormatSelection;

/// Lowest accepted quality level
pub const QUALITY_MIN: u32 = 1;
/// Highest accepted quality level
pub const QUALITY_MAX: u32 = 255;
/// Quality used when neither a quality level nor both cluster counts are given
pub const DEFAULT_QUALITY: u32 = 128;
/// Highest compression (effort) level
pub const MAX_COMPRESSION_LEVEL: u32 = 5;
/// Upper bound for manual endpoint/selector cluster counts
pub const MAX_CLUSTERS: u32 = 16128;
/// Largest frame duration a container header can store (24 bits)
pub const MAX_US_PER_FRAME: u32 = 0xFF_FFFF;

/// Texture-type semantics declared for a multi-image container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextureType {
    /// Arbitrary unrelated 2D images
    #[default]
    #[serde(rename = "2d")]
    Regular2D,
    /// 2D array, all members share geometry
    #[serde(rename = "2darray")]
    Array2D,
    /// Volume texture slices
    #[serde(rename = "3d")]
    Volume,
    /// Cubemap array, faces in +X -X +Y -Y +Z -Z order, multiples of six
    Cubemap,
    /// Video frames
    Video,
}

impl TextureType {
    pub fn name(&self) -> &'static str {
        match self {
            TextureType::Regular2D => "2D",
            TextureType::Array2D => "2D array",
            TextureType::Volume => "3D",
            TextureType::Cubemap => "cubemap array",
            TextureType::Video => "video frames",
        }
    }

    /// Whether every member image must share dimensions and level counts
    pub fn requires_uniform_members(&self) -> bool {
        !matches!(self, TextureType::Regular2D)
    }

    /// Parse a command-line texture type
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "2d" => Some(TextureType::Regular2D),
            "2darray" => Some(TextureType::Array2D),
            "3d" => Some(TextureType::Volume),
            "cubemap" => Some(TextureType::Cubemap),
            "video" => Some(TextureType::Video),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            TextureType::Regular2D => 0,
            TextureType::Array2D => 1,
            TextureType::Cubemap => 2,
            TextureType::Video => 3,
            TextureType::Volume => 4,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(TextureType::Regular2D),
            1 => Some(TextureType::Array2D),
            2 => Some(TextureType::Cubemap),
            3 => Some(TextureType::Video),
            4 => Some(TextureType::Volume),
            _ => None,
        }
    }
}

/// Mipmap downsampling kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MipFilter {
    Box,
    Tent,
    Gaussian,
    CatmullRom,
    #[default]
    Lanczos,
}

impl MipFilter {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "box" | "nearest" => Some(MipFilter::Box),
            "tent" | "triangle" | "bilinear" => Some(MipFilter::Tent),
            "gaussian" => Some(MipFilter::Gaussian),
            "catmullrom" => Some(MipFilter::CatmullRom),
            "lanczos" | "lanczos3" | "kaiser" => Some(MipFilter::Lanczos),
            _ => None,
        }
    }
}

/// How the alpha channel of the output is decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlphaPolicy {
    /// Alpha slices only if some source carries non-opaque alpha
    #[default]
    Detect,
    /// Always write alpha
    Force,
    /// Never write alpha
    Ignore,
}

/// Shared compression configuration for every job of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionParams {
    /// Quality level 1-255 (None when manual cluster counts are used)
    pub quality_level: Option<u32>,
    /// Encoding effort 0-5
    pub compression_level: u32,
    pub max_endpoint_clusters: Option<u32>,
    pub max_selector_clusters: Option<u32>,
    /// sRGB (perceptual) metrics; false means linear
    pub perceptual: bool,
    pub texture_type: TextureType,
    pub us_per_frame: u32,
    pub userdata0: u32,
    pub userdata1: u32,
    pub y_flip: bool,
    pub alpha: AlphaPolicy,
    /// Move R to RGB and G to alpha (tangent-space XY normal maps)
    pub separate_rg_to_color_alpha: bool,
    pub mip_gen: bool,
    /// Filter mips in sRGB space; None follows `perceptual`
    pub mip_srgb: Option<bool>,
    pub mip_filter: MipFilter,
    pub mip_scale: f32,
    pub mip_smallest_dimension: u32,
    pub mip_renormalize: bool,
    pub no_selector_rdo: bool,
    pub selector_rdo_thresh: f32,
    pub no_endpoint_rdo: bool,
    pub endpoint_rdo_thresh: f32,
    /// Compute per-slice fidelity numbers (slower)
    pub compute_stats: bool,
    pub debug: bool,
}

impl Default for CompressionParams {
    fn default() -> Self {
        Self {
            quality_level: None,
            compression_level: 1,
            max_endpoint_clusters: None,
            max_selector_clusters: None,
            perceptual: true,
            texture_type: TextureType::Regular2D,
            us_per_frame: 0,
            userdata0: 0,
            userdata1: 0,
            y_flip: false,
            alpha: AlphaPolicy::Detect,
            separate_rg_to_color_alpha: false,
            mip_gen: false,
            mip_srgb: None,
            mip_filter: MipFilter::Lanczos,
            mip_scale: 1.0,
            mip_smallest_dimension: 1,
            mip_renormalize: false,
            no_selector_rdo: false,
            selector_rdo_thresh: 1.25,
            no_endpoint_rdo: false,
            endpoint_rdo_thresh: 1.5,
            compute_stats: false,
            debug: false,
        }
    }
}

impl CompressionParams {
    /// Load a JSON preset; missing fields keep their defaults
    pub fn from_preset(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read preset: {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse preset: {}", path.display()))
    }

    /// Tune for normal maps: linear metrics, linear mip filtering, no RDO
    pub fn apply_normal_map_preset(&mut self) {
        self.perceptual = false;
        self.mip_srgb = Some(false);
        self.no_selector_rdo = true;
        self.no_endpoint_rdo = true;
    }

    /// Store a frame rate as microseconds per frame
    pub fn set_framerate(&mut self, fps: f64) {
        let us = if fps > 0.0 { 1_000_000.0 / fps } else { 0.0 };
        self.us_per_frame = ((us + 0.5) as i64).clamp(0, MAX_US_PER_FRAME as i64) as u32;
    }

    /// Apply the combination rules between quality, clusters and mip space.
    pub fn resolve(mut self) -> Self {
        self.compression_level = self.compression_level.min(MAX_COMPRESSION_LEVEL);

        match self.quality_level {
            Some(q) => {
                self.quality_level = Some(q.clamp(QUALITY_MIN, QUALITY_MAX));
                self.max_endpoint_clusters = None;
                self.max_selector_clusters = None;
            }
            None => match (self.max_endpoint_clusters, self.max_selector_clusters) {
                (Some(e), Some(s)) => {
                    self.max_endpoint_clusters = Some(e.clamp(1, MAX_CLUSTERS));
                    self.max_selector_clusters = Some(s.clamp(1, MAX_CLUSTERS));
                }
                _ => {
                    self.max_endpoint_clusters = None;
                    self.max_selector_clusters = None;
                    self.quality_level = Some(DEFAULT_QUALITY);
                }
            },
        }

        if self.mip_srgb.is_none() {
            self.mip_srgb = Some(self.perceptual);
        }

        self
    }

    /// Effective quality level as recorded in ledger rows (0 with manual clusters)
    pub fn ledger_quality(&self) -> u32 {
        self.quality_level.unwrap_or(0)
    }
}

/// How the batch is split into compression jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchMode {
    /// One job over the whole batch, producing one multi-image container
    #[default]
    Sequence,
    /// One job per batch item
    Independent,
}

/// Configuration for a compression run
#[derive(Debug, Clone, Default)]
pub struct CompressConfig {
    pub params: CompressionParams,
    pub mode: BatchMode,
    /// Explicit output path, honoured only when exactly one job runs
    pub output_file: Option<PathBuf>,
    /// Directory prefixed onto derived output names
    pub output_dir: Option<PathBuf>,
    /// Append-only metrics ledger
    pub ledger_path: Option<PathBuf>,
}

impl CompressConfig {
    /// Validate the configuration and return it with resolved parameters
    pub fn finalize(mut self) -> Result<Self, ConfigError> {
        if let Some(ref dir) = self.output_dir {
            if dir.as_os_str().is_empty() {
                return Err(ConfigError::EmptyOutputDir);
            }
        }
        if self.ledger_path.is_some() {
            self.params.compute_stats = true;
        }
        self.params = self.params.resolve();
        Ok(self)
    }
}

/// Configuration for an unpack or validate run
#[derive(Debug, Clone, Default)]
pub struct UnpackConfig {
    pub formats: FormatSelection,
    /// Suppress native-container export
    pub no_native: bool,
    /// Transcode only, never write export artifacts
    pub validate_only: bool,
    /// Fuzz-testing bypass: skip checksum re-derivation
    pub skip_checksum: bool,
    /// Directory for export artifacts (working directory if None)
    pub output_dir: Option<PathBuf>,
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No input files to process")]
    NoInputFiles,

    #[error("Filename template given without a file count")]
    TemplateWithoutCount,

    #[error("Filename template file count must be non-zero")]
    TemplateCountZero,

    #[error("Filename template must contain a '%' format marker: {0}")]
    TemplateMissingMarker(String),

    #[error("Invalid filename template '{template}': {reason}")]
    TemplateInvalid { template: String, reason: String },

    #[error("Invalid texture type: {0}")]
    UnknownTextureType(String),

    #[error("Invalid mipmap filter: {0}")]
    UnknownMipFilter(String),

    #[error("Unknown transcode format: {0}")]
    UnknownFormat(String),

    #[error("Transcode format {0} is not supported by the transcoding engine")]
    UnsupportedFormat(String),

    #[error("Output directory must not be empty")]
    EmptyOutputDir,

    #[error("Compression engine rejected configuration: {0}")]
    EngineInit(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_clears_clusters() {
        let params = CompressionParams {
            quality_level: Some(300),
            max_endpoint_clusters: Some(100),
            max_selector_clusters: Some(100),
            ..Default::default()
        }
        .resolve();

        assert_eq!(params.quality_level, Some(QUALITY_MAX));
        assert_eq!(params.max_endpoint_clusters, None);
        assert_eq!(params.max_selector_clusters, None);
    }

    #[test]
    fn test_partial_clusters_fall_back_to_default_quality() {
        let params = CompressionParams {
            max_endpoint_clusters: Some(512),
            ..Default::default()
        }
        .resolve();

        assert_eq!(params.quality_level, Some(DEFAULT_QUALITY));
        assert_eq!(params.max_endpoint_clusters, None);

        let params = CompressionParams {
            max_endpoint_clusters: Some(20000),
            max_selector_clusters: Some(64),
            ..Default::default()
        }
        .resolve();
        assert_eq!(params.quality_level, None);
        assert_eq!(params.max_endpoint_clusters, Some(MAX_CLUSTERS));
        assert_eq!(params.ledger_quality(), 0);
    }

    #[test]
    fn test_mip_space_follows_metrics() {
        let params = CompressionParams::default().resolve();
        assert_eq!(params.mip_srgb, Some(true));

        let params = CompressionParams {
            perceptual: false,
            ..Default::default()
        }
        .resolve();
        assert_eq!(params.mip_srgb, Some(false));

        let mut params = CompressionParams::default();
        params.apply_normal_map_preset();
        let params = params.resolve();
        assert!(!params.perceptual);
        assert_eq!(params.mip_srgb, Some(false));
        assert!(params.no_selector_rdo && params.no_endpoint_rdo);
    }

    #[test]
    fn test_framerate() {
        let mut params = CompressionParams::default();
        params.set_framerate(20.0);
        assert_eq!(params.us_per_frame, 50_000);
        params.set_framerate(0.0);
        assert_eq!(params.us_per_frame, 0);
        params.set_framerate(0.001);
        assert_eq!(params.us_per_frame, MAX_US_PER_FRAME);
    }

    #[test]
    fn test_ledger_forces_stats() {
        let config = CompressConfig {
            ledger_path: Some(PathBuf::from("stats.csv")),
            ..Default::default()
        }
        .finalize()
        .unwrap();
        assert!(config.params.compute_stats);

        let err = CompressConfig {
            output_dir: Some(PathBuf::new()),
            ..Default::default()
        }
        .finalize()
        .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyOutputDir));
    }

    #[test]
    fn test_texture_type_round_trip_names() {
        assert_eq!(TextureType::from_str("CUBEMAP"), Some(TextureType::Cubemap));
        assert_eq!(TextureType::from_str("2darray"), Some(TextureType::Array2D));
        assert_eq!(TextureType::from_str("sphere"), None);
        assert_eq!(TextureType::from_u8(TextureType::Video.to_u8()), Some(TextureType::Video));
        assert!(!TextureType::Regular2D.requires_uniform_members());
    }

    #[test]
    fn test_preset_keeps_defaults() -> anyhow::Result<()> {
        use std::io::Write;
        let mut tmp = tempfile::NamedTempFile::new()?;
        write!(tmp, r#"{{"quality_level": 200, "texture_type": "cubemap", "mip_gen": true}}"#)?;
        tmp.flush()?;

        let params = CompressionParams::from_preset(tmp.path())?;
        assert_eq!(params.quality_level, Some(200));
        assert_eq!(params.texture_type, TextureType::Cubemap);
        assert!(params.mip_gen);
        assert_eq!(params.compression_level, 1);
        Ok(())
    }
}
