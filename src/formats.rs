//! GPU transcode targets
//!
//! Every target is one row of [`FORMATS`]: block geometry, channel layout,
//! the geometry it can service, and how its native-container exports are
//! grouped. Adding a format means adding a variant and a row.

use image_dds::ImageFormat;

use crate::config::{ConfigError, TextureType};

/// Supported transcode targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TranscodeFormat {
    /// ETC1 RGB
    Etc1,
    /// BC1 (DXT1) opaque RGB
    Bc1,
    /// BC3 (DXT5) RGBA
    Bc3,
    /// BC4 single channel
    Bc4,
    /// BC5 two channel
    Bc5,
    /// BC7 RGBA
    Bc7,
    /// PVRTC1 4bpp opaque RGB, power-of-two only
    Pvrtc1Rgb4,
    /// Uncompressed 32-bit RGBA
    Rgba32,
}

/// Which level geometries a format can represent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    AnyGeometry,
    /// Both dimensions must be powers of two
    PowerOfTwo,
}

/// How native-container exports are bundled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportGrouping {
    /// One export per image
    PerImage,
    /// Runs of six faces become one cubemap export when the container is a cubemap array
    CubemapFaces,
}

/// Channels carried by a format's blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channels {
    R,
    Rg,
    Rgb,
    Rgba,
}

/// One row of the format table
#[derive(Debug, Clone, Copy)]
pub struct FormatInfo {
    pub format: TranscodeFormat,
    pub name: &'static str,
    pub block_width: u32,
    pub block_height: u32,
    pub bytes_per_block: u32,
    pub channels: Channels,
    pub capability: Capability,
    pub grouping: ExportGrouping,
    /// Equivalent `image_dds` format, if the raster/DDS side can handle it
    pub image_format: Option<ImageFormat>,
}

pub static FORMATS: [FormatInfo; 8] = [
    FormatInfo {
        format: TranscodeFormat::Etc1,
        name: "ETC1",
        block_width: 4,
        block_height: 4,
        bytes_per_block: 8,
        channels: Channels::Rgb,
        capability: Capability::AnyGeometry,
        grouping: ExportGrouping::CubemapFaces,
        image_format: None,
    },
    FormatInfo {
        format: TranscodeFormat::Bc1,
        name: "BC1",
        block_width: 4,
        block_height: 4,
        bytes_per_block: 8,
        channels: Channels::Rgb,
        capability: Capability::AnyGeometry,
        grouping: ExportGrouping::CubemapFaces,
        image_format: Some(ImageFormat::BC1RgbaUnorm),
    },
    FormatInfo {
        format: TranscodeFormat::Bc3,
        name: "BC3",
        block_width: 4,
        block_height: 4,
        bytes_per_block: 16,
        channels: Channels::Rgba,
        capability: Capability::AnyGeometry,
        grouping: ExportGrouping::CubemapFaces,
        image_format: Some(ImageFormat::BC3RgbaUnorm),
    },
    FormatInfo {
        format: TranscodeFormat::Bc4,
        name: "BC4",
        block_width: 4,
        block_height: 4,
        bytes_per_block: 8,
        channels: Channels::R,
        capability: Capability::AnyGeometry,
        grouping: ExportGrouping::CubemapFaces,
        image_format: Some(ImageFormat::BC4RUnorm),
    },
    FormatInfo {
        format: TranscodeFormat::Bc5,
        name: "BC5",
        block_width: 4,
        block_height: 4,
        bytes_per_block: 16,
        channels: Channels::Rg,
        capability: Capability::AnyGeometry,
        grouping: ExportGrouping::CubemapFaces,
        image_format: Some(ImageFormat::BC5RgUnorm),
    },
    FormatInfo {
        format: TranscodeFormat::Bc7,
        name: "BC7",
        block_width: 4,
        block_height: 4,
        bytes_per_block: 16,
        channels: Channels::Rgba,
        capability: Capability::AnyGeometry,
        grouping: ExportGrouping::CubemapFaces,
        image_format: Some(ImageFormat::BC7RgbaUnorm),
    },
    FormatInfo {
        format: TranscodeFormat::Pvrtc1Rgb4,
        name: "PVRTC1_4_OPAQUE_ONLY",
        block_width: 4,
        block_height: 4,
        bytes_per_block: 8,
        channels: Channels::Rgb,
        capability: Capability::PowerOfTwo,
        grouping: ExportGrouping::CubemapFaces,
        image_format: None,
    },
    FormatInfo {
        format: TranscodeFormat::Rgba32,
        name: "RGBA32",
        block_width: 1,
        block_height: 1,
        bytes_per_block: 4,
        channels: Channels::Rgba,
        capability: Capability::AnyGeometry,
        grouping: ExportGrouping::CubemapFaces,
        image_format: Some(ImageFormat::Rgba8Unorm),
    },
];

impl TranscodeFormat {
    /// All formats in table order
    pub fn all() -> impl Iterator<Item = TranscodeFormat> {
        FORMATS.iter().map(|row| row.format)
    }

    pub fn info(self) -> &'static FormatInfo {
        // Rows are declared in variant order
        &FORMATS[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    /// Whether the format carries a transparency channel
    pub fn has_alpha(self) -> bool {
        self.info().channels == Channels::Rgba
    }

    /// Parse from string (case-insensitive, common aliases accepted)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "ETC1" | "ETC1_RGB" => Some(TranscodeFormat::Etc1),
            "BC1" | "DXT1" | "BC1_RGB" => Some(TranscodeFormat::Bc1),
            "BC3" | "DXT5" | "BC3_RGBA" => Some(TranscodeFormat::Bc3),
            "BC4" | "BC4_R" => Some(TranscodeFormat::Bc4),
            "BC5" | "BC5_RG" => Some(TranscodeFormat::Bc5),
            "BC7" | "BC7_RGBA" => Some(TranscodeFormat::Bc7),
            "PVRTC1" | "PVRTC1_4_OPAQUE_ONLY" | "PVRTC1_4_RGB" => Some(TranscodeFormat::Pvrtc1Rgb4),
            "RGBA32" | "RGBA" => Some(TranscodeFormat::Rgba32),
            _ => None,
        }
    }
}

impl std::fmt::Display for TranscodeFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FormatInfo {
    /// Whether a level of this geometry can be transcoded to the format
    pub fn accepts(&self, width: u32, height: u32) -> bool {
        match self.capability {
            Capability::AnyGeometry => true,
            Capability::PowerOfTwo => width.is_power_of_two() && height.is_power_of_two(),
        }
    }

    /// Block grid covering a level
    pub fn blocks_for(&self, width: u32, height: u32) -> (u32, u32) {
        (
            width.div_ceil(self.block_width).max(1),
            height.div_ceil(self.block_height).max(1),
        )
    }

    /// Bytes needed for one level's block buffer
    pub fn buffer_len(&self, width: u32, height: u32) -> usize {
        let (bx, by) = self.blocks_for(width, height);
        bx as usize * by as usize * self.bytes_per_block as usize
    }

    /// Whether exports of a container with this texture type are bundled
    pub fn groups(&self, texture_type: TextureType) -> bool {
        self.grouping == ExportGrouping::CubemapFaces && texture_type == TextureType::Cubemap
    }
}

/// Target-format set chosen for an unpack/validate run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatSelection {
    /// Every format the transcoding engine supports
    #[default]
    All,
    Single(TranscodeFormat),
}

impl FormatSelection {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        if s.eq_ignore_ascii_case("all") {
            return Ok(FormatSelection::All);
        }
        TranscodeFormat::from_str(s)
            .map(FormatSelection::Single)
            .ok_or_else(|| ConfigError::UnknownFormat(s.to_string()))
    }

    /// Concrete formats for this run, in table order.
    ///
    /// A single format the engine cannot service is a configuration error;
    /// "all" quietly narrows to what the engine supports.
    pub fn resolve(
        &self,
        supports: impl Fn(TranscodeFormat) -> bool,
    ) -> Result<Vec<TranscodeFormat>, ConfigError> {
        match *self {
            FormatSelection::All => Ok(TranscodeFormat::all().filter(|f| supports(*f)).collect()),
            FormatSelection::Single(format) if supports(format) => Ok(vec![format]),
            FormatSelection::Single(format) => {
                Err(ConfigError::UnsupportedFormat(format.name().to_string()))
            }
        }
    }
}
