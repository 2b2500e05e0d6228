//! Working engine implementations
//!
//! - [`ReferenceCompressor`]: raster sources -> BC7 `.tbc` container
//! - [`ReferenceTranscoder`]: `.tbc` -> BC1/BC3/BC4/BC5/BC7/RGBA32
//! - [`ImageRaster`]: PNG decode/encode and block unpacking
//! - [`DdsWriter`]: DDS export of transcoded mip chains and cubemaps

pub mod compressor;
pub mod container;
pub mod dds;
pub mod raster;
pub mod transcoder;

pub use compressor::{EncoderSettings, ReferenceCompressor};
pub use container::TbcContainer;
pub use dds::DdsWriter;
pub use raster::ImageRaster;
pub use transcoder::ReferenceTranscoder;
