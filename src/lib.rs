//! texbatch - batch texture compression and transcoding
//!
//! Drives a compression engine over batches of raster images and a
//! transcoding engine over compressed containers, fanning each container out
//! to every GPU block format and exporting DDS and PNG artifacts.

pub mod compress;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod formats;
pub mod hash;
pub mod ledger;
pub mod listing;
pub mod paths;
pub mod reference;
pub mod unpack;
