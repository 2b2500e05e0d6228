//! DDS export of transcoded block buffers

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use image_dds::Surface;

use crate::engine::{BlockBuffer, NativeContainerWriter};
use crate::error::{BatchError, BatchResult};
use crate::paths;

/// Writes export units as DDS files
#[derive(Debug, Clone, Copy, Default)]
pub struct DdsWriter;

fn unsupported(path: &Path, reason: String) -> BatchError {
    BatchError::io(
        path,
        std::io::Error::new(std::io::ErrorKind::Unsupported, reason),
    )
}

impl NativeContainerWriter for DdsWriter {
    fn extension(&self) -> &'static str {
        "dds"
    }

    fn write(&self, path: &Path, images: &[Vec<&BlockBuffer>], is_cubemap: bool) -> BatchResult<()> {
        let Some(top) = images.first().and_then(|chain| chain.first()) else {
            return Err(unsupported(path, "export unit has no levels".to_string()));
        };

        let format = top
            .format
            .info()
            .image_format
            .ok_or_else(|| unsupported(path, format!("DDS cannot store {}", top.format)))?;

        let mipmaps = images[0].len() as u32;
        if images.iter().any(|chain| chain.len() as u32 != mipmaps) {
            return Err(unsupported(path, "images have differing mip counts".to_string()));
        }
        if is_cubemap && images.len() != 6 {
            return Err(unsupported(path, format!("cubemap needs 6 faces, got {}", images.len())));
        }

        // Layer-major: every mip of face 0, then face 1, ...
        let total: usize = images.iter().flatten().map(|b| b.data.len()).sum();
        let mut data = Vec::with_capacity(total);
        for buffer in images.iter().flatten() {
            data.extend_from_slice(&buffer.data);
        }

        let surface = Surface {
            width: top.width,
            height: top.height,
            depth: 1,
            layers: images.len() as u32,
            mipmaps,
            image_format: format,
            data,
        };

        let dds = surface
            .to_dds()
            .map_err(|e| unsupported(path, format!("failed to create DDS: {}", e)))?;

        paths::ensure_parent_dirs(path).map_err(|e| BatchError::io(path, e))?;
        let file = File::create(path).map_err(|e| BatchError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        dds.write(&mut writer)
            .map_err(|e| BatchError::io(path, std::io::Error::other(e)))?;

        Ok(())
    }
}
