//! Raster image I/O through the `image` crate

use std::path::Path;

use image::{DynamicImage, GrayImage, ImageError, Luma};
use tracing::debug;

use crate::engine::{BlockBuffer, RasterChannels, RasterCodec, RasterImage};
use crate::error::{BatchError, BatchResult};
use crate::paths;

use super::transcoder;

/// PNG (and any format `image` can open) codec
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageRaster;

fn image_error(path: &Path, err: ImageError) -> BatchError {
    match err {
        ImageError::IoError(e) => BatchError::io(path, e),
        other => BatchError::io(path, std::io::Error::other(other)),
    }
}

impl RasterCodec for ImageRaster {
    fn decode(&self, path: &Path) -> BatchResult<RasterImage> {
        let img = image::open(path).map_err(|e| image_error(path, e))?;
        debug!("Read {} ({}x{})", path.display(), img.width(), img.height());
        Ok(img.into_rgba8())
    }

    fn encode(&self, image: &RasterImage, channels: RasterChannels, path: &Path) -> BatchResult<()> {
        paths::ensure_parent_dirs(path).map_err(|e| BatchError::io(path, e))?;

        let result = match channels {
            RasterChannels::Color => DynamicImage::ImageRgba8(image.clone()).to_rgb8().save(path),
            RasterChannels::Alpha => {
                let alpha = GrayImage::from_fn(image.width(), image.height(), |x, y| {
                    Luma([image.get_pixel(x, y)[3]])
                });
                alpha.save(path)
            }
        };
        result.map_err(|e| image_error(path, e))?;

        debug!("Wrote {}", path.display());
        Ok(())
    }

    fn unpack(&self, buffer: &BlockBuffer) -> (RasterImage, bool) {
        let decoded = buffer.format.info().image_format.map(|format| {
            transcoder::decode_blocks(format, buffer.width, buffer.height, &buffer.data)
        });

        match decoded {
            Some(Ok(img)) => (img, true),
            Some(Err(e)) => {
                debug!("Unpack of {} failed: {}", buffer.format, e);
                (RasterImage::new(buffer.width, buffer.height), false)
            }
            None => (RasterImage::new(buffer.width, buffer.height), false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::TranscodeFormat;
    use image::Rgba;
    use tempfile::tempdir;

    #[test]
    fn test_color_and_alpha_exports() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let img = RasterImage::from_fn(4, 2, |x, _| Rgba([10, 20, 30, (x * 60) as u8]));

        let rgb = dir.path().join("nested/rgb.png");
        let alpha = dir.path().join("a.png");
        ImageRaster.encode(&img, RasterChannels::Color, &rgb)?;
        ImageRaster.encode(&img, RasterChannels::Alpha, &alpha)?;

        let rgb = image::open(&rgb)?;
        assert!(!rgb.color().has_alpha());
        assert_eq!((rgb.width(), rgb.height()), (4, 2));

        let alpha = image::open(&alpha)?.into_luma8();
        assert_eq!(alpha.get_pixel(3, 0)[0], 180);

        let back = ImageRaster.decode(&dir.path().join("a.png"))?;
        assert_eq!(back.dimensions(), (4, 2));
        Ok(())
    }

    #[test]
    fn test_decode_missing_is_io_error() {
        let err = ImageRaster.decode(Path::new("/nonexistent/x.png")).unwrap_err();
        assert!(matches!(err, BatchError::Io { .. }));
    }

    #[test]
    fn test_unpack_rgba32() {
        let mut buffer = BlockBuffer::allocate(TranscodeFormat::Rgba32, 2, 2);
        buffer.data.fill(0x7F);
        let (img, valid) = ImageRaster.unpack(&buffer);
        assert!(valid);
        assert_eq!(img.get_pixel(1, 1), &Rgba([0x7F; 4]));
    }

    #[test]
    fn test_unpack_unsupported_format() {
        let buffer = BlockBuffer::allocate(TranscodeFormat::Etc1, 8, 8);
        let (img, valid) = ImageRaster.unpack(&buffer);
        assert!(!valid);
        assert_eq!(img.dimensions(), (8, 8));
    }
}
