//! Reference compression engine
//!
//! Sources are read through a [`RasterCodec`], preprocessed (alpha source,
//! R/G separation, flip, alpha policy), expanded into mip chains, encoded to
//! BC7 in parallel and written as one `.tbc` container per job.

use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, Rgba, Rgba32FImage, RgbaImage};
use image_dds::{ImageFormat, Quality};
use rayon::prelude::*;
use tracing::{debug, error, info};

use crate::config::{
    AlphaPolicy, CompressionParams, ConfigError, MipFilter, TextureType, MAX_COMPRESSION_LEVEL,
    MAX_US_PER_FRAME,
};
use crate::engine::{
    CompressionEngine, CompressionJob, ContainerFlags, EngineFailure, HeaderFacts, JobReport,
    RasterCodec, ResultCode, SliceMetric,
};
use crate::error::BatchResult;
use crate::paths;

use super::container::{self, EncodedSlice, PAYLOAD_FORMAT};
use super::transcoder::{decode_blocks, encode_blocks};

/// Largest accepted source dimension
pub const MAX_DIMENSION: u32 = 16384;

/// Upper bound reported for identical images
const MAX_PSNR: f64 = 100.0;

/// Encoder settings shared read-only by every job of a run
#[derive(Debug, Clone, Copy)]
pub struct EncoderSettings {
    pub quality: Quality,
    pub filter: FilterType,
}

impl EncoderSettings {
    pub fn for_params(params: &CompressionParams) -> Self {
        let quality = match params.compression_level {
            0..=1 => Quality::Fast,
            2..=3 => Quality::Normal,
            _ => Quality::Slow,
        };
        let filter = match params.mip_filter {
            MipFilter::Box => FilterType::Nearest,
            MipFilter::Tent => FilterType::Triangle,
            MipFilter::Gaussian => FilterType::Gaussian,
            MipFilter::CatmullRom => FilterType::CatmullRom,
            MipFilter::Lanczos => FilterType::Lanczos3,
        };
        Self { quality, filter }
    }
}

/// Compression engine producing BC7 `.tbc` containers
pub struct ReferenceCompressor<R> {
    raster: R,
    params: CompressionParams,
}

impl<R: RasterCodec> ReferenceCompressor<R> {
    pub fn new(raster: R) -> Self {
        Self {
            raster,
            params: CompressionParams::default().resolve(),
        }
    }

    fn compress(
        &self,
        job: &CompressionJob,
        settings: &EncoderSettings,
    ) -> Result<Vec<SliceMetric>, ResultCode> {
        let params = &self.params;

        let mut sources = Vec::with_capacity(job.items.len());
        for item in &job.items {
            sources.push(self.read_item(&item.source, item.alpha_source.as_deref())?);
        }

        for img in &mut sources {
            preprocess(img, params);
        }

        let has_alpha = match params.alpha {
            AlphaPolicy::Force => true,
            AlphaPolicy::Ignore => false,
            AlphaPolicy::Detect => sources.iter().any(|img| img.pixels().any(|p| p[3] < 255)),
        };

        for (i, img) in sources.iter().enumerate() {
            let (w, h) = img.dimensions();
            if w == 0 || h == 0 || w > MAX_DIMENSION || h > MAX_DIMENSION {
                error!("Source {} has unsupported dimensions {}x{}", job.items[i].source, w, h);
                return Err(ResultCode::FailedFrontEnd);
            }
        }

        let chains: Vec<Vec<RgbaImage>> = sources
            .into_iter()
            .map(|img| mip_chain(img, params, settings))
            .collect();

        if let Err(reason) = validate_composition(params.texture_type, &chains) {
            error!("{} validation failed: {}", params.texture_type.name(), reason);
            return Err(ResultCode::FailedValidating);
        }

        let levels: Vec<(u32, u32, &RgbaImage)> = chains
            .iter()
            .enumerate()
            .flat_map(|(image, chain)| {
                chain
                    .iter()
                    .enumerate()
                    .map(move |(level, img)| (image as u32, level as u32, img))
            })
            .collect();

        info!(
            "Encoding {} slice(s) from {} image(s) to {}",
            levels.len(),
            chains.len(),
            PAYLOAD_FORMAT
        );

        let payload_format = PAYLOAD_FORMAT.info().image_format.ok_or(ResultCode::FailedBackend)?;
        let encoded: Vec<(EncodedSlice, SliceMetric)> = levels
            .par_iter()
            .map(|&(image, level, img)| {
                encode_slice(image, level, img, payload_format, settings, has_alpha, params.compute_stats)
            })
            .collect::<Result<_, EngineFailure>>()
            .map_err(|e| {
                error!("Encoding failed: {}", e);
                ResultCode::FailedBackend
            })?;

        let (slices, metrics): (Vec<EncodedSlice>, Vec<SliceMetric>) = encoded.into_iter().unzip();

        let facts = HeaderFacts {
            image_count: chains.len() as u32,
            level_counts: chains.iter().map(|c| c.len() as u32).collect(),
            texture_type: params.texture_type,
            flags: ContainerFlags {
                y_flipped: params.y_flip,
                has_alpha,
            },
            us_per_frame: params.us_per_frame,
            userdata: [params.userdata0, params.userdata1],
        };

        let bytes = container::assemble(&facts, &slices).map_err(|e| {
            error!("Failed assembling container: {}", e);
            ResultCode::FailedCreateContainer
        })?;

        write_output(&job.output, &bytes).map_err(|e| {
            error!("Failed writing {}: {}", job.output.display(), e);
            ResultCode::FailedWritingOutput
        })?;

        debug!("Wrote {} bytes to {}", bytes.len(), job.output.display());
        Ok(metrics)
    }

    /// Read a source and fold in its alpha source, if any
    fn read_item(&self, source: &str, alpha_source: Option<&str>) -> Result<RgbaImage, ResultCode> {
        let read = |id: &str| {
            self.raster.decode(Path::new(id)).map_err(|e| {
                error!("Failed reading source image: {}", e);
                ResultCode::FailedReadingSourceImages
            })
        };

        let mut img = read(source)?;
        if let Some(alpha_id) = alpha_source {
            let alpha = read(alpha_id)?;
            if alpha.dimensions() != img.dimensions() {
                error!(
                    "Alpha source {} is {}x{}, color source {} is {}x{}",
                    alpha_id,
                    alpha.width(),
                    alpha.height(),
                    source,
                    img.width(),
                    img.height()
                );
                return Err(ResultCode::FailedReadingSourceImages);
            }
            apply_alpha_source(&mut img, &alpha);
        }
        Ok(img)
    }
}

impl<R: RasterCodec> CompressionEngine for ReferenceCompressor<R> {
    type Codebook = EncoderSettings;

    fn init(&mut self, params: &CompressionParams) -> Result<(), ConfigError> {
        let reject = |reason: &str| Err(ConfigError::EngineInit(reason.to_string()));

        if params.compression_level > MAX_COMPRESSION_LEVEL {
            return reject("compression level out of range");
        }
        if params.us_per_frame > MAX_US_PER_FRAME {
            return reject("frame duration does not fit the container header");
        }
        if !(params.mip_scale.is_finite() && params.mip_scale > 0.0) {
            return reject("mip scale must be positive");
        }
        if params.mip_smallest_dimension == 0 {
            return reject("smallest mip dimension must be at least 1");
        }

        if params.debug {
            debug!("Compression parameters: {:?}", params);
        }
        self.params = params.clone();
        Ok(())
    }

    fn load_codebook(&self) -> BatchResult<EncoderSettings> {
        let settings = EncoderSettings::for_params(&self.params);
        debug!("Encoder settings: {:?}", settings);
        Ok(settings)
    }

    fn run(&mut self, job: &CompressionJob, codebook: &EncoderSettings) -> JobReport {
        match self.compress(job, codebook) {
            Ok(slices) => JobReport {
                code: ResultCode::Success,
                slices,
            },
            Err(code) => JobReport::failed(code),
        }
    }
}

fn write_output(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    paths::ensure_parent_dirs(path)?;
    std::fs::write(path, bytes)
}

/// Rec. 709 luma of a pixel
fn luma(p: &Rgba<u8>) -> f64 {
    0.2126 * f64::from(p[0]) + 0.7152 * f64::from(p[1]) + 0.0722 * f64::from(p[2])
}

/// Replace alpha with the luma of a second image of the same size
pub fn apply_alpha_source(img: &mut RgbaImage, alpha: &RgbaImage) {
    for (dst, src) in img.pixels_mut().zip(alpha.pixels()) {
        dst[3] = luma(src).round().clamp(0.0, 255.0) as u8;
    }
}

/// Flip, R/G separation and alpha suppression
fn preprocess(img: &mut RgbaImage, params: &CompressionParams) {
    if params.separate_rg_to_color_alpha {
        for p in img.pixels_mut() {
            let (r, g) = (p[0], p[1]);
            *p = Rgba([r, r, r, g]);
        }
    }
    if params.y_flip {
        image::imageops::flip_vertical_in_place(img);
    }
    if params.alpha == AlphaPolicy::Ignore {
        for p in img.pixels_mut() {
            p[3] = 255;
        }
    }
}

fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(c: f32) -> f32 {
    if c <= 0.003_130_8 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

/// Downsample one level, filtering in linear light when `srgb` is set
fn downsample(img: &RgbaImage, width: u32, height: u32, filter: FilterType, srgb: bool) -> RgbaImage {
    if !srgb {
        return DynamicImage::ImageRgba8(img.clone())
            .resize_exact(width, height, filter)
            .into_rgba8();
    }

    let linear = Rgba32FImage::from_fn(img.width(), img.height(), |x, y| {
        let p = img.get_pixel(x, y);
        Rgba([
            srgb_to_linear(f32::from(p[0]) / 255.0),
            srgb_to_linear(f32::from(p[1]) / 255.0),
            srgb_to_linear(f32::from(p[2]) / 255.0),
            f32::from(p[3]) / 255.0,
        ])
    });

    let resized = DynamicImage::ImageRgba32F(linear)
        .resize_exact(width, height, filter)
        .into_rgba32f();

    let to_u8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    RgbaImage::from_fn(width, height, |x, y| {
        let p = resized.get_pixel(x, y);
        Rgba([
            to_u8(linear_to_srgb(p[0])),
            to_u8(linear_to_srgb(p[1])),
            to_u8(linear_to_srgb(p[2])),
            to_u8(p[3]),
        ])
    })
}

/// Treat RGB as a unit normal and rescale it to length 1
fn renormalize(img: &mut RgbaImage) {
    for p in img.pixels_mut() {
        let v = [0, 1, 2].map(|i| f32::from(p[i]) / 127.5 - 1.0);
        let len = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
        if len > f32::EPSILON {
            for i in 0..3 {
                p[i] = ((v[i] / len + 1.0) * 127.5).round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

/// Base level plus generated mips, stopping before any level whose larger
/// side drops under the smallest allowed dimension
pub fn mip_chain(base: RgbaImage, params: &CompressionParams, settings: &EncoderSettings) -> Vec<RgbaImage> {
    let mut chain = vec![base];
    if !params.mip_gen {
        return chain;
    }

    let srgb = params.mip_srgb.unwrap_or(params.perceptual);
    loop {
        let Some(prev) = chain.last() else { break };
        let (w, h) = prev.dimensions();
        if w == 1 && h == 1 {
            break;
        }
        let (nw, nh) = ((w / 2).max(1), (h / 2).max(1));
        if nw.max(nh) < params.mip_smallest_dimension {
            break;
        }

        let source = if params.mip_scale > 1.0 {
            image::imageops::blur(prev, params.mip_scale - 1.0)
        } else {
            prev.clone()
        };
        let mut level = downsample(&source, nw, nh, settings.filter, srgb);
        if params.mip_renormalize {
            renormalize(&mut level);
        }
        chain.push(level);
    }

    chain
}

/// Members of arrays, volumes, cubemaps and videos must agree on size and
/// level count; cubemaps come in square groups of six
pub fn validate_composition(texture_type: TextureType, chains: &[Vec<RgbaImage>]) -> Result<(), String> {
    let Some(first) = chains.first().and_then(|c| c.first()) else {
        return Err("no images".to_string());
    };

    if texture_type == TextureType::Cubemap {
        if chains.len() % 6 != 0 {
            return Err(format!("{} images is not a multiple of 6", chains.len()));
        }
        if first.width() != first.height() {
            return Err(format!("faces must be square, got {}x{}", first.width(), first.height()));
        }
    }

    if texture_type.requires_uniform_members() {
        let levels = chains[0].len();
        for (i, chain) in chains.iter().enumerate() {
            let dims = chain.first().map(|img| img.dimensions());
            if dims != Some(first.dimensions()) || chain.len() != levels {
                return Err(format!("image {} differs in size or level count from image 0", i));
            }
        }
    }

    Ok(())
}

fn luma_psnr(a: &RgbaImage, b: &RgbaImage) -> f32 {
    let n = f64::from(a.width()) * f64::from(a.height());
    if n == 0.0 {
        return 0.0;
    }
    let sum: f64 = a
        .pixels()
        .zip(b.pixels())
        .map(|(pa, pb)| {
            let d = luma(pa) - luma(pb);
            d * d
        })
        .sum();
    let mse = sum / n;
    if mse <= 0.0 {
        return MAX_PSNR as f32;
    }
    (20.0 * (255.0 / mse.sqrt()).log10()).min(MAX_PSNR) as f32
}

fn encode_slice(
    image: u32,
    level: u32,
    img: &RgbaImage,
    format: ImageFormat,
    settings: &EncoderSettings,
    has_alpha: bool,
    compute_stats: bool,
) -> Result<(EncodedSlice, SliceMetric), EngineFailure> {
    let (width, height) = img.dimensions();
    let blocks = encode_blocks(img, format, settings.quality)?;

    let fidelity = if compute_stats {
        let decoded = decode_blocks(format, width, height, &blocks)?;
        let bc1 = encode_blocks(img, ImageFormat::BC1RgbaUnorm, settings.quality)?;
        let bc1_decoded = decode_blocks(ImageFormat::BC1RgbaUnorm, width, height, &bc1)?;
        vec![luma_psnr(img, &decoded), luma_psnr(img, &bc1_decoded)]
    } else {
        Vec::new()
    };

    debug!("Encoded image {} level {} ({}x{})", image, level, width, height);

    let metric = SliceMetric {
        width,
        height,
        has_alpha,
        bits_per_texel: (blocks.len() * 8) as f32 / (width * height) as f32,
        fidelity,
    };
    let slice = EncodedSlice {
        image,
        level,
        width,
        height,
        blocks,
    };
    Ok((slice, metric))
}
