//! Transcode and export orchestration
//!
//! For each container in the batch:
//! 1. Read and load it, re-derive the checksum (unless bypassed)
//! 2. Transcode every (image, level, format) triple into a result matrix,
//!    skipping levels whose geometry the format cannot represent
//! 3. Export native containers and raster images from the matrix
//!
//! Invalid containers are skipped and the batch moves on. Read failures and
//! transcoder failures abort the run.

use std::path::{Path, PathBuf};

use indicatif::ProgressBar;
use tracing::{debug, error, info};

use crate::config::{ConfigError, UnpackConfig};
use crate::diagnostics::{Diagnostics, Outcome, Skip};
use crate::engine::{
    BlockBuffer, Container, HeaderFacts, NativeContainerWriter, RasterChannels, RasterCodec,
    TranscodingEngine,
};
use crate::error::{BatchError, BatchResult};
use crate::formats::TranscodeFormat;
use crate::listing::ExpandedBatch;
use crate::paths;

/// Faces per cubemap export unit
pub const CUBEMAP_FACES: usize = 6;

/// One cell of the transcode matrix
#[derive(Debug)]
pub enum Cell {
    Populated(BlockBuffer),
    /// Format rejected the level geometry
    Ineligible,
}

impl Cell {
    pub fn buffer(&self) -> Option<&BlockBuffer> {
        match self {
            Cell::Populated(buffer) => Some(buffer),
            Cell::Ineligible => None,
        }
    }
}

/// Transcode results of one container, indexed `[format][image][level]`
#[derive(Debug)]
pub struct TranscodeMatrix {
    pub formats: Vec<TranscodeFormat>,
    pub cells: Vec<Vec<Vec<Cell>>>,
}

impl TranscodeMatrix {
    pub fn populated(&self) -> usize {
        self.iter_cells().filter(|c| c.buffer().is_some()).count()
    }

    pub fn ineligible(&self) -> usize {
        self.iter_cells().filter(|c| c.buffer().is_none()).count()
    }

    fn iter_cells(&self) -> impl Iterator<Item = &Cell> {
        self.cells.iter().flatten().flatten()
    }
}

/// What happened to one container
#[derive(Debug, Default, Clone)]
pub struct FileReport {
    pub path: PathBuf,
    pub transcoded: usize,
    pub ineligible: usize,
    pub native_units: Vec<PathBuf>,
    pub raster_files: Vec<PathBuf>,
}

/// Export collaborators
pub struct Exporters<'a, R, W> {
    pub raster: &'a R,
    pub native: &'a W,
}

/// Unpack (or validate) every container in the batch.
///
/// Diagnostics accumulate across files; the caller summarizes them once.
pub fn unpack_batch<T, R, W>(
    engine: &T,
    exporters: &Exporters<'_, R, W>,
    batch: &ExpandedBatch,
    config: &UnpackConfig,
    diagnostics: &mut Diagnostics,
    pb: &ProgressBar,
) -> BatchResult<Vec<FileReport>>
where
    T: TranscodingEngine,
    R: RasterCodec,
    W: NativeContainerWriter,
{
    if batch.is_empty() {
        return Err(ConfigError::NoInputFiles.into());
    }

    let formats = config.formats.resolve(|f| engine.supports(f))?;
    debug!(
        "Target formats: {}",
        formats.iter().map(|f| f.name()).collect::<Vec<_>>().join(", ")
    );

    if !config.validate_only {
        if let Some(dir) = &config.output_dir {
            std::fs::create_dir_all(dir).map_err(|e| BatchError::io(dir, e))?;
        }
    }

    pb.set_length(batch.len() as u64);
    pb.set_position(0);

    let mut reports = Vec::with_capacity(batch.len());
    for source in &batch.sources {
        pb.set_message(paths::file_name(source).to_string());

        let outcome = unpack_file(engine, exporters, source, &formats, config, diagnostics);
        if let Some(report) = diagnostics.absorb(outcome)? {
            reports.push(report);
        }

        pb.inc(1);
    }

    pb.finish_and_clear();
    Ok(reports)
}

/// Process one container
pub fn unpack_file<T, R, W>(
    engine: &T,
    exporters: &Exporters<'_, R, W>,
    source: &str,
    formats: &[TranscodeFormat],
    config: &UnpackConfig,
    diagnostics: &mut Diagnostics,
) -> Outcome<FileReport>
where
    T: TranscodingEngine,
    R: RasterCodec,
    W: NativeContainerWriter,
{
    let path = Path::new(source);
    let invalid = |reason: String| {
        Outcome::Skipped(Skip::InvalidContainer(BatchError::validation(path, reason)))
    };

    info!("Input file \"{}\"", source);
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => return Outcome::Fatal(BatchError::io(path, e)),
    };
    if bytes.is_empty() {
        return invalid("file is empty".to_string());
    }

    let container = match engine.load_container(bytes) {
        Ok(c) => c,
        Err(e) => return invalid(format!("failed loading container: {}", e)),
    };

    if config.skip_checksum {
        debug!("Skipping checksum verification of {}", source);
    } else if !container.verify_checksum() {
        return invalid("checksum mismatch".to_string());
    }

    let facts = container.header_facts();
    if facts.image_count as usize != facts.level_counts.len() {
        return Outcome::Fatal(BatchError::engine(
            source,
            format!(
                "header reports {} images but {} level counts",
                facts.image_count,
                facts.level_counts.len()
            ),
        ));
    }

    describe(source, &container);

    let matrix = match transcode_all(&container, source, formats, diagnostics) {
        Ok(m) => m,
        Err(e) => return Outcome::Fatal(e),
    };

    let mut report = FileReport {
        path: path.to_path_buf(),
        transcoded: matrix.populated(),
        ineligible: matrix.ineligible(),
        ..Default::default()
    };
    info!(
        "Transcoded {} level(s) of {}, {} ineligible",
        report.transcoded, source, report.ineligible
    );

    if config.validate_only {
        return Outcome::Done(report);
    }

    let base = paths::base_name(source);
    for (fi, &format) in matrix.formats.iter().enumerate() {
        let images = &matrix.cells[fi];

        if !config.no_native {
            match export_native(exporters.native, base, format, images, facts, config) {
                Ok(units) => report.native_units.extend(units),
                Err(e) => return Outcome::Fatal(e),
            }
        }

        match export_raster(exporters.raster, base, format, images, config, diagnostics) {
            Ok(files) => report.raster_files.extend(files),
            Err(e) => return Outcome::Fatal(e),
        }
    }

    Outcome::Done(report)
}

/// Transcode every eligible triple, in image, level, format order
pub fn transcode_all<C: Container>(
    container: &C,
    source: &str,
    formats: &[TranscodeFormat],
    diagnostics: &mut Diagnostics,
) -> BatchResult<TranscodeMatrix> {
    let facts = container.header_facts();

    let mut cells: Vec<Vec<Vec<Cell>>> = formats
        .iter()
        .map(|_| {
            facts
                .level_counts
                .iter()
                .map(|&n| Vec::with_capacity(n as usize))
                .collect()
        })
        .collect();

    for (image, &level_count) in facts.level_counts.iter().enumerate() {
        let image = image as u32;
        for level in 0..level_count {
            let geometry = container.level_geometry(image, level).ok_or_else(|| {
                BatchError::engine(
                    format!("{} image {} level {}", source, image, level),
                    "no geometry for level",
                )
            })?;

            for (fi, &format) in formats.iter().enumerate() {
                if !format.info().accepts(geometry.width, geometry.height) {
                    diagnostics.absorb::<()>(Outcome::Skipped(Skip::Ineligible {
                        image,
                        level,
                        format,
                        width: geometry.width,
                        height: geometry.height,
                    }))?;
                    cells[fi][image as usize].push(Cell::Ineligible);
                    continue;
                }

                let mut buffer = BlockBuffer::allocate(format, geometry.width, geometry.height);
                if let Err(e) = container.transcode(image, level, format, &mut buffer.data) {
                    error!(
                        "Failed transcoding image {} level {} to {}",
                        image, level, format
                    );
                    return Err(BatchError::engine(
                        format!("{} image {} level {} format {}", source, image, level, format),
                        e.0,
                    ));
                }

                debug!(
                    "Transcoded image {} level {} res {}x{} to {} ({} blocks)",
                    image,
                    level,
                    geometry.width,
                    geometry.height,
                    format,
                    buffer.total_blocks()
                );
                cells[fi][image as usize].push(Cell::Populated(buffer));
            }
        }
    }

    Ok(TranscodeMatrix {
        formats: formats.to_vec(),
        cells,
    })
}

/// Full mip chain of an image, or None if any level is missing
fn complete_chain(levels: &[Cell]) -> Option<Vec<&BlockBuffer>> {
    if levels.is_empty() {
        return None;
    }
    levels.iter().map(Cell::buffer).collect()
}

fn export_native<W: NativeContainerWriter>(
    writer: &W,
    base: &str,
    format: TranscodeFormat,
    images: &[Vec<Cell>],
    facts: &HeaderFacts,
    config: &UnpackConfig,
) -> BatchResult<Vec<PathBuf>> {
    let dir = config.output_dir.as_deref();
    let mut written = Vec::new();

    if format.info().groups(facts.texture_type) {
        for (group, faces) in images.chunks_exact(CUBEMAP_FACES).enumerate() {
            let Some(chains) = faces
                .iter()
                .map(|levels| complete_chain(levels))
                .collect::<Option<Vec<_>>>()
            else {
                debug!("Cubemap group {} has incomplete faces for {}, not exported", group, format);
                continue;
            };

            let out = paths::export_path(
                dir,
                format!("{}_transcoded_cubemap_{}_{}.{}", base, format, group, writer.extension()),
            );
            writer.write(&out, &chains, true)?;
            info!("Wrote {}", out.display());
            written.push(out);
        }
    } else {
        for (image, levels) in images.iter().enumerate() {
            let Some(chain) = complete_chain(levels) else {
                continue;
            };

            let out = paths::export_path(
                dir,
                format!("{}_transcoded_{}_{}.{}", base, format, image, writer.extension()),
            );
            writer.write(&out, &[chain], false)?;
            info!("Wrote {}", out.display());
            written.push(out);
        }
    }

    Ok(written)
}

fn export_raster<R: RasterCodec>(
    raster: &R,
    base: &str,
    format: TranscodeFormat,
    images: &[Vec<Cell>],
    config: &UnpackConfig,
    diagnostics: &mut Diagnostics,
) -> BatchResult<Vec<PathBuf>> {
    let dir = config.output_dir.as_deref();
    let mut written = Vec::new();

    for (image, levels) in images.iter().enumerate() {
        for (level, cell) in levels.iter().enumerate() {
            let Some(buffer) = cell.buffer() else {
                continue;
            };

            let (pixels, fully_valid) = raster.unpack(buffer);
            if !fully_valid {
                diagnostics.record_unpack_warning(format, image as u32, level as u32);
            }

            let rgb = paths::export_path(
                dir,
                format!("{}_unpacked_rgb_{}_{}_{}.png", base, format, image, level),
            );
            raster.encode(&pixels, RasterChannels::Color, &rgb)?;
            written.push(rgb);

            if format.has_alpha() {
                let alpha = paths::export_path(
                    dir,
                    format!("{}_unpacked_a_{}_{}_{}.png", base, format, image, level),
                );
                raster.encode(&pixels, RasterChannels::Alpha, &alpha)?;
                written.push(alpha);
            }
        }
    }

    debug!("Wrote {} raster image(s) for {}", written.len(), format);
    Ok(written)
}

/// Log what a container holds
fn describe<C: Container>(source: &str, container: &C) {
    let facts = container.header_facts();

    info!("File: {}", source);
    info!("Texture type: {}", facts.texture_type.name());
    if facts.us_per_frame > 0 {
        info!(
            "Framerate: {:.2} ({} us per frame)",
            1_000_000.0 / f64::from(facts.us_per_frame),
            facts.us_per_frame
        );
    }
    info!("Total images: {}", facts.image_count);
    debug!(
        "Y flipped: {}, has alpha slices: {}, userdata: {:#x} {:#x}",
        facts.flags.y_flipped, facts.flags.has_alpha, facts.userdata[0], facts.userdata[1]
    );

    for (image, &levels) in facts.level_counts.iter().enumerate() {
        match container.level_geometry(image as u32, 0) {
            Some(top) => info!(
                "Image {}: {} levels, {}x{}, alpha: {}",
                image, levels, top.width, top.height, top.has_alpha
            ),
            None => info!("Image {}: {} levels", image, levels),
        }
    }
}
