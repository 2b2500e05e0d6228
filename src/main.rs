//! texbatch command-line front end

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use tracing_subscriber::EnvFilter;

use texbatch::compress;
use texbatch::config::{
    AlphaPolicy, BatchMode, CompressConfig, CompressionParams, ConfigError, MipFilter, TextureType,
    UnpackConfig,
};
use texbatch::diagnostics::Diagnostics;
use texbatch::formats::FormatSelection;
use texbatch::listing::{self, BatchSpec, ExpandedBatch, TemplateSpec};
use texbatch::paths;
use texbatch::reference::{DdsWriter, ImageRaster, ReferenceCompressor, ReferenceTranscoder};
use texbatch::unpack::{self, Exporters};

#[derive(Parser)]
#[command(name = "texbatch")]
#[command(version)]
#[command(about = "Batch texture compressor and GPU format transcoder")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress raster images into .tbc containers
    Compress(CompressArgs),

    /// Transcode containers to every GPU format and export DDS/PNG files
    Unpack(UnpackArgs),

    /// Transcode containers without writing anything
    Validate(ValidateArgs),

    /// Unpack if any input is a .tbc container, otherwise compress
    Auto {
        #[command(flatten)]
        input: InputArgs,

        /// Directory for outputs
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
}

#[derive(Args)]
struct InputArgs {
    /// Input files; `@file` reads one name per line from a listing file
    inputs: Vec<String>,

    /// Alpha source paired by position with each input (`@file` allowed)
    #[arg(long = "alpha-file")]
    alpha_files: Vec<String>,

    /// Numeric filename template, e.g. "img%02d.png" ('!' may replace '%')
    #[arg(long)]
    multifile_printf: Option<String>,

    /// First index substituted into the template
    #[arg(long, default_value_t = 0)]
    multifile_first: u32,

    /// Number of names produced by the template
    #[arg(long)]
    multifile_num: Option<u32>,
}

impl InputArgs {
    fn expand(self) -> Result<ExpandedBatch> {
        let template = self.multifile_printf.map(|template| TemplateSpec {
            template,
            first: self.multifile_first,
            count: self.multifile_num,
        });

        let batch = listing::expand(BatchSpec {
            inputs: self.inputs,
            alpha_inputs: self.alpha_files,
            template,
        })?;

        if batch.is_empty() {
            return Err(ConfigError::NoInputFiles.into());
        }
        Ok(batch)
    }
}

#[derive(Args)]
struct CompressArgs {
    #[command(flatten)]
    input: InputArgs,

    /// JSON file with compression parameters; flags override it
    #[arg(long)]
    preset: Option<PathBuf>,

    /// Output file (used only when a single container is produced)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Directory prefixed onto derived output names
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// One container per input instead of one multi-image container
    #[arg(long)]
    individual: bool,

    /// Append per-slice statistics to this CSV ledger
    #[arg(long)]
    csv_file: Option<PathBuf>,

    /// Quality level (1-255)
    #[arg(short, long)]
    quality: Option<u32>,

    /// Compression effort level (0-5)
    #[arg(short = 'c', long)]
    comp_level: Option<u32>,

    /// Manual endpoint cluster count (needs --max-selectors)
    #[arg(long)]
    max_endpoints: Option<u32>,

    /// Manual selector cluster count (needs --max-endpoints)
    #[arg(long)]
    max_selectors: Option<u32>,

    /// Use linear colour metrics instead of sRGB
    #[arg(long)]
    linear: bool,

    /// Texture type: 2d, 2darray, 3d, cubemap, video
    #[arg(long)]
    tex_type: Option<String>,

    /// Video frame rate stored in the header
    #[arg(long)]
    framerate: Option<f64>,

    #[arg(long)]
    userdata0: Option<u32>,

    #[arg(long)]
    userdata1: Option<u32>,

    /// Flip sources vertically
    #[arg(long)]
    y_flip: bool,

    /// Always write alpha
    #[arg(long, conflicts_with = "no_alpha")]
    force_alpha: bool,

    /// Never write alpha
    #[arg(long)]
    no_alpha: bool,

    /// Move R to RGB and G to alpha
    #[arg(long)]
    separate_rg_to_color_alpha: bool,

    /// Tune settings for normal maps
    #[arg(long)]
    normal_map: bool,

    /// Generate mipmaps
    #[arg(long)]
    mipmap: bool,

    /// Filter mipmaps in sRGB space
    #[arg(long, conflicts_with = "mip_linear")]
    mip_srgb: bool,

    /// Filter mipmaps in linear space
    #[arg(long)]
    mip_linear: bool,

    /// Mipmap filter: box, tent, gaussian, catmullrom, lanczos
    #[arg(long)]
    mip_filter: Option<String>,

    #[arg(long)]
    mip_scale: Option<f32>,

    /// Smallest allowed mip dimension
    #[arg(long)]
    mip_smallest: Option<u32>,

    /// Renormalize normal map mips
    #[arg(long)]
    mip_renorm: bool,

    #[arg(long)]
    no_selector_rdo: bool,

    #[arg(long)]
    selector_rdo_thresh: Option<f32>,

    #[arg(long)]
    no_endpoint_rdo: bool,

    #[arg(long)]
    endpoint_rdo_thresh: Option<f32>,

    /// Compute and log fidelity statistics
    #[arg(long)]
    stats: bool,

    #[arg(long)]
    debug: bool,
}

impl CompressArgs {
    /// Preset (or defaults) with command-line overrides applied
    fn params(&self) -> Result<CompressionParams> {
        let mut p = match &self.preset {
            Some(path) => CompressionParams::from_preset(path)?,
            None => CompressionParams::default(),
        };

        if self.quality.is_some() {
            p.quality_level = self.quality;
        }
        if let Some(level) = self.comp_level {
            p.compression_level = level;
        }
        if self.max_endpoints.is_some() {
            p.max_endpoint_clusters = self.max_endpoints;
        }
        if self.max_selectors.is_some() {
            p.max_selector_clusters = self.max_selectors;
        }
        if self.linear {
            p.perceptual = false;
        }
        if let Some(name) = &self.tex_type {
            p.texture_type = TextureType::from_str(name)
                .ok_or_else(|| ConfigError::UnknownTextureType(name.clone()))?;
        }
        if let Some(fps) = self.framerate {
            p.set_framerate(fps);
        }
        if let Some(v) = self.userdata0 {
            p.userdata0 = v;
        }
        if let Some(v) = self.userdata1 {
            p.userdata1 = v;
        }
        p.y_flip |= self.y_flip;
        if self.force_alpha {
            p.alpha = AlphaPolicy::Force;
        }
        if self.no_alpha {
            p.alpha = AlphaPolicy::Ignore;
        }
        p.separate_rg_to_color_alpha |= self.separate_rg_to_color_alpha;
        if self.normal_map {
            p.apply_normal_map_preset();
        }
        p.mip_gen |= self.mipmap;
        if self.mip_srgb {
            p.mip_srgb = Some(true);
        }
        if self.mip_linear {
            p.mip_srgb = Some(false);
        }
        if let Some(name) = &self.mip_filter {
            p.mip_filter = MipFilter::from_str(name)
                .ok_or_else(|| ConfigError::UnknownMipFilter(name.clone()))?;
        }
        if let Some(scale) = self.mip_scale {
            p.mip_scale = scale;
        }
        if let Some(smallest) = self.mip_smallest {
            p.mip_smallest_dimension = smallest;
        }
        p.mip_renormalize |= self.mip_renorm;
        p.no_selector_rdo |= self.no_selector_rdo;
        if let Some(t) = self.selector_rdo_thresh {
            p.selector_rdo_thresh = t;
        }
        p.no_endpoint_rdo |= self.no_endpoint_rdo;
        if let Some(t) = self.endpoint_rdo_thresh {
            p.endpoint_rdo_thresh = t;
        }
        p.compute_stats |= self.stats;
        p.debug |= self.debug;

        Ok(p)
    }
}

#[derive(Args)]
struct UnpackArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Target format name, or "all"
    #[arg(long, default_value = "all")]
    format: String,

    /// Skip DDS export
    #[arg(long)]
    no_native: bool,

    /// Do not verify container checksums (fuzz testing)
    #[arg(long)]
    skip_checksum: bool,

    /// Directory for exported files
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

#[derive(Args)]
struct ValidateArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Target format name, or "all"
    #[arg(long, default_value = "all")]
    format: String,

    /// Do not verify container checksums (fuzz testing)
    #[arg(long)]
    skip_checksum: bool,
}

fn progress_bar(what: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{spinner:.green}} [{{elapsed_precise}}] {} [{{bar:40.cyan/blue}}] {{pos}}/{{len}} | {{msg}}",
                what
            ))
            .context("Invalid progress bar template")?
            .progress_chars("=>-"),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

fn run_compress(
    batch: ExpandedBatch,
    config: CompressConfig,
    diagnostics: &mut Diagnostics,
) -> Result<()> {
    let config = config.finalize()?;
    let mut engine = ReferenceCompressor::new(ImageRaster);
    let pb = progress_bar("Compressing")?;

    let report = compress::compress_batch(&mut engine, &batch, &config, diagnostics, &pb)?;

    println!(
        "Wrote {} of {} container(s)",
        report.written.len(),
        report.jobs_planned
    );
    if let Some(ledger) = &config.ledger_path {
        println!("Appended {} row(s) to {}", report.ledger_rows, ledger.display());
    }
    Ok(())
}

fn run_unpack(batch: ExpandedBatch, config: UnpackConfig, diagnostics: &mut Diagnostics) -> Result<()> {
    let engine = ReferenceTranscoder;
    let exporters = Exporters {
        raster: &ImageRaster,
        native: &DdsWriter,
    };
    let pb = progress_bar(if config.validate_only { "Validating" } else { "Unpacking" })?;

    let reports = unpack::unpack_batch(&engine, &exporters, &batch, &config, diagnostics, &pb)?;

    let transcoded: usize = reports.iter().map(|r| r.transcoded).sum();
    let exported: usize = reports
        .iter()
        .map(|r| r.native_units.len() + r.raster_files.len())
        .sum();
    println!(
        "Processed {} of {} container(s): {} level(s) transcoded, {} file(s) exported",
        reports.len(),
        batch.len(),
        transcoded,
        exported
    );
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(if cli.verbose {
                "texbatch=debug".parse()?
            } else {
                "texbatch=info".parse()?
            }),
        )
        .init();

    let started = Instant::now();
    let mut diagnostics = Diagnostics::new();

    match cli.command {
        Commands::Compress(args) => {
            let params = args.params()?;
            let config = CompressConfig {
                params,
                mode: if args.individual {
                    BatchMode::Independent
                } else {
                    BatchMode::Sequence
                },
                output_file: args.output,
                output_dir: args.output_dir,
                ledger_path: args.csv_file,
            };
            run_compress(args.input.expand()?, config, &mut diagnostics)?;
        }

        Commands::Unpack(args) => {
            let config = UnpackConfig {
                formats: FormatSelection::parse(&args.format)?,
                no_native: args.no_native,
                validate_only: false,
                skip_checksum: args.skip_checksum,
                output_dir: args.output_dir,
            };
            run_unpack(args.input.expand()?, config, &mut diagnostics)?;
        }

        Commands::Validate(args) => {
            let config = UnpackConfig {
                formats: FormatSelection::parse(&args.format)?,
                validate_only: true,
                skip_checksum: args.skip_checksum,
                ..Default::default()
            };
            run_unpack(args.input.expand()?, config, &mut diagnostics)?;
        }

        Commands::Auto { input, output_dir } => {
            let batch = input.expand()?;
            if batch.sources.iter().any(|s| paths::is_container(s)) {
                info!("Container input detected, unpacking");
                let config = UnpackConfig {
                    output_dir,
                    ..Default::default()
                };
                run_unpack(batch, config, &mut diagnostics)?;
            } else {
                info!("Raster input detected, compressing");
                let config = CompressConfig {
                    output_dir,
                    ..Default::default()
                };
                run_compress(batch, config, &mut diagnostics)?;
            }
        }
    }

    println!("{}", diagnostics);
    println!("Total time: {:.3} secs", started.elapsed().as_secs_f64());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_compress_flag_overrides() -> Result<()> {
        let cli = Cli::try_parse_from([
            "texbatch", "compress", "a.png", "--quality", "200", "--tex-type", "cubemap",
            "--mipmap", "--no-alpha", "--framerate", "30",
        ])?;
        let Commands::Compress(args) = cli.command else {
            panic!("expected compress");
        };
        let params = args.params()?;
        assert_eq!(params.quality_level, Some(200));
        assert_eq!(params.texture_type, TextureType::Cubemap);
        assert!(params.mip_gen);
        assert_eq!(params.alpha, AlphaPolicy::Ignore);
        assert_eq!(params.us_per_frame, 33_333);
        Ok(())
    }

    #[test]
    fn test_unknown_tex_type() -> Result<()> {
        let cli = Cli::try_parse_from(["texbatch", "compress", "a.png", "--tex-type", "sphere"])?;
        let Commands::Compress(args) = cli.command else {
            panic!("expected compress");
        };
        assert!(args.params().is_err());
        Ok(())
    }

    #[test]
    fn test_empty_input_is_config_error() {
        let input = InputArgs {
            inputs: Vec::new(),
            alpha_files: Vec::new(),
            multifile_printf: None,
            multifile_first: 0,
            multifile_num: None,
        };
        let err = input.expand().unwrap_err();
        assert!(err.downcast_ref::<ConfigError>().is_some());
    }
}
