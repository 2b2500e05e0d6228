//! Compress then unpack through the reference engines

use std::path::Path;

use image::{Rgba, RgbaImage};
use indicatif::ProgressBar;
use tempfile::tempdir;

use texbatch::compress::compress_batch;
use texbatch::config::{BatchMode, CompressConfig, CompressionParams, TextureType, UnpackConfig};
use texbatch::diagnostics::Diagnostics;
use texbatch::engine::{Container, ContainerFlags, HeaderFacts, TranscodingEngine};
use texbatch::error::BatchError;
use texbatch::formats::{FormatSelection, TranscodeFormat};
use texbatch::listing::ExpandedBatch;
use texbatch::reference::container::{assemble, EncodedSlice};
use texbatch::reference::{DdsWriter, ImageRaster, ReferenceCompressor, ReferenceTranscoder};
use texbatch::unpack::{unpack_batch, Exporters};

fn batch_of<P: AsRef<Path>>(paths: &[P]) -> ExpandedBatch {
    ExpandedBatch {
        sources: paths
            .iter()
            .map(|p| p.as_ref().to_string_lossy().into_owned())
            .collect(),
        alpha_sources: Vec::new(),
    }
}

fn save(path: &Path, width: u32, height: u32, alpha: u8) -> anyhow::Result<()> {
    RgbaImage::from_fn(width, height, |x, y| Rgba([(x * 40) as u8, (y * 40) as u8, 90, alpha]))
        .save(path)?;
    Ok(())
}

fn compress(
    batch: &ExpandedBatch,
    config: CompressConfig,
    diag: &mut Diagnostics,
) -> Result<texbatch::compress::CompressReport, BatchError> {
    let config = config.finalize()?;
    let mut engine = ReferenceCompressor::new(ImageRaster);
    compress_batch(&mut engine, batch, &config, diag, &ProgressBar::hidden())
}

fn unpack(
    batch: &ExpandedBatch,
    config: &UnpackConfig,
    diag: &mut Diagnostics,
) -> Result<Vec<texbatch::unpack::FileReport>, BatchError> {
    let exporters = Exporters {
        raster: &ImageRaster,
        native: &DdsWriter,
    };
    unpack_batch(&ReferenceTranscoder, &exporters, batch, config, diag, &ProgressBar::hidden())
}

#[test]
fn round_trip_keeps_dimensions_and_alpha() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let out = dir.path().join("out");
    let translucent = dir.path().join("glass.png");
    let opaque = dir.path().join("rock.png");
    save(&translucent, 6, 5, 100)?;
    save(&opaque, 8, 4, 255)?;

    let mut diag = Diagnostics::new();
    let report = compress(
        &batch_of(&[&translucent, &opaque]),
        CompressConfig {
            mode: BatchMode::Independent,
            output_dir: Some(out.clone()),
            ..Default::default()
        },
        &mut diag,
    )?;
    assert_eq!(report.written, vec![out.join("glass.tbc"), out.join("rock.tbc")]);

    for (container, alpha) in [(out.join("glass.tbc"), true), (out.join("rock.tbc"), false)] {
        let loaded = ReferenceTranscoder.load_container(std::fs::read(&container)?)?;
        assert!(loaded.verify_checksum());
        assert_eq!(loaded.header_facts().flags.has_alpha, alpha);
    }

    let export_dir = dir.path().join("export");
    let config = UnpackConfig {
        formats: FormatSelection::Single(TranscodeFormat::Rgba32),
        output_dir: Some(export_dir.clone()),
        ..Default::default()
    };
    let reports = unpack(
        &batch_of(&[&out.join("glass.tbc"), &out.join("rock.tbc")]),
        &config,
        &mut diag,
    )?;
    assert_eq!(reports.len(), 2);
    assert!(diag.is_clean(), "{}", diag);

    let rgb = image::open(export_dir.join("glass_unpacked_rgb_RGBA32_0_0.png"))?;
    assert_eq!((rgb.width(), rgb.height()), (6, 5));
    let alpha = image::open(export_dir.join("glass_unpacked_a_RGBA32_0_0.png"))?.into_luma8();
    assert!(alpha.pixels().all(|p| p[0] < 255));

    let rgb = image::open(export_dir.join("rock_unpacked_rgb_RGBA32_0_0.png"))?;
    assert_eq!((rgb.width(), rgb.height()), (8, 4));
    let alpha = image::open(export_dir.join("rock_unpacked_a_RGBA32_0_0.png"))?.into_luma8();
    assert!(alpha.pixels().all(|p| p[0] == 255));

    assert!(export_dir.join("glass_transcoded_RGBA32_0.dds").exists());
    Ok(())
}

#[test]
fn cubemap_exports_one_dds_per_six_faces() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let faces: Vec<_> = (0..6).map(|i| dir.path().join(format!("face{}.png", i))).collect();
    for face in &faces {
        save(face, 8, 8, 255)?;
    }

    let mut diag = Diagnostics::new();
    let container = dir.path().join("sky.tbc");
    compress(
        &batch_of(&faces),
        CompressConfig {
            params: CompressionParams {
                texture_type: TextureType::Cubemap,
                mip_gen: true,
                ..Default::default()
            },
            output_file: Some(container.clone()),
            ..Default::default()
        },
        &mut diag,
    )?;

    let export_dir = dir.path().join("export");
    let reports = unpack(
        &batch_of(&[&container]),
        &UnpackConfig {
            formats: FormatSelection::Single(TranscodeFormat::Bc1),
            output_dir: Some(export_dir.clone()),
            ..Default::default()
        },
        &mut diag,
    )?;

    assert_eq!(reports[0].native_units, vec![export_dir.join("sky_transcoded_cubemap_BC1_0.dds")]);
    assert!(reports[0].native_units[0].exists());
    // 6 faces x 4 levels, colour only for BC1
    assert_eq!(reports[0].raster_files.len(), 24);
    Ok(())
}

#[test]
fn sequence_failure_leaves_no_outputs() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let good = dir.path().join("good.png");
    save(&good, 4, 4, 255)?;
    let missing = dir.path().join("missing.png");
    let ledger = dir.path().join("stats.csv");

    let mut diag = Diagnostics::new();
    let err = compress(
        &batch_of(&[&good, &missing]),
        CompressConfig {
            output_dir: Some(dir.path().to_path_buf()),
            ledger_path: Some(ledger.clone()),
            ..Default::default()
        },
        &mut diag,
    )
    .unwrap_err();

    assert!(matches!(err, BatchError::Io { .. }));
    assert!(!dir.path().join("good.tbc").exists());
    assert_eq!(std::fs::read_to_string(&ledger)?, "");
    Ok(())
}

#[test]
fn independent_mode_skips_unreadable_source() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let a = dir.path().join("a.png");
    let c = dir.path().join("c.png");
    save(&a, 4, 4, 255)?;
    save(&c, 4, 4, 255)?;
    let ledger = dir.path().join("stats.csv");

    let mut diag = Diagnostics::new();
    let report = compress(
        &batch_of(&[&a, &dir.path().join("b.png"), &c]),
        CompressConfig {
            mode: BatchMode::Independent,
            output_dir: Some(dir.path().to_path_buf()),
            ledger_path: Some(ledger.clone()),
            ..Default::default()
        },
        &mut diag,
    )?;

    assert_eq!(report.written.len(), 2);
    assert_eq!(diag.failures, 1);
    assert!(dir.path().join("a.tbc").exists());
    assert!(!dir.path().join("b.tbc").exists());
    assert!(dir.path().join("c.tbc").exists());

    let rows = std::fs::read_to_string(&ledger)?;
    assert_eq!(rows.lines().count(), 2);
    Ok(())
}

#[test]
fn corrupted_container_is_skipped() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let src = dir.path().join("a.png");
    save(&src, 4, 4, 255)?;

    let mut diag = Diagnostics::new();
    compress(
        &batch_of(&[&src]),
        CompressConfig {
            output_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        },
        &mut diag,
    )?;

    let container = dir.path().join("a.tbc");
    let mut bytes = std::fs::read(&container)?;
    let n = bytes.len();
    bytes[n - 9] ^= 0x55;
    let broken = dir.path().join("broken.tbc");
    std::fs::write(&broken, &bytes)?;

    let reports = unpack(
        &batch_of(&[&broken, &container]),
        &UnpackConfig {
            validate_only: true,
            ..Default::default()
        },
        &mut diag,
    )?;

    assert_eq!(reports.len(), 1);
    assert_eq!(diag.failures, 1);
    Ok(())
}

#[test]
fn zero_sized_slice_skips_only_that_container() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let src = dir.path().join("g.png");
    save(&src, 4, 4, 255)?;

    let mut diag = Diagnostics::new();
    compress(
        &batch_of(&[&src]),
        CompressConfig {
            output_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        },
        &mut diag,
    )?;

    let facts = HeaderFacts {
        image_count: 1,
        level_counts: vec![1],
        texture_type: TextureType::Regular2D,
        flags: ContainerFlags::default(),
        us_per_frame: 0,
        userdata: [0, 0],
    };
    let empty = EncodedSlice {
        image: 0,
        level: 0,
        width: 0,
        height: 4,
        blocks: vec![0; 16],
    };
    let zero = dir.path().join("zero.tbc");
    std::fs::write(&zero, assemble(&facts, &[empty])?)?;

    let reports = unpack(
        &batch_of(&[&zero, &dir.path().join("g.tbc")]),
        &UnpackConfig {
            validate_only: true,
            ..Default::default()
        },
        &mut diag,
    )?;

    assert_eq!(reports.len(), 1);
    assert!(reports[0].path.ends_with("g.tbc"));
    assert!(reports[0].transcoded > 0);
    assert_eq!(diag.failures, 1);
    Ok(())
}
