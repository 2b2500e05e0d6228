//! Compression orchestration
//!
//! Drives the compression engine over an expanded batch:
//! - sequence mode: one job covering every item, one multi-image container
//! - independent mode: one job per item, alpha sources paired by position
//!
//! Jobs run one at a time. A failed source read in independent mode skips
//! that item; any other failure, and every failure in sequence mode, aborts
//! the run. Ledger rows are appended only for jobs that succeeded.

use std::path::PathBuf;
use std::time::Instant;

use indicatif::ProgressBar;
use tracing::{error, info, warn};

use crate::config::{BatchMode, CompressConfig, ConfigError};
use crate::diagnostics::{Diagnostics, Outcome, Skip};
use crate::engine::{CompressionEngine, CompressionJob, ResultCode};
use crate::error::{BatchError, BatchResult};
use crate::ledger::Ledger;
use crate::listing::ExpandedBatch;
use crate::paths;

/// Failure kinds a compression job can end with
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CompressFailure {
    #[error("Compressor failed reading a source image")]
    SourceRead,
    #[error("Compressor failed 2darray/cubemap/video validation checks")]
    Composition,
    #[error("Compressor frontend stage failed")]
    FrontEnd,
    #[error("Compressor frontend data extraction failed")]
    FrontEndExtract,
    #[error("Compressor backend stage failed")]
    BackEnd,
    #[error("Compressor failed creating container data")]
    ContainerAssembly,
    #[error("Compressor failed writing the output container")]
    OutputWrite,
}

impl CompressFailure {
    /// Whether the batch may continue after this failure
    pub fn is_tolerated(self, mode: BatchMode) -> bool {
        self == CompressFailure::SourceRead && mode == BatchMode::Independent
    }
}

impl ResultCode {
    /// Failure kind for this code, None on success
    pub fn failure(self) -> Option<CompressFailure> {
        match self {
            ResultCode::Success => None,
            ResultCode::FailedReadingSourceImages => Some(CompressFailure::SourceRead),
            ResultCode::FailedValidating => Some(CompressFailure::Composition),
            ResultCode::FailedFrontEnd => Some(CompressFailure::FrontEnd),
            ResultCode::FailedFrontEndExtract => Some(CompressFailure::FrontEndExtract),
            ResultCode::FailedBackend => Some(CompressFailure::BackEnd),
            ResultCode::FailedCreateContainer => Some(CompressFailure::ContainerAssembly),
            ResultCode::FailedWritingOutput => Some(CompressFailure::OutputWrite),
        }
    }
}

/// Summary of a compression run
#[derive(Debug, Default, Clone)]
pub struct CompressReport {
    pub jobs_planned: usize,
    /// Containers written, in job order
    pub written: Vec<PathBuf>,
    /// Outputs of jobs skipped after a tolerated failure
    pub skipped: Vec<PathBuf>,
    pub ledger_rows: usize,
}

/// Split a batch into jobs and name their outputs.
///
/// An explicit output file is honoured only when exactly one job runs;
/// otherwise each output is named after the job's first source with the
/// container extension, under the output directory if one is set.
pub fn plan_jobs(batch: &ExpandedBatch, config: &CompressConfig) -> Vec<CompressionJob> {
    let items = batch.items();
    if items.is_empty() {
        return Vec::new();
    }

    let job_count = match config.mode {
        BatchMode::Sequence => 1,
        BatchMode::Independent => items.len(),
    };

    let explicit = match (&config.output_file, job_count) {
        (Some(path), 1) => Some(path.clone()),
        (Some(path), n) => {
            warn!(
                "Ignoring output file {} because {} jobs will run",
                path.display(),
                n
            );
            None
        }
        (None, _) => None,
    };

    let output_for = |source: &str| {
        explicit
            .clone()
            .unwrap_or_else(|| paths::container_output_path(source, config.output_dir.as_deref()))
    };

    match config.mode {
        BatchMode::Sequence => {
            let output = output_for(&items[0].source);
            vec![CompressionJob {
                index: 0,
                items,
                output,
            }]
        }
        BatchMode::Independent => items
            .into_iter()
            .enumerate()
            .map(|(index, item)| CompressionJob {
                index,
                output: output_for(&item.source),
                items: vec![item],
            })
            .collect(),
    }
}

/// Compress an expanded batch.
///
/// The codebook is loaded once and shared by every job. The ledger, when
/// configured, stays open for the whole run and is closed on every exit path.
pub fn compress_batch<E: CompressionEngine>(
    engine: &mut E,
    batch: &ExpandedBatch,
    config: &CompressConfig,
    diagnostics: &mut Diagnostics,
    pb: &ProgressBar,
) -> BatchResult<CompressReport> {
    if batch.is_empty() {
        return Err(ConfigError::NoInputFiles.into());
    }

    engine.init(&config.params)?;
    let codebook = engine.load_codebook()?;

    let mut ledger = match &config.ledger_path {
        Some(path) => Some(Ledger::open(path)?),
        None => None,
    };

    let jobs = plan_jobs(batch, config);
    info!("Processing {} total files", batch.len());

    pb.set_length(jobs.len() as u64);
    pb.set_position(0);

    let mut report = CompressReport {
        jobs_planned: jobs.len(),
        ..Default::default()
    };

    for job in &jobs {
        pb.set_message(paths::file_name(&job.items[0].source).to_string());

        let outcome = run_job(engine, job, &codebook, config, ledger.as_mut());
        match diagnostics.absorb(outcome)? {
            Some(output) => report.written.push(output),
            None => report.skipped.push(job.output.clone()),
        }

        pb.inc(1);
    }

    report.ledger_rows = ledger.as_ref().map_or(0, Ledger::rows_written);
    pb.finish_and_clear();

    Ok(report)
}

/// Run one job and classify its result
fn run_job<E: CompressionEngine>(
    engine: &mut E,
    job: &CompressionJob,
    codebook: &E::Codebook,
    config: &CompressConfig,
    ledger: Option<&mut Ledger>,
) -> Outcome<PathBuf> {
    if let [item] = job.items.as_slice() {
        match &item.alpha_source {
            Some(alpha) => info!(
                "Processing source file \"{}\", alpha file \"{}\"",
                item.source, alpha
            ),
            None => info!("Processing source file \"{}\"", item.source),
        }
    } else {
        info!(
            "Processing {} source files as one {} container",
            job.items.len(),
            config.params.texture_type.name()
        );
    }

    let started = Instant::now();
    let report = engine.run(job, codebook);
    let elapsed = started.elapsed().as_secs_f64();

    if let Some(failure) = report.code.failure() {
        error!("Job {} ({}): {}", job.index, job.output.display(), failure);

        if failure.is_tolerated(config.mode) {
            return Outcome::Skipped(Skip::SourceUnreadable {
                output: job.output.clone(),
                source: job.items[0].source.clone(),
            });
        }
        return Outcome::Fatal(job_error(job, failure));
    }

    info!(
        "Compression succeeded to file \"{}\" in {:.3} secs",
        job.output.display(),
        elapsed
    );

    if let Some(ledger) = ledger {
        if !report.slices.is_empty() {
            if let Err(e) = ledger.append_job(&job.output, &report.slices, &config.params, elapsed) {
                return Outcome::Fatal(e);
            }
        }
    }

    Outcome::Done(job.output.clone())
}

/// Fatal error for a failed job, naming the job and the item involved
fn job_error(job: &CompressionJob, failure: CompressFailure) -> BatchError {
    match failure {
        CompressFailure::SourceRead => BatchError::io(
            &job.items[0].source,
            std::io::Error::other(format!("{} (job {})", failure, job.index)),
        ),
        CompressFailure::OutputWrite => {
            BatchError::io(&job.output, std::io::Error::other(failure.to_string()))
        }
        _ => BatchError::engine(
            format!("job {} -> {}", job.index, job.output.display()),
            failure.to_string(),
        ),
    }
}
