//! Per-slice metrics ledger
//!
//! Opened in append mode so history accumulates across runs. Each row is
//! flushed as soon as it is written, so the file stays valid up to the last
//! completed job even if a later job aborts the run.
//!
//! Row layout (comma separated, output path quoted):
//! output, slice index, slice count, width, height, alpha, bits/texel,
//! fidelity..., quality level, compression level, elapsed seconds

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::CompressionParams;
use crate::engine::SliceMetric;
use crate::error::{BatchError, BatchResult};

/// One ledger line
#[derive(Debug)]
pub struct LedgerRow<'a> {
    pub output: &'a Path,
    pub slice_index: usize,
    pub slice_count: usize,
    pub metric: &'a SliceMetric,
    pub quality_level: u32,
    pub compression_level: u32,
    pub elapsed_secs: f64,
}

impl fmt::Display for LedgerRow<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "\"{}\", {}, {}, {}, {}, {}, {:.6}",
            self.output.display().to_string().replace('"', "\"\""),
            self.slice_index,
            self.slice_count,
            self.metric.width,
            self.metric.height,
            u32::from(self.metric.has_alpha),
            self.metric.bits_per_texel,
        )?;
        for value in &self.metric.fidelity {
            write!(f, ", {:.6}", value)?;
        }
        write!(
            f,
            ", {}, {}, {:.6}",
            self.quality_level, self.compression_level, self.elapsed_secs
        )
    }
}

/// Append-only ledger file
pub struct Ledger {
    path: PathBuf,
    writer: BufWriter<File>,
    rows: usize,
}

impl Ledger {
    /// Open (or create) the ledger for appending
    pub fn open(path: &Path) -> BatchResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| BatchError::io(path, e))?;

        debug!("Opened ledger {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            rows: 0,
        })
    }

    /// Append one row per slice of a completed job
    pub fn append_job(
        &mut self,
        output: &Path,
        slices: &[SliceMetric],
        params: &CompressionParams,
        elapsed_secs: f64,
    ) -> BatchResult<()> {
        for (slice_index, metric) in slices.iter().enumerate() {
            let row = LedgerRow {
                output,
                slice_index,
                slice_count: slices.len(),
                metric,
                quality_level: params.ledger_quality(),
                compression_level: params.compression_level,
                elapsed_secs,
            };
            writeln!(self.writer, "{}", row).map_err(|e| BatchError::io(&self.path, e))?;
            self.writer.flush().map_err(|e| BatchError::io(&self.path, e))?;
            self.rows += 1;
        }
        Ok(())
    }

    /// Rows appended during this run
    pub fn rows_written(&self) -> usize {
        self.rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn metric(width: u32) -> SliceMetric {
        SliceMetric {
            width,
            height: 16,
            has_alpha: true,
            bits_per_texel: 1.5,
            fidelity: vec![40.25, 38.0],
        }
    }

    #[test]
    fn test_row_format() {
        let m = metric(32);
        let row = LedgerRow {
            output: Path::new("out/rock.tbc"),
            slice_index: 0,
            slice_count: 2,
            metric: &m,
            quality_level: 128,
            compression_level: 1,
            elapsed_secs: 0.5,
        };
        assert_eq!(
            row.to_string(),
            "\"out/rock.tbc\", 0, 2, 32, 16, 1, 1.500000, 40.250000, 38.000000, 128, 1, 0.500000"
        );
    }

    #[test]
    fn test_quotes_in_output_are_doubled() {
        let m = metric(4);
        let row = LedgerRow {
            output: Path::new("out/say \"hi\".tbc"),
            slice_index: 0,
            slice_count: 1,
            metric: &m,
            quality_level: 128,
            compression_level: 1,
            elapsed_secs: 0.0,
        };
        assert!(row.to_string().starts_with("\"out/say \"\"hi\"\".tbc\", 0, 1, 4,"));
    }

    #[test]
    fn test_appends_across_runs() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("stats.csv");
        let params = CompressionParams::default().resolve();

        {
            let mut ledger = Ledger::open(&path)?;
            ledger.append_job(Path::new("a.tbc"), &[metric(8), metric(4)], &params, 0.1)?;
            assert_eq!(ledger.rows_written(), 2);
        }
        {
            let mut ledger = Ledger::open(&path)?;
            ledger.append_job(Path::new("b.tbc"), &[metric(8)], &params, 0.2)?;
        }

        let text = std::fs::read_to_string(&path)?;
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("\"a.tbc\", 0, 2"));
        assert!(lines[2].starts_with("\"b.tbc\", 0, 1"));
        Ok(())
    }
}
