//! Scriptable engines for orchestrator tests

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use super::*;

/// Compression engine that fails the jobs it is told to
#[derive(Default)]
pub struct FakeCompressor {
    script: HashMap<usize, ResultCode>,
    reject_config: bool,
    write_outputs: bool,
    jobs: Vec<CompressionJob>,
    codebook_loads: Cell<usize>,
}

impl FakeCompressor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_job(mut self, index: usize, code: ResultCode) -> Self {
        self.script.insert(index, code);
        self
    }

    /// Create the output file of every successful job
    pub fn writing_outputs(mut self) -> Self {
        self.write_outputs = true;
        self
    }

    pub fn rejecting_config(mut self) -> Self {
        self.reject_config = true;
        self
    }

    pub fn jobs_run(&self) -> usize {
        self.jobs.len()
    }

    pub fn codebook_loads(&self) -> usize {
        self.codebook_loads.get()
    }
}

impl CompressionEngine for FakeCompressor {
    type Codebook = ();

    fn init(&mut self, _params: &CompressionParams) -> Result<(), ConfigError> {
        if self.reject_config {
            return Err(ConfigError::EngineInit("rejected by fake".to_string()));
        }
        Ok(())
    }

    fn load_codebook(&self) -> BatchResult<()> {
        self.codebook_loads.set(self.codebook_loads.get() + 1);
        Ok(())
    }

    fn run(&mut self, job: &CompressionJob, _codebook: &()) -> JobReport {
        self.jobs.push(job.clone());

        let code = self.script.get(&job.index).copied().unwrap_or(ResultCode::Success);
        if code != ResultCode::Success {
            return JobReport::failed(code);
        }

        if self.write_outputs {
            std::fs::write(&job.output, b"fake container").unwrap();
        }

        // One slice per source
        let slices = job
            .items
            .iter()
            .map(|_| SliceMetric {
                width: 4,
                height: 4,
                has_alpha: false,
                bits_per_texel: 8.0,
                fidelity: vec![40.0],
            })
            .collect();

        JobReport { code, slices }
    }
}

pub type Triple = (u32, u32, TranscodeFormat);

/// Container whose images each carry a halving mip chain
#[derive(Clone)]
pub struct FakeContainer {
    facts: HeaderFacts,
    sizes: Vec<(u32, u32)>,
    checksum_ok: bool,
    fail_at: Option<Triple>,
    calls: Rc<RefCell<Vec<Triple>>>,
}

impl Container for FakeContainer {
    fn verify_checksum(&self) -> bool {
        self.checksum_ok
    }

    fn header_facts(&self) -> &HeaderFacts {
        &self.facts
    }

    fn level_geometry(&self, image: u32, level: u32) -> Option<LevelGeometry> {
        let (w, h) = *self.sizes.get(image as usize)?;
        if level >= *self.facts.level_counts.get(image as usize)? {
            return None;
        }
        let width = (w >> level).max(1);
        let height = (h >> level).max(1);
        Some(LevelGeometry {
            width,
            height,
            blocks_x: width.div_ceil(4),
            blocks_y: height.div_ceil(4),
            has_alpha: self.facts.flags.has_alpha,
        })
    }

    fn transcode(
        &self,
        image: u32,
        level: u32,
        format: TranscodeFormat,
        dst: &mut [u8],
    ) -> Result<(), EngineFailure> {
        self.calls.borrow_mut().push((image, level, format));
        if self.fail_at == Some((image, level, format)) {
            return Err(EngineFailure("injected transcode failure".to_string()));
        }
        dst.fill(0x11);
        Ok(())
    }
}

/// Transcoder handing out one configured container.
///
/// Bytes starting with `BAD` load with a failing checksum; `JUNK` fails to load.
pub struct FakeTranscoder {
    template: FakeContainer,
    unsupported: Vec<TranscodeFormat>,
}

impl FakeTranscoder {
    /// `sizes` holds the top-level size of each image
    pub fn new(texture_type: TextureType, sizes: Vec<(u32, u32)>, levels: u32) -> Self {
        let facts = HeaderFacts {
            image_count: sizes.len() as u32,
            level_counts: vec![levels; sizes.len()],
            texture_type,
            flags: ContainerFlags::default(),
            us_per_frame: 0,
            userdata: [0, 0],
        };
        Self {
            template: FakeContainer {
                facts,
                sizes,
                checksum_ok: true,
                fail_at: None,
                calls: Rc::new(RefCell::new(Vec::new())),
            },
            unsupported: Vec::new(),
        }
    }

    pub fn failing_at(mut self, triple: Triple) -> Self {
        self.template.fail_at = Some(triple);
        self
    }

    pub fn without(mut self, format: TranscodeFormat) -> Self {
        self.unsupported.push(format);
        self
    }

    /// Break the image-count/level-table agreement
    pub fn with_level_table(mut self, level_counts: Vec<u32>) -> Self {
        self.template.facts.level_counts = level_counts;
        self
    }

    pub fn calls(&self) -> Vec<Triple> {
        self.template.calls.borrow().clone()
    }
}

impl TranscodingEngine for FakeTranscoder {
    type Container = FakeContainer;

    fn supports(&self, format: TranscodeFormat) -> bool {
        !self.unsupported.contains(&format)
    }

    fn load_container(&self, bytes: Vec<u8>) -> Result<FakeContainer, EngineFailure> {
        if bytes.starts_with(b"JUNK") {
            return Err(EngineFailure("unrecognized header".to_string()));
        }
        let mut container = self.template.clone();
        container.checksum_ok = !bytes.starts_with(b"BAD");
        Ok(container)
    }
}

/// Raster codec that records what it would write
#[derive(Default)]
pub struct FakeRaster {
    pub written: RefCell<Vec<PathBuf>>,
    pub invalid_unpack: bool,
}

impl RasterCodec for FakeRaster {
    fn decode(&self, _path: &Path) -> BatchResult<RasterImage> {
        Ok(RasterImage::new(4, 4))
    }

    fn encode(&self, _image: &RasterImage, _channels: RasterChannels, path: &Path) -> BatchResult<()> {
        self.written.borrow_mut().push(path.to_path_buf());
        Ok(())
    }

    fn unpack(&self, buffer: &BlockBuffer) -> (RasterImage, bool) {
        (RasterImage::new(buffer.width, buffer.height), !self.invalid_unpack)
    }
}

/// Native writer recording each unit as (path, image count, cubemap)
#[derive(Default)]
pub struct FakeWriter {
    pub units: RefCell<Vec<(PathBuf, usize, bool)>>,
}

impl NativeContainerWriter for FakeWriter {
    fn extension(&self) -> &'static str {
        "dds"
    }

    fn write(&self, path: &Path, images: &[Vec<&BlockBuffer>], is_cubemap: bool) -> BatchResult<()> {
        self.units
            .borrow_mut()
            .push((path.to_path_buf(), images.len(), is_cubemap));
        Ok(())
    }
}
