use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use image::GrayImage;

use crate::config::ScanConfig;
use crate::error::FrameError;
use crate::filters::{BlurParams, FilterHandle, FilterParams, Size, TextureArena, TransformParams};
use crate::models::{Frame, Quadrilateral};

/// Debug configuration for pipeline execution
#[derive(Clone, Debug)]
pub struct DebugConfig {
    /// Root directory for debug outputs
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// No filters configured.
    Idle,
    /// Filters configured for a frame size, nothing in flight.
    Ready,
    /// One frame is being processed.
    Processing,
}

const IDLE: u8 = 0;
const READY: u8 = 1;
const PROCESSING: u8 = 2;

struct Gate {
    state: AtomicU8,
    configured: AtomicBool,
}

impl Gate {
    fn release(&self) {
        let next = if self.configured.load(Ordering::Acquire) {
            READY
        } else {
            IDLE
        };
        self.state.store(next, Ordering::Release);
    }
}

/// Exclusive right to push one frame through the pipeline. Dropping it makes
/// the pipeline available again.
pub struct FramePermit {
    gate: Arc<Gate>,
}

impl Drop for FramePermit {
    fn drop(&mut self) {
        self.gate.release();
    }
}

impl std::fmt::Debug for FramePermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FramePermit")
    }
}

/// Deskewed, denoised canonical card image for one frame.
#[derive(Debug, Clone)]
pub struct CorrectedImage {
    pub sequence: u64,
    pub quad: Quadrilateral,
    pub image: GrayImage,
}

#[derive(Debug)]
pub enum Submission {
    Corrected(CorrectedImage),
    /// Another frame was in flight; this one was dropped, not queued.
    Skipped,
}

struct Chain {
    frame_size: Size,
    stages: Vec<FilterHandle>,
}

/// Transform and blur chain with single-frame backpressure.
pub struct FramePipeline {
    arena: TextureArena,
    stage_params: Vec<FilterParams>,
    gate: Arc<Gate>,
    chain: Mutex<Option<Chain>>,
    debug: Option<DebugConfig>,
}

impl FramePipeline {
    pub fn new(config: &ScanConfig) -> Self {
        let transform = TransformParams {
            output: Size::new(config.canonical.width, config.canonical.height),
            border_value: config.canonical.border_value,
            min_quad_area: config.geometry.min_quad_area,
        };
        let blur = BlurParams {
            sigma: config.blur.sigma,
        };

        Self {
            arena: TextureArena::new(config.device.memory_budget_bytes),
            stage_params: vec![FilterParams::Transform(transform), FilterParams::Blur(blur)],
            gate: Arc::new(Gate {
                state: AtomicU8::new(IDLE),
                configured: AtomicBool::new(false),
            }),
            chain: Mutex::new(None),
            debug: None,
        }
    }

    /// Enable debug mode with output directory
    /// The directory must be empty or non-existent
    pub fn with_debug(mut self, output_dir: PathBuf) -> anyhow::Result<Self> {
        if output_dir.exists() {
            let entries = std::fs::read_dir(&output_dir)?;
            if entries.count() > 0 {
                return Err(anyhow::anyhow!(
                    "Debug directory is not empty: {}",
                    output_dir.display()
                ));
            }
        } else {
            std::fs::create_dir_all(&output_dir)?;
        }

        self.debug = Some(DebugConfig { output_dir });

        Ok(self)
    }

    pub fn debug_config(&self) -> Option<&DebugConfig> {
        self.debug.as_ref()
    }

    pub fn arena(&self) -> &TextureArena {
        &self.arena
    }

    pub fn state(&self) -> PipelineState {
        match self.gate.state.load(Ordering::Acquire) {
            PROCESSING => PipelineState::Processing,
            READY => PipelineState::Ready,
            _ => PipelineState::Idle,
        }
    }

    /// Claim the single processing slot, or `None` if a frame is in flight.
    pub fn try_reserve(&self) -> Option<FramePermit> {
        let mut current = self.gate.state.load(Ordering::Acquire);
        loop {
            if current == PROCESSING {
                return None;
            }
            match self.gate.state.compare_exchange_weak(
                current,
                PROCESSING,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(FramePermit {
                        gate: self.gate.clone(),
                    });
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Correct one frame if the pipeline is free; otherwise skip it.
    pub fn submit_frame(&self, frame: &Frame, quad: &Quadrilateral) -> Result<Submission, FrameError> {
        match self.try_reserve() {
            Some(permit) => self.process_reserved(&permit, frame, quad).map(Submission::Corrected),
            None => {
                log::trace!("frame {} skipped, pipeline busy", frame.sequence());
                Ok(Submission::Skipped)
            }
        }
    }

    /// Correct a frame using a slot claimed earlier with [`try_reserve`]. The
    /// slot stays claimed until the caller drops the permit.
    ///
    /// [`try_reserve`]: FramePipeline::try_reserve
    pub fn process_reserved(
        &self,
        permit: &FramePermit,
        frame: &Frame,
        quad: &Quadrilateral,
    ) -> Result<CorrectedImage, FrameError> {
        debug_assert!(Arc::ptr_eq(&permit.gate, &self.gate));

        let input = frame.to_gray_image()?;
        let frame_size = Size::of(&input);

        let mut guard = self.chain.lock().unwrap_or_else(PoisonError::into_inner);
        let chain = match guard.take() {
            Some(chain) if chain.frame_size == frame_size => guard.insert(chain),
            stale => {
                // Old textures go back to the arena before the new ones are taken.
                drop(stale);
                self.gate.configured.store(false, Ordering::Release);
                let configured = self.configure(frame_size)?;
                self.gate.configured.store(true, Ordering::Release);
                log::debug!(
                    "pipeline configured for {}x{} frames ({} texture bytes)",
                    frame_size.width,
                    frame_size.height,
                    self.arena.bytes_in_use()
                );
                guard.insert(configured)
            }
        };

        self.save_debug("00_input", frame.sequence(), &input);

        let mut image = input;
        for (idx, stage) in chain.stages.iter_mut().enumerate() {
            if let FilterHandle::Transform(transform) = stage {
                transform.set_quad(quad)?;
            }
            image = stage.apply(&image)?;
            self.save_debug(&format!("{:02}_{}", idx + 1, stage.name()), frame.sequence(), &image);
        }

        Ok(CorrectedImage {
            sequence: frame.sequence(),
            quad: *quad,
            image,
        })
    }

    /// Release every texture. Waits for an in-flight frame to finish first.
    pub fn teardown(&self) {
        let mut chain = self.chain.lock().unwrap_or_else(PoisonError::into_inner);
        *chain = None;
        self.gate.configured.store(false, Ordering::Release);
        let _ = self
            .gate
            .state
            .compare_exchange(READY, IDLE, Ordering::AcqRel, Ordering::Acquire);
    }

    fn configure(&self, frame_size: Size) -> Result<Chain, FrameError> {
        let mut stages = Vec::with_capacity(self.stage_params.len());
        let mut size = frame_size;
        for params in &self.stage_params {
            let stage = FilterHandle::configure(&self.arena, size, *params)?;
            size = stage.output_size();
            stages.push(stage);
        }
        Ok(Chain { frame_size, stages })
    }

    fn save_debug(&self, step_dir_name: &str, sequence: u64, image: &GrayImage) {
        let Some(debug_config) = &self.debug else {
            return;
        };
        if let Err(e) = save_debug_image(&debug_config.output_dir, step_dir_name, sequence, image) {
            log::warn!("debug output failed: {:#}", e);
        }
    }
}

fn save_debug_image(root: &Path, step_dir_name: &str, sequence: u64, image: &GrayImage) -> anyhow::Result<()> {
    let step_dir = root.join(step_dir_name);
    std::fs::create_dir_all(&step_dir)?;
    let output_path = step_dir.join(format!("{:06}.png", sequence));
    image
        .save(&output_path)
        .with_context(|| format!("Failed to save debug image {}", output_path.display()))?;
    log::trace!("Debug: saved {}/{:06}.png", step_dir_name, sequence);
    Ok(())
}

impl Drop for FramePipeline {
    fn drop(&mut self) {
        self.teardown();
    }
}
