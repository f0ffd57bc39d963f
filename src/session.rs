//! One card scan: binds the pipeline, locator, detector, classifier and vote
//! accumulator, and applies cancellation, timeout and retry policy.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use image::GrayImage;
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::aggregator::{Assessment, ConfidenceAccumulator, FrameReading, ReadAssembler};
use crate::config::ScanConfig;
use crate::detection::{CardLayout, Detection, DigitClassifier, DigitRegionDetector};
use crate::error::{ConfigError, FrameError, ScanError};
use crate::locate::CardLocator;
use crate::models::{CandidateKind, CardInfo, Frame};
use crate::pipeline::{FramePermit, FramePipeline};

/// Cooperative cancellation flag shared with other threads.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Complete,
    Cancelled,
    TimedOut,
    Failed,
}

/// Per-session frame counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_received: u64,
    pub frames_processed: u64,
    /// Dropped because another frame was in flight.
    pub frames_skipped: u64,
    pub invalid_geometry: u64,
    pub card_not_found: u64,
    pub resource_exhausted: u64,
    pub dimension_mismatch: u64,
    pub unsupported_format: u64,
}

impl SessionStats {
    fn count(&mut self, error: &FrameError) {
        let counter = match error {
            FrameError::InvalidGeometry { .. } => &mut self.invalid_geometry,
            FrameError::CardNotFound { .. } => &mut self.card_not_found,
            FrameError::ResourceExhausted { .. } => &mut self.resource_exhausted,
            FrameError::DimensionMismatch { .. } => &mut self.dimension_mismatch,
            FrameError::UnsupportedPixelFormat(_) => &mut self.unsupported_format,
        };
        *counter += 1;
    }

    pub fn frames_failed(&self) -> u64 {
        self.invalid_geometry
            + self.card_not_found
            + self.resource_exhausted
            + self.dimension_mismatch
            + self.unsupported_format
    }
}

/// "Still scanning" signal for the host.
#[derive(Debug, Clone)]
pub struct ScanProgress {
    pub sequence: u64,
    pub frames_processed: u64,
    pub slots_detected: usize,
    /// Share of required positions already stable, in [0, 1].
    pub stability: f32,
    /// Corrected card image, when previews are enabled.
    pub preview: Option<Arc<GrayImage>>,
}

/// Outcome of a completed scan. Serializes to the JSON the CLI prints.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub session_id: Uuid,
    pub card: CardInfo,
    pub frames_processed: u64,
    pub elapsed: Duration,
    #[serde(with = "time::serde::rfc3339")]
    pub completed_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub enum ScanStatus {
    Scanning(ScanProgress),
    Complete(ScanReport),
}

pub struct ScanSession {
    id: Uuid,
    config: ScanConfig,
    pipeline: Arc<FramePipeline>,
    locator: CardLocator,
    detector: DigitRegionDetector,
    classifier: DigitClassifier,
    assembler: ReadAssembler,
    accumulator: Option<ConfidenceAccumulator>,
    cancel: CancelToken,
    started: Instant,
    stats: SessionStats,
    state: SessionState,
    stability: f32,
    consecutive_exhausted: u32,
}

impl ScanSession {
    /// Session with its own pipeline and a guided card locator.
    pub fn new(config: ScanConfig) -> Result<Self, ConfigError> {
        let pipeline = FramePipeline::new(&config);
        let locator = CardLocator::guided(&config);
        Self::with_parts(config, pipeline, locator)
    }

    pub fn with_parts(config: ScanConfig, pipeline: FramePipeline, locator: CardLocator) -> Result<Self, ConfigError> {
        config.validate()?;
        let layout = CardLayout::from_config(&config);
        let accumulator = ConfidenceAccumulator::new(layout.digit_count(), layout.number_slots.len());
        let classifier = DigitClassifier::new(&layout, config.classifier.clone());
        let detector = DigitRegionDetector::new(layout, config.detector.clone());
        let assembler = ReadAssembler::new(config.aggregator.clone());

        let id = Uuid::new_v4();
        log::info!("scan session {} started", id);
        Ok(Self {
            id,
            pipeline: Arc::new(pipeline),
            locator,
            detector,
            classifier,
            assembler,
            accumulator: Some(accumulator),
            cancel: CancelToken::default(),
            started: Instant::now(),
            stats: SessionStats::default(),
            state: SessionState::Active,
            stability: 0.0,
            consecutive_exhausted: 0,
            config,
        })
    }

    pub fn with_locator(mut self, locator: CardLocator) -> Self {
        self.locator = locator;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn pipeline(&self) -> &Arc<FramePipeline> {
        &self.pipeline
    }

    /// Vote state, or `None` once the session has ended.
    pub fn accumulator(&self) -> Option<&ConfidenceAccumulator> {
        self.accumulator.as_ref()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Cancel from the owning thread. Other threads use [`cancel_token`].
    ///
    /// [`cancel_token`]: ScanSession::cancel_token
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        if self.state == SessionState::Active {
            self.finish(SessionState::Cancelled);
        }
    }

    /// Process a frame, or skip it if the pipeline is busy.
    pub fn process_frame(&mut self, frame: &Frame) -> Result<ScanStatus, ScanError> {
        self.ensure_active()?;
        match self.pipeline.try_reserve() {
            Some(permit) => self.process_reserved(permit, frame),
            None => {
                self.stats.frames_received += 1;
                self.stats.frames_skipped += 1;
                Ok(ScanStatus::Scanning(self.progress(frame.sequence(), 0, None)))
            }
        }
    }

    /// Process a frame whose pipeline slot was claimed by the capture side.
    /// The slot is released when this returns.
    pub fn process_reserved(&mut self, permit: FramePermit, frame: &Frame) -> Result<ScanStatus, ScanError> {
        self.ensure_active()?;
        self.stats.frames_received += 1;
        self.poll()?;

        let result = self.run_frame(&permit, frame);
        drop(permit);

        if self.cancel.is_cancelled() {
            // The frame finished after cancellation; its evidence is dropped.
            self.finish(SessionState::Cancelled);
            return Err(ScanError::Cancelled);
        }

        let (slots, preview) = match result {
            Ok((reading, slots, preview)) => {
                self.consecutive_exhausted = 0;
                self.stats.frames_processed += 1;
                if let Some(card) = self.aggregate(&reading) {
                    return Ok(ScanStatus::Complete(self.complete(card)));
                }
                (slots, preview)
            }
            Err(e) => {
                self.stats.count(&e);
                log::debug!("frame {} dropped: {}", frame.sequence(), e);
                if matches!(e, FrameError::ResourceExhausted { .. }) {
                    self.consecutive_exhausted += 1;
                    if self.consecutive_exhausted > self.config.session.resource_retry_budget {
                        log::warn!(
                            "scan session {} failed: {} consecutive texture allocation failures",
                            self.id,
                            self.consecutive_exhausted
                        );
                        self.finish(SessionState::Failed);
                        return Err(ScanError::ResourceExhausted {
                            attempts: self.consecutive_exhausted,
                        });
                    }
                } else {
                    self.consecutive_exhausted = 0;
                }
                (0, None)
            }
        };

        if self
            .config
            .session
            .max_frames
            .is_some_and(|max| self.stats.frames_received >= max)
        {
            return Err(self.time_out());
        }
        Ok(ScanStatus::Scanning(self.progress(frame.sequence(), slots, preview)))
    }

    /// Apply cancellation and the timeout without a frame. Returns the
    /// terminal error if the session just ended.
    pub fn poll(&mut self) -> Result<(), ScanError> {
        self.ensure_active()?;
        if self.cancel.is_cancelled() {
            self.finish(SessionState::Cancelled);
            return Err(ScanError::Cancelled);
        }
        if self
            .config
            .session
            .timeout()
            .is_some_and(|timeout| self.started.elapsed() >= timeout)
        {
            return Err(self.time_out());
        }
        Ok(())
    }

    fn ensure_active(&self) -> Result<(), ScanError> {
        if self.state == SessionState::Active {
            Ok(())
        } else {
            Err(ScanError::SessionEnded)
        }
    }

    fn run_frame(
        &mut self,
        permit: &FramePermit,
        frame: &Frame,
    ) -> Result<(FrameReading, usize, Option<Arc<GrayImage>>), FrameError> {
        let quad = self.locator.locate(frame)?;
        let corrected = self.pipeline.process_reserved(permit, frame, &quad)?;
        let detection = self.detector.detect(&corrected.image);
        let reading = self.read(&detection);

        let preview = self
            .config
            .session
            .emit_preview
            .then(|| Arc::new(detection.image.clone()));
        Ok((reading, detection.slots_found(), preview))
    }

    fn read(&mut self, detection: &Detection) -> FrameReading {
        let layout = self.detector.layout();
        let mut reading = FrameReading::new(layout.digit_count());
        for candidate in detection.candidates() {
            let glyphs = self.classifier.classify(&detection.image, candidate);
            match candidate.kind {
                CandidateKind::NumberGroup(g) => {
                    let first = layout.number_slots.get(g).map_or(0, |s| s.first_position);
                    reading.add_group(first, candidate, &glyphs);
                }
                CandidateKind::Expiry => reading.add_expiry(candidate, &glyphs),
            }
        }
        reading
    }

    fn aggregate(&mut self, reading: &FrameReading) -> Option<CardInfo> {
        let accumulator = self.accumulator.as_mut()?;
        match self.assembler.update(accumulator, reading) {
            Assessment::Ready(card) => Some(card),
            Assessment::NotYet { stability } => {
                self.stability = stability;
                None
            }
        }
    }

    fn complete(&mut self, card: CardInfo) -> ScanReport {
        log::info!(
            "scan session {} complete: {} after {} frames",
            self.id,
            card,
            self.stats.frames_processed
        );
        self.finish(SessionState::Complete);
        ScanReport {
            session_id: self.id,
            card,
            frames_processed: self.stats.frames_processed,
            elapsed: self.started.elapsed(),
            completed_at: OffsetDateTime::now_utc(),
        }
    }

    fn time_out(&mut self) -> ScanError {
        log::info!(
            "scan session {} timed out after {} frames",
            self.id,
            self.stats.frames_received
        );
        self.finish(SessionState::TimedOut);
        ScanError::TimedOut {
            frames: self.stats.frames_received,
        }
    }

    fn finish(&mut self, state: SessionState) {
        if state == SessionState::Cancelled {
            log::info!("scan session {} cancelled", self.id);
        }
        self.state = state;
        self.accumulator = None;
        self.pipeline.teardown();
    }

    fn progress(&self, sequence: u64, slots_detected: usize, preview: Option<Arc<GrayImage>>) -> ScanProgress {
        ScanProgress {
            sequence,
            frames_processed: self.stats.frames_processed,
            slots_detected,
            stability: self.stability,
            preview,
        }
    }
}

impl std::fmt::Debug for ScanSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanSession")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
