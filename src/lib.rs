pub mod aggregator;
pub mod config;
pub mod detection;
pub mod error;
pub mod filters;
pub mod homography;
pub mod locate;
pub mod models;
pub mod pipeline;
pub mod runtime;
pub mod session;
pub mod synth;

pub use aggregator::{Assessment, ConfidenceAccumulator, FrameReading, Histogram, ReadAssembler, Vote};
pub use config::ScanConfig;
pub use detection::{CardLayout, Classification, Detection, DigitClassifier, DigitRegionDetector};
pub use error::{ConfigError, FrameError, ScanError};
pub use locate::CardLocator;
pub use models::{
    BoundingBox, CandidateKind, CardInfo, CardNetwork, DigitCandidate, Frame, PixelFormat, Point, Quadrilateral,
};
pub use pipeline::{CorrectedImage, DebugConfig, FramePermit, FramePipeline, PipelineState, Submission};
pub use runtime::{FrameSink, Offer, ScanEvent, ScanHandle, spawn_scanner};
pub use session::{CancelToken, ScanProgress, ScanReport, ScanSession, ScanStatus, SessionState, SessionStats};
pub use synth::SyntheticCard;
