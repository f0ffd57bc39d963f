use thiserror::Error;

/// Errors scoped to a single frame. The session absorbs these by dropping the
/// frame; they never end a scan on their own.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameError {
    #[error("input is {actual_width}x{actual_height}, filter configured for {expected_width}x{expected_height}")]
    DimensionMismatch {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("texture allocation of {requested} bytes failed ({in_use} of {budget} bytes in use)")]
    ResourceExhausted {
        requested: usize,
        in_use: usize,
        budget: usize,
    },

    #[error("invalid card geometry: {reason}")]
    InvalidGeometry { reason: String },

    #[error("unsupported pixel format {0:?}, expected Luma8")]
    UnsupportedPixelFormat(crate::models::PixelFormat),

    #[error("card edges not found ({side} edge had {points} points)")]
    CardNotFound { side: &'static str, points: usize },
}

impl FrameError {
    pub(crate) fn geometry(reason: impl Into<String>) -> Self {
        FrameError::InvalidGeometry {
            reason: reason.into(),
        }
    }
}

/// Terminal session states that are surfaced to the caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScanError {
    #[error("scan session cancelled")]
    Cancelled,

    #[error("scan session timed out after {frames} frames")]
    TimedOut { frames: u64 },

    #[error("texture memory unavailable after {attempts} consecutive attempts")]
    ResourceExhausted { attempts: u32 },

    #[error("scan session already ended")]
    SessionEnded,
}

/// Configuration loading and validation failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
