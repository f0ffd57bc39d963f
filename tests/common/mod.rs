mod fixtures;
#[allow(unused_imports)]
pub use fixtures::*;

// Re-export commonly used types from cardscan for tests
#[allow(unused_imports)]
pub use cardscan::{
    CardLocator, Frame, FrameError, FramePipeline, Quadrilateral, ScanConfig, ScanError, ScanSession, ScanStatus,
    SessionState, SyntheticCard,
};
