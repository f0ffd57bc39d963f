//! Scanner configuration.
//!
//! Every section has calibrated defaults, so a config file only needs the
//! fields it overrides.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub canonical: CanonicalConfig,
    pub layout: LayoutConfig,
    pub blur: BlurConfig,
    pub geometry: GeometryConfig,
    pub locator: LocatorConfig,
    pub detector: DetectorConfig,
    pub classifier: ClassifierConfig,
    pub aggregator: AggregatorConfig,
    pub session: SessionConfig,
    pub device: DeviceConfig,
}

/// Size of the deskewed card image all detection runs on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanonicalConfig {
    pub width: u32,
    pub height: u32,
    /// Fill for canonical pixels that map outside the source frame.
    pub border_value: u8,
}

impl Default for CanonicalConfig {
    fn default() -> Self {
        Self {
            width: 428,
            height: 270,
            border_value: 0,
        }
    }
}

/// Placement of the number line and expiry field on the canonical card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Digits per group, left to right.
    pub groups: Vec<usize>,
    pub number_left: u32,
    pub number_top: u32,
    pub glyph_width: u32,
    pub glyph_height: u32,
    /// Distance between the left edges of neighbouring glyphs in a group.
    pub glyph_pitch: u32,
    /// Extra space between groups.
    pub group_gap: u32,
    pub expiry: ExpiryLayoutConfig,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            groups: vec![4, 4, 4, 4],
            number_left: 25,
            number_top: 140,
            glyph_width: 19,
            glyph_height: 27,
            glyph_pitch: 21,
            group_gap: 14,
            expiry: ExpiryLayoutConfig::default(),
        }
    }
}

impl LayoutConfig {
    /// 15-digit 4-6-5 layout used by American Express.
    pub fn amex() -> Self {
        Self {
            groups: vec![4, 6, 5],
            number_left: 42,
            ..Self::default()
        }
    }

    pub fn digit_count(&self) -> usize {
        self.groups.iter().sum()
    }
}

/// Expiry rendered as "MM/YY" in five glyph cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpiryLayoutConfig {
    pub left: u32,
    pub top: u32,
    pub glyph_width: u32,
    pub glyph_height: u32,
    pub glyph_pitch: u32,
}

impl Default for ExpiryLayoutConfig {
    fn default() -> Self {
        Self {
            left: 200,
            top: 190,
            glyph_width: 14,
            glyph_height: 21,
            glyph_pitch: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlurConfig {
    /// Gaussian standard deviation in canonical pixels; 0 disables the blur.
    pub sigma: f32,
}

impl Default for BlurConfig {
    fn default() -> Self {
        Self { sigma: 1.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryConfig {
    /// Smallest card quadrilateral (in frame pixels²) worth correcting.
    pub min_quad_area: f64,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            min_quad_area: 10_000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    /// Fraction of the frame between its border and the guide rectangle.
    pub guide_inset: f32,
    /// Half-height of the search band around each guide edge, as a fraction
    /// of the guide's extent across that edge.
    pub band: f32,
    pub sample_step: u32,
    /// Minimum Sobel magnitude accepted as a card edge.
    pub min_edge_strength: f32,
    pub min_points: usize,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            guide_inset: 0.1,
            band: 0.12,
            sample_step: 4,
            min_edge_strength: 120.0,
            min_points: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub search_margin_x: u32,
    pub search_margin_y: u32,
    /// Sobel magnitude above which a pixel counts as an edge.
    pub edge_threshold: u16,
    /// Slots with a lower edge-pixel fraction hold no glyphs.
    pub min_edge_density: f32,
    /// Edge fraction at which density stops adding confidence.
    pub expected_edge_density: f32,
    pub min_slot_confidence: f32,
    pub try_flipped: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            search_margin_x: 10,
            search_margin_y: 8,
            edge_threshold: 160,
            min_edge_density: 0.04,
            expected_edge_density: 0.15,
            min_slot_confidence: 0.25,
            try_flipped: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Glyphs whose best digit probability falls below this are rejected.
    pub confidence_floor: f32,
    /// Softmax inverse temperature applied to correlation scores.
    pub sharpness: f32,
    /// Correlation score of the reject class.
    pub reject_score: f32,
    /// Pixels of misalignment searched in each direction.
    pub shift_radius: u32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            confidence_floor: 0.5,
            sharpness: 20.0,
            reject_score: 0.45,
            shift_radius: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Required share of non-reject votes held by each position's mode.
    pub confidence_threshold: f32,
    /// Required non-reject votes per position.
    pub min_frames: u32,
    pub require_expiry: bool,
    pub require_luhn: bool,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.6,
            min_frames: 3,
            require_expiry: true,
            require_luhn: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub timeout_secs: Option<f64>,
    pub max_frames: Option<u64>,
    /// Consecutive texture allocation failures tolerated before giving up.
    pub resource_retry_budget: u32,
    /// Attach the corrected image to progress signals.
    pub emit_preview: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: Some(30.0),
            max_frames: None,
            resource_retry_budget: 5,
            emit_preview: false,
        }
    }
}

impl SessionConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub memory_budget_bytes: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            memory_budget_bytes: 64 * 1024 * 1024,
        }
    }
}

impl ScanConfig {
    /// Load a JSON config file and validate it.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: ScanConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        let c = &self.canonical;
        let l = &self.layout;

        if c.width == 0 || c.height == 0 {
            return invalid("canonical size must be non-zero".into());
        }
        if l.groups.is_empty() || l.groups.contains(&0) {
            return invalid("layout groups must be non-empty and non-zero".into());
        }
        if l.glyph_width == 0 || l.glyph_height == 0 || l.glyph_pitch < l.glyph_width {
            return invalid("glyph pitch must be at least the glyph width".into());
        }

        let number_fits = number_line_right(l).is_some_and(|right| right <= c.width)
            && l.number_top.checked_add(l.glyph_height).is_some_and(|bottom| bottom <= c.height);
        if !number_fits {
            return invalid(format!(
                "number line at x={} does not fit the {}x{} canonical card",
                l.number_left, c.width, c.height
            ));
        }

        let e = &l.expiry;
        let expiry_fits = e.glyph_pitch >= e.glyph_width
            && expiry_right(e).is_some_and(|right| right <= c.width)
            && e.top.checked_add(e.glyph_height).is_some_and(|bottom| bottom <= c.height);
        if !expiry_fits {
            return invalid("expiry field does not fit the canonical card".into());
        }

        if self.detector.search_margin_x >= c.width || self.detector.search_margin_y >= c.height {
            return invalid("detector search margins must be smaller than the canonical card".into());
        }

        if !(0.0..=1.0).contains(&self.aggregator.confidence_threshold) {
            return invalid("aggregator.confidence_threshold must be within [0, 1]".into());
        }
        if !(0.0..=1.0).contains(&self.classifier.confidence_floor) {
            return invalid("classifier.confidence_floor must be within [0, 1]".into());
        }
        if self.blur.sigma < 0.0 || !self.blur.sigma.is_finite() {
            return invalid("blur.sigma must be a finite non-negative number".into());
        }
        if !(0.0..0.5).contains(&self.locator.guide_inset) {
            return invalid("locator.guide_inset must be within [0, 0.5)".into());
        }
        if self
            .session
            .timeout_secs
            .is_some_and(|secs| Duration::try_from_secs_f64(secs).is_err())
        {
            return invalid("session.timeout_secs must be a finite non-negative number".into());
        }

        Ok(())
    }
}

/// Right edge of the number line, or `None` if it overflows.
fn number_line_right(l: &LayoutConfig) -> Option<u32> {
    let digits = l
        .groups
        .iter()
        .try_fold(0u32, |n, &g| n.checked_add(u32::try_from(g).ok()?))?;
    let gaps = u32::try_from(l.groups.len().checked_sub(1)?)
        .ok()?
        .checked_mul(l.group_gap)?;
    digits
        .checked_sub(1)?
        .checked_mul(l.glyph_pitch)?
        .checked_add(l.glyph_width)?
        .checked_add(gaps)?
        .checked_add(l.number_left)
}

fn expiry_right(e: &ExpiryLayoutConfig) -> Option<u32> {
    e.glyph_pitch
        .checked_mul(4)?
        .checked_add(e.glyph_width)?
        .checked_add(e.left)
}
