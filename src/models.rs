use std::fmt;
use std::sync::Arc;

use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};

use crate::error::FrameError;

/// Pixel layouts a capture source may hand over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Luma8,
    Rgb8,
    Bgra8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Luma8 => 1,
            PixelFormat::Rgb8 => 3,
            PixelFormat::Bgra8 => 4,
        }
    }
}

/// One captured camera frame. The pixel data is shared and never mutated.
#[derive(Debug, Clone)]
pub struct Frame {
    width: u32,
    height: u32,
    stride: usize,
    format: PixelFormat,
    sequence: u64,
    data: Arc<[u8]>,
}

impl Frame {
    /// Wrap a raw buffer. `stride` is the number of bytes between row starts.
    pub fn new(
        width: u32,
        height: u32,
        stride: usize,
        format: PixelFormat,
        sequence: u64,
        data: Vec<u8>,
    ) -> Result<Self, FrameError> {
        let row_bytes = width as usize * format.bytes_per_pixel();
        let required = if height == 0 {
            0
        } else {
            stride * (height as usize - 1) + row_bytes
        };
        if stride < row_bytes || data.len() < required {
            return Err(FrameError::DimensionMismatch {
                expected_width: width,
                expected_height: height,
                actual_width: (stride / format.bytes_per_pixel()) as u32,
                actual_height: data.len().checked_div(stride).unwrap_or(0) as u32,
            });
        }
        Ok(Self {
            width,
            height,
            stride,
            format,
            sequence,
            data: data.into(),
        })
    }

    /// Frame from an already grayscale image.
    pub fn from_luma(image: &GrayImage, sequence: u64) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            stride: image.width() as usize,
            format: PixelFormat::Luma8,
            sequence,
            data: image.as_raw().as_slice().into(),
        }
    }

    /// Frame from any decoded image, converted to luminance.
    pub fn from_dynamic(image: &DynamicImage, sequence: u64) -> Self {
        Self::from_luma(&image.to_luma8(), sequence)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Convert colour frames to single-channel luminance (BT.601 weights).
    /// Luma frames are returned as-is.
    pub fn into_luma(self) -> Frame {
        let bpp = self.format.bytes_per_pixel();
        let (r, g, b) = match self.format {
            PixelFormat::Luma8 => return self,
            PixelFormat::Rgb8 => (0, 1, 2),
            PixelFormat::Bgra8 => (2, 1, 0),
        };

        let mut luma = Vec::with_capacity(self.width as usize * self.height as usize);
        for row in 0..self.height as usize {
            let start = row * self.stride;
            for px in self.data[start..start + self.width as usize * bpp].chunks_exact(bpp) {
                let y = 77 * px[r] as u32 + 150 * px[g] as u32 + 29 * px[b] as u32;
                luma.push((y >> 8) as u8);
            }
        }

        Frame {
            width: self.width,
            height: self.height,
            stride: self.width as usize,
            format: PixelFormat::Luma8,
            sequence: self.sequence,
            data: luma.into(),
        }
    }

    /// Copy the luminance plane into a tightly packed image.
    pub(crate) fn to_gray_image(&self) -> Result<GrayImage, FrameError> {
        if self.format != PixelFormat::Luma8 {
            return Err(FrameError::UnsupportedPixelFormat(self.format));
        }
        let width = self.width as usize;
        let mut packed = Vec::with_capacity(width * self.height as usize);
        for row in 0..self.height as usize {
            let start = row * self.stride;
            packed.extend_from_slice(&self.data[start..start + width]);
        }
        GrayImage::from_raw(self.width, self.height, packed).ok_or(FrameError::DimensionMismatch {
            expected_width: self.width,
            expected_height: self.height,
            actual_width: self.width,
            actual_height: 0,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Card boundary in source-frame coordinates, ordered clockwise from the
/// top-left corner (image coordinates, y pointing down).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quadrilateral {
    corners: [Point; 4],
}

impl Quadrilateral {
    pub fn new(top_left: Point, top_right: Point, bottom_right: Point, bottom_left: Point) -> Self {
        Self {
            corners: [top_left, top_right, bottom_right, bottom_left],
        }
    }

    /// Axis-aligned rectangle as a quadrilateral.
    pub fn from_rect(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self::new(
            Point::new(x, y),
            Point::new(x + width, y),
            Point::new(x + width, y + height),
            Point::new(x, y + height),
        )
    }

    /// Restore clockwise-from-top-left ordering for corners given in any order.
    pub fn from_unordered(points: [Point; 4]) -> Self {
        let cx = points.iter().map(|p| p.x).sum::<f64>() / 4.0;
        let cy = points.iter().map(|p| p.y).sum::<f64>() / 4.0;

        let mut sorted = points;
        // Increasing angle runs clockwise on screen because y points down.
        sorted.sort_by(|a, b| {
            let ta = (a.y - cy).atan2(a.x - cx);
            let tb = (b.y - cy).atan2(b.x - cx);
            ta.total_cmp(&tb)
        });

        let first = sorted
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| (a.x + a.y).total_cmp(&(b.x + b.y)))
            .map(|(i, _)| i)
            .unwrap_or(0);
        sorted.rotate_left(first);

        Self { corners: sorted }
    }

    pub fn corners(&self) -> &[Point; 4] {
        &self.corners
    }

    pub fn top_left(&self) -> Point {
        self.corners[0]
    }

    pub fn top_right(&self) -> Point {
        self.corners[1]
    }

    pub fn bottom_right(&self) -> Point {
        self.corners[2]
    }

    pub fn bottom_left(&self) -> Point {
        self.corners[3]
    }

    /// Shoelace area; positive for the clockwise (on screen) ordering.
    pub fn signed_area(&self) -> f64 {
        let c = &self.corners;
        let mut twice = 0.0;
        for i in 0..4 {
            let a = c[i];
            let b = c[(i + 1) % 4];
            twice += a.x * b.y - b.x * a.y;
        }
        twice / 2.0
    }

    /// Reject quadrilaterals the transform cannot map unambiguously.
    pub fn validate(&self, min_area: f64) -> Result<(), FrameError> {
        if self.corners.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
            return Err(FrameError::geometry("non-finite corner"));
        }

        let area = self.signed_area();
        if area <= 0.0 {
            return Err(FrameError::geometry("corners are not ordered clockwise"));
        }
        if area < min_area {
            return Err(FrameError::geometry(format!(
                "area {:.1} below minimum {:.1}",
                area, min_area
            )));
        }

        // Every turn must bend the same way: rules out collinear triples,
        // concave corners and self-intersection.
        for i in 0..4 {
            let a = self.corners[i];
            let b = self.corners[(i + 1) % 4];
            let c = self.corners[(i + 2) % 4];
            let (e0x, e0y) = (b.x - a.x, b.y - a.y);
            let (e1x, e1y) = (c.x - b.x, c.y - b.y);
            let len = (e0x.hypot(e0y)) * (e1x.hypot(e1y));
            if len <= f64::EPSILON {
                return Err(FrameError::geometry("coincident corners"));
            }
            let sin = (e0x * e1y - e0y * e1x) / len;
            if sin < 1e-3 {
                return Err(FrameError::geometry(format!(
                    "corner {} is collinear or reflex",
                    (i + 1) % 4
                )));
            }
        }

        Ok(())
    }
}

/// Axis-aligned box in canonical-rectangle pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Which part of the card a candidate covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    /// Digit group on the number line, by index from the left.
    NumberGroup(usize),
    /// The "MM/YY" expiry field.
    Expiry,
}

/// A detected glyph group inside the canonical rectangle.
#[derive(Debug, Clone, PartialEq)]
pub struct DigitCandidate {
    pub kind: CandidateKind,
    pub bbox: BoundingBox,
    /// Left edge of each glyph cell to classify.
    pub x_offsets: Vec<u32>,
    pub y_offset: u32,
    pub glyph_width: u32,
    pub glyph_height: u32,
    /// The canonical image was rotated 180° before detection.
    pub flipped: bool,
    /// Glyphs are darker than the card surface around them.
    pub dark_ink: bool,
    pub confidence: f32,
}

/// Issuer network derived from the number prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CardNetwork {
    Visa,
    Mastercard,
    Amex,
    Discover,
    Jcb,
    Unknown,
}

/// A finalized card read. Only the aggregator constructs these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CardInfo {
    numbers: String,
    x_offsets: Vec<u32>,
    y_offset: u32,
    expiry_year: u32,
    expiry_month: u32,
    is_flipped: bool,
}

impl CardInfo {
    pub(crate) fn new(
        numbers: String,
        x_offsets: Vec<u32>,
        y_offset: u32,
        expiry_month: u32,
        expiry_year: u32,
        is_flipped: bool,
    ) -> Self {
        Self {
            numbers,
            x_offsets,
            y_offset,
            expiry_year,
            expiry_month,
            is_flipped,
        }
    }

    pub fn numbers(&self) -> &str {
        &self.numbers
    }

    pub fn x_offsets(&self) -> &[u32] {
        &self.x_offsets
    }

    pub fn y_offset(&self) -> u32 {
        self.y_offset
    }

    /// Two-digit year, 0 when the expiry was not read.
    pub fn expiry_year(&self) -> u32 {
        self.expiry_year
    }

    /// 1-12, 0 when the expiry was not read.
    pub fn expiry_month(&self) -> u32 {
        self.expiry_month
    }

    pub fn is_flipped(&self) -> bool {
        self.is_flipped
    }

    pub fn has_expiry(&self) -> bool {
        self.expiry_month != 0
    }

    pub fn is_luhn_valid(&self) -> bool {
        luhn_valid(&self.numbers)
    }

    pub fn network(&self) -> CardNetwork {
        network_for(&self.numbers)
    }

    /// Number with all but the last four digits masked, safe to log.
    pub fn redacted(&self) -> String {
        let n = self.numbers.len();
        let tail = &self.numbers[n.saturating_sub(4)..];
        format!("•••• {}", tail)
    }
}

impl fmt::Display for CardInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.redacted())?;
        if self.has_expiry() {
            write!(f, " exp {:02}/{:02}", self.expiry_month, self.expiry_year)?;
        }
        Ok(())
    }
}

pub(crate) fn luhn_valid(digits: &str) -> bool {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let sum: u32 = digits
        .bytes()
        .rev()
        .enumerate()
        .map(|(i, b)| {
            let d = (b - b'0') as u32;
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

fn network_for(digits: &str) -> CardNetwork {
    let prefix = |len: usize| -> u32 { digits.get(..len).and_then(|p| p.parse().ok()).unwrap_or(0) };

    if digits.starts_with('4') {
        CardNetwork::Visa
    } else if (51..=55).contains(&prefix(2)) || (2221..=2720).contains(&prefix(4)) {
        CardNetwork::Mastercard
    } else if matches!(prefix(2), 34 | 37) {
        CardNetwork::Amex
    } else if prefix(4) == 6011 || prefix(2) == 65 || (644..=649).contains(&prefix(3)) {
        CardNetwork::Discover
    } else if (3528..=3589).contains(&prefix(4)) {
        CardNetwork::Jcb
    } else {
        CardNetwork::Unknown
    }
}
