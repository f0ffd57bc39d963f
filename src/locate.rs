//! Finding the card quadrilateral in a frame.

use image::GrayImage;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};

use crate::config::{LocatorConfig, ScanConfig};
use crate::error::FrameError;
use crate::models::{Frame, Point, Quadrilateral};

/// Where the card sits in each frame.
#[derive(Debug, Clone)]
pub enum CardLocator {
    /// The host already knows the card corners (e.g. a fixed capture jig).
    Fixed(Quadrilateral),
    /// Search for the card edges around an on-screen guide rectangle.
    Guided(GuideLocator),
}

impl CardLocator {
    pub fn guided(config: &ScanConfig) -> Self {
        CardLocator::Guided(GuideLocator::new(config))
    }

    pub fn locate(&self, frame: &Frame) -> Result<Quadrilateral, FrameError> {
        match self {
            CardLocator::Fixed(quad) => Ok(*quad),
            CardLocator::Guided(locator) => locator.locate(&frame.to_gray_image()?),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuideRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy)]
enum Side {
    Top,
    Right,
    Bottom,
    Left,
}

impl Side {
    fn name(self) -> &'static str {
        match self {
            Side::Top => "top",
            Side::Right => "right",
            Side::Bottom => "bottom",
            Side::Left => "left",
        }
    }

    fn is_horizontal(self) -> bool {
        matches!(self, Side::Top | Side::Bottom)
    }
}

/// Line `v = slope * u + intercept`, where `u` runs along the edge (x for the
/// top and bottom, y for the sides).
#[derive(Debug, Clone, Copy)]
struct EdgeLine {
    slope: f64,
    intercept: f64,
}

impl EdgeLine {
    fn fit(points: &[(f64, f64)]) -> Option<Self> {
        let n = points.len() as f64;
        if points.len() < 2 {
            return None;
        }
        let (su, sv) = points.iter().fold((0.0, 0.0), |(a, b), &(u, v)| (a + u, b + v));
        let (mu, mv) = (su / n, sv / n);
        let (mut suu, mut suv) = (0.0, 0.0);
        for &(u, v) in points {
            suu += (u - mu) * (u - mu);
            suv += (u - mu) * (v - mv);
        }
        if suu <= f64::EPSILON {
            return None;
        }
        let slope = suv / suu;
        Some(Self {
            slope,
            intercept: mv - slope * mu,
        })
    }

    fn residual(&self, (u, v): (f64, f64)) -> f64 {
        (v - (self.slope * u + self.intercept)).abs()
    }
}

/// Edge search around a guide rectangle with the card's aspect ratio.
#[derive(Debug, Clone)]
pub struct GuideLocator {
    config: LocatorConfig,
    aspect: f64,
}

const OUTLIER_PX: f64 = 2.0;

impl GuideLocator {
    pub fn new(config: &ScanConfig) -> Self {
        Self {
            config: config.locator.clone(),
            aspect: config.canonical.width as f64 / config.canonical.height as f64,
        }
    }

    /// Largest card-shaped rectangle centred in the inset frame.
    pub fn guide(&self, width: u32, height: u32) -> GuideRect {
        let inset = self.config.guide_inset as f64;
        let avail_w = width as f64 * (1.0 - 2.0 * inset);
        let avail_h = height as f64 * (1.0 - 2.0 * inset);
        let (w, h) = if avail_w / avail_h > self.aspect {
            (avail_h * self.aspect, avail_h)
        } else {
            (avail_w, avail_w / self.aspect)
        };
        GuideRect {
            x: (width as f64 - w) / 2.0,
            y: (height as f64 - h) / 2.0,
            width: w,
            height: h,
        }
    }

    pub fn locate(&self, image: &GrayImage) -> Result<Quadrilateral, FrameError> {
        let guide = self.guide(image.width(), image.height());
        let across_rows = vertical_sobel(image);
        let across_cols = horizontal_sobel(image);

        let mut lines = [EdgeLine {
            slope: 0.0,
            intercept: 0.0,
        }; 4];
        for (i, side) in [Side::Top, Side::Right, Side::Bottom, Side::Left].into_iter().enumerate() {
            let gradient = if side.is_horizontal() { &across_rows } else { &across_cols };
            let points = self.edge_points(gradient, &guide, side);
            lines[i] = self.fit_side(side, &points)?;
        }
        let [top, right, bottom, left] = lines;

        let corner = |horizontal: EdgeLine, vertical: EdgeLine, side: Side| {
            intersect(horizontal, vertical).ok_or(FrameError::CardNotFound {
                side: side.name(),
                points: 0,
            })
        };
        Ok(Quadrilateral::new(
            corner(top, left, Side::Left)?,
            corner(top, right, Side::Right)?,
            corner(bottom, right, Side::Right)?,
            corner(bottom, left, Side::Left)?,
        ))
    }

    /// Strongest edge response along each sample line crossing one side of
    /// the guide, as (along, across) continuous coordinates.
    fn edge_points(
        &self,
        gradient: &image::ImageBuffer<image::Luma<i16>, Vec<i16>>,
        guide: &GuideRect,
        side: Side,
    ) -> Vec<(f64, f64)> {
        let (along_start, along_len, across_centre, extent) = match side {
            Side::Top => (guide.x, guide.width, guide.y, guide.height),
            Side::Bottom => (guide.x, guide.width, guide.y + guide.height, guide.height),
            Side::Left => (guide.y, guide.height, guide.x, guide.width),
            Side::Right => (guide.y, guide.height, guide.x + guide.width, guide.width),
        };
        let (along_max, across_max) = if side.is_horizontal() {
            (gradient.width(), gradient.height())
        } else {
            (gradient.height(), gradient.width())
        };
        if across_max < 3 {
            return Vec::new();
        }

        let half_band = self.config.band as f64 * extent;
        let lo = ((across_centre - half_band).floor().max(1.0)) as u32;
        let hi = ((across_centre + half_band).ceil() as u32).min(across_max - 2);
        let response = |along: u32, across: u32| -> f64 {
            let (x, y) = if side.is_horizontal() { (along, across) } else { (across, along) };
            (gradient.get_pixel(x, y)[0] as f64).abs()
        };

        let first = (along_start + 0.1 * along_len).ceil().max(0.0) as u32;
        let last = ((along_start + 0.9 * along_len).floor().max(0.0) as u32).min(along_max.saturating_sub(1));
        let step = self.config.sample_step.max(1) as usize;

        let mut points = Vec::new();
        for along in (first..=last).step_by(step) {
            let Some((peak, strength)) = (lo..=hi)
                .map(|across| (across, response(along, across)))
                .max_by(|a, b| a.1.total_cmp(&b.1))
            else {
                continue;
            };
            if strength < self.config.min_edge_strength as f64 {
                continue;
            }
            let a = response(along, peak - 1);
            let c = response(along, peak + 1);
            let denom = a - 2.0 * strength + c;
            let offset = if denom.abs() > f64::EPSILON {
                (0.5 * (a - c) / denom).clamp(-0.5, 0.5)
            } else {
                0.0
            };
            // Pixel index to continuous coordinate at the pixel centre.
            points.push((along as f64 + 0.5, peak as f64 + offset + 0.5));
        }
        points
    }

    fn fit_side(&self, side: Side, points: &[(f64, f64)]) -> Result<EdgeLine, FrameError> {
        let not_found = |n: usize| FrameError::CardNotFound {
            side: side.name(),
            points: n,
        };
        if points.len() < self.config.min_points {
            return Err(not_found(points.len()));
        }
        // Card artwork near the edge can outshine it on some sample lines.
        // Drop the worst point until every remaining one is on the line.
        let mut inliers = points.to_vec();
        loop {
            if inliers.len() < self.config.min_points {
                return Err(not_found(inliers.len()));
            }
            let line = EdgeLine::fit(&inliers).ok_or(not_found(inliers.len()))?;
            let (worst, residual) = inliers
                .iter()
                .map(|&p| line.residual(p))
                .enumerate()
                .fold((0, 0.0), |best, (i, r)| if r > best.1 { (i, r) } else { best });
            if residual <= OUTLIER_PX {
                return Ok(line);
            }
            inliers.swap_remove(worst);
        }
    }
}

/// Intersection of a horizontal-ish line `y = a x + b` with a vertical-ish
/// line `x = c y + d`.
fn intersect(horizontal: EdgeLine, vertical: EdgeLine) -> Option<Point> {
    let denom = 1.0 - horizontal.slope * vertical.slope;
    if denom.abs() < 1e-9 {
        return None;
    }
    let y = (horizontal.slope * vertical.intercept + horizontal.intercept) / denom;
    let x = vertical.slope * y + vertical.intercept;
    Some(Point::new(x, y))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guide_keeps_card_aspect() {
        let locator = GuideLocator::new(&ScanConfig::default());
        let guide = locator.guide(640, 480);
        // The inset is stored as f32, so 0.1 is not exact.
        assert!((guide.width / guide.height - 428.0 / 270.0).abs() < 1e-9);
        assert!((guide.width - 512.0).abs() < 1e-4);
        assert!((guide.x - 64.0).abs() < 1e-4);
    }

    #[test]
    fn lines_intersect_at_corner() {
        let top = EdgeLine {
            slope: 0.0,
            intercept: 10.0,
        };
        let left = EdgeLine {
            slope: 0.0,
            intercept: 20.0,
        };
        let p = intersect(top, left).unwrap();
        assert!((p.x - 20.0).abs() < 1e-12 && (p.y - 10.0).abs() < 1e-12);
    }

    #[test]
    fn blank_frame_has_no_card() {
        let locator = GuideLocator::new(&ScanConfig::default());
        let image = GrayImage::from_pixel(320, 240, image::Luma([90]));
        assert!(matches!(
            locator.locate(&image),
            Err(FrameError::CardNotFound { side: "top", points: 0 })
        ));
    }
}
