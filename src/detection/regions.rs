//! Scores one layout slot of the canonical image and snaps its glyph cells to
//! the ink actually present.

use image::{GrayImage, ImageBuffer, Luma, imageops};
use imageproc::contrast::otsu_level;

use crate::config::DetectorConfig;
use crate::detection::layout::SlotLayout;
use crate::models::{BoundingBox, DigitCandidate};

pub(crate) type Gradients = ImageBuffer<Luma<u16>, Vec<u16>>;

/// Search window around a slot, clamped to the image.
#[derive(Debug, Clone, Copy)]
struct Window {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

impl Window {
    fn around(slot: &SlotLayout, config: &DetectorConfig, image_width: u32, image_height: u32) -> Option<Self> {
        let nominal = slot.nominal_box();
        let x0 = nominal.x.saturating_sub(config.search_margin_x);
        let y0 = nominal.y.saturating_sub(config.search_margin_y);
        let x1 = nominal
            .x
            .saturating_add(nominal.width)
            .saturating_add(config.search_margin_x)
            .min(image_width);
        let y1 = nominal
            .y
            .saturating_add(nominal.height)
            .saturating_add(config.search_margin_y)
            .min(image_height);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Self {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        })
    }

    fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Fraction of window pixels whose gradient magnitude exceeds the threshold.
fn edge_density(gradients: &Gradients, window: Window, threshold: u16) -> f32 {
    let mut edges = 0usize;
    for y in window.y..window.y + window.height {
        for x in window.x..window.x + window.width {
            if gradients.get_pixel(x, y)[0] > threshold {
                edges += 1;
            }
        }
    }
    edges as f32 / window.area() as f32
}

/// Shifts in search order: 0, -1, 1, -2, 2, ... so ties favour the nominal
/// position.
fn shifts(radius: u32) -> impl Iterator<Item = i64> {
    std::iter::once(0).chain((1..=radius as i64).flat_map(|s| [-s, s]))
}

/// Sum of `profile[start..start + len]`, treating out-of-range entries as 0.
fn span_sum(profile: &[u32], start: i64, len: u32) -> u32 {
    let lo = start.max(0) as usize;
    let hi = (start + len as i64).clamp(0, profile.len() as i64) as usize;
    if lo >= hi { 0 } else { profile[lo..hi].iter().sum() }
}

/// Tightest box, in patch coordinates, around the ink inside the aligned
/// glyph cells.
fn ink_bounds(
    patch: &GrayImage,
    is_ink: impl Fn(u8) -> bool,
    cells: &[i64],
    dx: i64,
    glyph_width: u32,
    rows: std::ops::Range<u32>,
) -> Option<BoundingBox> {
    let width = patch.width() as i64;
    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for &cell in cells {
        let lo = (cell + dx).clamp(0, width) as u32;
        let hi = (cell + dx + glyph_width as i64).clamp(0, width) as u32;
        for y in rows.clone() {
            for x in lo..hi {
                if !is_ink(patch.get_pixel(x, y)[0]) {
                    continue;
                }
                bounds = Some(match bounds {
                    None => (x, y, x, y),
                    Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
                });
            }
        }
    }
    bounds.map(|(x0, y0, x1, y1)| BoundingBox {
        x: x0,
        y: y0,
        width: x1 - x0 + 1,
        height: y1 - y0 + 1,
    })
}

/// Locate the glyph cells of `slot` in `image`. Returns `None` when the slot
/// looks empty or its ink does not line up with the expected cells.
pub(crate) fn score_slot(
    image: &GrayImage,
    gradients: &Gradients,
    slot: &SlotLayout,
    config: &DetectorConfig,
) -> Option<DigitCandidate> {
    let window = Window::around(slot, config, image.width(), image.height())?;

    let density = edge_density(gradients, window, config.edge_threshold);
    if density < config.min_edge_density {
        log::trace!("{:?}: edge density {:.3} too low", slot.kind, density);
        return None;
    }

    let patch = imageops::crop_imm(image, window.x, window.y, window.width, window.height).to_image();
    let level = otsu_level(&patch);
    let dark = patch.pixels().filter(|p| p[0] <= level).count();
    // Glyphs cover less of the window than the card surface does.
    let dark_ink = dark * 2 <= patch.len();
    let is_ink = |v: u8| if dark_ink { v <= level } else { v > level };

    let mut rows = vec![0u32; window.height as usize];
    for (_, y, p) in patch.enumerate_pixels() {
        if is_ink(p[0]) {
            rows[y as usize] += 1;
        }
    }
    let total_ink: u32 = rows.iter().sum();
    if total_ink == 0 {
        return None;
    }

    let top = slot.top as i64 - window.y as i64;
    let dy = shifts(config.search_margin_y)
        .fold((0i64, 0u32), |best, dy| {
            let captured = span_sum(&rows, top + dy, slot.glyph_height);
            if captured > best.1 { (dy, captured) } else { best }
        })
        .0;

    // Column profile restricted to the chosen glyph rows.
    let row_lo = (top + dy).max(0) as u32;
    let row_hi = ((top + dy + slot.glyph_height as i64).max(0) as u32).min(window.height);
    let mut columns = vec![0u32; window.width as usize];
    for y in row_lo..row_hi {
        for x in 0..window.width {
            if is_ink(patch.get_pixel(x, y)[0]) {
                columns[x as usize] += 1;
            }
        }
    }

    let cells: Vec<i64> = slot.cells.iter().map(|&c| c as i64 - window.x as i64).collect();
    let capture = |dx: i64| -> u32 {
        cells
            .iter()
            .map(|&c| span_sum(&columns, c + dx, slot.glyph_width))
            .sum()
    };
    let (dx, captured) = shifts(config.search_margin_x).fold((0i64, 0u32), |best, dx| {
        let captured = capture(dx);
        if captured > best.1 { (dx, captured) } else { best }
    });

    let fill = captured as f32 / total_ink as f32;
    let confidence = (density / config.expected_edge_density).min(1.0) * fill;
    if confidence < config.min_slot_confidence {
        log::trace!(
            "{:?}: confidence {:.2} (density {:.3}, fill {:.2}) below floor",
            slot.kind,
            confidence,
            density,
            fill
        );
        return None;
    }

    let shift = |v: u32, d: i64| (v as i64 + d).max(0) as u32;
    let bbox = ink_bounds(&patch, is_ink, &cells, dx, slot.glyph_width, row_lo..row_hi)
        .map(|b| BoundingBox {
            x: window.x + b.x,
            y: window.y + b.y,
            ..b
        })
        .unwrap_or_else(|| {
            let nominal = slot.nominal_box();
            BoundingBox {
                x: shift(nominal.x, dx),
                y: shift(nominal.y, dy),
                ..nominal
            }
        });
    Some(DigitCandidate {
        kind: slot.kind,
        bbox,
        x_offsets: slot
            .digit_cells
            .iter()
            .map(|&i| shift(slot.cells[i], dx))
            .collect(),
        y_offset: shift(slot.top, dy),
        glyph_width: slot.glyph_width,
        glyph_height: slot.glyph_height,
        flipped: false,
        dark_ink,
        confidence,
    })
}
