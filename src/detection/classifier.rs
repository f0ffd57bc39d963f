use std::collections::HashMap;

use image::GrayImage;

use crate::config::ClassifierConfig;
use crate::detection::glyphs;
use crate::detection::layout::CardLayout;
use crate::models::DigitCandidate;

/// Index of the reject class in [`Classification::probabilities`].
pub const REJECT: usize = 10;

/// Per-glyph result: a probability for each digit 0-9 plus the reject class.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub probabilities: [f32; 11],
    /// The winning digit, or `None` if the glyph was rejected.
    pub label: Option<u8>,
}

impl Classification {
    pub fn confidence(&self) -> f32 {
        match self.label {
            Some(d) => self.probabilities[d as usize],
            None => self.probabilities[REJECT],
        }
    }
}

/// Normalized cross-correlation against rendered digit templates.
pub struct DigitClassifier {
    config: ClassifierConfig,
    /// Templates for digits 0-9, keyed by glyph cell size.
    templates: HashMap<(u32, u32), Vec<Vec<f32>>>,
}

impl DigitClassifier {
    pub fn new(layout: &CardLayout, config: ClassifierConfig) -> Self {
        let mut classifier = Self {
            config,
            templates: HashMap::new(),
        };
        for slot in layout.number_slots.iter().chain(std::iter::once(&layout.expiry_slot)) {
            classifier.templates_for(slot.glyph_width, slot.glyph_height);
        }
        classifier
    }

    fn templates_for(&mut self, width: u32, height: u32) -> &[Vec<f32>] {
        self.templates
            .entry((width, height))
            .or_insert_with(|| (0..10).map(|d| glyphs::template(d, width, height)).collect())
    }

    /// Classify every glyph of a candidate, in reading order.
    pub fn classify(&mut self, image: &GrayImage, candidate: &DigitCandidate) -> Vec<Classification> {
        let (w, h) = (candidate.glyph_width, candidate.glyph_height);
        let radius = self.config.shift_radius as i64;
        let config = self.config.clone();
        let templates = self.templates_for(w, h);

        candidate
            .x_offsets
            .iter()
            .map(|&x| {
                let mut best = [-1.0f32; 10];
                for dy in -radius..=radius {
                    for dx in -radius..=radius {
                        let Some(patch) = glyph_patch(
                            image,
                            x as i64 + dx,
                            candidate.y_offset as i64 + dy,
                            w,
                            h,
                            candidate.dark_ink,
                        ) else {
                            continue;
                        };
                        for (digit, template) in templates.iter().enumerate() {
                            let ncc: f32 = patch.iter().zip(template).map(|(a, b)| a * b).sum();
                            best[digit] = best[digit].max(ncc);
                        }
                    }
                }
                decide(&best, &config)
            })
            .collect()
    }
}

/// Zero-mean, unit-norm glyph patch with ink as the positive polarity.
/// `None` for a featureless patch.
fn glyph_patch(image: &GrayImage, x: i64, y: i64, width: u32, height: u32, dark_ink: bool) -> Option<Vec<f32>> {
    let max_x = image.width() as i64 - 1;
    let max_y = image.height() as i64 - 1;
    let mut patch = Vec::with_capacity(width as usize * height as usize);
    for py in 0..height as i64 {
        for px in 0..width as i64 {
            let v = image.get_pixel((x + px).clamp(0, max_x) as u32, (y + py).clamp(0, max_y) as u32)[0] as f32;
            patch.push(if dark_ink { 255.0 - v } else { v });
        }
    }
    glyphs::normalize(&mut patch).then_some(patch)
}

fn decide(scores: &[f32; 10], config: &ClassifierConfig) -> Classification {
    let mut logits = [0f32; 11];
    for (l, &s) in logits.iter_mut().zip(scores) {
        *l = s.max(-1.0) * config.sharpness;
    }
    logits[REJECT] = config.reject_score * config.sharpness;

    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut probabilities = logits.map(|l| (l - max).exp());
    let sum: f32 = probabilities.iter().sum();
    probabilities.iter_mut().for_each(|p| *p /= sum);

    let (digit, p) = probabilities[..REJECT]
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (d, &p)| if p > best.1 { (d, p) } else { best });
    let label = (p >= config.confidence_floor && p > probabilities[REJECT]).then_some(digit as u8);

    Classification { probabilities, label }
}
