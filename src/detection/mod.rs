pub mod classifier;
pub mod glyphs;
pub mod layout;
pub mod regions;

use image::{GrayImage, imageops};
use imageproc::gradients::sobel_gradients;

use crate::config::DetectorConfig;
use crate::models::DigitCandidate;

pub use classifier::{Classification, DigitClassifier};
pub use layout::{CardLayout, SlotLayout};

/// Slots found in one canonical image.
#[derive(Debug, Clone)]
pub struct Detection {
    /// The canonical image in the orientation the candidates refer to.
    pub image: GrayImage,
    pub flipped: bool,
    /// Accepted number groups, left to right. Missing groups are omitted.
    pub number: Vec<DigitCandidate>,
    pub expiry: Option<DigitCandidate>,
}

impl Detection {
    pub fn slots_found(&self) -> usize {
        self.number.len() + usize::from(self.expiry.is_some())
    }

    pub fn mean_confidence(&self) -> f32 {
        let n = self.slots_found();
        if n == 0 {
            return 0.0;
        }
        let total: f32 = self
            .number
            .iter()
            .chain(self.expiry.iter())
            .map(|c| c.confidence)
            .sum();
        total / n as f32
    }

    pub fn candidates(&self) -> impl Iterator<Item = &DigitCandidate> {
        self.number.iter().chain(self.expiry.iter())
    }
}

/// Finds the number groups and expiry field in a canonical card image.
pub struct DigitRegionDetector {
    layout: CardLayout,
    config: DetectorConfig,
}

impl DigitRegionDetector {
    pub fn new(layout: CardLayout, config: DetectorConfig) -> Self {
        Self { layout, config }
    }

    pub fn layout(&self) -> &CardLayout {
        &self.layout
    }

    /// Detect slots, retrying upside down when the number line is incomplete.
    pub fn detect(&self, image: &GrayImage) -> Detection {
        let upright = self.detect_oriented(image.clone(), false);
        if upright.number.len() == self.layout.number_slots.len() || !self.config.try_flipped {
            return upright;
        }

        let flipped = self.detect_oriented(imageops::rotate180(image), true);
        log::trace!(
            "orientation: upright {} slots ({:.2}), flipped {} slots ({:.2})",
            upright.slots_found(),
            upright.mean_confidence(),
            flipped.slots_found(),
            flipped.mean_confidence()
        );

        let better = (flipped.number.len(), flipped.slots_found()) > (upright.number.len(), upright.slots_found())
            || ((flipped.number.len(), flipped.slots_found()) == (upright.number.len(), upright.slots_found())
                && flipped.mean_confidence() > upright.mean_confidence());
        if better { flipped } else { upright }
    }

    fn detect_oriented(&self, image: GrayImage, flipped: bool) -> Detection {
        let gradients = sobel_gradients(&image);
        let score = |slot: &SlotLayout| {
            regions::score_slot(&image, &gradients, slot, &self.config).map(|mut c| {
                c.flipped = flipped;
                c
            })
        };

        let number = self.layout.number_slots.iter().filter_map(&score).collect();
        let expiry = score(&self.layout.expiry_slot);

        Detection {
            image,
            flipped,
            number,
            expiry,
        }
    }
}
