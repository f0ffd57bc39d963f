//! Synthetic card renderer used by tests and the `synth` subcommand.

use image::{GrayImage, Luma, imageops};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{LayoutConfig, ScanConfig};
use crate::detection::glyphs;
use crate::detection::layout::number_cell_x;
use crate::error::FrameError;
use crate::homography::{canonical_to_quad, warp_into};
use crate::models::Quadrilateral;

/// A flat card face with the number line and optional expiry drawn in the
/// configured layout.
#[derive(Debug, Clone)]
pub struct SyntheticCard {
    number: String,
    expiry: Option<(u32, u32)>,
    layout: LayoutConfig,
    width: u32,
    height: u32,
    card_shade: u8,
    ink_shade: u8,
    flipped: bool,
}

impl SyntheticCard {
    pub fn new(number: impl Into<String>, config: &ScanConfig) -> Self {
        Self {
            number: number.into(),
            expiry: None,
            layout: config.layout.clone(),
            width: config.canonical.width,
            height: config.canonical.height,
            card_shade: 215,
            ink_shade: 35,
            flipped: false,
        }
    }

    pub fn with_expiry(mut self, month: u32, year: u32) -> Self {
        self.expiry = Some((month, year));
        self
    }

    pub fn with_shades(mut self, card: u8, ink: u8) -> Self {
        self.card_shade = card;
        self.ink_shade = ink;
        self
    }

    /// Render the card upside down, as if held the wrong way round.
    pub fn flipped(mut self, flipped: bool) -> Self {
        self.flipped = flipped;
        self
    }

    pub fn render_canonical(&self) -> GrayImage {
        let l = &self.layout;
        let mut image = GrayImage::from_pixel(self.width, self.height, Luma([self.card_shade]));

        let mut position = 0;
        let mut digits = self.number.chars().filter(char::is_ascii_digit);
        'groups: for (group, &len) in l.groups.iter().enumerate() {
            for _ in 0..len {
                let Some(ch) = digits.next() else {
                    break 'groups;
                };
                let x = number_cell_x(l, group, position);
                glyphs::draw(&mut image, ch, x, l.number_top, l.glyph_width, l.glyph_height, self.ink_shade);
                position += 1;
            }
        }

        if let Some((month, year)) = self.expiry {
            let e = &l.expiry;
            let text = format!("{:02}/{:02}", month % 100, year % 100);
            for (i, ch) in text.chars().enumerate() {
                let x = e.left + i as u32 * e.glyph_pitch;
                glyphs::draw(&mut image, ch, x, e.top, e.glyph_width, e.glyph_height, self.ink_shade);
            }
        }

        if self.flipped {
            imageops::rotate180_in_place(&mut image);
        }
        image
    }

    /// Place the card at `quad` in a `width`x`height` frame over a flat
    /// background.
    pub fn render_frame(
        &self,
        width: u32,
        height: u32,
        quad: &Quadrilateral,
        background: u8,
    ) -> Result<GrayImage, FrameError> {
        let canonical = self.render_canonical();
        let forward = canonical_to_quad(self.width, self.height, quad)?;
        let inverse = forward
            .try_inverse()
            .ok_or_else(|| FrameError::geometry("card placement is not invertible"))?;

        let mut frame = GrayImage::new(width, height);
        warp_into(&canonical, &inverse, background, &mut frame, width);
        Ok(frame)
    }

    /// Like [`render_frame`](Self::render_frame) with uniform sensor noise of
    /// up to `amplitude` grey levels, reproducible from `seed`.
    pub fn render_noisy_frame(
        &self,
        width: u32,
        height: u32,
        quad: &Quadrilateral,
        background: u8,
        amplitude: u8,
        seed: u64,
    ) -> Result<GrayImage, FrameError> {
        let mut frame = self.render_frame(width, height, quad, background)?;
        add_noise(&mut frame, amplitude, &mut StdRng::seed_from_u64(seed));
        Ok(frame)
    }
}

pub fn add_noise(image: &mut GrayImage, amplitude: u8, rng: &mut impl Rng) {
    if amplitude == 0 {
        return;
    }
    let amplitude = amplitude as i16;
    for p in image.pixels_mut() {
        let noisy = p[0] as i16 + rng.gen_range(-amplitude..=amplitude);
        p[0] = noisy.clamp(0, 255) as u8;
    }
}

/// Card-shaped quadrilateral centred in the frame, covering `fill` of the
/// limiting dimension.
pub fn centered_quad(frame_width: u32, frame_height: u32, aspect: f64, fill: f64) -> Quadrilateral {
    let (fw, fh) = (frame_width as f64, frame_height as f64);
    let (w, h) = if fw / fh > aspect {
        (fh * fill * aspect, fh * fill)
    } else {
        (fw * fill, fw * fill / aspect)
    };
    Quadrilateral::from_rect((fw - w) / 2.0, (fh - h) / 2.0, w, h)
}
