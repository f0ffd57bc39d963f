use image::GrayImage;
use nalgebra::Matrix3;

use super::arena::{Texture, TextureArena};
use super::{Size, check_input};
use crate::error::FrameError;
use crate::homography;
use crate::models::Quadrilateral;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformParams {
    /// Canonical rectangle the card is mapped onto.
    pub output: Size,
    pub border_value: u8,
    pub min_quad_area: f64,
}

/// Perspective correction of a card quadrilateral into the canonical
/// rectangle.
pub struct TransformFilter {
    input: Size,
    params: TransformParams,
    canonical_to_frame: Option<Matrix3<f64>>,
    output: Texture<u8>,
}

impl TransformFilter {
    pub fn configure(arena: &TextureArena, input: Size, params: TransformParams) -> Result<Self, FrameError> {
        let output = arena.allocate::<u8>(params.output.pixels())?;
        Ok(Self {
            input,
            params,
            canonical_to_frame: None,
            output,
        })
    }

    pub fn input_size(&self) -> Size {
        self.input
    }

    pub fn output_size(&self) -> Size {
        self.params.output
    }

    /// Validate `quad` and compute the mapping used by the next `apply`.
    /// On failure the previous mapping is cleared.
    pub fn set_quad(&mut self, quad: &Quadrilateral) -> Result<(), FrameError> {
        self.canonical_to_frame = None;
        quad.validate(self.params.min_quad_area)?;
        let out = self.params.output;
        self.canonical_to_frame = Some(homography::canonical_to_quad(out.width, out.height, quad)?);
        Ok(())
    }

    pub fn apply(&mut self, input: &GrayImage) -> Result<GrayImage, FrameError> {
        check_input(self.input, input)?;
        let h = self
            .canonical_to_frame
            .as_ref()
            .ok_or_else(|| FrameError::geometry("no card quadrilateral set"))?;

        let out = self.params.output;
        let plane = self.output.as_mut_slice();
        homography::warp_into(input, h, self.params.border_value, plane, out.width);

        GrayImage::from_raw(out.width, out.height, plane.to_vec()).ok_or_else(|| out.mismatch(input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Point;

    fn params() -> TransformParams {
        TransformParams {
            output: Size::new(80, 50),
            border_value: 9,
            min_quad_area: 100.0,
        }
    }

    #[test]
    fn quad_region_is_resampled_into_canonical() {
        let arena = TextureArena::new(1 << 20);
        let mut filter = TransformFilter::configure(&arena, Size::new(200, 150), params()).unwrap();

        // Bright rectangle exactly where the quad is.
        let frame = GrayImage::from_fn(200, 150, |x, y| {
            image::Luma([if (40..120).contains(&x) && (30..80).contains(&y) { 220 } else { 10 }])
        });
        filter
            .set_quad(&Quadrilateral::from_rect(40.0, 30.0, 80.0, 50.0))
            .unwrap();
        let out = filter.apply(&frame).unwrap();
        assert_eq!(out.dimensions(), (80, 50));
        assert!(out.pixels().all(|p| p[0] == 220));
    }

    #[test]
    fn outside_source_fills_border() {
        let arena = TextureArena::new(1 << 20);
        let mut filter = TransformFilter::configure(&arena, Size::new(100, 100), params()).unwrap();
        // Right half of the quad hangs off the frame.
        let quad = Quadrilateral::new(
            Point::new(60.0, 10.0),
            Point::new(140.0, 10.0),
            Point::new(140.0, 60.0),
            Point::new(60.0, 60.0),
        );
        filter.set_quad(&quad).unwrap();
        let out = filter.apply(&GrayImage::from_pixel(100, 100, image::Luma([50]))).unwrap();
        assert_eq!(out.get_pixel(5, 25)[0], 50);
        assert_eq!(out.get_pixel(75, 25)[0], 9);
    }

    #[test]
    fn degenerate_quad_clears_mapping() {
        let arena = TextureArena::new(1 << 20);
        let mut filter = TransformFilter::configure(&arena, Size::new(100, 100), params()).unwrap();
        filter
            .set_quad(&Quadrilateral::from_rect(0.0, 0.0, 90.0, 90.0))
            .unwrap();
        let tiny = Quadrilateral::from_rect(0.0, 0.0, 3.0, 3.0);
        assert!(matches!(filter.set_quad(&tiny), Err(FrameError::InvalidGeometry { .. })));
        assert!(filter.apply(&GrayImage::new(100, 100)).is_err());
    }
}
