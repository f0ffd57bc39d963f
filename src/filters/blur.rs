use image::GrayImage;
use imageproc::filter::separable_filter_equal;

use super::arena::{Texture, TextureArena};
use super::{Size, check_input};
use crate::error::FrameError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlurParams {
    pub sigma: f32,
}

/// Separable Gaussian blur. Both passes run through
/// `imageproc::filter::separable_filter_equal`, which replicates the border
/// pixel at the edges. The result lands in an arena-owned output texture.
pub struct BlurFilter {
    size: Size,
    kernel: Vec<f32>,
    radius: usize,
    output: Texture<u8>,
}

impl BlurFilter {
    pub fn configure(arena: &TextureArena, size: Size, params: BlurParams) -> Result<Self, FrameError> {
        let kernel = gaussian_kernel(params.sigma);
        let radius = kernel.len() / 2;
        let output = arena.allocate::<u8>(size.pixels())?;
        Ok(Self {
            size,
            kernel,
            radius,
            output,
        })
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn radius(&self) -> usize {
        self.radius
    }

    pub fn apply(&mut self, input: &GrayImage) -> Result<GrayImage, FrameError> {
        check_input(self.size, input)?;
        if self.radius == 0 {
            return Ok(input.clone());
        }

        let blurred = separable_filter_equal(input, &self.kernel);
        let output = self.output.as_mut_slice();
        output.copy_from_slice(blurred.as_raw());

        GrayImage::from_raw(self.size.width, self.size.height, output.to_vec())
            .ok_or_else(|| self.size.mismatch(input))
    }
}

/// Normalized 1D Gaussian with radius ceil(3σ). Non-positive σ gives the
/// identity kernel `[1.0]`.
pub(crate) fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    if !(sigma > 0.0) {
        return vec![1.0];
    }
    let radius = (3.0 * sigma).ceil() as i32;
    let denom = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (-radius..=radius)
        .map(|i| (-(i * i) as f32 / denom).exp())
        .collect();
    let sum: f32 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= sum);
    kernel
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn arena() -> TextureArena {
        TextureArena::new(1 << 20)
    }

    #[test]
    fn kernel_is_normalized_and_symmetric() {
        let k = gaussian_kernel(1.5);
        assert_eq!(k.len(), 2 * 5 + 1);
        assert_relative_eq!(k.iter().sum::<f32>(), 1.0, epsilon = 1e-5);
        for i in 0..k.len() / 2 {
            assert_relative_eq!(k[i], k[k.len() - 1 - i]);
        }
    }

    #[test]
    fn zero_radius_returns_input_unchanged() {
        let img = GrayImage::from_fn(32, 20, |x, y| image::Luma([((x * 31) ^ (y * 17)) as u8]));
        let mut blur =
            BlurFilter::configure(&arena(), Size::new(32, 20), BlurParams { sigma: 0.0 }).unwrap();
        let once = blur.apply(&img).unwrap();
        let twice = blur.apply(&once).unwrap();
        assert_eq!(once, img);
        assert_eq!(twice, img);
    }

    #[test]
    fn constant_image_keeps_edges_bright() {
        // Replicated edges mean a flat image stays flat, borders included.
        let img = GrayImage::from_pixel(24, 16, image::Luma([180]));
        let mut blur =
            BlurFilter::configure(&arena(), Size::new(24, 16), BlurParams { sigma: 2.0 }).unwrap();
        let out = blur.apply(&img).unwrap();
        let corner = out.get_pixel(0, 0)[0];
        assert!(corner >= 178, "corner darkened to {}", corner);
        assert!(out.pixels().all(|p| p[0] == corner));
    }

    #[test]
    fn step_edge_is_softened_and_deterministic() {
        let img = GrayImage::from_fn(20, 4, |x, _| image::Luma([if x < 10 { 0 } else { 200 }]));
        let mut blur =
            BlurFilter::configure(&arena(), Size::new(20, 4), BlurParams { sigma: 1.0 }).unwrap();
        let a = blur.apply(&img).unwrap();
        let b = blur.apply(&img).unwrap();
        assert_eq!(a, b);
        let left = a.get_pixel(9, 0)[0];
        let right = a.get_pixel(10, 0)[0];
        assert!(left > 0 && left < 100, "left of edge: {}", left);
        assert!(right > 100 && right < 200, "right of edge: {}", right);
    }

    #[test]
    fn blurred_frames_stay_inside_the_budget() {
        let arena = TextureArena::new(40 * 30);
        let mut blur = BlurFilter::configure(&arena, Size::new(40, 30), BlurParams { sigma: 1.0 }).unwrap();
        assert_eq!(arena.bytes_in_use(), 40 * 30);
        let out = blur.apply(&GrayImage::from_pixel(40, 30, image::Luma([90]))).unwrap();
        assert_eq!(out.dimensions(), (40, 30));
        assert!(BlurFilter::configure(&arena, Size::new(40, 30), BlurParams { sigma: 1.0 }).is_err());
        drop(blur);
        assert_eq!(arena.bytes_in_use(), 0);
    }

    #[test]
    fn wrong_size_input_is_rejected() {
        let mut blur =
            BlurFilter::configure(&arena(), Size::new(10, 10), BlurParams { sigma: 1.0 }).unwrap();
        let err = blur.apply(&GrayImage::new(11, 10)).unwrap_err();
        assert!(matches!(err, FrameError::DimensionMismatch { .. }));
    }
}
