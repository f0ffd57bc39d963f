//! Plane homographies between the canonical card rectangle and a frame.

use image::GrayImage;
use nalgebra::{DMatrix, Matrix3, Vector3};

use crate::error::FrameError;
use crate::models::{Point, Quadrilateral};

/// Project a point through H: H * [x, y, 1]^T → [u, v].
pub fn project(h: &Matrix3<f64>, x: f64, y: f64) -> Point {
    let p = h * Vector3::new(x, y, 1.0);
    if p[2].abs() < 1e-15 {
        return Point::new(f64::NAN, f64::NAN);
    }
    Point::new(p[0] / p[2], p[1] / p[2])
}

/// Translate the centroid to the origin and scale to mean distance sqrt(2).
fn normalize_points(pts: &[Point; 4]) -> (Matrix3<f64>, [Point; 4]) {
    let cx = pts.iter().map(|p| p.x).sum::<f64>() / 4.0;
    let cy = pts.iter().map(|p| p.y).sum::<f64>() / 4.0;
    let mean_dist = pts.iter().map(|p| (p.x - cx).hypot(p.y - cy)).sum::<f64>() / 4.0;

    let s = if mean_dist > 1e-15 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };
    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let normalized = pts.map(|p| Point::new(s * (p.x - cx), s * (p.y - cy)));
    (t, normalized)
}

/// Homography H with dst ≈ project(H, src) from four correspondences (DLT
/// with Hartley normalization).
pub fn estimate(src: &[Point; 4], dst: &[Point; 4]) -> Result<Matrix3<f64>, FrameError> {
    let (t_src, src_n) = normalize_points(src);
    let (t_dst, dst_n) = normalize_points(dst);

    let mut a = DMatrix::zeros(8, 9);
    for i in 0..4 {
        let (sx, sy) = (src_n[i].x, src_n[i].y);
        let (dx, dy) = (dst_n[i].x, dst_n[i].y);

        a[(2 * i, 3)] = -sx;
        a[(2 * i, 4)] = -sy;
        a[(2 * i, 5)] = -1.0;
        a[(2 * i, 6)] = dy * sx;
        a[(2 * i, 7)] = dy * sy;
        a[(2 * i, 8)] = dy;

        a[(2 * i + 1, 0)] = sx;
        a[(2 * i + 1, 1)] = sy;
        a[(2 * i + 1, 2)] = 1.0;
        a[(2 * i + 1, 6)] = -dx * sx;
        a[(2 * i + 1, 7)] = -dx * sy;
        a[(2 * i + 1, 8)] = -dx;
    }

    // Null vector of A is the eigenvector of A^T A with the smallest eigenvalue.
    let ata = a.transpose() * &a;
    let eig = nalgebra::SymmetricEigen::new(ata);
    let mut min_idx = 0;
    for i in 1..9 {
        if eig.eigenvalues[i].abs() < eig.eigenvalues[min_idx].abs() {
            min_idx = i;
        }
    }
    let h = |j: usize| eig.eigenvectors[(j, min_idx)];
    let h_norm = Matrix3::new(h(0), h(1), h(2), h(3), h(4), h(5), h(6), h(7), h(8));

    let t_dst_inv = t_dst
        .try_inverse()
        .ok_or_else(|| FrameError::geometry("normalizing transform not invertible"))?;
    let h = t_dst_inv * h_norm * t_src;

    let scale = h[(2, 2)];
    if scale.abs() < 1e-12 || !h.iter().all(|v| v.is_finite()) {
        return Err(FrameError::geometry("homography is singular"));
    }
    Ok(h / scale)
}

/// Homography taking canonical coordinates (0..width, 0..height) onto `quad`.
pub fn canonical_to_quad(width: u32, height: u32, quad: &Quadrilateral) -> Result<Matrix3<f64>, FrameError> {
    let rect = Quadrilateral::from_rect(0.0, 0.0, width as f64, height as f64);
    estimate(rect.corners(), quad.corners())
}

/// Inverse-map every destination pixel centre through `h` (destination →
/// source) and sample the source bilinearly into the row-major `dst` plane.
/// Pixels landing outside the source get `border`.
pub fn warp_into(src: &GrayImage, h: &Matrix3<f64>, border: u8, dst: &mut [u8], dst_width: u32) {
    let (sw, sh) = (src.width() as f64, src.height() as f64);

    for (i, out) in dst.iter_mut().enumerate() {
        let x = (i % dst_width as usize) as f64;
        let y = (i / dst_width as usize) as f64;
        let p = project(h, x + 0.5, y + 0.5);
        *out = if p.x.is_nan() || p.x < 0.0 || p.y < 0.0 || p.x > sw || p.y > sh {
            border
        } else {
            sample_bilinear(src, p.x - 0.5, p.y - 0.5)
        };
    }
}

/// Bilinear sample at pixel-index coordinates, clamped to the image.
pub fn sample_bilinear(img: &GrayImage, x: f64, y: f64) -> u8 {
    let max_x = (img.width() - 1) as f64;
    let max_y = (img.height() - 1) as f64;
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(img.width() - 1);
    let y1 = (y0 + 1).min(img.height() - 1);
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let p = |px: u32, py: u32| img.get_pixel(px, py)[0] as f64;
    let top = p(x0, y0) * (1.0 - fx) + p(x1, y0) * fx;
    let bottom = p(x0, y1) * (1.0 - fx) + p(x1, y1) * fx;
    (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn skewed_quad() -> Quadrilateral {
        Quadrilateral::new(
            Point::new(112.0, 86.0),
            Point::new(530.0, 101.0),
            Point::new(548.0, 371.0),
            Point::new(95.0, 392.0),
        )
    }

    #[test]
    fn canonical_corners_map_onto_quad_corners() {
        let quad = skewed_quad();
        let h = canonical_to_quad(428, 270, &quad).unwrap();
        let rect = Quadrilateral::from_rect(0.0, 0.0, 428.0, 270.0);

        for (c, q) in rect.corners().iter().zip(quad.corners()) {
            let p = project(&h, c.x, c.y);
            assert_relative_eq!(p.x, q.x, epsilon = 1e-6);
            assert_relative_eq!(p.y, q.y, epsilon = 1e-6);
        }
    }

    #[test]
    fn inverse_round_trips() {
        let h = canonical_to_quad(428, 270, &skewed_quad()).unwrap();
        let h_inv = h.try_inverse().unwrap();
        let q = project(&h, 200.0, 120.0);
        let back = project(&h_inv, q.x, q.y);
        assert_relative_eq!(back.x, 200.0, epsilon = 1e-8);
        assert_relative_eq!(back.y, 120.0, epsilon = 1e-8);
    }

    #[test]
    fn identity_warp_preserves_pixels() {
        let src = GrayImage::from_fn(16, 9, |x, y| image::Luma([(x * 13 + y * 7) as u8]));
        let mut dst = vec![0u8; 16 * 9];
        warp_into(&src, &Matrix3::identity(), 0, &mut dst, 16);
        assert_eq!(src.as_raw(), &dst);
    }

    #[test]
    fn out_of_bounds_pixels_take_border() {
        let src = GrayImage::from_pixel(10, 10, image::Luma([200]));
        // Shift by 20 px: every destination pixel lands outside.
        let h = Matrix3::new(1.0, 0.0, 20.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0);
        let mut dst = vec![0u8; 100];
        warp_into(&src, &h, 7, &mut dst, 10);
        assert!(dst.iter().all(|&p| p == 7));
    }
}
