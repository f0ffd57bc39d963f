//! 5x7 bitmap digits approximating the embossed card typeface. The classifier
//! correlates against these; the synthetic renderer draws with them.

use image::{GrayImage, Luma};

pub const FONT_WIDTH: u32 = 5;
pub const FONT_HEIGHT: u32 = 7;

const DIGITS: [[&str; 7]; 10] = [
    [".###.", "#...#", "#..##", "#.#.#", "##..#", "#...#", ".###."],
    ["..#..", ".##..", "..#..", "..#..", "..#..", "..#..", ".###."],
    [".###.", "#...#", "....#", "...#.", "..#..", ".#...", "#####"],
    ["#####", "...#.", "..#..", "...#.", "....#", "#...#", ".###."],
    ["...#.", "..##.", ".#.#.", "#..#.", "#####", "...#.", "...#."],
    ["#####", "#....", "####.", "....#", "....#", "#...#", ".###."],
    ["..##.", ".#...", "#....", "####.", "#...#", "#...#", ".###."],
    ["#####", "....#", "...#.", "..#..", ".#...", ".#...", ".#..."],
    [".###.", "#...#", "#...#", ".###.", "#...#", "#...#", ".###."],
    [".###.", "#...#", "#...#", ".####", "....#", "...#.", ".##.."],
];

const SLASH: [&str; 7] = ["....#", "...#.", "...#.", "..#..", ".#...", ".#...", "#...."];

fn bitmap(ch: char) -> Option<&'static [&'static str; 7]> {
    match ch {
        '0'..='9' => Some(&DIGITS[ch as usize - '0' as usize]),
        '/' => Some(&SLASH),
        _ => None,
    }
}

/// Whether pixel (px, py) of a `width`x`height` cell showing `ch` is ink.
pub fn is_ink(ch: char, px: u32, py: u32, width: u32, height: u32) -> bool {
    let Some(rows) = bitmap(ch) else {
        return false;
    };
    let fx = (px * FONT_WIDTH / width).min(FONT_WIDTH - 1) as usize;
    let fy = (py * FONT_HEIGHT / height).min(FONT_HEIGHT - 1) as usize;
    rows[fy].as_bytes()[fx] == b'#'
}

/// Paint `ch` into the cell at (x, y). Pixels outside the image are skipped.
pub fn draw(image: &mut GrayImage, ch: char, x: u32, y: u32, width: u32, height: u32, ink: u8) {
    for py in 0..height {
        for px in 0..width {
            if is_ink(ch, px, py, width, height) && x + px < image.width() && y + py < image.height() {
                image.put_pixel(x + px, y + py, Luma([ink]));
            }
        }
    }
}

/// Zero-mean, unit-norm template of `digit` at the given cell size, row-major.
pub fn template(digit: u8, width: u32, height: u32) -> Vec<f32> {
    let ch = char::from(b'0' + digit);
    let mut t: Vec<f32> = (0..height)
        .flat_map(|py| (0..width).map(move |px| (px, py)))
        .map(|(px, py)| if is_ink(ch, px, py, width, height) { 1.0 } else { 0.0 })
        .collect();
    normalize(&mut t);
    t
}

/// Subtract the mean and scale to unit L2 norm. Returns false for flat input,
/// which is left all zero.
pub(crate) fn normalize(v: &mut [f32]) -> bool {
    if v.is_empty() {
        return false;
    }
    let mean = v.iter().sum::<f32>() / v.len() as f32;
    v.iter_mut().for_each(|x| *x -= mean);
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm < 1e-6 {
        v.iter_mut().for_each(|x| *x = 0.0);
        return false;
    }
    v.iter_mut().for_each(|x| *x /= norm);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_digit_template_is_distinct() {
        let templates: Vec<Vec<f32>> = (0..10).map(|d| template(d, 19, 27)).collect();
        for a in 0..10 {
            let self_corr: f32 = templates[a].iter().map(|x| x * x).sum();
            assert!((self_corr - 1.0).abs() < 1e-4);
            for b in (a + 1)..10 {
                let corr: f32 = templates[a].iter().zip(&templates[b]).map(|(x, y)| x * y).sum();
                assert!(corr < 0.9, "digits {} and {} correlate at {}", a, b, corr);
            }
        }
    }

    #[test]
    fn draw_matches_is_ink() {
        let mut img = GrayImage::from_pixel(12, 16, Luma([255]));
        draw(&mut img, '7', 1, 1, 10, 14, 0);
        // Top bar of a 7 is solid.
        assert_eq!(img.get_pixel(1, 1)[0], 0);
        assert_eq!(img.get_pixel(10, 1)[0], 0);
        // Bottom-left of the cell is paper.
        assert_eq!(img.get_pixel(1, 14)[0], 255);
    }
}
