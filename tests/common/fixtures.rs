#![allow(dead_code)]

use cardscan::synth::centered_quad;
use cardscan::{CardLocator, Frame, FramePipeline, Quadrilateral, ScanConfig, ScanSession, SyntheticCard};
use image::GrayImage;

pub const FRAME_WIDTH: u32 = 640;
pub const FRAME_HEIGHT: u32 = 480;
pub const BACKGROUND: u8 = 40;

pub const TEST_NUMBER: &str = "4111111111111111";
pub const TEST_MONTH: u32 = 9;
pub const TEST_YEAR: u32 = 27;

/// Card quadrilateral centred in a 640x480 frame.
pub fn card_quad() -> Quadrilateral {
    centered_quad(FRAME_WIDTH, FRAME_HEIGHT, 428.0 / 270.0, 0.78)
}

/// The standard test card: "4111111111111111", expiry 09/27.
pub fn test_card(config: &ScanConfig) -> SyntheticCard {
    SyntheticCard::new(TEST_NUMBER, config).with_expiry(TEST_MONTH, TEST_YEAR)
}

/// Renders `card` at `quad` with light sensor noise that varies per frame.
pub fn render_frame(card: &SyntheticCard, quad: &Quadrilateral, sequence: u64) -> Frame {
    let image = card
        .render_noisy_frame(FRAME_WIDTH, FRAME_HEIGHT, quad, BACKGROUND, 6, sequence)
        .expect("Failed to render synthetic frame");
    Frame::from_luma(&image, sequence)
}

/// `count` consecutive frames of the standard card at the standard placement.
pub fn clean_frames(config: &ScanConfig, count: u64) -> Vec<Frame> {
    let card = test_card(config);
    let quad = card_quad();
    (0..count).map(|seq| render_frame(&card, &quad, seq)).collect()
}

/// Session that trusts `quad` as the card position.
pub fn fixed_session(config: ScanConfig, quad: Quadrilateral) -> ScanSession {
    let pipeline = FramePipeline::new(&config);
    ScanSession::with_parts(config, pipeline, CardLocator::Fixed(quad)).expect("Failed to create session")
}

/// Uniform grey image, handy for filter tests.
pub fn flat_image(width: u32, height: u32, value: u8) -> GrayImage {
    GrayImage::from_pixel(width, height, image::Luma([value]))
}
