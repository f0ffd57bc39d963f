mod common;

use approx::assert_relative_eq;
use cardscan::filters::{BlurFilter, BlurParams, Size, TextureArena};
use cardscan::homography::{canonical_to_quad, project};
use cardscan::{PipelineState, PixelFormat, Point, Submission};
use common::*;

#[test]
fn transform_maps_canonical_corners_onto_quad_corners() -> anyhow::Result<()> {
    let quads = [
        card_quad(),
        Quadrilateral::new(
            Point::new(102.3, 61.0),
            Point::new(530.8, 95.4),
            Point::new(512.2, 401.7),
            Point::new(88.9, 377.5),
        ),
        Quadrilateral::new(
            Point::new(20.0, 40.0),
            Point::new(600.0, 10.0),
            Point::new(630.0, 470.0),
            Point::new(5.0, 420.0),
        ),
    ];

    for quad in &quads {
        let h = canonical_to_quad(428, 270, quad)?;
        let canonical = [(0.0, 0.0), (428.0, 0.0), (428.0, 270.0), (0.0, 270.0)];
        for ((x, y), corner) in canonical.iter().zip(quad.corners()) {
            let p = project(&h, *x, *y);
            assert_relative_eq!(p.x, corner.x, epsilon = 1e-6);
            assert_relative_eq!(p.y, corner.y, epsilon = 1e-6);
        }
    }
    Ok(())
}

#[test]
fn zero_radius_blur_is_identity() -> anyhow::Result<()> {
    let arena = TextureArena::new(1 << 20);
    let input = image::GrayImage::from_fn(64, 40, |x, y| image::Luma([(x * 4 + y) as u8]));
    let mut blur = BlurFilter::configure(&arena, Size::new(64, 40), BlurParams { sigma: 0.0 })?;
    assert_eq!(blur.radius(), 0);
    let once = blur.apply(&input)?;
    assert_eq!(once, input);
    assert_eq!(blur.apply(&once)?, input);
    Ok(())
}

#[test]
fn frame_in_flight_causes_skip_not_queue() -> anyhow::Result<()> {
    let config = ScanConfig::default();
    let pipeline = FramePipeline::new(&config);
    let frames = clean_frames(&config, 2);
    let quad = card_quad();

    let permit = pipeline.try_reserve().expect("pipeline should be free");
    assert_eq!(pipeline.state(), PipelineState::Processing);
    assert!(pipeline.try_reserve().is_none());
    assert!(matches!(pipeline.submit_frame(&frames[1], &quad)?, Submission::Skipped));

    // The reserved frame still goes through once its holder runs it.
    let corrected = pipeline.process_reserved(&permit, &frames[0], &quad)?;
    assert_eq!(corrected.sequence, 0);
    assert_eq!(corrected.image.dimensions(), (428, 270));
    drop(permit);

    assert_eq!(pipeline.state(), PipelineState::Ready);
    match pipeline.submit_frame(&frames[1], &quad)? {
        Submission::Corrected(c) => assert_eq!(c.sequence, 1),
        Submission::Skipped => panic!("free pipeline skipped a frame"),
    }
    Ok(())
}

#[test]
fn teardown_returns_every_texture() -> anyhow::Result<()> {
    let config = ScanConfig::default();
    let pipeline = FramePipeline::new(&config);
    assert_eq!(pipeline.state(), PipelineState::Idle);
    assert_eq!(pipeline.arena().bytes_in_use(), 0);

    let frames = clean_frames(&config, 1);
    pipeline.submit_frame(&frames[0], &card_quad())?;
    assert!(pipeline.arena().bytes_in_use() > 0);

    pipeline.teardown();
    assert_eq!(pipeline.state(), PipelineState::Idle);
    assert_eq!(pipeline.arena().bytes_in_use(), 0);
    Ok(())
}

#[test]
fn new_frame_size_reconfigures_chain() -> anyhow::Result<()> {
    let config = ScanConfig::default();
    let pipeline = FramePipeline::new(&config);
    let quad = Quadrilateral::from_rect(10.0, 10.0, 280.0, 180.0);

    pipeline.submit_frame(&Frame::from_luma(&flat_image(320, 240, 90), 0), &quad)?;
    let in_use = pipeline.arena().bytes_in_use();
    pipeline.submit_frame(&Frame::from_luma(&flat_image(300, 200, 90), 1), &quad)?;
    // Texture sizes depend only on the canonical rectangle.
    assert_eq!(pipeline.arena().bytes_in_use(), in_use);
    Ok(())
}

#[test]
fn exhausted_budget_fails_only_the_frame() -> anyhow::Result<()> {
    let mut config = ScanConfig::default();
    config.device.memory_budget_bytes = 200_000;
    let pipeline = FramePipeline::new(&config);
    let frames = clean_frames(&config, 2);

    for frame in &frames {
        let err = pipeline.submit_frame(frame, &card_quad()).unwrap_err();
        assert!(matches!(err, FrameError::ResourceExhausted { budget: 200_000, .. }));
        assert_eq!(pipeline.state(), PipelineState::Idle);
    }
    assert_eq!(pipeline.arena().bytes_in_use(), 0);
    Ok(())
}

#[test]
fn colour_frames_must_be_converted_first() -> anyhow::Result<()> {
    let pipeline = FramePipeline::new(&ScanConfig::default());
    let rgb = Frame::new(320, 240, 320 * 3, PixelFormat::Rgb8, 0, vec![128; 320 * 240 * 3])?;
    let quad = Quadrilateral::from_rect(10.0, 10.0, 280.0, 180.0);

    let err = pipeline.submit_frame(&rgb, &quad).unwrap_err();
    assert_eq!(err, FrameError::UnsupportedPixelFormat(PixelFormat::Rgb8));

    let luma = rgb.into_luma();
    assert!(matches!(pipeline.submit_frame(&luma, &quad)?, Submission::Corrected(_)));
    Ok(())
}

#[test]
fn debug_output_writes_every_stage() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let config = ScanConfig::default();
    let pipeline = FramePipeline::new(&config).with_debug(dir.path().to_path_buf())?;
    assert_eq!(pipeline.debug_config().map(|d| d.output_dir.as_path()), Some(dir.path()));
    assert!(FramePipeline::new(&config).debug_config().is_none());
    let frames = clean_frames(&config, 1);
    pipeline.submit_frame(&frames[0], &card_quad())?;

    for step in ["00_input", "01_transform", "02_blur"] {
        assert!(dir.path().join(step).join("000000.png").exists(), "missing {}", step);
    }

    // A used directory is refused.
    assert!(FramePipeline::new(&config).with_debug(dir.path().to_path_buf()).is_err());
    Ok(())
}
