mod common;

use cardscan::config::LayoutConfig;
use cardscan::{CardNetwork, PixelFormat, ScanStatus};
use common::*;

fn run_until_complete(session: &mut ScanSession, frames: &[Frame]) -> Option<cardscan::ScanReport> {
    for frame in frames {
        match session.process_frame(frame) {
            Ok(ScanStatus::Complete(report)) => return Some(report),
            Ok(ScanStatus::Scanning(_)) => {}
            Err(e) => panic!("unexpected session error: {}", e),
        }
    }
    None
}

#[test]
fn clean_card_is_read_within_thirty_frames() -> anyhow::Result<()> {
    let config = ScanConfig::default();
    let frames = clean_frames(&config, 30);
    let mut session = fixed_session(config, card_quad());

    let report = run_until_complete(&mut session, &frames).expect("card should be read");
    let card = &report.card;
    assert_eq!(card.numbers(), "4111111111111111");
    assert_eq!(card.expiry_month(), 9);
    assert_eq!(card.expiry_year(), 27);
    assert_eq!(card.x_offsets().len(), 16);
    assert!(!card.is_flipped());
    assert!(card.is_luhn_valid());
    assert_eq!(card.network(), CardNetwork::Visa);
    assert_eq!(report.session_id, session.id());
    assert!(report.frames_processed <= 30);

    let json = serde_json::to_value(&report)?;
    assert_eq!(json["session_id"], session.id().to_string());
    assert_eq!(json["card"]["numbers"], "4111111111111111");
    assert_eq!(json["card"]["expiry_month"], 9);
    let stamp = json["completed_at"].as_str().expect("completed_at is a string");
    assert!(stamp.ends_with('Z'), "not an RFC 3339 UTC stamp: {}", stamp);

    assert_eq!(session.state(), SessionState::Complete);
    assert!(session.accumulator().is_none());
    assert_eq!(session.pipeline().arena().bytes_in_use(), 0);
    assert!(matches!(session.process_frame(&frames[0]), Err(ScanError::SessionEnded)));
    Ok(())
}

#[test]
fn undersized_quadrilateral_never_finalizes() -> anyhow::Result<()> {
    let config = ScanConfig::default();
    let frames = clean_frames(&config, 30);
    let mut session = fixed_session(config, Quadrilateral::from_rect(300.0, 200.0, 40.0, 25.0));

    for frame in &frames {
        match session.process_frame(frame)? {
            ScanStatus::Scanning(progress) => {
                assert_eq!(progress.slots_detected, 0);
                assert_eq!(progress.stability, 0.0);
                assert_eq!(progress.frames_processed, 0);
            }
            ScanStatus::Complete(_) => panic!("finalized from a degenerate quadrilateral"),
        }
    }

    let stats = session.stats();
    assert_eq!(stats.invalid_geometry, 30);
    assert_eq!(stats.frames_received, 30);
    assert_eq!(stats.frames_processed, 0);
    assert_eq!(session.state(), SessionState::Active);
    assert!(session.accumulator().is_some_and(|a| a.is_empty()));
    Ok(())
}

#[test]
fn cancelled_session_discards_its_votes() -> anyhow::Result<()> {
    let mut config = ScanConfig::default();
    // Never finalize inside the first five frames.
    config.aggregator.min_frames = 10;
    let frames = clean_frames(&config, 30);

    let mut session = fixed_session(config.clone(), card_quad());
    let token = session.cancel_token();
    for frame in &frames[..5] {
        assert!(matches!(session.process_frame(frame)?, ScanStatus::Scanning(_)));
    }
    assert_eq!(session.accumulator().map(|a| a.frames_recorded()), Some(5));

    token.cancel();
    assert!(matches!(session.process_frame(&frames[5]), Err(ScanError::Cancelled)));
    assert_eq!(session.state(), SessionState::Cancelled);
    assert!(session.accumulator().is_none());
    assert_eq!(session.pipeline().arena().bytes_in_use(), 0);
    assert!(matches!(session.process_frame(&frames[6]), Err(ScanError::SessionEnded)));

    // A new session starts from empty histograms and needs its own ten frames.
    let mut next = fixed_session(config, card_quad());
    assert!(next.accumulator().is_some_and(|a| a.is_empty()));
    assert_ne!(next.id(), session.id());
    let report = run_until_complete(&mut next, &frames).expect("second session should finalize");
    assert!(report.frames_processed >= 10);
    assert_eq!(report.card.numbers(), "4111111111111111");
    Ok(())
}

#[test]
fn upside_down_card_is_flagged() -> anyhow::Result<()> {
    let config = ScanConfig::default();
    let card = test_card(&config).flipped(true);
    let quad = card_quad();
    let frames: Vec<Frame> = (0..10).map(|seq| render_frame(&card, &quad, seq)).collect();
    let mut session = fixed_session(config, quad);

    let report = run_until_complete(&mut session, &frames).expect("flipped card should be read");
    assert_eq!(report.card.numbers(), "4111111111111111");
    assert_eq!((report.card.expiry_month(), report.card.expiry_year()), (9, 27));
    assert!(report.card.is_flipped());
    Ok(())
}

#[test]
fn amex_layout_reads_fifteen_digits() -> anyhow::Result<()> {
    let config = ScanConfig {
        layout: LayoutConfig::amex(),
        ..ScanConfig::default()
    };
    let card = SyntheticCard::new("378282246310005", &config).with_expiry(11, 29);
    let quad = card_quad();
    let frames: Vec<Frame> = (0..10).map(|seq| render_frame(&card, &quad, seq)).collect();
    let mut session = fixed_session(config, quad);

    let report = run_until_complete(&mut session, &frames).expect("amex card should be read");
    assert_eq!(report.card.numbers(), "378282246310005");
    assert_eq!(report.card.network(), CardNetwork::Amex);
    assert_eq!((report.card.expiry_month(), report.card.expiry_year()), (11, 29));
    Ok(())
}

#[test]
fn guided_locator_finds_card_corners() -> anyhow::Result<()> {
    let config = ScanConfig::default();
    let frames = clean_frames(&config, 1);
    let locator = CardLocator::guided(&config);

    let found = locator.locate(&frames[0])?;
    for (got, want) in found.corners().iter().zip(card_quad().corners()) {
        assert!(
            (got.x - want.x).abs() < 2.0 && (got.y - want.y).abs() < 2.0,
            "corner {:?} too far from {:?}",
            got,
            want
        );
    }
    Ok(())
}

#[test]
fn guided_session_reads_card() -> anyhow::Result<()> {
    let config = ScanConfig::default();
    let frames = clean_frames(&config, 15);
    let mut session = ScanSession::new(config)?;

    let report = run_until_complete(&mut session, &frames).expect("card should be read");
    assert_eq!(report.card.numbers(), "4111111111111111");
    Ok(())
}

#[test]
fn frame_without_card_is_absorbed() -> anyhow::Result<()> {
    let mut session = ScanSession::new(ScanConfig::default())?;
    let blank = Frame::from_luma(&flat_image(640, 480, 90), 0);
    assert!(matches!(session.process_frame(&blank)?, ScanStatus::Scanning(_)));
    assert_eq!(session.stats().card_not_found, 1);

    let rgb = Frame::new(4, 4, 12, PixelFormat::Rgb8, 1, vec![0; 48])?;
    assert!(matches!(session.process_frame(&rgb)?, ScanStatus::Scanning(_)));
    assert_eq!(session.stats().unsupported_format, 1);
    assert_eq!(session.stats().frames_failed(), 2);
    Ok(())
}

#[test]
fn frame_limit_times_out() -> anyhow::Result<()> {
    let mut config = ScanConfig::default();
    config.session.max_frames = Some(4);
    let blank = Frame::from_luma(&flat_image(640, 480, 90), 0);
    let mut session = fixed_session(config, card_quad());

    for _ in 0..3 {
        assert!(session.process_frame(&blank).is_ok());
    }
    assert_eq!(session.process_frame(&blank).unwrap_err(), ScanError::TimedOut { frames: 4 });
    assert_eq!(session.state(), SessionState::TimedOut);
    Ok(())
}

#[test]
fn elapsed_timeout_ends_session_on_poll() -> anyhow::Result<()> {
    let mut config = ScanConfig::default();
    config.session.timeout_secs = Some(0.0);
    let mut session = fixed_session(config, card_quad());

    assert!(matches!(session.poll(), Err(ScanError::TimedOut { frames: 0 })));
    assert_eq!(session.state(), SessionState::TimedOut);
    assert_eq!(session.poll(), Err(ScanError::SessionEnded));
    Ok(())
}

#[test]
fn repeated_allocation_failure_ends_session() -> anyhow::Result<()> {
    let mut config = ScanConfig::default();
    config.device.memory_budget_bytes = 1024;
    config.session.resource_retry_budget = 2;
    let frames = clean_frames(&config, 5);
    let mut session = fixed_session(config, card_quad());

    for frame in &frames[..2] {
        assert!(matches!(session.process_frame(frame)?, ScanStatus::Scanning(_)));
    }
    assert_eq!(
        session.process_frame(&frames[2]).unwrap_err(),
        ScanError::ResourceExhausted { attempts: 3 }
    );
    assert_eq!(session.state(), SessionState::Failed);
    assert_eq!(session.stats().resource_exhausted, 3);
    Ok(())
}

#[test]
fn invalid_config_is_rejected() {
    let mut config = ScanConfig::default();
    config.aggregator.confidence_threshold = 1.5;
    assert!(matches!(
        ScanSession::new(config),
        Err(cardscan::ConfigError::Invalid(_))
    ));
}
