use arena_tracker::core_modules::segmenter::Polarity;
use arena_tracker::io::MemoryBackgroundStore;
use arena_tracker::{
    Frame, FrameOutcome, OperatingMode, TrackerConfig, TrackingSession, run_command,
};
use image::{GrayImage, Luma};
use std::sync::Arc;

const SIZE: u32 = 256;
const SQUARE: (u32, u32, u32) = (100, 60, 20);

fn blank(index: u64) -> Frame {
    Frame::new(GrayImage::new(SIZE, SIZE), index, index as f64 / 25.0)
}

fn with_square(index: u64) -> Frame {
    let (x0, y0, side) = SQUARE;
    let mut image = GrayImage::new(SIZE, SIZE);
    for y in y0..y0 + side {
        for x in x0..x0 + side {
            image.put_pixel(x, y, Luma([200]));
        }
    }
    Frame::new(image, index, index as f64 / 25.0)
}

fn estimating_config() -> TrackerConfig {
    let mut config = TrackerConfig::default();
    config.mode = OperatingMode::EstimateBackground;
    config.background.num_bins = 256;
    config.background.bin_size = 1;
    config.background.frames_skip = 0;
    config.background.sample_budget = 5;
    config.background.threshold = 50;
    config.background.polarity = Polarity::Brighter;
    config
}

#[test]
fn estimate_then_track_a_bright_square() {
    let store = Arc::new(MemoryBackgroundStore::default());
    let session = TrackingSession::new(estimating_config())
        .unwrap()
        .with_background_store(store.clone());

    for index in 0..5 {
        let outcome = session.process_frame(&blank(index)).unwrap();
        if index == 4 {
            assert_eq!(outcome, FrameOutcome::BackgroundFinalized { samples: 5 });
        }
    }
    let median = session.background_median().unwrap();
    assert!(median.as_raw().iter().all(|&v| v == 0));
    assert_eq!(store.get(), Some(median));
    assert_eq!(session.mode(), OperatingMode::Track);

    let outcome = session.process_frame(&with_square(5)).unwrap();
    let FrameOutcome::Tracked(report) = outcome else {
        panic!("expected a tracked frame, got {outcome:?}");
    };

    // Mask is exactly the square.
    let (x0, y0, side) = SQUARE;
    let mask = session.snapshot().mask.unwrap();
    assert_eq!(mask.count_foreground(), (side * side) as usize);
    for y in 0..SIZE {
        for x in 0..SIZE {
            let inside = (x0..x0 + side).contains(&x) && (y0..y0 + side).contains(&y);
            assert_eq!(mask.is_foreground(x, y), inside, "pixel ({x}, {y})");
        }
    }

    // Centre at the centroid, axes from the analytic second moments.
    let ellipse = report.ellipse.unwrap();
    assert!((ellipse.x - (x0 as f64 + 9.5)).abs() <= 0.5);
    assert!((ellipse.y - (y0 as f64 + 9.5)).abs() <= 0.5);
    let variance = ((side * side - 1) as f64) / 12.0;
    assert!((ellipse.a - 2.0 * variance.sqrt()).abs() < 1e-6);
    assert!((ellipse.b - 2.0 * variance.sqrt()).abs() < 1e-6);
    assert!(ellipse.theta > -std::f64::consts::PI && ellipse.theta <= std::f64::consts::PI);

    let status = run_command(&session, r#"{"cmd":"get-last-clear"}"#);
    assert!(status.success);
    assert_eq!(status.value.unwrap()["frame"], 5);
}

#[test]
fn saved_background_is_reused_by_a_new_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("background.png");
    let store = Arc::new(arena_tracker::io::PngBackgroundStore::new(&path));

    let estimator = TrackingSession::new(estimating_config())
        .unwrap()
        .with_background_store(store.clone());
    for index in 0..5 {
        estimator.process_frame(&blank(index)).unwrap();
    }
    assert!(path.exists());

    let mut config = estimating_config();
    config.mode = OperatingMode::Track;
    let tracker = TrackingSession::new(config)
        .unwrap()
        .with_background_store(store);
    let outcome = tracker.process_frame(&with_square(0)).unwrap();
    assert!(matches!(outcome, FrameOutcome::Tracked(r) if r.ellipse.is_some()));
}
