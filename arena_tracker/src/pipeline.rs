// THEORY:
// The `pipeline` module is the top-level API of the tracking engine. It wraps every
// per-frame stage into one "processing session" object, the `TrackingSession`, and
// gives hosts a small, thread-safe surface: push frames in, pop tracks out, query
// trigger state, reconfigure on the fly.
//
// Key architectural principles:
// 1.  **One lock per frame**: All state a frame touches (background model, ROI
//     mask, heading histories, last mask and ellipse) lives in `SessionState` behind
//     a single mutex. It is taken once at the start of a frame and released on every
//     exit path, so readers such as a renderer always see a consistent snapshot.
// 2.  **Independent track queue**: Finished ellipses go to an `Arc<TrackBuffer>`
//     with its own lock. Consumers popping tracks never wait for a frame.
// 3.  **Two exclusive modes**: A session either estimates the background or tracks,
//     never both. Finishing an estimate installs the new median and hands over to
//     tracking.
// 4.  **Nothing is fatal**: Every failure comes back as a `TrackerError` and leaves
//     the session ready for the next frame. Persistence failures are only logged.

use crate::config::{BackgroundConfig, OperatingMode, TrackerConfig};
use crate::core_modules::background_histogram::BackgroundHistogram;
use crate::core_modules::background_model::BackgroundModel;
use crate::core_modules::blob_detector::blob_detector;
use crate::core_modules::ellipse_fitter::{EllipseParams, fit_ellipse};
use crate::core_modules::frame::{ForegroundMask, Frame};
use crate::core_modules::heading_resolver::HeadingResolver;
use crate::core_modules::region_trigger::{RegionReport, RegionTriggerDetector, TriggerEvent};
use crate::core_modules::segmenter::{absolute_difference, segment};
use crate::core_modules::track_buffer::TrackBuffer;
use crate::error::{Result, TrackerError};
use crate::io::{BackgroundStore, DebugSink};
use image::GrayImage;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const TRIGGER_CHANNEL_CAPACITY: usize = 16;

/// What happened to one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// The frame was added to the background histogram.
    BackgroundSampled { samples: u32, budget: u32 },
    /// The frame fell between two background samples.
    BackgroundSkipped,
    /// The sample budget was reached. The session now tracks.
    BackgroundFinalized { samples: u32 },
    Tracked(FrameReport),
}

/// Per-frame result of tracking mode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameReport {
    pub frame: u64,
    pub timestamp: f64,
    /// `None` when the mask held no blob.
    pub ellipse: Option<EllipseParams>,
    pub foreground_pixels: usize,
    pub regions: Option<RegionReport>,
}

/// Consistent copy of the transient results, for renderers.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub mode: OperatingMode,
    pub frame: Option<u64>,
    pub mask: Option<ForegroundMask>,
    pub ellipse: Option<EllipseParams>,
    pub head_point: Option<(f64, f64)>,
    pub background_ready: bool,
    pub frames_processed: u64,
}

/// What `stop` flushed.
#[derive(Debug, Clone, PartialEq)]
pub struct StopSummary {
    pub background_finalized: bool,
    pub tracks: Vec<EllipseParams>,
}

struct BackgroundEstimation {
    histogram: BackgroundHistogram,
    last_sampled: Option<u64>,
    samples: u32,
}

impl BackgroundEstimation {
    fn new(config: &BackgroundConfig) -> Result<Self> {
        Ok(Self {
            histogram: BackgroundHistogram::new(config.num_bins, config.bin_size)?,
            last_sampled: None,
            samples: 0,
        })
    }
}

struct SessionState {
    config: TrackerConfig,
    model: Option<BackgroundModel>,
    estimator: Option<BackgroundEstimation>,
    roi_mask: Option<ForegroundMask>,
    /// Frame size `roi_mask` was rasterised for.
    roi_size: Option<(u32, u32)>,
    resolver: HeadingResolver,
    regions: RegionTriggerDetector,
    last_mask: Option<ForegroundMask>,
    last_ellipse: Option<EllipseParams>,
    last_frame: Option<u64>,
    debug_pending: bool,
    frames_processed: u64,
}

impl SessionState {
    fn new(config: TrackerConfig) -> Result<Self> {
        let estimator = match config.mode {
            OperatingMode::EstimateBackground => Some(BackgroundEstimation::new(&config.background)?),
            OperatingMode::Track => None,
        };
        Ok(Self {
            resolver: HeadingResolver::new(config.heading.clone(), config.max_track_queue_length),
            regions: RegionTriggerDetector::new(config.regions.clone()),
            model: None,
            estimator,
            roi_mask: None,
            roi_size: None,
            last_mask: None,
            last_ellipse: None,
            last_frame: None,
            debug_pending: true,
            frames_processed: 0,
            config,
        })
    }

    fn reset_tracking(&mut self) {
        self.resolver.reset();
        self.last_mask = None;
        self.last_ellipse = None;
        self.debug_pending = true;
    }
}

/// The lock-guarded processing session.
pub struct TrackingSession {
    state: Mutex<SessionState>,
    tracks: Arc<TrackBuffer>,
    triggers: broadcast::Sender<TriggerEvent>,
    background_store: Option<Arc<dyn BackgroundStore>>,
    debug_sink: Option<Arc<dyn DebugSink>>,
}

impl TrackingSession {
    pub fn new(config: TrackerConfig) -> Result<Self> {
        config.validate()?;
        let tracks = Arc::new(TrackBuffer::new(config.max_track_queue_length));
        let (triggers, _) = broadcast::channel(TRIGGER_CHANNEL_CAPACITY);
        info!(mode = ?config.mode, "tracking session created");
        Ok(Self {
            state: Mutex::new(SessionState::new(config)?),
            tracks,
            triggers,
            background_store: None,
            debug_sink: None,
        })
    }

    pub fn with_background_store(mut self, store: Arc<dyn BackgroundStore>) -> Self {
        self.background_store = Some(store);
        self
    }

    pub fn with_debug_sink(mut self, sink: Arc<dyn DebugSink>) -> Self {
        self.debug_sink = Some(sink);
        self
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs one frame through the current mode. On error the frame is skipped and
    /// the session is left as it was.
    pub fn process_frame(&self, frame: &Frame) -> Result<FrameOutcome> {
        if frame.is_empty() {
            return Err(TrackerError::EmptyFrame(frame.index));
        }
        let mut state = self.lock();
        let result = match state.config.mode {
            OperatingMode::EstimateBackground => self.sample_background(&mut state, frame),
            OperatingMode::Track => self.track(&mut state, frame),
        };
        if let Err(err) = &result {
            warn!(frame = frame.index, error = %err, "frame skipped");
        }
        result
    }

    /// Processes only the newest frame of `frames`; the rest are dropped.
    pub fn process_batch(&self, frames: Vec<Frame>) -> Result<Option<FrameOutcome>> {
        let dropped = frames.len().saturating_sub(1);
        let Some(latest) = frames.into_iter().last() else {
            return Ok(None);
        };
        if dropped > 0 {
            debug!(dropped, frame = latest.index, "batch reduced to newest frame");
        }
        self.process_frame(&latest).map(Some)
    }

    fn sample_background(&self, state: &mut SessionState, frame: &Frame) -> Result<FrameOutcome> {
        if state.estimator.is_none() {
            state.estimator = Some(BackgroundEstimation::new(&state.config.background)?);
            info!("background estimation started");
        }
        let stride = state.config.background.frames_skip.saturating_add(1);
        let budget = state.config.background.sample_budget;
        let Some(estimation) = state.estimator.as_mut() else {
            return Err(TrackerError::WrongMode("estimate_background"));
        };

        if estimation
            .last_sampled
            .is_some_and(|last| frame.index < last.saturating_add(stride))
        {
            return Ok(FrameOutcome::BackgroundSkipped);
        }
        estimation.histogram.add_image(&frame.image)?;
        estimation.last_sampled = Some(frame.index);
        estimation.samples += 1;
        let samples = estimation.samples;
        debug!(frame = frame.index, samples, budget, "background sample added");

        if samples < budget {
            return Ok(FrameOutcome::BackgroundSampled { samples, budget });
        }
        self.finalize_background(state)?;
        state.config.mode = OperatingMode::Track;
        state.reset_tracking();
        info!("switching to tracking");
        Ok(FrameOutcome::BackgroundFinalized { samples })
    }

    /// Computes the median, installs it, persists it, and frees the histogram.
    fn finalize_background(&self, state: &mut SessionState) -> Result<u32> {
        let Some(estimation) = state.estimator.take() else {
            return Err(TrackerError::WrongMode("estimate_background"));
        };
        let samples = estimation.samples;
        let median = estimation.histogram.median_image()?;
        drop(estimation);

        match state.model.as_mut() {
            Some(model) => model.set_median(median)?,
            None => {
                state.model = Some(BackgroundModel::new(
                    median,
                    state.config.background.threshold,
                )?)
            }
        }

        if let Some(model) = state.model.as_ref() {
            if let Some(store) = &self.background_store {
                if let Err(err) = store.save(model.median()) {
                    warn!(error = %err, "failed to persist background image");
                }
            }
            if state.config.debug.enabled {
                self.offer_debug("lower_bound", model.lower_bound());
                self.offer_debug("upper_bound", model.upper_bound());
            }
        }
        info!(samples, "background estimate finalized");
        Ok(samples)
    }

    fn ensure_model(&self, state: &mut SessionState) -> Result<()> {
        if state.model.is_some() {
            return Ok(());
        }
        let Some(store) = &self.background_store else {
            return Err(TrackerError::BackgroundNotReady);
        };
        let median = store.load()?;
        state.model = Some(BackgroundModel::new(
            median,
            state.config.background.threshold,
        )?);
        info!("background image loaded");
        Ok(())
    }

    fn track(&self, state: &mut SessionState, frame: &Frame) -> Result<FrameOutcome> {
        self.ensure_model(state)?;
        let Some(model) = state.model.as_ref() else {
            return Err(TrackerError::BackgroundNotReady);
        };
        model.check_dimensions(&frame.image)?;

        // Stage 1: ROI mask, regenerated when the frame size or geometry changes.
        let (width, height) = frame.dimensions();
        if state.roi_size != Some((width, height)) {
            state.roi_mask = state.config.roi.rasterize(width, height)?;
            state.roi_size = Some((width, height));
        }

        // Stage 2: Segmentation
        let mask = segment(
            &frame.image,
            model,
            state.config.background.polarity,
            state.roi_mask.as_ref(),
        )?;

        // Stage 3: Region occupancy, evaluated before any history is touched.
        let regions = if state.config.regions.is_empty() {
            None
        } else {
            Some(state.regions.evaluate(&frame.image, &mask)?)
        };

        // The one-shot debug offer belongs to the first frame that gets this far.
        if state.debug_pending && state.config.debug.enabled {
            self.offer_debug("abs_diff", &absolute_difference(&frame.image, model)?);
            self.offer_debug("foreground", mask.as_image());
            if let Some(roi) = &state.roi_mask {
                self.offer_debug("roi", roi.as_image());
            }
        }
        state.debug_pending = false;

        // Stage 4: Largest blob and its ellipse
        let pixels = blob_detector::largest_component(&mask)
            .map(|blob| blob.pixels)
            .unwrap_or_default();
        let fitted = fit_ellipse(&pixels, frame.index);

        // Stage 5: Heading and track hand-off
        let ellipse = if pixels.is_empty() {
            state.resolver.skip_frame();
            None
        } else {
            let resolved = state.resolver.resolve(fitted);
            self.tracks.push(resolved);
            Some(resolved)
        };

        if let Some(report) = regions.as_ref().filter(|r| r.detect) {
            self.emit_trigger(frame, report);
        }

        let foreground_pixels = mask.count_foreground();
        state.last_mask = Some(mask);
        state.last_ellipse = ellipse;
        state.last_frame = Some(frame.index);
        state.frames_processed += 1;
        debug!(
            frame = frame.index,
            foreground_pixels,
            theta = ellipse.map(|e| e.theta),
            "frame tracked"
        );

        Ok(FrameOutcome::Tracked(FrameReport {
            frame: frame.index,
            timestamp: frame.timestamp,
            ellipse,
            foreground_pixels,
            regions,
        }))
    }

    fn emit_trigger(&self, frame: &Frame, report: &RegionReport) {
        let count = report
            .presence_count
            .unwrap_or_else(|| report.occupancy.iter().filter(|o| **o).count());
        let event = TriggerEvent {
            frame: frame.index,
            timestamp: frame.timestamp,
            count,
        };
        info!(frame = frame.index, count, "trigger event");
        if self.triggers.send(event).is_err() {
            debug!("trigger event has no subscribers");
        }
    }

    fn offer_debug(&self, name: &str, image: &GrayImage) {
        if let Some(sink) = &self.debug_sink {
            if let Err(err) = sink.offer(name, image) {
                warn!(name, error = %err, "debug image not written");
            }
        }
    }

    /// Applies a new configuration without restarting. Threshold changes rebuild the
    /// model bounds, ROI changes regenerate the mask on the next frame, and a mode
    /// change resets the track (finalizing a running estimate first).
    pub fn update_config(&self, config: TrackerConfig) -> Result<()> {
        config.validate()?;
        let mut state = self.lock();

        let mode_changed = config.mode != state.config.mode;
        let layout_changed = config.background.num_bins != state.config.background.num_bins
            || config.background.bin_size != state.config.background.bin_size;
        let fresh_estimator = if config.mode == OperatingMode::EstimateBackground
            && (mode_changed || layout_changed)
        {
            Some(BackgroundEstimation::new(&config.background)?)
        } else {
            None
        };

        let previous = std::mem::replace(&mut state.config, config.clone());

        if mode_changed {
            match config.mode {
                OperatingMode::EstimateBackground => state.estimator = fresh_estimator,
                OperatingMode::Track => {
                    if state.estimator.as_ref().is_some_and(|e| e.samples > 0) {
                        if let Err(err) = self.finalize_background(&mut state) {
                            warn!(error = %err, "background estimate discarded");
                        }
                    }
                    state.estimator = None;
                }
            }
            state.reset_tracking();
            info!(mode = ?config.mode, "operating mode changed");
        } else if fresh_estimator.is_some() {
            state.estimator = fresh_estimator;
            warn!("histogram layout changed, background estimation restarted");
        }

        if config.background.threshold != previous.background.threshold {
            if let Some(model) = state.model.as_mut() {
                model.set_threshold(config.background.threshold);
            }
        }
        if config.roi != previous.roi {
            state.roi_mask = None;
            state.roi_size = None;
        }
        if config.heading != previous.heading
            || config.max_track_queue_length != previous.max_track_queue_length
        {
            state
                .resolver
                .update_config(config.heading.clone(), config.max_track_queue_length);
        }
        if config.regions != previous.regions {
            state.regions.set_config(config.regions.clone());
        }
        self.tracks.set_capacity(config.max_track_queue_length);
        state.debug_pending = true;
        info!("configuration updated");
        Ok(())
    }

    pub fn set_mode(&self, mode: OperatingMode) -> Result<()> {
        let mut config = self.config();
        config.mode = mode;
        self.update_config(config)
    }

    /// Installs an externally provided median image.
    pub fn set_background(&self, median: GrayImage) -> Result<()> {
        let mut state = self.lock();
        match state.model.as_mut() {
            Some(model) => model.set_median(median)?,
            None => {
                state.model = Some(BackgroundModel::new(
                    median,
                    state.config.background.threshold,
                )?)
            }
        }
        state.debug_pending = true;
        Ok(())
    }

    /// Re-reads the median from the background store.
    pub fn reload_background(&self) -> Result<()> {
        let Some(store) = &self.background_store else {
            return Err(TrackerError::BackgroundNotReady);
        };
        let median = store.load()?;
        self.set_background(median)
    }

    /// Finalizes a running background estimate and flushes every buffered track.
    pub fn stop(&self) -> StopSummary {
        let mut state = self.lock();
        let background_finalized = if state.estimator.as_ref().is_some_and(|e| e.samples > 0) {
            match self.finalize_background(&mut state) {
                Ok(_) => true,
                Err(err) => {
                    warn!(error = %err, "background estimate lost on stop");
                    false
                }
            }
        } else {
            state.estimator = None;
            false
        };
        drop(state);

        let tracks = self.tracks.drain_all();
        info!(tracks = tracks.len(), background_finalized, "session stopped");
        StopSummary {
            background_finalized,
            tracks,
        }
    }

    pub fn tracks(&self) -> Arc<TrackBuffer> {
        Arc::clone(&self.tracks)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TriggerEvent> {
        self.triggers.subscribe()
    }

    pub fn fish_status(&self) -> bool {
        self.lock().regions.fish_status()
    }

    /// Returns the trigger latch, then clears it.
    pub fn reset_fish_trigger(&self) -> bool {
        self.lock().regions.reset()
    }

    pub fn feeder_status(&self) -> u32 {
        self.lock().regions.feeder_status()
    }

    /// The ROI as an axis-aligned ellipse, `None` when no ROI is configured.
    pub fn arena_params(&self) -> Option<EllipseParams> {
        self.lock().config.roi.as_ellipse()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.lock();
        SessionSnapshot {
            mode: state.config.mode,
            frame: state.last_frame,
            mask: state.last_mask.clone(),
            ellipse: state.last_ellipse,
            head_point: state.last_ellipse.map(|e| e.head_point()),
            background_ready: state.model.is_some(),
            frames_processed: state.frames_processed,
        }
    }

    pub fn config(&self) -> TrackerConfig {
        self.lock().config.clone()
    }

    pub fn mode(&self) -> OperatingMode {
        self.lock().config.mode
    }

    pub fn background_median(&self) -> Option<GrayImage> {
        self.lock().model.as_ref().map(|m| m.median().clone())
    }

    /// `(samples, budget)` while estimating.
    pub fn estimation_progress(&self) -> Option<(u32, u32)> {
        let state = self.lock();
        state
            .estimator
            .as_ref()
            .map(|e| (e.samples, state.config.background.sample_budget))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::geometry::Rect;
    use crate::core_modules::region_trigger::{PresenceSpec, RegionDetection, RegionSpec};
    use crate::core_modules::roi::RoiShape;
    use crate::core_modules::segmenter::Polarity;
    use crate::io::MemoryBackgroundStore;
    use image::Luma;

    fn frame_with_rect(index: u64, size: u32, rect: Option<Rect>, value: u8) -> Frame {
        let mut image = GrayImage::new(size, size);
        if let Some(r) = rect {
            for y in r.y..r.y + r.height {
                for x in r.x..r.x + r.width {
                    image.put_pixel(x, y, Luma([value]));
                }
            }
        }
        Frame::new(image, index, index as f64 / 30.0)
    }

    fn brighter_config() -> TrackerConfig {
        let mut config = TrackerConfig::default();
        config.background.threshold = 50;
        config.background.polarity = Polarity::Brighter;
        config
    }

    fn tracking_session(config: TrackerConfig, size: u32) -> TrackingSession {
        let session = TrackingSession::new(config).unwrap();
        session.set_background(GrayImage::new(size, size)).unwrap();
        session
    }

    fn tracked(outcome: FrameOutcome) -> FrameReport {
        match outcome {
            FrameOutcome::Tracked(report) => report,
            other => panic!("expected tracking outcome, got {other:?}"),
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        names: Mutex<Vec<String>>,
    }

    impl DebugSink for RecordingSink {
        fn offer(&self, name: &str, _image: &GrayImage) -> Result<()> {
            self.names.lock().unwrap().push(name.to_string());
            Ok(())
        }
    }

    #[test]
    fn estimation_respects_stride_and_budget() {
        let mut config = TrackerConfig::default();
        config.mode = OperatingMode::EstimateBackground;
        config.background.frames_skip = 2;
        config.background.sample_budget = 3;
        let store = Arc::new(MemoryBackgroundStore::default());
        let session = TrackingSession::new(config)
            .unwrap()
            .with_background_store(store.clone());

        let outcomes: Vec<FrameOutcome> = (0..7)
            .map(|i| {
                let frame = Frame::new(GrayImage::from_pixel(4, 4, Luma([50])), i, 0.0);
                session.process_frame(&frame).unwrap()
            })
            .collect();
        assert_eq!(
            outcomes,
            vec![
                FrameOutcome::BackgroundSampled { samples: 1, budget: 3 },
                FrameOutcome::BackgroundSkipped,
                FrameOutcome::BackgroundSkipped,
                FrameOutcome::BackgroundSampled { samples: 2, budget: 3 },
                FrameOutcome::BackgroundSkipped,
                FrameOutcome::BackgroundSkipped,
                FrameOutcome::BackgroundFinalized { samples: 3 },
            ]
        );
        assert_eq!(session.mode(), OperatingMode::Track);
        assert!(session.estimation_progress().is_none());
        assert_eq!(store.get(), Some(GrayImage::from_pixel(4, 4, Luma([50]))));
        assert_eq!(
            session.background_median(),
            Some(GrayImage::from_pixel(4, 4, Luma([50])))
        );
    }

    #[test]
    fn tracking_needs_a_background() {
        let session = TrackingSession::new(TrackerConfig::default()).unwrap();
        let frame = frame_with_rect(0, 8, None, 0);
        assert!(matches!(
            session.process_frame(&frame),
            Err(TrackerError::BackgroundNotReady)
        ));

        let store = Arc::new(MemoryBackgroundStore::new(Some(GrayImage::new(8, 8))));
        let session = TrackingSession::new(TrackerConfig::default())
            .unwrap()
            .with_background_store(store);
        assert!(session.process_frame(&frame).is_ok());
        assert!(session.snapshot().background_ready);
    }

    #[test]
    fn moving_bar_is_tracked_with_stable_heading() {
        let session = tracking_session(brighter_config(), 64);
        for i in 0..6u64 {
            let rect = Rect::new(10 + 3 * i as u32, 30, 6, 3);
            let report = tracked(
                session
                    .process_frame(&frame_with_rect(i, 64, Some(rect), 200))
                    .unwrap(),
            );
            let ellipse = report.ellipse.unwrap();
            assert!((ellipse.x - (rect.x as f64 + 2.5)).abs() < 1e-9);
            assert!((ellipse.y - 31.0).abs() < 1e-9);
            assert!(ellipse.theta.abs() < 1e-9);
            assert_eq!(report.foreground_pixels, 18);
        }
        assert_eq!(session.tracks().len(), 6);
        let snapshot = session.snapshot();
        assert_eq!(snapshot.frame, Some(5));
        assert_eq!(snapshot.frames_processed, 6);
        assert!(snapshot.head_point.is_some());
    }

    #[test]
    fn empty_mask_appends_nothing() {
        let session = tracking_session(brighter_config(), 16);
        let report = tracked(
            session
                .process_frame(&frame_with_rect(0, 16, None, 0))
                .unwrap(),
        );
        assert!(report.ellipse.is_none());
        assert!(session.tracks().is_empty());
        assert!(session.snapshot().ellipse.is_none());
    }

    #[test]
    fn mismatched_frame_is_skipped_without_side_effects() {
        let session = tracking_session(brighter_config(), 8);
        let err = session
            .process_frame(&frame_with_rect(0, 4, None, 0))
            .unwrap_err();
        assert!(matches!(err, TrackerError::DimensionMismatch { .. }));
        assert_eq!(session.snapshot().frames_processed, 0);
        assert!(session.tracks().is_empty());
    }

    #[test]
    fn empty_frame_is_rejected() {
        let session = tracking_session(brighter_config(), 8);
        let frame = Frame::new(GrayImage::new(0, 0), 3, 0.0);
        assert!(matches!(
            session.process_frame(&frame),
            Err(TrackerError::EmptyFrame(3))
        ));
    }

    #[test]
    fn batch_uses_only_newest_frame() {
        let session = tracking_session(brighter_config(), 32);
        let frames = (0..3)
            .map(|i| frame_with_rect(i, 32, Some(Rect::new(4 * i as u32, 4, 4, 4)), 200))
            .collect();
        let report = tracked(session.process_batch(frames).unwrap().unwrap());
        assert_eq!(report.frame, 2);
        assert_eq!(session.tracks().len(), 1);
        assert!(session.process_batch(Vec::new()).unwrap().is_none());
    }

    #[test]
    fn threshold_change_recomputes_bounds() {
        let session = tracking_session(brighter_config(), 16);
        let frame = frame_with_rect(0, 16, Some(Rect::new(4, 4, 4, 4)), 30);
        assert!(tracked(session.process_frame(&frame).unwrap()).ellipse.is_none());

        let mut config = session.config();
        config.background.threshold = 20;
        session.update_config(config).unwrap();
        assert!(tracked(session.process_frame(&frame).unwrap()).ellipse.is_some());
    }

    #[test]
    fn roi_excludes_outside_blobs_and_follows_updates() {
        let mut config = brighter_config();
        config.roi = RoiShape::Rectangle {
            center_x: 8.0,
            center_y: 16.0,
            width: 16.0,
            height: 32.0,
        };
        let session = tracking_session(config, 32);
        let frame = frame_with_rect(0, 32, Some(Rect::new(20, 10, 4, 4)), 200);
        assert!(tracked(session.process_frame(&frame).unwrap()).ellipse.is_none());
        assert_eq!(session.arena_params().map(|e| (e.x, e.a)), Some((8.0, 8.0)));

        let mut config = session.config();
        config.roi = RoiShape::None;
        session.update_config(config).unwrap();
        assert!(tracked(session.process_frame(&frame).unwrap()).ellipse.is_some());
        assert!(session.arena_params().is_none());
    }

    #[test]
    fn trigger_fires_once_per_acknowledged_interval() {
        let mut config = brighter_config();
        config.regions.presence = Some(PresenceSpec {
            region: RegionSpec {
                name: "tank".into(),
                rect: Rect::new(0, 0, 32, 32),
                detection: RegionDetection::ForegroundMask,
            },
            expected_count: 1,
        });
        let session = tracking_session(config, 32);
        let mut events = session.subscribe();
        let frame = |i| frame_with_rect(i, 32, Some(Rect::new(8, 8, 4, 4)), 200);

        for i in 0..3 {
            session.process_frame(&frame(i)).unwrap();
        }
        let event = events.try_recv().unwrap();
        assert_eq!((event.frame, event.count), (0, 1));
        assert!(events.try_recv().is_err());
        assert!(session.fish_status());

        assert!(session.reset_fish_trigger());
        assert!(!session.fish_status());
        session.process_frame(&frame(3)).unwrap();
        assert_eq!(events.try_recv().unwrap().frame, 3);
    }

    #[test]
    fn stop_flushes_tracks() {
        let session = tracking_session(brighter_config(), 16);
        for i in 0..3 {
            session
                .process_frame(&frame_with_rect(i, 16, Some(Rect::new(2, 2, 3, 3)), 200))
                .unwrap();
        }
        let summary = session.stop();
        assert!(!summary.background_finalized);
        assert_eq!(
            summary.tracks.iter().map(|e| e.frame).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert!(session.tracks().is_empty());
    }

    #[test]
    fn stop_finalizes_running_estimate() {
        let mut config = TrackerConfig::default();
        config.mode = OperatingMode::EstimateBackground;
        config.background.frames_skip = 0;
        config.background.sample_budget = 10;
        let store = Arc::new(MemoryBackgroundStore::default());
        let session = TrackingSession::new(config)
            .unwrap()
            .with_background_store(store.clone());
        for i in 0..2 {
            let frame = Frame::new(GrayImage::from_pixel(3, 3, Luma([9])), i, 0.0);
            session.process_frame(&frame).unwrap();
        }
        assert_eq!(session.estimation_progress(), Some((2, 10)));
        let summary = session.stop();
        assert!(summary.background_finalized);
        assert_eq!(store.get(), Some(GrayImage::from_pixel(3, 3, Luma([9]))));
    }

    #[test]
    fn switching_modes_finalizes_and_resets() {
        let session = tracking_session(brighter_config(), 8);
        session
            .process_frame(&frame_with_rect(0, 8, Some(Rect::new(1, 1, 2, 2)), 200))
            .unwrap();
        session.set_mode(OperatingMode::EstimateBackground).unwrap();
        assert!(session.snapshot().ellipse.is_none());
        for i in 0..3 {
            let frame = Frame::new(GrayImage::from_pixel(8, 8, Luma([120])), 10 + i * 10, 0.0);
            session.process_frame(&frame).unwrap();
        }
        session.set_mode(OperatingMode::Track).unwrap();
        assert_eq!(
            session.background_median(),
            Some(GrayImage::from_pixel(8, 8, Luma([120])))
        );
    }

    #[test]
    fn debug_images_offered_once_per_configuration() {
        let mut config = brighter_config();
        config.debug.enabled = true;
        let sink = Arc::new(RecordingSink::default());
        let session = TrackingSession::new(config)
            .unwrap()
            .with_debug_sink(sink.clone());
        session.set_background(GrayImage::new(8, 8)).unwrap();
        for i in 0..2 {
            session.process_frame(&frame_with_rect(i, 8, None, 0)).unwrap();
        }
        assert_eq!(*sink.names.lock().unwrap(), vec!["abs_diff", "foreground"]);

        session.update_config(session.config()).unwrap();
        session.process_frame(&frame_with_rect(2, 8, None, 0)).unwrap();
        assert_eq!(sink.names.lock().unwrap().len(), 4);
    }

    #[test]
    fn rejected_frame_keeps_debug_offer_pending() {
        let mut config = brighter_config();
        config.debug.enabled = true;
        config.regions.regions = vec![RegionSpec {
            name: "off_screen".into(),
            rect: Rect::new(100, 100, 4, 4),
            detection: RegionDetection::ForegroundMask,
        }];
        let sink = Arc::new(RecordingSink::default());
        let session = TrackingSession::new(config)
            .unwrap()
            .with_debug_sink(sink.clone());
        session.set_background(GrayImage::new(8, 8)).unwrap();

        let err = session
            .process_frame(&frame_with_rect(0, 8, None, 0))
            .unwrap_err();
        assert!(matches!(err, TrackerError::InvalidGeometry(_)));
        assert!(sink.names.lock().unwrap().is_empty());
        assert!(session.lock().debug_pending);
        assert!(session.tracks().is_empty());
    }

    #[test]
    fn shared_across_threads() {
        let session = Arc::new(tracking_session(brighter_config(), 16));
        let consumer = {
            let tracks = session.tracks();
            std::thread::spawn(move || {
                let mut popped = 0;
                for _ in 0..1000 {
                    if tracks.pop_front().is_ok() {
                        popped += 1;
                    }
                }
                popped
            })
        };
        for i in 0..20 {
            session
                .process_frame(&frame_with_rect(i, 16, Some(Rect::new(5, 5, 3, 3)), 200))
                .unwrap();
        }
        let popped = consumer.join().unwrap();
        assert_eq!(popped + session.tracks().len(), 20);
    }
}
