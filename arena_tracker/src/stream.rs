// THEORY:
// The `stream` module connects an acquisition thread to a `TrackingSession`. The
// producer pushes frames (singly or in batches) into an unbounded channel and is
// never blocked. The consumer task drains everything queued, keeps only the newest
// frame, and processes it on the blocking pool, so a slow frame makes the engine
// skip stale frames instead of falling behind.
//
// Key architectural principles:
// 1.  **Strictly sequential**: One frame is processed at a time. The next drain only
//     starts after the previous frame has fully gone through the session.
// 2.  **Drop oldest**: Frames that were superseded while the consumer was busy are
//     counted and discarded.
// 3.  **Bounded outcomes**: Per-frame outcomes go into a channel of
//     `OUTCOME_BACKLOG` slots. A host that never reads them (tracks are also
//     available through the `TrackBuffer`) loses the newest outcomes, not memory.
// 4.  **Clean shutdown**: When every `FrameSender` is dropped, the consumer stops
//     the session, which finalizes a running background estimate and flushes all
//     buffered tracks into the returned `StopSummary`.

use crate::core_modules::frame::Frame;
use crate::error::{Result, TrackerError};
use crate::pipeline::{FrameOutcome, StopSummary, TrackingSession};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Unread outcomes kept before new ones are dropped.
pub const OUTCOME_BACKLOG: usize = 64;

/// Producer side. Cheap to clone.
#[derive(Debug, Clone)]
pub struct FrameSender {
    tx: mpsc::UnboundedSender<Vec<Frame>>,
}

impl FrameSender {
    pub fn send(&self, frame: Frame) -> Result<()> {
        self.send_batch(vec![frame])
    }

    /// Only the last frame of the batch is a candidate for processing.
    pub fn send_batch(&self, frames: Vec<Frame>) -> Result<()> {
        self.tx.send(frames).map_err(|_| TrackerError::StreamClosed)
    }
}

/// Consumer side: per-frame outcomes and the final summary.
pub struct StreamHandle {
    task: JoinHandle<StopSummary>,
    outcomes: mpsc::Receiver<Result<FrameOutcome>>,
}

impl StreamHandle {
    /// Next processed frame, `None` once the stream has shut down.
    pub async fn next_outcome(&mut self) -> Option<Result<FrameOutcome>> {
        self.outcomes.recv().await
    }

    /// Waits for the consumer to stop. Every `FrameSender` must be dropped first.
    pub async fn finish(self) -> Result<StopSummary> {
        self.task.await.map_err(|err| {
            error!(error = %err, "frame stream task failed");
            TrackerError::StreamClosed
        })
    }
}

/// Starts the consumer task on the current tokio runtime.
pub fn spawn_stream(session: Arc<TrackingSession>) -> (FrameSender, StreamHandle) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (outcome_tx, outcomes) = mpsc::channel(OUTCOME_BACKLOG);
    let task = tokio::spawn(run(session, rx, outcome_tx));
    (FrameSender { tx }, StreamHandle { task, outcomes })
}

async fn run(
    session: Arc<TrackingSession>,
    mut rx: mpsc::UnboundedReceiver<Vec<Frame>>,
    outcome_tx: mpsc::Sender<Result<FrameOutcome>>,
) -> StopSummary {
    let mut dropped_total = 0usize;
    let mut unread_outcomes = 0usize;
    while let Some(batch) = rx.recv().await {
        // Drain the queue to get only the newest frame.
        let mut received = batch.len();
        let mut latest = batch.into_iter().last();
        while let Ok(more) = rx.try_recv() {
            received += more.len();
            if let Some(frame) = more.into_iter().last() {
                latest = Some(frame);
            }
        }
        let Some(frame) = latest else {
            continue;
        };
        if received > 1 {
            dropped_total += received - 1;
            debug!(dropped = received - 1, frame = frame.index, "using newest frame");
        }

        let worker = Arc::clone(&session);
        match tokio::task::spawn_blocking(move || worker.process_frame(&frame)).await {
            Ok(outcome) => match outcome_tx.try_send(outcome) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    unread_outcomes += 1;
                    debug!(unread_outcomes, "outcome backlog full, dropping outcome");
                }
                // A consumer that stopped listening is not an error.
                Err(TrySendError::Closed(_)) => {}
            },
            Err(err) => error!(error = %err, "frame processing task failed"),
        }
    }

    let worker = Arc::clone(&session);
    let summary = match tokio::task::spawn_blocking(move || worker.stop()).await {
        Ok(summary) => summary,
        Err(err) => {
            error!(error = %err, "stop task failed");
            StopSummary {
                background_finalized: false,
                tracks: session.tracks().drain_all(),
            }
        }
    };
    info!(
        dropped_total,
        unread_outcomes,
        tracks = summary.tracks.len(),
        "frame stream closed"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;
    use crate::core_modules::segmenter::Polarity;
    use image::{GrayImage, Luma};
    use std::time::Duration;

    fn session() -> Arc<TrackingSession> {
        let mut config = TrackerConfig::default();
        config.background.polarity = Polarity::Brighter;
        config.background.threshold = 40;
        let session = TrackingSession::new(config).unwrap();
        session.set_background(GrayImage::new(24, 24)).unwrap();
        Arc::new(session)
    }

    fn frame(index: u64) -> Frame {
        let mut image = GrayImage::new(24, 24);
        let x0 = index as u32 % 16;
        for y in 8..12 {
            for x in x0..x0 + 4 {
                image.put_pixel(x, y, Luma([220]));
            }
        }
        Frame::new(image, index, index as f64 * 0.04)
    }

    #[tokio::test]
    async fn newest_frame_is_always_processed() {
        let (sender, mut handle) = spawn_stream(session());
        for i in 0..10 {
            sender.send(frame(i)).unwrap();
        }
        drop(sender);

        let mut tracked = Vec::new();
        while let Some(outcome) = handle.next_outcome().await {
            if let FrameOutcome::Tracked(report) = outcome.unwrap() {
                tracked.push(report.frame);
            }
        }
        assert_eq!(tracked.last(), Some(&9));
        assert!(tracked.windows(2).all(|w| w[0] < w[1]));

        let summary = handle.finish().await.unwrap();
        assert_eq!(summary.tracks.len(), tracked.len());
    }

    #[tokio::test]
    async fn batch_keeps_only_last_frame() {
        let (sender, mut handle) = spawn_stream(session());
        sender.send_batch((0..4).map(frame).collect()).unwrap();
        drop(sender);

        let mut frames = Vec::new();
        while let Some(outcome) = handle.next_outcome().await {
            if let FrameOutcome::Tracked(report) = outcome.unwrap() {
                frames.push(report.frame);
            }
        }
        assert_eq!(frames, vec![3]);
        assert_eq!(handle.finish().await.unwrap().tracks.len(), 1);
    }

    #[tokio::test]
    async fn errors_are_reported_and_stream_continues() {
        let (sender, mut handle) = spawn_stream(session());
        sender
            .send(Frame::new(GrayImage::new(5, 5), 0, 0.0))
            .unwrap();
        let first = handle.next_outcome().await.unwrap();
        assert!(matches!(first, Err(TrackerError::DimensionMismatch { .. })));

        sender.send(frame(1)).unwrap();
        let second = handle.next_outcome().await.unwrap();
        assert!(matches!(second, Ok(FrameOutcome::Tracked(_))));
        drop(sender);
        assert_eq!(handle.finish().await.unwrap().tracks.len(), 1);
    }

    #[tokio::test]
    async fn unread_outcomes_stay_bounded() {
        let session = session();
        let (sender, handle) = spawn_stream(Arc::clone(&session));
        let frames = 3 * OUTCOME_BACKLOG;
        for i in 0..frames {
            sender.send(frame(i as u64)).unwrap();
            // Wait for this frame so none of them is coalesced away.
            while session.tracks().len() < i + 1 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }
        assert_eq!(handle.outcomes.len(), OUTCOME_BACKLOG);

        drop(sender);
        let summary = handle.finish().await.unwrap();
        assert_eq!(summary.tracks.len(), frames);
    }

    #[tokio::test]
    async fn empty_batches_are_ignored() {
        let (sender, mut handle) = spawn_stream(session());
        sender.send_batch(Vec::new()).unwrap();
        drop(sender);
        assert!(handle.next_outcome().await.is_none());
        assert!(handle.finish().await.unwrap().tracks.is_empty());
    }
}
