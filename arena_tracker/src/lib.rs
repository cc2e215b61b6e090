// THEORY:
// This file is the main entry point for the `arena_tracker` library crate.
// It exposes the `TrackingSession` and its associated data structures
// (`TrackerConfig`, `FrameOutcome`, `EllipseParams`, etc.) as the high-level
// interface of the tracking engine, plus the stream and command adapters that
// hosts use to drive it.
//
// The numerical building blocks live in `core_modules`, one file per stage:
// background estimation, segmentation, blob selection, ellipse fitting, heading
// resolution, track buffering and region triggering. They are public so they can
// be reused on their own, but most callers only need the re-exports below.

pub mod command;
pub mod config;
pub mod core_modules;
pub mod error;
pub mod io;
pub mod pipeline;
pub mod stream;

pub use crate::command::{Command, run_command};
pub use crate::config::{OperatingMode, TrackerConfig};
pub use crate::core_modules::ellipse_fitter::EllipseParams;
pub use crate::core_modules::frame::{ForegroundMask, Frame};
pub use crate::core_modules::region_trigger::TriggerEvent;
pub use crate::core_modules::track_buffer::TrackBuffer;
pub use crate::error::{CommandStatus, Result, TrackerError};
pub use crate::pipeline::{FrameOutcome, FrameReport, SessionSnapshot, StopSummary, TrackingSession};
pub use crate::stream::{FrameSender, StreamHandle, spawn_stream};
