// THEORY:
// Every failure the engine can report lives in one enum. Nothing in the tracking
// core is fatal to the host process: a failed frame is skipped, a failed save is
// logged, and the caller always gets a value back instead of a panic.

use serde::Serialize;

pub type Result<T> = std::result::Result<T, TrackerError>;

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error(
        "image is {actual_width}x{actual_height} but {context} is {expected_width}x{expected_height}"
    )]
    DimensionMismatch {
        context: &'static str,
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("frame {0} has no pixels")]
    EmptyFrame(u64),

    #[error("background model has not been computed or loaded")]
    BackgroundNotReady,

    #[error("background histogram has no frames")]
    NoFramesAdded,

    #[error("invalid region geometry: {0}")]
    InvalidGeometry(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("track buffer is empty")]
    TrackBufferEmpty,

    #[error("operation requires {0} mode")]
    WrongMode(&'static str),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("frame stream is closed")]
    StreamClosed,

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl TrackerError {
    pub(crate) fn dimension_mismatch(
        context: &'static str,
        expected: (u32, u32),
        actual: (u32, u32),
    ) -> Self {
        TrackerError::DimensionMismatch {
            context,
            expected_width: expected.0,
            expected_height: expected.1,
            actual_width: actual.0,
            actual_height: actual.1,
        }
    }
}

/// Success flag plus message, the status object handed back across the
/// external command surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandStatus {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl CommandStatus {
    pub fn ok(value: Option<serde_json::Value>) -> Self {
        Self {
            success: true,
            message: String::new(),
            value,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            value: None,
        }
    }
}

impl From<Result<Option<serde_json::Value>>> for CommandStatus {
    fn from(result: Result<Option<serde_json::Value>>) -> Self {
        match result {
            Ok(value) => CommandStatus::ok(value),
            Err(e) => CommandStatus::failed(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatch_message_names_both_sizes() {
        let err = TrackerError::dimension_mismatch("background model", (640, 480), (320, 240));
        assert_eq!(
            err.to_string(),
            "image is 320x240 but background model is 640x480"
        );
    }

    #[test]
    fn failed_result_becomes_unsuccessful_status() {
        let status: CommandStatus = Err(TrackerError::TrackBufferEmpty).into();
        assert!(!status.success);
        assert_eq!(status.message, "track buffer is empty");
        assert!(status.value.is_none());
    }
}
