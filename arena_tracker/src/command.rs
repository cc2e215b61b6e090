// THEORY:
// External controllers talk to a running session through small JSON commands such
// as `{"cmd": "pop-front"}`. Every command returns a `CommandStatus`: a success flag,
// a message on failure, and an optional JSON value on success. Errors are turned
// into statuses here, so callers on the other side of a socket or FFI boundary
// never see a Rust error type.

use crate::config::TrackerConfig;
use crate::error::{CommandStatus, Result, TrackerError};
use crate::pipeline::TrackingSession;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "cmd", rename_all = "kebab-case")]
pub enum Command {
    /// Oldest buffered ellipse.
    PopFront,
    /// Newest buffered ellipse.
    PopBack,
    /// Newest buffered ellipse; the rest of the backlog is discarded.
    GetLastClear,
    GetFishStatus,
    /// Reports the trigger latch, then re-arms it.
    ResetFishTrigger,
    GetFeederStatus,
    GetArenaParams,
    /// Replaces the configuration. Missing fields take their defaults.
    SetConfig { config: TrackerConfig },
    GetConfig,
}

const COMMAND_NAMES: &[&str] = &[
    "pop-front",
    "pop-back",
    "get-last-clear",
    "get-fish-status",
    "reset-fish-trigger",
    "get-feeder-status",
    "get-arena-params",
    "set-config",
    "get-config",
];

impl Command {
    pub fn parse(json: &str) -> Result<Command> {
        let value: Value = serde_json::from_str(json)?;
        let name = value
            .get("cmd")
            .and_then(Value::as_str)
            .ok_or_else(|| TrackerError::UnknownCommand("<missing cmd>".into()))?;
        if !COMMAND_NAMES.contains(&name) {
            return Err(TrackerError::UnknownCommand(name.to_string()));
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn execute(self, session: &TrackingSession) -> CommandStatus {
        debug!(command = ?self, "executing command");
        let result: Result<Option<Value>> = match self {
            Command::PopFront => session
                .tracks()
                .pop_front()
                .and_then(|e| Ok(Some(serde_json::to_value(e)?))),
            Command::PopBack => session
                .tracks()
                .pop_back()
                .and_then(|e| Ok(Some(serde_json::to_value(e)?))),
            Command::GetLastClear => session
                .tracks()
                .pop_all_and_clear()
                .and_then(|e| Ok(Some(serde_json::to_value(e)?))),
            Command::GetFishStatus => Ok(Some(json!({ "trigger": session.fish_status() }))),
            Command::ResetFishTrigger => {
                Ok(Some(json!({ "trigger": session.reset_fish_trigger() })))
            }
            Command::GetFeederStatus => Ok(Some(json!({ "status": session.feeder_status() }))),
            Command::GetArenaParams => match session.arena_params() {
                Some(arena) => serde_json::to_value(arena).map(Some).map_err(Into::into),
                None => Ok(Some(Value::Null)),
            },
            Command::SetConfig { config } => session.update_config(config).map(|_| None),
            Command::GetConfig => serde_json::to_value(session.config())
                .map(Some)
                .map_err(Into::into),
        };
        CommandStatus::from(result)
    }
}

/// Parses and executes one JSON command.
pub fn run_command(session: &TrackingSession, json: &str) -> CommandStatus {
    match Command::parse(json) {
        Ok(command) => command.execute(session),
        Err(err) => CommandStatus::failed(err.to_string()),
    }
}
