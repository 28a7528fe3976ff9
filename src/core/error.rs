use std::io;

use thiserror::Error;

/// Failures that abort the current handler. Everything the alarm flow
/// expects to happen (corrupt slots, denied permission, stale triggers)
/// is handled in place and never shows up here.
#[derive(Debug, Error)]
pub enum AlarmError {
    #[error("alarm storage unavailable: {0}")]
    Storage(#[from] io::Error),
    #[error("failed to read console input: {0}")]
    Input(#[source] io::Error),
    #[error("alarm host loop failed: {0}")]
    Host(#[source] tokio::task::JoinError),
    #[error("failed to encode slot {slot}: {source}")]
    Encode {
        slot: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, AlarmError>;

/// Outcome reported by the wake scheduler when it refuses a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("not permitted to schedule exact wake alarms")]
    PermissionDenied,
}
