//! Operations the host shell invokes. Each one logs, reports failures as an error notice
//! and returns a serializable result.

pub mod auth;
pub mod avatars;
pub mod chat;
pub mod settings;
pub mod speech;

use serde::Serialize;

use crate::api::ApiError;
use crate::app::AppState;
use crate::replay::ReplayError;
use crate::speech::SpeechError;
use crate::turn::TurnError;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Turn(#[from] TurnError),
    #[error(transparent)]
    Replay(#[from] ReplayError),
    #[error(transparent)]
    Speech(#[from] SpeechError),
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Serialize for CommandError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Logs a failed command and surfaces it as an error notice.
pub(crate) fn fail(state: &AppState, title: &str, error: impl Into<CommandError>) -> CommandError {
    let error = error.into();
    tracing::warn!(command = title, error = %error, "command failed");
    state.notifier.error(title, error.to_string());
    error
}

/// Checks that every `(value, label)` pair is filled in, naming the missing ones.
pub(crate) fn require(fields: &[(&str, &str)]) -> Result<(), CommandError> {
    let missing: Vec<&str> = fields
        .iter()
        .filter(|(value, _)| value.trim().is_empty())
        .map(|(_, label)| *label)
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(CommandError::Validation(format!(
            "Required: {}",
            missing.join(", ")
        )))
    }
}
