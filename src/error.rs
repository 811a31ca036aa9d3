use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
pub enum CuaError {
    #[error("unknown action: {0}")]
    UnknownAction(String),
    #[error(
        "{kind} instances are not supported by this backend; use environment='web' for browser-only automation"
    )]
    UnsupportedSessionKind { kind: String },
    #[error("instance {0} not found")]
    SessionNotFound(String),
    #[error("invalid environment {0:?}: must be one of 'web', 'ubuntu', 'windows'")]
    InvalidEnvironment(String),
    #[error("invalid action request: {0}")]
    InvalidRequest(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("report already finished")]
    ReportFinished,
    #[error("config error: {0}")]
    Config(String),
}

impl CuaError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        CuaError::Transport(err.to_string())
    }

    /// Fatal errors stop the calling step; everything else is a per-action
    /// failure that a run loop records and moves past.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CuaError::Transport(_))
    }
}
