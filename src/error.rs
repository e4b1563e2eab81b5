//! Error types shared by the engine and the history store.
//!
//! Analysis results (validation errors, fix failures) are *data*, reported as
//! [`crate::model::Diagnostic`]s. The enums here are reserved for conditions
//! that abort an operation outright.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::model::{Diagnostic, DiagnosticKind};

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(
        "validation timed out after {} ms (limit {} ms, {steps_done}/{total_steps} steps)",
        elapsed.as_millis(),
        limit.as_millis()
    )]
    Timeout {
        elapsed: Duration,
        limit: Duration,
        steps_done: usize,
        total_steps: usize,
    },

    #[error("unsupported version `{0}` (expected v4, v5 or v6)")]
    UnsupportedVersion(String),

    #[error(transparent)]
    History(#[from] HistoryError),
}

impl EngineError {
    /// Render an aborted operation as the single fatal diagnostic callers surface.
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            EngineError::Timeout { .. } => Diagnostic::error(DiagnosticKind::Timeout, self.to_string()),
            EngineError::UnsupportedVersion(_) => {
                Diagnostic::error(DiagnosticKind::VersionMarker, self.to_string())
            }
            EngineError::History(_) => Diagnostic::error(DiagnosticKind::Storage, self.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("i/o error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed metadata in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no history recorded for script `{0}`")]
    NotFound(String),

    #[error("script `{id}` has no version #{index} ({len} stored)")]
    NoSuchVersion { id: String, index: usize, len: usize },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
