//! Domain error taxonomy.
//!
//! Application plumbing (config, IO, CLI) uses `anyhow`. Operations that
//! callers need to react to by kind return [`OrchestratorError`] instead.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::calendar::CalendarError;
use crate::conflict::Conflict;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrchestratorError {
    /// Malformed rule, playlist or request data. Rejected before anything is applied.
    #[error("{0}")]
    Validation(String),

    /// A referenced preset, device, group, virtual device, playlist or session is gone.
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    /// The requested targets overlap running sessions and the caller asked to confirm.
    #[error("targets overlap {} active session(s)", .0.len())]
    Conflict(Vec<Conflict>),

    /// The hardware could not be reached after retries.
    #[error("hardware unavailable: {0}")]
    TransientHardware(String),

    #[error(transparent)]
    Calendar(#[from] CalendarError),
}

impl OrchestratorError {
    pub fn validation(message: impl Into<String>) -> Self {
        OrchestratorError::Validation(message.into())
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        OrchestratorError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::Validation(_) => ErrorKind::Validation,
            OrchestratorError::NotFound { .. } => ErrorKind::NotFound,
            OrchestratorError::Conflict(_) => ErrorKind::Conflict,
            OrchestratorError::TransientHardware(_) => ErrorKind::TransientHardware,
            OrchestratorError::Calendar(_) => ErrorKind::Calendar,
        }
    }
}

/// Machine-readable error class carried in API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    TransientHardware,
    Calendar,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::TransientHardware => "transient_hardware",
            ErrorKind::Calendar => "calendar",
        };
        write!(f, "{name}")
    }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_and_messages() {
        let err = OrchestratorError::not_found("preset", "aurora");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.to_string(), "preset 'aurora' not found");

        let calendar: OrchestratorError = CalendarError::NotObservedInYear {
            pattern: "02-29".to_string(),
            year: 2025,
        }
        .into();
        assert_eq!(calendar.kind(), ErrorKind::Calendar);
        assert_eq!(
            serde_json::to_string(&ErrorKind::TransientHardware).unwrap(),
            "\"transient_hardware\""
        );
    }
}
