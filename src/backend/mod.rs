//! Streaming backend abstraction.
//!
//! The orchestrator decides what should play; a backend carries those
//! decisions to the hardware. Backends are driven exclusively by the
//! [`dispatch::Dispatcher`] worker thread, so the orchestrator never blocks
//! on device I/O.
//!
//! ## Supported Backends
//!
//! - **Log Backend**: dry run that logs every command, used by default and
//!   by `simulate`

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::preset::EffectProgram;
use crate::session::SessionId;
use crate::topology::LeafTarget;

pub mod dispatch;
pub mod log;

pub use dispatch::{DispatchOutcome, DispatchReport, Dispatcher, RetryPolicy};
pub use log::LogBackend;

/// Backend selection in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Log,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Log => "log",
        }
    }
}

/// Everything a backend needs to start one stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamSpec {
    pub session_id: SessionId,
    pub leaves: Vec<LeafTarget>,
    pub program: EffectProgram,
    pub fps: u32,
    pub brightness: f64,
}

/// One instruction for the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamCommand {
    Start(StreamSpec),
    /// The session's leaf set shrank.
    Update {
        session_id: SessionId,
        leaves: Vec<LeafTarget>,
    },
    SetBrightness {
        session_id: SessionId,
        level: f64,
    },
    Stop {
        session_id: SessionId,
    },
}

impl StreamCommand {
    pub fn session_id(&self) -> SessionId {
        match self {
            StreamCommand::Start(spec) => spec.session_id,
            StreamCommand::Update { session_id, .. }
            | StreamCommand::SetBrightness { session_id, .. }
            | StreamCommand::Stop { session_id } => *session_id,
        }
    }
}

impl fmt::Display for StreamCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamCommand::Start(spec) => write!(f, "start {}", spec.session_id),
            StreamCommand::Update { session_id, .. } => write!(f, "update {session_id}"),
            StreamCommand::SetBrightness { session_id, level } => {
                write!(f, "brightness {session_id} {:.0}%", level * 100.0)
            }
            StreamCommand::Stop { session_id } => write!(f, "stop {session_id}"),
        }
    }
}

/// How a backend call failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Device unreachable or busy; worth retrying.
    #[error("{0}")]
    Transient(String),
    /// The backend rejected the command (unknown device, bad program); never retried.
    #[error("{0}")]
    Permanent(String),
}

/// Trait for backends that can run effect streams on LED hardware.
///
/// Implementations are called from the dispatcher thread only, one command
/// at a time, and should return promptly with a classified error on failure.
#[cfg_attr(test, mockall::automock)]
pub trait StreamingBackend: Send {
    /// Start streaming `spec.program` to `spec.leaves`.
    fn start_stream(&mut self, spec: &StreamSpec) -> Result<(), DispatchError>;

    /// Narrow a running stream to `leaves`.
    fn update_stream(&mut self, session_id: SessionId, leaves: &[LeafTarget]) -> Result<(), DispatchError>;

    /// Apply a global brightness level in `0.0..=1.0`.
    fn set_brightness(&mut self, session_id: SessionId, level: f64) -> Result<(), DispatchError>;

    /// Stop a stream. Stopping an unknown stream should succeed.
    fn stop_stream(&mut self, session_id: SessionId) -> Result<(), DispatchError>;

    /// Human-readable backend name.
    fn name(&self) -> &'static str;
}

/// Run one command against a backend.
pub fn apply(backend: &mut dyn StreamingBackend, command: &StreamCommand) -> Result<(), DispatchError> {
    match command {
        StreamCommand::Start(spec) => backend.start_stream(spec),
        StreamCommand::Update { session_id, leaves } => backend.update_stream(*session_id, leaves),
        StreamCommand::SetBrightness { session_id, level } => {
            backend.set_brightness(*session_id, *level)
        }
        StreamCommand::Stop { session_id } => backend.stop_stream(*session_id),
    }
}

/// Create the configured backend.
pub fn create_backend(kind: BackendKind) -> Box<dyn StreamingBackend> {
    match kind {
        BackendKind::Log => Box::new(LogBackend::new()),
    }
}
