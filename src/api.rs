//! Request, response and event types exchanged with observers.
//!
//! Everything here is plain data serialized as JSON. Requests and responses
//! travel one line each over the control socket; events are pushed to every
//! connected observer after the step that caused them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::conflict::Conflict;
use crate::error::{ErrorKind, OrchestratorError};
use crate::playlist::player::PlaybackEnd;
use crate::schedule::engine::{DeactivationReason, RuleStatus};
use crate::session::{
    AdmissionPolicy, SessionId, SessionOwner, SessionPhase, ShrinkOutcome, StopReason,
    StreamingSession,
};
use crate::topology::{DeviceId, LeafTarget, StreamTarget};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum ApiRequest {
    ListPlaylists,
    ActivePlaylist,
    PlayPlaylist {
        playlist_id: String,
    },
    StopPlaylist,
    /// Admit an interactive session. The program comes from `preset_id`, or
    /// from exactly one of `effect` and `layers`.
    StartStream {
        targets: Vec<StreamTarget>,
        #[serde(default)]
        preset_id: Option<String>,
        #[serde(default)]
        effect: Option<Value>,
        #[serde(default)]
        layers: Vec<Value>,
        #[serde(default)]
        fps: Option<u32>,
        /// Tags the session as playlist-owned for correlation.
        #[serde(default)]
        playlist_id: Option<String>,
        #[serde(default)]
        policy: AdmissionPolicy,
    },
    StopStream {
        session_id: SessionId,
    },
    StopAll,
    StopTarget {
        target: LeafTarget,
    },
    CheckConflicts {
        targets: Vec<StreamTarget>,
    },
    ExcludeDevice {
        session_id: SessionId,
        device_id: DeviceId,
    },
    ExcludeSegment {
        session_id: SessionId,
        device_id: DeviceId,
        start_led: u32,
        end_led: u32,
    },
    ListSessions,
    PreviewTargets {
        targets: Vec<StreamTarget>,
        #[serde(default)]
        exclusions: Vec<DeviceId>,
    },
    RuleStatus,
    Snapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivePlaylist {
    pub playlist_id: String,
    pub session_id: Option<SessionId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistSummary {
    pub id: String,
    pub name: String,
    pub items: usize,
    pub shuffle: bool,
    #[serde(rename = "loop")]
    pub looping: bool,
    pub total_duration: u64,
    pub playing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub owner: SessionOwner,
    pub phase: SessionPhase,
    pub targets: Vec<StreamTarget>,
    pub leaves: Vec<LeafTarget>,
    pub excluded_devices: Vec<DeviceId>,
    pub excluded_segments: Vec<LeafTarget>,
    pub program: String,
    pub fps: u32,
    pub brightness: f64,
    pub created_at: DateTime<Utc>,
}

impl From<&StreamingSession> for SessionSummary {
    fn from(session: &StreamingSession) -> Self {
        Self {
            id: session.id,
            owner: session.owner.clone(),
            phase: session.phase,
            targets: session.targets.clone(),
            leaves: session.leaf_targets(),
            excluded_devices: session.excluded_devices.clone(),
            excluded_segments: session.excluded_segments.clone(),
            program: session.program.describe(),
            fps: session.fps,
            brightness: session.brightness,
            created_at: session.created_at,
        }
    }
}

/// Pollable view of what is playing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub active_playlist: Option<ActivePlaylist>,
    pub sessions: Vec<SessionSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ApiResult {
    Playlists(Vec<PlaylistSummary>),
    ActivePlaylist {
        active_playlist: Option<ActivePlaylist>,
    },
    Started {
        id: SessionId,
    },
    PlaylistStopped {
        playlist_id: Option<String>,
    },
    Stopped {
        stopped: bool,
    },
    StoppedAll {
        sessions: Vec<SessionId>,
    },
    TargetStopped {
        sessions: Vec<(SessionId, ShrinkOutcome)>,
    },
    Conflicts {
        has_conflicts: bool,
        conflicts: Vec<Conflict>,
    },
    Shrink {
        outcome: ShrinkOutcome,
    },
    Sessions(Vec<SessionSummary>),
    Preview {
        leaves: Vec<LeafTarget>,
        skipped: Vec<String>,
    },
    Rules(Vec<RuleStatus>),
    Snapshot(Snapshot),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ApiResponse {
    Ok {
        result: ApiResult,
    },
    Error {
        kind: ErrorKind,
        message: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        conflicts: Vec<Conflict>,
    },
}

impl ApiResponse {
    pub fn ok(result: ApiResult) -> Self {
        ApiResponse::Ok { result }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ApiResponse::Ok { .. })
    }
}

impl From<OrchestratorError> for ApiResponse {
    fn from(error: OrchestratorError) -> Self {
        let kind = error.kind();
        let message = error.to_string();
        let conflicts = match error {
            OrchestratorError::Conflict(conflicts) => conflicts,
            _ => Vec::new(),
        };
        ApiResponse::Error {
            kind,
            message,
            conflicts,
        }
    }
}

/// Pushed to every observer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ObserverEvent {
    PlaylistStarted {
        playlist_id: String,
        session_id: SessionId,
    },
    PlaylistStopped {
        playlist_id: String,
        session_id: Option<SessionId>,
        reason: PlaybackEnd,
    },
    SessionStarted {
        session_id: SessionId,
        owner: SessionOwner,
        leaves: Vec<LeafTarget>,
    },
    StreamingStopped {
        session_id: SessionId,
        reason: StopReason,
    },
    RuleActivated {
        rule_id: String,
        session_id: SessionId,
    },
    RuleDeactivated {
        rule_id: String,
        session_id: Option<SessionId>,
        reason: DeactivationReason,
    },
    Snapshot(Snapshot),
}

impl ObserverEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ObserverEvent::PlaylistStarted { .. } => "playlist-started",
            ObserverEvent::PlaylistStopped { .. } => "playlist-stopped",
            ObserverEvent::SessionStarted { .. } => "session-started",
            ObserverEvent::StreamingStopped { .. } => "streaming-stopped",
            ObserverEvent::RuleActivated { .. } => "rule-activated",
            ObserverEvent::RuleDeactivated { .. } => "rule-deactivated",
            ObserverEvent::Snapshot(_) => "snapshot",
        }
    }
}
