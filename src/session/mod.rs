//! The session registry: the single source of truth for what should be playing.
//!
//! A session is one effect program streamed to an expanded target set. Its
//! targets never change after admission; the only mutation is shrinking it by
//! excluding whole devices or LED segments. When the effective expansion
//! becomes empty the session is stopped. Session ids are allocated from a
//! monotonic counter, so a stopped id never comes back.
//!
//! Every state change is appended to a journal that the orchestrator drains
//! after each step to produce backend commands and observer events.


use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::conflict::{Conflict, detect_conflicts};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::preset::EffectProgram;
use crate::topology::{DeviceId, LeafTarget, SourcedLeaf, StreamTarget, Topology};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Who asked for a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum SessionOwner {
    Interactive,
    Playlist(String),
    Rule(String),
}

impl fmt::Display for SessionOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionOwner::Interactive => write!(f, "interactive"),
            SessionOwner::Playlist(id) => write!(f, "playlist '{id}'"),
            SessionOwner::Rule(id) => write!(f, "rule '{id}'"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Admitted, waiting for the backend to acknowledge the start.
    Starting,
    Active,
    /// An exclusion was applied and the backend has not confirmed it yet.
    Shrinking,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Requested,
    StopAll,
    /// Displaced by a newer session on overlapping hardware.
    Preempted,
    /// Every leaf was excluded.
    Emptied,
    /// The owning playlist or rule moved on to its next item.
    Replaced,
    /// The owning playlist finished or the rule's window ended.
    Finished,
    /// The owning playback was stopped or aborted.
    OwnerStopped,
    /// The backend could not start the stream.
    Failed(String),
    TopologyChanged,
    Shutdown,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Requested => write!(f, "requested"),
            StopReason::StopAll => write!(f, "stop all"),
            StopReason::Preempted => write!(f, "preempted"),
            StopReason::Emptied => write!(f, "all targets excluded"),
            StopReason::Replaced => write!(f, "replaced"),
            StopReason::Finished => write!(f, "finished"),
            StopReason::OwnerStopped => write!(f, "owner stopped"),
            StopReason::Failed(message) => write!(f, "failed: {message}"),
            StopReason::TopologyChanged => write!(f, "topology changed"),
            StopReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// How admission handles overlap with running sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionPolicy {
    /// Return the conflicts and admit nothing.
    #[default]
    Confirm,
    /// Stop every colliding session.
    Stop,
    /// Shed the overlapping leaves where the session survives it, stop it otherwise.
    Shed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamingSession {
    pub id: SessionId,
    pub targets: Vec<StreamTarget>,
    pub excluded_devices: Vec<DeviceId>,
    pub excluded_segments: Vec<LeafTarget>,
    pub program: EffectProgram,
    pub fps: u32,
    pub owner: SessionOwner,
    pub phase: SessionPhase,
    pub brightness: f64,
    pub created_at: DateTime<Utc>,
    leaves: Vec<SourcedLeaf>,
}

impl StreamingSession {
    /// Leaves the session currently streams to, after exclusions.
    pub fn effective_leaves(&self) -> &[SourcedLeaf] {
        &self.leaves
    }

    pub fn leaf_targets(&self) -> Vec<LeafTarget> {
        self.leaves.iter().map(|s| s.leaf.clone()).collect()
    }

    fn recompute(&mut self, topology: &Topology) {
        let expansion = topology.expand_with_report(&self.targets, &self.excluded_devices);
        let segments = &self.excluded_segments;
        self.leaves = expansion
            .leaves
            .into_iter()
            .filter(|sourced| !segments.iter().any(|s| s.overlaps(&sourced.leaf)))
            .collect();
    }
}

/// Parameters for admitting a new session.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub targets: Vec<StreamTarget>,
    pub program: EffectProgram,
    pub fps: u32,
    pub owner: SessionOwner,
    pub brightness: f64,
}

/// Result of a shrink operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShrinkOutcome {
    /// Leaves were removed and the session keeps running.
    Shrunk { remaining: usize },
    /// Nothing the session streams to matched the exclusion.
    Unchanged,
    /// The exclusion emptied the session, so it was stopped.
    Stopped,
    /// The session id is unknown or already stopped.
    NotActive,
}

/// Journal entry describing one registry mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryChange {
    Started(SessionId),
    Shrunk(SessionId),
    Brightness(SessionId, f64),
    Stopped {
        session: StreamingSession,
        reason: StopReason,
    },
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: BTreeMap<SessionId, StreamingSession>,
    next_id: u64,
    journal: Vec<RegistryChange>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    pub fn get(&self, id: SessionId) -> Option<&StreamingSession> {
        self.sessions.get(&id)
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Sessions in id order.
    pub fn sessions(&self) -> impl Iterator<Item = &StreamingSession> {
        self.sessions.values()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn owned_by(&self, owner: &SessionOwner) -> Vec<SessionId> {
        self.sessions
            .values()
            .filter(|s| &s.owner == owner)
            .map(|s| s.id)
            .collect()
    }

    /// Take the changes recorded since the last drain.
    pub fn drain_changes(&mut self) -> Vec<RegistryChange> {
        std::mem::take(&mut self.journal)
    }

    /// Conflicts between `candidate` and every running session. Read-only.
    pub fn check_conflicts(&self, candidate: &[LeafTarget]) -> Vec<Conflict> {
        detect_conflicts(
            candidate,
            self.sessions
                .values()
                .map(|s| (s.id, s.effective_leaves())),
        )
    }

    /// Admit a session for `request`, resolving overlap according to `policy`.
    ///
    /// With [`AdmissionPolicy::Confirm`] a non-empty conflict set is returned
    /// as [`OrchestratorError::Conflict`] and nothing changes.
    pub fn start(
        &mut self,
        topology: &Topology,
        request: StartRequest,
        policy: AdmissionPolicy,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<SessionId> {
        if request.targets.is_empty() {
            return Err(OrchestratorError::validation("a session needs at least one target"));
        }

        let expansion = topology.expand_with_report(&request.targets, &[]);
        for skipped in &expansion.skipped {
            log_warning!("Skipping target: {skipped}");
        }
        if expansion.leaves.is_empty() {
            return Err(OrchestratorError::validation(format!(
                "targets [{}] resolve to no devices",
                request
                    .targets
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        let candidate = expansion.leaf_targets();
        let conflicts = self.check_conflicts(&candidate);
        if !conflicts.is_empty() {
            match policy {
                AdmissionPolicy::Confirm => return Err(OrchestratorError::Conflict(conflicts)),
                AdmissionPolicy::Stop => {
                    for conflict in &conflicts {
                        self.stop(conflict.session_id, StopReason::Preempted);
                    }
                }
                AdmissionPolicy::Shed => {
                    for conflict in &conflicts {
                        if conflict.can_partial_stop {
                            self.shed_leaves(topology, conflict.session_id, &conflict.overlapping_leaves);
                        } else {
                            self.stop(conflict.session_id, StopReason::Preempted);
                        }
                    }
                }
            }
        }

        let id = SessionId(self.next_id);
        self.next_id += 1;

        self.sessions.insert(
            id,
            StreamingSession {
                id,
                targets: request.targets,
                excluded_devices: Vec::new(),
                excluded_segments: Vec::new(),
                program: request.program,
                fps: request.fps,
                owner: request.owner,
                phase: SessionPhase::Starting,
                brightness: request.brightness.clamp(0.0, 1.0),
                created_at: now,
                leaves: expansion.leaves,
            },
        );
        self.journal.push(RegistryChange::Started(id));
        Ok(id)
    }

    /// Stop a session. Returns `false` if it was not running; that is not an error.
    pub fn stop(&mut self, id: SessionId, reason: StopReason) -> bool {
        let Some(mut session) = self.sessions.remove(&id) else {
            return false;
        };
        session.phase = SessionPhase::Stopped;
        self.journal.push(RegistryChange::Stopped { session, reason });
        true
    }

    /// Stop every session, returning the ids that were running.
    pub fn stop_all(&mut self, reason: StopReason) -> Vec<SessionId> {
        let ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        for id in &ids {
            self.stop(*id, reason.clone());
        }
        ids
    }

    pub fn exclude_device(
        &mut self,
        topology: &Topology,
        id: SessionId,
        device_id: &str,
    ) -> ShrinkOutcome {
        let Some(session) = self.sessions.get_mut(&id) else {
            return ShrinkOutcome::NotActive;
        };
        if !session.excluded_devices.iter().any(|d| d == device_id) {
            session.excluded_devices.push(device_id.to_string());
        }
        self.after_exclusion(topology, id)
    }

    pub fn exclude_segment(
        &mut self,
        topology: &Topology,
        id: SessionId,
        device_id: &str,
        start_led: u32,
        end_led: u32,
    ) -> OrchestratorResult<ShrinkOutcome> {
        if start_led > end_led {
            return Err(OrchestratorError::validation(format!(
                "segment start {start_led} is after end {end_led}"
            )));
        }
        let Some(session) = self.sessions.get_mut(&id) else {
            return Ok(ShrinkOutcome::NotActive);
        };
        let segment = LeafTarget::segment(device_id, start_led, end_led);
        if !session.excluded_segments.contains(&segment) {
            session.excluded_segments.push(segment);
        }
        Ok(self.after_exclusion(topology, id))
    }

    /// Shrink or stop every session touching `leaf`.
    pub fn stop_all_for_target(
        &mut self,
        topology: &Topology,
        leaf: &LeafTarget,
    ) -> Vec<(SessionId, ShrinkOutcome)> {
        let touching: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| s.leaves.iter().any(|owned| owned.leaf.overlaps(leaf)))
            .map(|s| s.id)
            .collect();

        touching
            .into_iter()
            .map(|id| {
                let outcome = match leaf.bounds() {
                    Some((start, end)) if !leaf.is_whole_device() => self
                        .exclude_segment(topology, id, &leaf.device_id, start, end)
                        .unwrap_or(ShrinkOutcome::Unchanged),
                    _ => self.exclude_device(topology, id, &leaf.device_id),
                };
                (id, outcome)
            })
            .collect()
    }

    pub fn set_brightness(&mut self, id: SessionId, level: f64) -> bool {
        let Some(session) = self.sessions.get_mut(&id) else {
            return false;
        };
        let level = level.clamp(0.0, 1.0);
        if (session.brightness - level).abs() > f64::EPSILON {
            session.brightness = level;
            self.journal.push(RegistryChange::Brightness(id, level));
        }
        true
    }

    /// Backend acknowledged a start or an exclusion update.
    pub fn mark_active(&mut self, id: SessionId) -> bool {
        match self.sessions.get_mut(&id) {
            Some(session) => {
                session.phase = SessionPhase::Active;
                true
            }
            None => false,
        }
    }

    /// Backend gave up on starting the stream.
    pub fn mark_failed(&mut self, id: SessionId, message: impl Into<String>) -> bool {
        self.stop(id, StopReason::Failed(message.into()))
    }

    /// Re-expand every session against a new topology.
    pub fn revalidate(&mut self, topology: &Topology) {
        let ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        for id in ids {
            let Some(session) = self.sessions.get_mut(&id) else {
                continue;
            };
            let before = session.leaves.clone();
            session.recompute(topology);
            if session.leaves.is_empty() {
                self.stop(id, StopReason::TopologyChanged);
            } else if session.leaves != before {
                self.journal.push(RegistryChange::Shrunk(id));
            }
        }
    }

    fn shed_leaves(&mut self, topology: &Topology, id: SessionId, leaves: &[LeafTarget]) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        for leaf in leaves {
            if leaf.is_whole_device() {
                if !session.excluded_devices.contains(&leaf.device_id) {
                    session.excluded_devices.push(leaf.device_id.clone());
                }
            } else if !session.excluded_segments.contains(leaf) {
                session.excluded_segments.push(leaf.clone());
            }
        }
        self.after_exclusion(topology, id);
    }

    fn after_exclusion(&mut self, topology: &Topology, id: SessionId) -> ShrinkOutcome {
        let Some(session) = self.sessions.get_mut(&id) else {
            return ShrinkOutcome::NotActive;
        };
        let before = session.leaves.len();
        session.recompute(topology);
        let remaining = session.leaves.len();

        if remaining == 0 {
            self.stop(id, StopReason::Emptied);
            ShrinkOutcome::Stopped
        } else if remaining == before {
            ShrinkOutcome::Unchanged
        } else {
            session.phase = SessionPhase::Shrinking;
            self.journal.push(RegistryChange::Shrunk(id));
            ShrinkOutcome::Shrunk { remaining }
        }
    }
}
