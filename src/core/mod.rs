//! The orchestrator actor.
//!
//! [`Orchestrator`] owns the session registry, the playlist player, the rule
//! scheduler and the timer queue. It is driven from a single thread: every
//! entry point takes the current instant, runs to completion and leaves its
//! side effects in an [`Outbox`] that the runtime flushes afterwards:
//!
//! - stream commands for the dispatcher
//! - events for connected observers
//! - updates to the durable playback record
//!
//! Nothing in here touches hardware, sockets or the filesystem, so the whole
//! state machine can be exercised with explicit instants in tests.

pub mod context;
pub mod runtime;
pub mod timers;

#[cfg(test)]
mod tests;

use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::HashSet;
use std::sync::Arc;

use crate::api::{
    ActivePlaylist, ApiRequest, ApiResponse, ApiResult, ObserverEvent, PlaylistSummary,
    SessionSummary, Snapshot,
};
use crate::backend::{DispatchOutcome, DispatchReport, StreamCommand, StreamSpec};
use crate::catalog::Catalog;
use crate::config::{Loaded, Settings};
use crate::constants::{MAXIMUM_FPS, MINIMUM_FPS};
use crate::core::context::PlaybackEnv;
use crate::core::timers::{TimerKind, TimerQueue};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::playlist::{PlayerEvent, PlayerPhase, PlaylistPlayer};
use crate::preset::EffectProgram;
use crate::schedule::engine::{RuleScheduler, SchedulerEvent};
use crate::schedule::window::CalendarContext;
use crate::session::{
    RegistryChange, SessionId, SessionOwner, SessionRegistry, ShrinkOutcome,
    StartRequest, StopReason, StreamingSession,
};
use crate::state::playback::ActivePlaybackRecord;

/// Change to the durable active-playback record.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackUpdate {
    Save(ActivePlaybackRecord),
    Clear,
}

/// Side effects of one or more steps, in the order they happened.
#[derive(Debug, Default)]
pub struct Outbox {
    pub commands: Vec<StreamCommand>,
    pub events: Vec<ObserverEvent>,
    pub playback: Vec<PlaybackUpdate>,
}

impl Outbox {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty() && self.events.is_empty() && self.playback.is_empty()
    }
}

pub struct Orchestrator {
    settings: Settings,
    catalog: Arc<Catalog>,
    registry: SessionRegistry,
    player: PlaylistPlayer,
    scheduler: RuleScheduler,
    timers: TimerQueue,
    rng: StdRng,
    outbox: Outbox,
    /// Sessions admitted and removed within one step; the backend never saw them.
    unsent: HashSet<SessionId>,
}

impl Orchestrator {
    /// Build an orchestrator for `loaded`. A fixed `seed` makes shuffles reproducible.
    pub fn new(loaded: Loaded, seed: Option<u64>) -> Self {
        Self {
            settings: loaded.settings,
            catalog: Arc::new(loaded.catalog),
            registry: SessionRegistry::new(),
            player: PlaylistPlayer::new(),
            scheduler: RuleScheduler::new(),
            timers: TimerQueue::new(),
            rng: seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64),
            outbox: Outbox::default(),
            unsent: HashSet::new(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn player(&self) -> &PlaylistPlayer {
        &self.player
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.timers.next_deadline()
    }

    pub fn take_outbox(&mut self) -> Outbox {
        std::mem::take(&mut self.outbox)
    }

    fn parts(&mut self) -> (PlaybackEnv<'_>, &mut PlaylistPlayer, &mut RuleScheduler) {
        (
            PlaybackEnv {
                registry: &mut self.registry,
                timers: &mut self.timers,
                catalog: &self.catalog,
                rng: &mut self.rng,
                default_fps: self.settings.default_fps,
            },
            &mut self.player,
            &mut self.scheduler,
        )
    }

    /// First step after startup: resume an interrupted playlist, then evaluate rules.
    pub fn boot(&mut self, record: Option<ActivePlaybackRecord>, now: DateTime<Utc>) {
        if let Some(record) = record {
            if self.settings.resume_playback {
                self.resume(&record, now);
            } else {
                self.outbox.playback.push(PlaybackUpdate::Clear);
            }
        }
        self.evaluate_rules(now);
        self.settle();
    }

    fn resume(&mut self, record: &ActivePlaybackRecord, now: DateTime<Utc>) {
        let (mut env, player, _) = self.parts();
        match player.resume(&mut env, record, now) {
            Ok(Some(session_id)) => {
                log_block_start!(
                    "Resumed playlist '{}' in session {session_id}",
                    record.playlist_id
                );
            }
            Ok(None) => {}
            Err(e) => {
                log_warning!("Cannot resume playlist '{}': {e}", record.playlist_id);
                self.outbox.playback.push(PlaybackUpdate::Clear);
            }
        }
    }

    /// Handle one request from an observer.
    pub fn handle_request(&mut self, request: ApiRequest, now: DateTime<Utc>) -> ApiResponse {
        let result = self.dispatch_request(request, now);
        self.settle();
        match result {
            Ok(result) => ApiResponse::ok(result),
            Err(e) => {
                log_debug!("Request failed: {e}");
                e.into()
            }
        }
    }

    fn dispatch_request(
        &mut self,
        request: ApiRequest,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<ApiResult> {
        match request {
            ApiRequest::ListPlaylists => Ok(ApiResult::Playlists(self.playlist_summaries())),
            ApiRequest::ActivePlaylist => Ok(ApiResult::ActivePlaylist {
                active_playlist: self.active_playlist(),
            }),
            ApiRequest::PlayPlaylist { playlist_id } => {
                let (mut env, player, _) = self.parts();
                let id = player.play(&mut env, &playlist_id, now)?;
                Ok(ApiResult::Started { id })
            }
            ApiRequest::StopPlaylist => {
                let (mut env, player, _) = self.parts();
                let playlist_id = player.stop(&mut env);
                Ok(ApiResult::PlaylistStopped { playlist_id })
            }
            ApiRequest::StartStream {
                targets,
                preset_id,
                effect,
                layers,
                fps,
                playlist_id,
                policy,
            } => {
                let program = self.program_for(preset_id, effect, layers)?;
                let fps = fps.unwrap_or(self.settings.default_fps);
                if !(MINIMUM_FPS..=MAXIMUM_FPS).contains(&fps) {
                    return Err(OrchestratorError::validation(format!(
                        "fps {fps} must be between {MINIMUM_FPS} and {MAXIMUM_FPS}"
                    )));
                }
                let owner = playlist_id.map_or(SessionOwner::Interactive, SessionOwner::Playlist);
                let request = StartRequest {
                    targets,
                    program,
                    fps,
                    owner,
                    brightness: 1.0,
                };
                let id = self
                    .registry
                    .start(&self.catalog.topology, request, policy, now)?;
                Ok(ApiResult::Started { id })
            }
            ApiRequest::StopStream { session_id } => Ok(ApiResult::Stopped {
                stopped: self.registry.stop(session_id, StopReason::Requested),
            }),
            ApiRequest::StopAll => Ok(ApiResult::StoppedAll {
                sessions: self.stop_all(),
            }),
            ApiRequest::StopTarget { target } => Ok(ApiResult::TargetStopped {
                sessions: self
                    .registry
                    .stop_all_for_target(&self.catalog.topology, &target),
            }),
            ApiRequest::CheckConflicts { targets } => {
                let candidate = self.catalog.topology.expand(&targets, &[]);
                let conflicts = self.registry.check_conflicts(&candidate);
                Ok(ApiResult::Conflicts {
                    has_conflicts: !conflicts.is_empty(),
                    conflicts,
                })
            }
            ApiRequest::ExcludeDevice {
                session_id,
                device_id,
            } => {
                let outcome =
                    self.registry
                        .exclude_device(&self.catalog.topology, session_id, &device_id);
                shrink_result(session_id, outcome)
            }
            ApiRequest::ExcludeSegment {
                session_id,
                device_id,
                start_led,
                end_led,
            } => {
                let outcome = self.registry.exclude_segment(
                    &self.catalog.topology,
                    session_id,
                    &device_id,
                    start_led,
                    end_led,
                )?;
                shrink_result(session_id, outcome)
            }
            ApiRequest::ListSessions => Ok(ApiResult::Sessions(self.session_summaries())),
            ApiRequest::PreviewTargets {
                targets,
                exclusions,
            } => {
                let expansion = self
                    .catalog
                    .topology
                    .expand_with_report(&targets, &exclusions);
                Ok(ApiResult::Preview {
                    leaves: expansion.leaf_targets(),
                    skipped: expansion.skipped.iter().map(ToString::to_string).collect(),
                })
            }
            ApiRequest::RuleStatus => {
                let catalog = Arc::clone(&self.catalog);
                let ctx = calendar_context(&self.settings, &catalog);
                Ok(ApiResult::Rules(self.scheduler.status(&catalog.rules, &ctx, now)))
            }
            ApiRequest::Snapshot => Ok(ApiResult::Snapshot(self.snapshot())),
        }
    }

    fn program_for(
        &self,
        preset_id: Option<String>,
        effect: Option<serde_json::Value>,
        layers: Vec<serde_json::Value>,
    ) -> OrchestratorResult<EffectProgram> {
        match (preset_id, effect, layers.is_empty()) {
            (Some(id), None, true) => self.catalog.preset(&id)?.program(),
            (None, Some(effect), true) => Ok(EffectProgram::Effect(effect)),
            (None, None, false) => Ok(EffectProgram::Layers(layers)),
            _ => Err(OrchestratorError::validation(
                "give exactly one of preset_id, effect or layers",
            )),
        }
    }

    /// Stop the playing playlist, then every remaining session.
    fn stop_all(&mut self) -> Vec<SessionId> {
        let mut stopped: Vec<SessionId> = self.registry.sessions().map(|s| s.id).collect();
        let (mut env, player, _) = self.parts();
        player.stop(&mut env);
        self.registry.stop_all(StopReason::StopAll);
        stopped.sort();
        stopped
    }

    /// Fire every timer due at `now`.
    pub fn fire_due(&mut self, now: DateTime<Utc>) {
        for timer in self.timers.pop_due(now) {
            match timer {
                TimerKind::PlaylistAdvance {
                    playlist_id,
                    epoch,
                    index,
                } => {
                    let (mut env, player, _) = self.parts();
                    player.advance(&mut env, &playlist_id, epoch, index, now);
                }
                TimerKind::RuleAdvance {
                    rule_id,
                    epoch,
                    index,
                } => {
                    let (mut env, _, scheduler) = self.parts();
                    scheduler.advance(&mut env, &rule_id, epoch, index, now);
                }
                TimerKind::ScheduleTick => self.evaluate_rules(now),
            }
            self.settle();
        }
    }

    /// Evaluate schedule rules now and re-arm the tick for the next evaluation.
    pub fn evaluate_rules(&mut self, now: DateTime<Utc>) {
        let catalog = Arc::clone(&self.catalog);
        let ctx = calendar_context(&self.settings, &catalog);
        let cadence = self.settings.cadence();
        let (mut env, _, scheduler) = self.parts();
        let next = scheduler.tick(&mut env, &ctx, now, cadence);

        self.timers
            .cancel_where(|kind| matches!(kind, TimerKind::ScheduleTick));
        self.timers.arm(next, TimerKind::ScheduleTick);
    }

    /// Feed back the final outcome of a backend command.
    pub fn on_dispatch(&mut self, report: DispatchReport) {
        let session_id = report.command.session_id();
        match (&report.command, &report.outcome) {
            (StreamCommand::Start(_) | StreamCommand::Update { .. }, DispatchOutcome::Delivered) => {
                self.registry.mark_active(session_id);
            }
            (StreamCommand::Start(_), DispatchOutcome::Failed(message)) => {
                let error = OrchestratorError::TransientHardware(message.clone());
                log_error!(
                    "Session {session_id} could not start after {} attempt(s): {message}",
                    report.attempts
                );
                self.registry.mark_failed(session_id, error.to_string());
            }
            (command, DispatchOutcome::Failed(message)) => {
                log_warning!("Backend rejected '{command}': {message}");
            }
            _ => {}
        }
        self.settle();
    }

    /// Swap in a freshly validated configuration.
    pub fn reload(&mut self, loaded: Loaded, now: DateTime<Utc>) {
        if loaded.settings.retry != self.settings.retry || loaded.settings.backend != self.settings.backend
        {
            log_indented!("Backend and retry settings take effect after a restart");
        }
        self.settings = loaded.settings;
        self.catalog = Arc::new(loaded.catalog);

        self.registry.revalidate(&self.catalog.topology);
        let (mut env, player, _) = self.parts();
        player.on_catalog_changed(&mut env);
        self.evaluate_rules(now);
        self.settle();
    }

    /// Stop every stream, keeping the playback record so the playlist can resume.
    pub fn shutdown(&mut self) {
        self.timers.cancel_where(|_| true);
        self.registry.stop_all(StopReason::Shutdown);
        self.settle();
    }

    pub fn active_playlist(&self) -> Option<ActivePlaylist> {
        if self.player.phase() != PlayerPhase::Playing {
            return None;
        }
        self.player.active().map(|active| ActivePlaylist {
            playlist_id: active.playlist_id.clone(),
            session_id: active.session_id,
        })
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            active_playlist: self.active_playlist(),
            sessions: self.session_summaries(),
        }
    }

    fn session_summaries(&self) -> Vec<SessionSummary> {
        self.registry.sessions().map(SessionSummary::from).collect()
    }

    fn playlist_summaries(&self) -> Vec<PlaylistSummary> {
        let playing = self.active_playlist().map(|active| active.playlist_id);
        self.catalog
            .playlists
            .values()
            .map(|playlist| PlaylistSummary {
                id: playlist.id.clone(),
                name: playlist.name.clone(),
                items: playlist.items.len(),
                shuffle: playlist.shuffle,
                looping: playlist.looping,
                total_duration: playlist.items.iter().map(|item| item.duration).sum(),
                playing: playing.as_deref() == Some(playlist.id.as_str()),
            })
            .collect()
    }

    /// Turn everything the step changed into outbound effects, until quiet.
    ///
    /// Routing a lost session to its owner can stop or start more sessions,
    /// so this repeats until no component has anything left to report.
    fn settle(&mut self) {
        loop {
            let changes = self.registry.drain_changes();
            let player_events = self.player.drain_events();
            let rule_events = self.scheduler.drain_events();
            if changes.is_empty() && player_events.is_empty() && rule_events.is_empty() {
                break;
            }

            for change in changes {
                self.apply_change(change);
            }
            for event in player_events {
                self.apply_player_event(event);
            }
            for event in rule_events {
                self.outbox.events.push(match event {
                    SchedulerEvent::Activated {
                        rule_id,
                        session_id,
                    } => ObserverEvent::RuleActivated {
                        rule_id,
                        session_id,
                    },
                    SchedulerEvent::Deactivated {
                        rule_id,
                        session_id,
                        reason,
                    } => ObserverEvent::RuleDeactivated {
                        rule_id,
                        session_id,
                        reason,
                    },
                });
            }
        }
    }

    fn apply_change(&mut self, change: RegistryChange) {
        match change {
            RegistryChange::Started(id) => {
                let Some(session) = self.registry.get(id) else {
                    self.unsent.insert(id);
                    return;
                };
                let leaves = session.leaf_targets();
                log_debug!(
                    "Session {id} started for {} on {} leaves",
                    session.owner,
                    leaves.len()
                );
                self.outbox.commands.push(StreamCommand::Start(StreamSpec {
                    session_id: id,
                    leaves: leaves.clone(),
                    program: session.program.clone(),
                    fps: session.fps,
                    brightness: session.brightness,
                }));
                self.outbox.events.push(ObserverEvent::SessionStarted {
                    session_id: id,
                    owner: session.owner.clone(),
                    leaves,
                });
            }
            RegistryChange::Shrunk(id) => {
                if let Some(session) = self.registry.get(id) {
                    self.outbox.commands.push(StreamCommand::Update {
                        session_id: id,
                        leaves: session.leaf_targets(),
                    });
                }
            }
            RegistryChange::Brightness(id, level) => {
                if self.registry.contains(id) {
                    self.outbox.commands.push(StreamCommand::SetBrightness {
                        session_id: id,
                        level,
                    });
                }
            }
            RegistryChange::Stopped { session, reason } => {
                if !self.unsent.remove(&session.id) {
                    log_debug!("Session {} stopped ({reason})", session.id);
                    self.outbox
                        .commands
                        .push(StreamCommand::Stop { session_id: session.id });
                    self.outbox.events.push(ObserverEvent::StreamingStopped {
                        session_id: session.id,
                        reason: reason.clone(),
                    });
                }
                self.route_loss(&session, &reason);
            }
        }
    }

    /// Tell the owning playback that its session went away underneath it.
    fn route_loss(&mut self, session: &StreamingSession, reason: &StopReason) {
        let owned = matches!(
            session.owner,
            SessionOwner::Playlist(_) | SessionOwner::Rule(_)
        );
        let expected = matches!(
            reason,
            StopReason::Replaced
                | StopReason::Finished
                | StopReason::OwnerStopped
                | StopReason::Shutdown
        );
        if !owned || expected {
            return;
        }
        let (mut env, player, scheduler) = self.parts();
        player.on_session_lost(&mut env, session.id, reason);
        scheduler.on_session_lost(&mut env, session.id, reason);
    }

    fn apply_player_event(&mut self, event: PlayerEvent) {
        match event {
            PlayerEvent::Started {
                playlist_id,
                session_id,
            } => self.outbox.events.push(ObserverEvent::PlaylistStarted {
                playlist_id,
                session_id,
            }),
            PlayerEvent::ItemStarted(record) => {
                self.outbox.playback.push(PlaybackUpdate::Save(record));
            }
            PlayerEvent::Stopped {
                playlist_id,
                session_id,
                reason,
            } => {
                self.outbox.events.push(ObserverEvent::PlaylistStopped {
                    playlist_id,
                    session_id,
                    reason,
                });
                self.outbox.playback.push(PlaybackUpdate::Clear);
            }
        }
    }
}

fn shrink_result(session_id: SessionId, outcome: ShrinkOutcome) -> OrchestratorResult<ApiResult> {
    match outcome {
        ShrinkOutcome::NotActive => Err(OrchestratorError::not_found(
            "session",
            session_id.to_string(),
        )),
        outcome => Ok(ApiResult::Shrink { outcome }),
    }
}

fn calendar_context<'a>(settings: &Settings, catalog: &'a Catalog) -> CalendarContext<'a> {
    CalendarContext {
        timezone: settings.timezone,
        default_point: settings.default_point,
        holidays: &catalog.holidays,
    }
}
