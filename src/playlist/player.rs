//! Playlist playback state machine.
//!
//! ```text
//! Idle -> Playing -> { Playing (advance) | Finished | Stopped }
//! ```
//!
//! Only one playlist plays at a time. Each item start arms a single advance
//! timer tagged with the playlist id, the playback epoch and the next
//! position; [`PlaylistPlayer::advance`] ignores any timer whose tag does not
//! match the current playback. Every terminal transition produces exactly one
//! [`PlayerEvent::Stopped`].

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::core::context::PlaybackEnv;
use crate::core::timers::TimerKind;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::playlist::order::{PlaybackOrder, Step};
use crate::playlist::Playlist;
use crate::session::{AdmissionPolicy, SessionId, SessionOwner, StartRequest, StopReason};
use crate::state::playback::ActivePlaybackRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerPhase {
    Idle,
    Playing,
    Finished,
    Stopped,
}

/// Why a playback ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum PlaybackEnd {
    /// A non-looping playlist ran out of items.
    Finished,
    /// Stopped on request.
    Stopped,
    /// Another playlist was started.
    Replaced,
    /// The playlist's session was taken over or torn down by someone else.
    Preempted,
    /// Resolving or starting an item failed.
    Aborted(String),
}

/// Runtime state of the playlist that is playing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaylistPlaybackState {
    pub playlist_id: String,
    pub session_id: Option<SessionId>,
    /// Position in the play order.
    pub current_index: usize,
    pub order: PlaybackOrder,
    pub item_started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub epoch: u64,
}

impl PlaylistPlaybackState {
    pub fn record(&self) -> ActivePlaybackRecord {
        ActivePlaybackRecord {
            playlist_id: self.playlist_id.clone(),
            position: self.current_index,
            order: self.order.as_slice().to_vec(),
            item_started_at: self.item_started_at,
            epoch: self.epoch,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    Started {
        playlist_id: String,
        session_id: SessionId,
    },
    /// A new item started; persist this record.
    ItemStarted(ActivePlaybackRecord),
    /// Playback ended; the durable record should be removed.
    Stopped {
        playlist_id: String,
        session_id: Option<SessionId>,
        reason: PlaybackEnd,
    },
}

#[derive(Debug)]
pub struct PlaylistPlayer {
    phase: PlayerPhase,
    active: Option<PlaylistPlaybackState>,
    epoch: u64,
    events: Vec<PlayerEvent>,
}

impl Default for PlaylistPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaylistPlayer {
    pub fn new() -> Self {
        Self {
            phase: PlayerPhase::Idle,
            active: None,
            epoch: 0,
            events: Vec::new(),
        }
    }

    pub fn phase(&self) -> PlayerPhase {
        self.phase
    }

    pub fn active(&self) -> Option<&PlaylistPlaybackState> {
        self.active.as_ref()
    }

    pub fn drain_events(&mut self) -> Vec<PlayerEvent> {
        std::mem::take(&mut self.events)
    }

    /// Start playing `playlist_id` from its first item, replacing any current playback.
    ///
    /// Invalid playlists are rejected before anything changes. Failures while
    /// starting the first item abort the playback and are returned.
    pub fn play(
        &mut self,
        env: &mut PlaybackEnv<'_>,
        playlist_id: &str,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<SessionId> {
        let catalog = env.catalog;
        let playlist = catalog.playlist(playlist_id)?;
        playlist.validate(&catalog.presets)?;

        if self.active.is_some() {
            self.end(env, PlaybackEnd::Replaced, StopReason::OwnerStopped);
        }

        self.epoch += 1;
        let order = PlaybackOrder::new(playlist.items.len(), playlist.shuffle, playlist.looping, env.rng);
        self.active = Some(PlaylistPlaybackState {
            playlist_id: playlist_id.to_string(),
            session_id: None,
            current_index: 0,
            order,
            item_started_at: now,
            expires_at: now,
            epoch: self.epoch,
        });
        self.phase = PlayerPhase::Playing;
        log_decorated!("Playing playlist '{}'", playlist.name);

        match self.step(env, 0, now) {
            Ok(Some(session_id)) => {
                self.events.push(PlayerEvent::Started {
                    playlist_id: playlist_id.to_string(),
                    session_id,
                });
                Ok(session_id)
            }
            Ok(None) => Err(OrchestratorError::validation(format!(
                "playlist '{playlist_id}' has nothing to play"
            ))),
            Err(e) => {
                self.abort(env, &e);
                Err(e)
            }
        }
    }

    /// Handle an advance timer. Stale timers are ignored.
    pub fn advance(
        &mut self,
        env: &mut PlaybackEnv<'_>,
        playlist_id: &str,
        epoch: u64,
        index: usize,
        now: DateTime<Utc>,
    ) {
        let current = match &self.active {
            Some(active) if self.phase == PlayerPhase::Playing => active,
            _ => return,
        };
        if current.playlist_id != playlist_id || current.epoch != epoch {
            log_debug!("Ignoring stale advance for '{playlist_id}' (epoch {epoch})");
            return;
        }

        if let Err(e) = self.step(env, index, now) {
            self.abort(env, &e);
        }
    }

    /// Stop playback and its session.
    ///
    /// The playlist's own session is stopped when known; otherwise every
    /// playlist-owned session is stopped so nothing is left orphaned.
    /// Returns the id of the playlist that was playing.
    pub fn stop(&mut self, env: &mut PlaybackEnv<'_>) -> Option<String> {
        let Some(active) = &self.active else {
            stop_playlist_sessions(env, None);
            self.phase = PlayerPhase::Idle;
            return None;
        };
        let playlist_id = active.playlist_id.clone();
        self.end(env, PlaybackEnd::Stopped, StopReason::OwnerStopped);
        self.phase = PlayerPhase::Idle;
        log_decorated!("Stopped playlist '{playlist_id}'");
        Some(playlist_id)
    }

    /// A session was stopped outside the player's control.
    pub fn on_session_lost(&mut self, env: &mut PlaybackEnv<'_>, session_id: SessionId, reason: &StopReason) {
        let owns = self
            .active
            .as_ref()
            .is_some_and(|active| active.session_id == Some(session_id));
        if !owns {
            return;
        }
        let end = match reason {
            StopReason::Failed(message) => PlaybackEnd::Aborted(message.clone()),
            _ => PlaybackEnd::Preempted,
        };
        log_warning!("Playlist session {session_id} stopped ({reason}); ending playback");
        self.end(env, end, StopReason::OwnerStopped);
        self.phase = PlayerPhase::Stopped;
    }

    /// Re-check the active playback after the catalog changed.
    pub fn on_catalog_changed(&mut self, env: &mut PlaybackEnv<'_>) {
        let Some(active) = &self.active else {
            return;
        };
        let playlist_id = active.playlist_id.clone();
        let catalog = env.catalog;
        let valid = catalog
            .playlist(&playlist_id)
            .and_then(|playlist| playlist.validate(&catalog.presets));
        if let Err(e) = valid {
            log_warning!("Playlist '{playlist_id}' is no longer playable: {e}");
            self.abort(env, &e);
        }
    }

    /// Resume playback from a durable record.
    ///
    /// The current position is derived from elapsed time by walking item
    /// durations in the recorded order. If the playlist changed shape since
    /// the record was written, the recorded position restarts from now.
    pub fn resume(
        &mut self,
        env: &mut PlaybackEnv<'_>,
        record: &ActivePlaybackRecord,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<Option<SessionId>> {
        let catalog = env.catalog;
        let playlist = catalog.playlist(&record.playlist_id)?;
        playlist.validate(&catalog.presets)?;
        let len = playlist.items.len();

        self.epoch = self.epoch.max(record.epoch) + 1;
        let (order, position, started_at) = match PlaybackOrder::restore(
            record.order.clone(),
            len,
            playlist.shuffle,
            playlist.looping,
        ) {
            Some(order) => match locate(playlist, &order, record.position, record.item_started_at, now) {
                Some((position, started_at)) => (order, position, started_at),
                None => {
                    log_decorated!("Playlist '{}' finished while not running", playlist.name);
                    self.phase = PlayerPhase::Finished;
                    self.events.push(PlayerEvent::Stopped {
                        playlist_id: record.playlist_id.clone(),
                        session_id: None,
                        reason: PlaybackEnd::Finished,
                    });
                    return Ok(None);
                }
            },
            None => {
                let order = PlaybackOrder::new(len, playlist.shuffle, playlist.looping, env.rng);
                (order, record.position.min(len - 1), now)
            }
        };

        self.active = Some(PlaylistPlaybackState {
            playlist_id: record.playlist_id.clone(),
            session_id: None,
            current_index: position,
            order,
            item_started_at: started_at,
            expires_at: started_at,
            epoch: self.epoch,
        });
        self.phase = PlayerPhase::Playing;
        log_decorated!("Resuming playlist '{}' at position {position}", playlist.name);

        let item = self
            .active
            .as_ref()
            .and_then(|active| active.order.item_at(position))
            .unwrap_or(0);
        match self.launch(env, position, item, started_at, now) {
            Ok(session_id) => {
                self.events.push(PlayerEvent::Started {
                    playlist_id: record.playlist_id.clone(),
                    session_id,
                });
                Ok(Some(session_id))
            }
            Err(e) => {
                self.abort(env, &e);
                Err(e)
            }
        }
    }

    /// Move to `position`, starting its item or finishing.
    fn step(
        &mut self,
        env: &mut PlaybackEnv<'_>,
        position: usize,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<Option<SessionId>> {
        let catalog = env.catalog;
        let Some(active) = self.active.as_mut() else {
            return Ok(None);
        };
        let playlist = catalog.playlist(&active.playlist_id)?;
        if active.order.len() != playlist.items.len() {
            active.order = PlaybackOrder::new(playlist.items.len(), playlist.shuffle, playlist.looping, env.rng);
        }

        match active.order.step_to(position, env.rng) {
            Step::Finished => {
                log_decorated!("Playlist '{}' finished", playlist.name);
                self.end(env, PlaybackEnd::Finished, StopReason::Finished);
                self.phase = PlayerPhase::Finished;
                Ok(None)
            }
            Step::Play { position, item } => self.launch(env, position, item, now, now).map(Some),
        }
    }

    /// Replace the playlist's session with one for `item` and arm the next advance.
    fn launch(
        &mut self,
        env: &mut PlaybackEnv<'_>,
        position: usize,
        item: usize,
        started_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<SessionId> {
        let catalog = env.catalog;
        let Some(active) = self.active.as_mut() else {
            return Err(OrchestratorError::validation("no playlist is playing"));
        };
        let playlist = catalog.playlist(&active.playlist_id)?;
        let entry = playlist
            .items
            .get(item)
            .ok_or_else(|| OrchestratorError::not_found("playlist item", item.to_string()))?;
        let program = catalog.preset(&entry.preset_id)?.program()?;

        if let Some(previous) = active.session_id.take() {
            env.registry.stop(previous, StopReason::Replaced);
        }

        let session_id = env.registry.start(
            &catalog.topology,
            StartRequest {
                targets: playlist.targets.clone(),
                program,
                fps: playlist.fps.unwrap_or(env.default_fps),
                owner: SessionOwner::Playlist(playlist.id.clone()),
                brightness: 1.0,
            },
            AdmissionPolicy::Stop,
            now,
        )?;

        let expires_at = started_at + Duration::seconds(entry.duration as i64);
        active.session_id = Some(session_id);
        active.current_index = position;
        active.item_started_at = started_at;
        active.expires_at = expires_at;

        env.timers.cancel_playlist(&active.playlist_id);
        env.timers.arm(
            expires_at,
            TimerKind::PlaylistAdvance {
                playlist_id: active.playlist_id.clone(),
                epoch: active.epoch,
                index: position + 1,
            },
        );
        log_indented!(
            "Item {} '{}' on session {session_id} for {}s",
            position + 1,
            entry.preset_id,
            entry.duration
        );
        self.events.push(PlayerEvent::ItemStarted(active.record()));
        Ok(session_id)
    }

    fn abort(&mut self, env: &mut PlaybackEnv<'_>, error: &OrchestratorError) {
        if self.active.is_none() {
            return;
        }
        log_error!("Playlist playback aborted: {error}");
        self.end(env, PlaybackEnd::Aborted(error.to_string()), StopReason::OwnerStopped);
        self.phase = PlayerPhase::Stopped;
    }

    /// Tear down the active playback: cancel its timer, stop its session, emit one event.
    fn end(&mut self, env: &mut PlaybackEnv<'_>, end: PlaybackEnd, reason: StopReason) {
        let Some(active) = self.active.take() else {
            return;
        };
        env.timers.cancel_playlist(&active.playlist_id);
        match active.session_id {
            Some(session_id) if env.registry.contains(session_id) => {
                env.registry.stop(session_id, reason);
            }
            Some(_) => {}
            None if end != PlaybackEnd::Preempted && end != PlaybackEnd::Finished => {
                stop_playlist_sessions(env, Some(&active.playlist_id));
            }
            None => {}
        }
        self.events.push(PlayerEvent::Stopped {
            playlist_id: active.playlist_id,
            session_id: active.session_id,
            reason: end,
        });
    }
}

/// Stop sessions owned by `playlist_id`, or by any playlist when `None`.
fn stop_playlist_sessions(env: &mut PlaybackEnv<'_>, playlist_id: Option<&str>) {
    let owned: Vec<SessionId> = env
        .registry
        .sessions()
        .filter(|session| match (&session.owner, playlist_id) {
            (SessionOwner::Playlist(owner), Some(id)) => owner == id,
            (SessionOwner::Playlist(_), None) => true,
            _ => false,
        })
        .map(|session| session.id)
        .collect();
    for id in owned {
        env.registry.stop(id, StopReason::OwnerStopped);
    }
}

/// Walk item durations from a recorded position to find where playback should be now.
///
/// Returns the position and the instant its item started, or `None` when a
/// non-looping playlist has run past its last item.
fn locate(
    playlist: &Playlist,
    order: &PlaybackOrder,
    recorded_position: usize,
    item_started_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<(usize, DateTime<Utc>)> {
    let len = order.len();
    let duration_at = |position: usize| -> Duration {
        let seconds = order
            .item_at(position)
            .and_then(|item| playlist.items.get(item))
            .map(|item| item.duration)
            .unwrap_or(1);
        Duration::seconds(seconds as i64)
    };

    let mut position = recorded_position.min(len.saturating_sub(1));
    let mut started = item_started_at;

    if order.is_looping() {
        let pass = Duration::seconds(playlist.total_duration() as i64);
        if pass > Duration::zero() && now - started > pass {
            let passes = (now - started).num_seconds() / pass.num_seconds();
            started += Duration::seconds(pass.num_seconds() * passes);
        }
    }

    loop {
        let ends = started + duration_at(position);
        if ends > now {
            return Some((position, started));
        }
        started = ends;
        position += 1;
        if position >= len {
            if !order.is_looping() {
                return None;
            }
            position = 0;
        }
    }
}
