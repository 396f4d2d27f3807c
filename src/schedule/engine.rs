//! Rule scheduler: starts, advances, ramps and stops rule-owned sessions.
//!
//! Each evaluation walks every rule, resolves the window containing `now`
//! and reconciles the rule's runtime with it. Inside a window the rule plays
//! its sequence with the same order semantics as a playlist; the last item of
//! a non-looping sequence is held until the window ends. Overlap with other
//! sessions is resolved by the registry, most recent start wins.

use chrono::{DateTime, Days, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::core::context::PlaybackEnv;
use crate::core::timers::TimerKind;
use crate::error::OrchestratorResult;
use crate::playlist::order::{PlaybackOrder, Step};
use crate::schedule::ramp::{brightness_at, is_ramping, next_ramp_edge};
use crate::schedule::window::{CalendarContext, RuleWindow, SolarCache, active_window, local_date, next_start};
use crate::schedule::ScheduleRule;
use crate::session::{AdmissionPolicy, SessionId, SessionOwner, StartRequest, StopReason};

/// Evaluation cadence handed in from configuration.
#[derive(Debug, Clone, Copy)]
pub struct Cadence {
    /// Upper bound between two evaluations.
    pub tick: Duration,
    /// Step between brightness updates while a ramp runs.
    pub ramp: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum DeactivationReason {
    WindowEnded,
    Disabled,
    Removed,
    Preempted,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    Activated {
        rule_id: String,
        session_id: SessionId,
    },
    Deactivated {
        rule_id: String,
        session_id: Option<SessionId>,
        reason: DeactivationReason,
    },
}

/// Runtime of a rule whose window is open.
#[derive(Debug, Clone)]
struct RuleRuntime {
    window: RuleWindow,
    session_id: Option<SessionId>,
    order: PlaybackOrder,
    position: usize,
    epoch: u64,
    brightness: f64,
    /// Lost its session or failed; stays quiet until the window closes.
    suspended: bool,
}

/// Snapshot of one rule for observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleStatus {
    pub rule_id: String,
    pub name: String,
    pub enabled: bool,
    pub active: bool,
    pub suspended: bool,
    pub session_id: Option<SessionId>,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub brightness: Option<f64>,
    pub next_start: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
pub struct RuleScheduler {
    active: BTreeMap<String, RuleRuntime>,
    epoch: u64,
    solar: SolarCache,
    /// Last calendar error reported per rule, so it is logged once.
    errors: HashMap<String, String>,
    events: Vec<SchedulerEvent>,
}

impl RuleScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain_events(&mut self) -> Vec<SchedulerEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn is_active(&self, rule_id: &str) -> bool {
        self.active
            .get(rule_id)
            .is_some_and(|runtime| !runtime.suspended)
    }

    pub fn session_of(&self, rule_id: &str) -> Option<SessionId> {
        self.active.get(rule_id).and_then(|runtime| runtime.session_id)
    }

    /// Evaluate every rule at `now`. Returns when the next evaluation is due.
    pub fn tick(
        &mut self,
        env: &mut PlaybackEnv<'_>,
        ctx: &CalendarContext<'_>,
        now: DateTime<Utc>,
        cadence: Cadence,
    ) -> DateTime<Utc> {
        let catalog = env.catalog;
        if let Some(horizon) = local_date(now, ctx).checked_sub_days(Days::new(3)) {
            self.solar.prune_before(horizon);
        }

        let removed: Vec<String> = self
            .active
            .keys()
            .filter(|id| catalog.rule(id).is_none())
            .cloned()
            .collect();
        for id in removed {
            self.deactivate(env, &id, DeactivationReason::Removed);
        }

        let mut next = now + cadence.tick;
        for rule in &catalog.rules {
            if !rule.enabled {
                self.deactivate(env, &rule.id, DeactivationReason::Disabled);
                continue;
            }

            let window = match active_window(rule, now, ctx, &mut self.solar) {
                Ok(window) => {
                    self.errors.remove(&rule.id);
                    window
                }
                Err(e) => {
                    let message = e.to_string();
                    if self.errors.get(&rule.id) != Some(&message) {
                        log_warning!("Rule '{}' cannot be evaluated: {message}", rule.id);
                        self.errors.insert(rule.id.clone(), message);
                    }
                    None
                }
            };

            match window {
                Some(window) => self.ensure_active(env, rule, window, now),
                None => self.deactivate(env, &rule.id, DeactivationReason::WindowEnded),
            }

            if let Some(runtime) = self.active.get(&rule.id) {
                next = next.min(runtime.window.end);
                if let Some(edge) = next_ramp_edge(&rule.ramp, &runtime.window, now) {
                    next = next.min(edge);
                }
                if !runtime.suspended && is_ramping(&rule.ramp, &runtime.window, now) {
                    next = next.min(now + cadence.ramp);
                }
            } else if let Some(start) = next_start(rule, now, ctx, &mut self.solar) {
                next = next.min(start);
            }
        }
        next
    }

    /// Handle a sequence advance timer. Stale timers are ignored.
    pub fn advance(
        &mut self,
        env: &mut PlaybackEnv<'_>,
        rule_id: &str,
        epoch: u64,
        index: usize,
        now: DateTime<Utc>,
    ) {
        let current = match self.active.get(rule_id) {
            Some(runtime) if runtime.epoch == epoch && !runtime.suspended => runtime,
            _ => {
                log_debug!("Ignoring stale advance for rule '{rule_id}' (epoch {epoch})");
                return;
            }
        };
        if !current.window.contains(now) {
            return;
        }
        let catalog = env.catalog;
        let Some(rule) = catalog.rule(rule_id) else {
            return;
        };
        if let Err(e) = self.play_position(env, rule, index, now) {
            self.fail(env, rule_id, e.to_string());
        }
    }

    /// A rule session was stopped by something other than the scheduler.
    pub fn on_session_lost(&mut self, env: &mut PlaybackEnv<'_>, session_id: SessionId, reason: &StopReason) {
        let Some((rule_id, runtime)) = self
            .active
            .iter_mut()
            .find(|(_, runtime)| runtime.session_id == Some(session_id))
        else {
            return;
        };
        runtime.session_id = None;
        runtime.suspended = true;
        env.timers.cancel_rule(rule_id);
        log_warning!("Rule '{rule_id}' lost session {session_id} ({reason})");
        self.events.push(SchedulerEvent::Deactivated {
            rule_id: rule_id.clone(),
            session_id: Some(session_id),
            reason: match reason {
                StopReason::Failed(message) => DeactivationReason::Failed(message.clone()),
                _ => DeactivationReason::Preempted,
            },
        });
    }

    /// Status of every configured rule at `now`.
    pub fn status(
        &mut self,
        rules: &[ScheduleRule],
        ctx: &CalendarContext<'_>,
        now: DateTime<Utc>,
    ) -> Vec<RuleStatus> {
        rules
            .iter()
            .map(|rule| {
                let runtime = self.active.get(&rule.id);
                let next = if rule.enabled {
                    next_start(rule, now, ctx, &mut self.solar)
                } else {
                    None
                };
                RuleStatus {
                    rule_id: rule.id.clone(),
                    name: rule.name.clone(),
                    enabled: rule.enabled,
                    active: runtime.is_some_and(|r| !r.suspended),
                    suspended: runtime.is_some_and(|r| r.suspended),
                    session_id: runtime.and_then(|r| r.session_id),
                    window_start: runtime.map(|r| r.window.start),
                    window_end: runtime.map(|r| r.window.end),
                    brightness: runtime.map(|r| r.brightness),
                    next_start: next,
                    error: self.errors.get(&rule.id).cloned(),
                }
            })
            .collect()
    }

    fn ensure_active(
        &mut self,
        env: &mut PlaybackEnv<'_>,
        rule: &ScheduleRule,
        window: RuleWindow,
        now: DateTime<Utc>,
    ) {
        let continues = self.active.get(&rule.id).map(|runtime| {
            runtime.window.anchor == window.anchor
                || (runtime.window.open_ended && runtime.window.end == window.start)
        });

        match continues {
            Some(true) => {
                if let Some(runtime) = self.active.get_mut(&rule.id) {
                    runtime.window = window;
                }
                self.apply_brightness(env, rule, now);
            }
            Some(false) => {
                self.deactivate(env, &rule.id, DeactivationReason::WindowEnded);
                self.activate(env, rule, window, now);
            }
            None => self.activate(env, rule, window, now),
        }
    }

    fn activate(&mut self, env: &mut PlaybackEnv<'_>, rule: &ScheduleRule, window: RuleWindow, now: DateTime<Utc>) {
        self.epoch += 1;
        let order = PlaybackOrder::new(
            rule.sequence.len(),
            rule.sequence_shuffle,
            rule.sequence_loop,
            env.rng,
        );
        self.active.insert(
            rule.id.clone(),
            RuleRuntime {
                window,
                session_id: None,
                order,
                position: 0,
                epoch: self.epoch,
                brightness: brightness_at(&rule.ramp, &window, now),
                suspended: false,
            },
        );
        log_block_start!(
            "Rule '{}' active until {}",
            rule.name,
            window.end.format("%Y-%m-%d %H:%M:%S UTC")
        );

        match self.play_position(env, rule, 0, now) {
            Ok(Some(session_id)) => self.events.push(SchedulerEvent::Activated {
                rule_id: rule.id.clone(),
                session_id,
            }),
            Ok(None) => {}
            Err(e) => self.fail(env, &rule.id, e.to_string()),
        }
    }

    /// Start the item at `position`, or hold the current one when a non-looping sequence ends.
    fn play_position(
        &mut self,
        env: &mut PlaybackEnv<'_>,
        rule: &ScheduleRule,
        position: usize,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<Option<SessionId>> {
        let catalog = env.catalog;
        let Some(runtime) = self.active.get_mut(&rule.id) else {
            return Ok(None);
        };
        if runtime.order.len() != rule.sequence.len() {
            runtime.order = PlaybackOrder::new(
                rule.sequence.len(),
                rule.sequence_shuffle,
                rule.sequence_loop,
                env.rng,
            );
        }

        let (position, item) = match runtime.order.step_to(position, env.rng) {
            Step::Play { position, item } => (position, item),
            Step::Finished => return Ok(runtime.session_id),
        };
        let Some(entry) = rule.sequence.get(item) else {
            return Ok(runtime.session_id);
        };
        let program = catalog.preset(&entry.preset_id)?.program()?;

        if let Some(previous) = runtime.session_id.take() {
            env.registry.stop(previous, StopReason::Replaced);
        }
        let session_id = env.registry.start(
            &catalog.topology,
            StartRequest {
                targets: rule.targets.clone(),
                program,
                fps: rule.fps.unwrap_or(env.default_fps),
                owner: SessionOwner::Rule(rule.id.clone()),
                brightness: runtime.brightness,
            },
            AdmissionPolicy::Stop,
            now,
        )?;
        runtime.session_id = Some(session_id);
        runtime.position = position;

        env.timers.cancel_rule(&rule.id);
        let last_of_finite = !rule.sequence_loop && position + 1 >= rule.sequence.len();
        if !last_of_finite {
            env.timers.arm(
                now + Duration::seconds(entry.duration as i64),
                TimerKind::RuleAdvance {
                    rule_id: rule.id.clone(),
                    epoch: runtime.epoch,
                    index: position + 1,
                },
            );
        }
        log_indented!("Rule '{}' item {} '{}' on session {session_id}", rule.id, position + 1, entry.preset_id);
        Ok(Some(session_id))
    }

    fn apply_brightness(&mut self, env: &mut PlaybackEnv<'_>, rule: &ScheduleRule, now: DateTime<Utc>) {
        let Some(runtime) = self.active.get_mut(&rule.id) else {
            return;
        };
        let level = brightness_at(&rule.ramp, &runtime.window, now);
        runtime.brightness = level;
        if let Some(session_id) = runtime.session_id {
            env.registry.set_brightness(session_id, level);
        }
    }

    /// Abort the rule's playback for the rest of its window.
    fn fail(&mut self, env: &mut PlaybackEnv<'_>, rule_id: &str, message: String) {
        let Some(runtime) = self.active.get_mut(rule_id) else {
            return;
        };
        log_error!("Rule '{rule_id}' aborted: {message}");
        env.timers.cancel_rule(rule_id);
        let session_id = runtime.session_id.take();
        if let Some(id) = session_id {
            env.registry.stop(id, StopReason::OwnerStopped);
        }
        let already_quiet = runtime.suspended;
        runtime.suspended = true;
        if !already_quiet {
            self.events.push(SchedulerEvent::Deactivated {
                rule_id: rule_id.to_string(),
                session_id,
                reason: DeactivationReason::Failed(message),
            });
        }
    }

    /// Close the rule's window: cancel its timer and stop its session.
    fn deactivate(&mut self, env: &mut PlaybackEnv<'_>, rule_id: &str, reason: DeactivationReason) {
        let Some(runtime) = self.active.remove(rule_id) else {
            return;
        };
        env.timers.cancel_rule(rule_id);
        if let Some(session_id) = runtime.session_id {
            env.registry.stop(session_id, StopReason::Finished);
        }
        if !runtime.suspended {
            log_decorated!("Rule '{rule_id}' inactive");
            self.events.push(SchedulerEvent::Deactivated {
                rule_id: rule_id.to_string(),
                session_id: runtime.session_id,
                reason,
            });
        }
    }
}
