//! The event loop that drives the orchestrator.
//!
//! Signals, socket requests, dispatch reports and config changes all arrive on
//! one channel. Between events the loop sleeps until the next timer deadline,
//! then fires what is due and flushes the orchestrator's outbox to the
//! dispatcher, the observers and the playback store.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration as StdDuration;

use crate::api::{ApiRequest, ObserverEvent};
use crate::backend::{DispatchReport, Dispatcher, StreamingBackend};
use crate::config;
use crate::constants::MAXIMUM_IDLE_WAIT_MS;
use crate::core::{Orchestrator, Outbox, PlaybackUpdate};
use crate::io::signals::SignalMessage;
use crate::state::ipc::{ClientId, IpcNotifier, IpcServer};
use crate::state::playback::PlaybackStore;
use crate::time_source;

#[derive(Debug)]
pub enum RuntimeEvent {
    Signal(SignalMessage),
    Request {
        client: ClientId,
        request: ApiRequest,
    },
    Dispatch(DispatchReport),
    ConfigChanged,
}

/// Everything the runtime needs besides the orchestrator.
pub struct RuntimeParams {
    pub backend: Box<dyn StreamingBackend>,
    /// Durable playback record; `None` disables persistence (simulation).
    pub store: Option<PlaybackStore>,
    /// Configuration file to reload on change; `None` disables reloads.
    pub config_path: Option<PathBuf>,
    /// Control socket to serve; `None` runs without observers.
    pub socket_path: Option<PathBuf>,
    pub events: (Sender<RuntimeEvent>, Receiver<RuntimeEvent>),
}

enum Flow {
    Continue,
    Exit,
}

pub struct Runtime {
    orchestrator: Orchestrator,
    dispatcher: Option<Dispatcher>,
    ipc: Option<(IpcServer, IpcNotifier)>,
    store: Option<PlaybackStore>,
    config_path: Option<PathBuf>,
    receiver: Receiver<RuntimeEvent>,
}

impl Runtime {
    pub fn new(orchestrator: Orchestrator, params: RuntimeParams) -> Result<Self> {
        let (sender, receiver) = params.events;

        let report_sender = sender.clone();
        let dispatcher = Dispatcher::spawn(
            params.backend,
            orchestrator.settings().retry,
            move |report| {
                let _ = report_sender.send(RuntimeEvent::Dispatch(report));
            },
        )?;
        log_block_start!("Streaming to {} backend", dispatcher.backend_name());

        let ipc = match params.socket_path {
            Some(path) => {
                let started = IpcServer::start(path.clone(), sender.clone())?;
                log_indented!("Listening on {}", path.display());
                Some(started)
            }
            None => None,
        };

        Ok(Self {
            orchestrator,
            dispatcher: Some(dispatcher),
            ipc,
            store: params.store,
            config_path: params.config_path,
            receiver,
        })
    }

    /// Run until shutdown is requested or a simulation reaches its end.
    pub fn run(mut self) -> Result<()> {
        let record = match &self.store {
            Some(store) => store.load().unwrap_or_else(|e| {
                log_warning!("Could not read playback record: {e:#}");
                None
            }),
            None => None,
        };
        self.orchestrator.boot(record, time_source::now());
        self.flush();
        if let Some((_, notifier)) = &self.ipc {
            notifier.send_snapshot(self.orchestrator.snapshot());
        }

        loop {
            if time_source::simulation_ended() {
                log_block_start!("Simulation reached its end time");
                break;
            }

            let wait = self.wait_duration(time_source::now());
            let event = if time_source::is_simulated() {
                time_source::sleep(wait);
                self.receiver.try_recv().ok()
            } else {
                match self.receiver.recv_timeout(wait) {
                    Ok(event) => Some(event),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            };

            if let Some(event) = event
                && let Flow::Exit = self.handle_event(event, time_source::now())
            {
                break;
            }

            self.orchestrator.fire_due(time_source::now());
            self.flush();
        }

        self.shutdown()
    }

    /// Time until the next timer, bounded so the loop stays responsive.
    fn wait_duration(&self, now: DateTime<Utc>) -> StdDuration {
        let cap = StdDuration::from_millis(MAXIMUM_IDLE_WAIT_MS);
        match self.orchestrator.next_deadline() {
            Some(deadline) => (deadline - now).to_std().unwrap_or(StdDuration::ZERO).min(cap),
            None => cap,
        }
    }

    fn handle_event(&mut self, event: RuntimeEvent, now: DateTime<Utc>) -> Flow {
        match event {
            RuntimeEvent::Signal(SignalMessage::Shutdown) => return Flow::Exit,
            RuntimeEvent::Signal(SignalMessage::Reload) | RuntimeEvent::ConfigChanged => {
                self.reload(now);
            }
            RuntimeEvent::Request { client, request } => {
                let response = self.orchestrator.handle_request(request, now);
                // Events caused by the request go out before its reply
                self.flush();
                if let Some((_, notifier)) = &self.ipc {
                    notifier.send_reply(client, response);
                }
            }
            RuntimeEvent::Dispatch(report) => self.orchestrator.on_dispatch(report),
        }
        Flow::Continue
    }

    fn reload(&mut self, now: DateTime<Utc>) {
        let Some(path) = &self.config_path else {
            return;
        };
        log_block_start!("Reloading configuration");
        match config::load_from_path(path) {
            Ok(loaded) => {
                loaded.settings.log_summary(&loaded.catalog);
                self.orchestrator.reload(loaded, now);
            }
            Err(e) => {
                log_warning!("Keeping previous configuration: {e:#}");
            }
        }
    }

    fn flush(&mut self) {
        let Outbox {
            commands,
            events,
            playback,
        } = self.orchestrator.take_outbox();

        if let Some(dispatcher) = &self.dispatcher {
            for command in commands {
                if !dispatcher.send(command) {
                    log_error!("Dispatcher is gone; command dropped");
                }
            }
        }

        let changed = !events.is_empty();
        for event in events {
            log_event(&event);
            if let Some((_, notifier)) = &self.ipc {
                notifier.send_event(event);
            }
        }
        if changed && let Some((_, notifier)) = &self.ipc {
            notifier.send_snapshot(self.orchestrator.snapshot());
        }

        if let Some(store) = &self.store {
            for update in playback {
                let result = match &update {
                    PlaybackUpdate::Save(record) => store.save(record),
                    PlaybackUpdate::Clear => store.clear(),
                };
                if let Err(e) = result {
                    log_warning!("Could not update playback record: {e:#}");
                }
            }
        }
    }

    fn shutdown(mut self) -> Result<()> {
        log_block_start!("Stopping all streams");
        self.orchestrator.shutdown();
        self.flush();
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.shutdown();
        }
        // Reports from the final flush have nobody left to act on them
        while self.receiver.try_recv().is_ok() {}
        if let Some((server, _)) = self.ipc.take() {
            server.shutdown()?;
        }
        Ok(())
    }
}

fn log_event(event: &ObserverEvent) {
    match event {
        ObserverEvent::PlaylistStopped {
            playlist_id,
            reason,
            ..
        } => log_decorated!("Playlist '{playlist_id}' ended ({reason:?})"),
        ObserverEvent::RuleActivated {
            rule_id,
            session_id,
        } => log_decorated!("Rule '{rule_id}' active in session {session_id}"),
        ObserverEvent::RuleDeactivated {
            rule_id, reason, ..
        } => log_decorated!("Rule '{rule_id}' inactive ({reason:?})"),
        other => log_debug!("Event: {}", other.name()),
    }
}

/// Channel pair for [`RuntimeParams::events`].
pub fn event_channel() -> (Sender<RuntimeEvent>, Receiver<RuntimeEvent>) {
    mpsc::channel()
}
