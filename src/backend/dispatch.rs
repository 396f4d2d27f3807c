//! Background delivery of stream commands with bounded retries.
//!
//! The orchestrator enqueues [`StreamCommand`]s and moves on. A single worker
//! thread applies them to the backend in order, retrying transient failures
//! with exponential backoff, and reports every final outcome back through a
//! callback so the orchestrator can react to streams that never came up.

use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};

use super::{DispatchError, StreamCommand, StreamingBackend, apply};
use crate::constants::{DEFAULT_DISPATCH_BACKOFF_MS, DEFAULT_DISPATCH_MAX_ATTEMPTS, DISPATCH_BACKOFF_CAP_MS};

/// Retry budget for one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: StdDuration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_DISPATCH_MAX_ATTEMPTS,
            base_backoff: StdDuration::from_millis(DEFAULT_DISPATCH_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0 for the first retry), capped.
    pub fn delay_for(&self, attempt: u32) -> StdDuration {
        let cap = StdDuration::from_millis(DISPATCH_BACKOFF_CAP_MS);
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_backoff.saturating_mul(factor).min(cap)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Delivered,
    /// Permanent rejection or retries exhausted.
    Failed(String),
}

/// Final result of delivering one command.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchReport {
    pub command: StreamCommand,
    pub outcome: DispatchOutcome,
    pub attempts: u32,
}

impl DispatchReport {
    pub fn failed(&self) -> bool {
        matches!(self.outcome, DispatchOutcome::Failed(_))
    }
}

/// Apply `command`, retrying transient errors per `policy`.
///
/// `sleep` is called between attempts so tests can run without waiting.
pub fn deliver(
    backend: &mut dyn StreamingBackend,
    command: &StreamCommand,
    policy: &RetryPolicy,
    mut sleep: impl FnMut(StdDuration),
) -> DispatchReport {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = 0;

    let outcome = loop {
        attempts += 1;
        match apply(backend, command) {
            Ok(()) => break DispatchOutcome::Delivered,
            Err(DispatchError::Permanent(reason)) => break DispatchOutcome::Failed(reason),
            Err(DispatchError::Transient(reason)) if attempts >= max_attempts => {
                break DispatchOutcome::Failed(format!("{reason} (after {attempts} attempts)"));
            }
            Err(DispatchError::Transient(reason)) => {
                let delay = policy.delay_for(attempts - 1);
                log_debug!("{command} failed ({reason}), retrying in {}ms", delay.as_millis());
                sleep(delay);
            }
        }
    };

    DispatchReport {
        command: command.clone(),
        outcome,
        attempts,
    }
}

enum Message {
    Command(StreamCommand),
    Shutdown,
}

/// Handle to the dispatcher worker thread.
pub struct Dispatcher {
    sender: Sender<Message>,
    handle: Option<JoinHandle<()>>,
    backend_name: &'static str,
}

impl Dispatcher {
    /// Start the worker. `report` is called from the worker thread for every command.
    pub fn spawn<F>(mut backend: Box<dyn StreamingBackend>, policy: RetryPolicy, report: F) -> Result<Self>
    where
        F: Fn(DispatchReport) + Send + 'static,
    {
        let backend_name = backend.name();
        let (sender, receiver) = mpsc::channel::<Message>();

        let handle = thread::Builder::new()
            .name("lightkeeper-dispatch".to_string())
            .spawn(move || {
                while let Ok(Message::Command(command)) = receiver.recv() {
                    let outcome = deliver(backend.as_mut(), &command, &policy, thread::sleep);
                    if let DispatchOutcome::Failed(reason) = &outcome.outcome {
                        log_warning!("Backend {}: {command} failed: {reason}", backend.name());
                    }
                    report(outcome);
                }
            })
            .context("Failed to spawn dispatcher thread")?;

        Ok(Self {
            sender,
            handle: Some(handle),
            backend_name,
        })
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend_name
    }

    /// Queue a command. Returns false once the worker has gone away.
    pub fn send(&self, command: StreamCommand) -> bool {
        self.sender.send(Message::Command(command)).is_ok()
    }

    /// Deliver everything already queued, then stop the worker.
    pub fn shutdown(mut self) {
        self.stop_worker();
    }

    fn stop_worker(&mut self) {
        let _ = self.sender.send(Message::Shutdown);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            log_warning!("Dispatcher thread panicked");
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{LogBackend, MockStreamingBackend};
    use crate::session::SessionId;
    use std::sync::{Arc, Mutex};

    fn stop(id: u64) -> StreamCommand {
        StreamCommand::Stop {
            session_id: SessionId(id),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_backoff: StdDuration::from_millis(500),
        };
        assert_eq!(policy.delay_for(0), StdDuration::from_millis(500));
        assert_eq!(policy.delay_for(1), StdDuration::from_millis(1000));
        assert_eq!(policy.delay_for(3), StdDuration::from_millis(4000));
        assert_eq!(policy.delay_for(4), StdDuration::from_millis(DISPATCH_BACKOFF_CAP_MS));
        assert_eq!(policy.delay_for(40), StdDuration::from_millis(DISPATCH_BACKOFF_CAP_MS));
    }

    #[test]
    fn test_transient_errors_are_retried_until_success() {
        let mut backend = MockStreamingBackend::new();
        let mut calls = 0;
        backend.expect_stop_stream().times(3).returning(move |_| {
            calls += 1;
            if calls < 3 {
                Err(DispatchError::Transient("busy".into()))
            } else {
                Ok(())
            }
        });

        let mut slept = Vec::new();
        let report = deliver(&mut backend, &stop(1), &RetryPolicy::default(), |d| slept.push(d));

        assert_eq!(report.outcome, DispatchOutcome::Delivered);
        assert_eq!(report.attempts, 3);
        assert_eq!(slept.len(), 2);
        assert!(slept[1] > slept[0]);
    }

    #[test]
    fn test_permanent_error_is_not_retried() {
        let mut backend = MockStreamingBackend::new();
        backend
            .expect_set_brightness()
            .times(1)
            .returning(|_, _| Err(DispatchError::Permanent("unknown device".into())));

        let command = StreamCommand::SetBrightness {
            session_id: SessionId(2),
            level: 0.5,
        };
        let report = deliver(&mut backend, &command, &RetryPolicy::default(), |_| {
            panic!("must not sleep")
        });
        assert_eq!(report.outcome, DispatchOutcome::Failed("unknown device".into()));
        assert_eq!(report.attempts, 1);
    }

    #[test]
    fn test_retries_are_bounded() {
        let mut backend = MockStreamingBackend::new();
        backend
            .expect_stop_stream()
            .times(4)
            .returning(|_| Err(DispatchError::Transient("offline".into())));

        let policy = RetryPolicy {
            max_attempts: 4,
            base_backoff: StdDuration::from_millis(1),
        };
        let report = deliver(&mut backend, &stop(5), &policy, |_| {});
        assert!(report.failed());
        assert_eq!(report.attempts, 4);
    }

    #[test]
    fn test_worker_reports_in_order_and_flushes_on_shutdown() {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        let dispatcher = Dispatcher::spawn(Box::new(LogBackend::new()), RetryPolicy::default(), move |r| {
            sink.lock().unwrap().push(r.command.session_id());
        })
        .unwrap();

        assert_eq!(dispatcher.backend_name(), "log");
        for id in 1..=3 {
            assert!(dispatcher.send(stop(id)));
        }
        dispatcher.shutdown();

        let seen = reports.lock().unwrap().clone();
        assert_eq!(seen, vec![SessionId(1), SessionId(2), SessionId(3)]);
    }
}
