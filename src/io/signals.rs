//! Unix signal handling.
//!
//! SIGTERM and SIGINT request a graceful shutdown; SIGHUP and SIGUSR2 request
//! a configuration reload. Signals are turned into [`RuntimeEvent`]s on a
//! background thread so the orchestrator loop sees them in order with
//! everything else.

use anyhow::{Context, Result};
use signal_hook::{
    consts::signal::{SIGHUP, SIGINT, SIGTERM, SIGUSR2},
    iterator::Signals,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::thread;

use crate::core::runtime::RuntimeEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalMessage {
    /// Reload the configuration file (SIGHUP, SIGUSR2).
    Reload,
    /// Stop all streams and exit (SIGTERM, SIGINT).
    Shutdown,
}

/// Map a raw signal number to what it asks for.
pub fn message_for(signal: i32) -> Option<SignalMessage> {
    match signal {
        SIGTERM | SIGINT => Some(SignalMessage::Shutdown),
        SIGHUP | SIGUSR2 => Some(SignalMessage::Reload),
        _ => None,
    }
}

/// Install the handlers and forward signals to `sender`.
///
/// Returns the running flag, which goes false once a shutdown was requested.
pub fn setup_signal_handler(sender: Sender<RuntimeEvent>) -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP, SIGUSR2])
        .context("failed to register signal handlers")?;

    let running_clone = Arc::clone(&running);
    thread::Builder::new()
        .name("lightkeeper-signals".to_string())
        .spawn(move || {
            for sig in signals.forever() {
                let Some(message) = message_for(sig) else {
                    continue;
                };
                log_pipe!();
                match message {
                    SignalMessage::Reload => log_info!("Received configuration reload signal"),
                    SignalMessage::Shutdown => {
                        log_info!("Received shutdown signal");
                        running_clone.store(false, Ordering::SeqCst);
                    }
                }
                if sender.send(RuntimeEvent::Signal(message)).is_err() {
                    break;
                }
                if message == SignalMessage::Shutdown {
                    break;
                }
            }
        })
        .context("Failed to spawn signal handler thread")?;

    Ok(running)
}
