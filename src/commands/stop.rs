//! Implementation of the stop command.
//!
//! Sends SIGTERM to the running daemon and waits for it to release its lock,
//! so the caller knows every stream was stopped when this returns.

use anyhow::Result;
use std::thread;
use std::time::{Duration, Instant};

use crate::io::instance;

const STOP_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Result of a stop command operation.
#[derive(Debug, PartialEq)]
pub enum StopResult {
    Stopped,
    NoInstanceRunning,
    /// Signaled, but still running when the timeout ran out.
    TimedOut,
}

pub fn stop_running_instance() -> Result<StopResult> {
    let Some(info) = instance::running_instance()? else {
        return Ok(StopResult::NoInstanceRunning);
    };
    instance::terminate_instance(info.pid)?;

    let deadline = Instant::now() + STOP_TIMEOUT;
    while Instant::now() < deadline {
        if !instance::is_instance_running(info.pid) {
            return Ok(StopResult::Stopped);
        }
        thread::sleep(POLL_INTERVAL);
    }
    Ok(StopResult::TimedOut)
}

pub fn handle_stop_command(debug_enabled: bool) -> Result<()> {
    log_version!();
    match stop_running_instance()? {
        StopResult::Stopped => log_block_start!("lightkeeper stopped"),
        StopResult::NoInstanceRunning => {
            log_pipe!();
            log_warning!("lightkeeper is not running");
        }
        StopResult::TimedOut => {
            log_pipe!();
            log_warning!(
                "lightkeeper did not exit within {} seconds",
                STOP_TIMEOUT.as_secs()
            );
        }
    }
    if debug_enabled {
        log_pipe!();
        log_debug!("Lock file: {}", crate::io::lock::main_lock_path().display());
    }
    log_end!();
    Ok(())
}
