//! Implementation of the simulate command.
//!
//! Installs a simulated time source so the orchestrator can be run through
//! hours or days of rules and playlists in seconds, streaming to the log
//! backend. Times are read in the configured timezone.

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use chrono_tz::Tz;
use std::sync::Arc;

use crate::logger::{Log, LoggerGuard};
use crate::time_source::{self, SimulatedTimeSource};

/// Parse the simulation bounds in `tz`.
pub fn simulation_bounds(
    start_time: &str,
    end_time: &str,
    tz: Tz,
) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let start = time_source::parse_datetime_in_tz(start_time, tz)
        .map_err(|e| anyhow::anyhow!("Invalid start time: {e}"))?;
    let end = time_source::parse_datetime_in_tz(end_time, tz)
        .map_err(|e| anyhow::anyhow!("Invalid end time: {e}"))?;
    if end <= start {
        anyhow::bail!("End time must be after start time");
    }
    Ok((start, end))
}

/// Set up simulated time and, with `log_to_file`, file logging.
///
/// Returns the file logging guard; the caller keeps it alive for the run.
pub fn handle_simulate_command(
    start_time: &str,
    end_time: &str,
    multiplier: f64,
    log_to_file: bool,
    tz: Tz,
) -> Result<Option<LoggerGuard>> {
    let (start, end) = simulation_bounds(start_time, end_time, tz)?;

    // Before any logging, so every line carries simulated timestamps
    time_source::init_time_source(Arc::new(SimulatedTimeSource::new(start, end, multiplier)));
    Log::set_timezone(tz);

    let guard = if log_to_file {
        let file_name = format!(
            "lightkeeper-simulation-{}.log",
            Local::now().format("%Y%m%d-%H%M%S")
        );
        let guard = Log::start_file_logging(file_name.clone())?;
        println!("Writing simulation log to {file_name}");
        Some(guard)
    } else {
        None
    };

    log_version!();
    log_block_start!("Simulation Mode");
    log_decorated!(
        "Simulating from {} to {}",
        start.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S %Z"),
        end.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S %Z")
    );
    let duration = end - start;
    log_indented!(
        "Total simulated time: {} hours {} minutes",
        duration.num_hours(),
        duration.num_minutes() % 60
    );
    if multiplier == 0.0 {
        log_indented!("Time acceleration: fast-forward");
    } else {
        log_indented!(
            "Time acceleration: {multiplier}x (about {:.1} seconds)",
            duration.num_seconds() as f64 / multiplier
        );
    }
    Ok(guard)
}
