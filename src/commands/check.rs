//! Implementation of the check command.
//!
//! Loads and validates the configuration without touching the daemon, then
//! prints what it found and when each schedule rule next starts.

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::config::{self, Loaded};
use crate::schedule::engine::{RuleScheduler, RuleStatus};
use crate::schedule::window::CalendarContext;

pub fn handle_check_command(debug_enabled: bool) -> Result<()> {
    log_version!();
    let path = config::config_path()?;
    log_block_start!("Checking {}", path.display());

    let loaded = match config::load_from_path(&path) {
        Ok(loaded) => loaded,
        Err(e) => {
            log_error_exit!("Configuration is invalid");
            eprintln!("{e:?}");
            std::process::exit(crate::constants::EXIT_FAILURE);
        }
    };

    log_decorated!("Configuration is valid");
    loaded.settings.log_summary(&loaded.catalog);

    let statuses = rule_statuses(&loaded, Utc::now());
    if !statuses.is_empty() {
        log_block_start!("Rules:");
        for status in &statuses {
            log_indented!("{}", describe(status, &loaded));
        }
    }
    if debug_enabled {
        log_pipe!();
        for playlist in loaded.catalog.playlists.values() {
            log_debug!(
                "Playlist '{}': {} items, shuffle={}, loop={}",
                playlist.id,
                playlist.items.len(),
                playlist.shuffle,
                playlist.looping
            );
        }
    }
    log_end!();
    Ok(())
}

/// Status of every rule as a freshly started daemon would see it.
pub fn rule_statuses(loaded: &Loaded, now: DateTime<Utc>) -> Vec<RuleStatus> {
    let ctx = CalendarContext {
        timezone: loaded.settings.timezone,
        default_point: loaded.settings.default_point,
        holidays: &loaded.catalog.holidays,
    };
    RuleScheduler::new().status(&loaded.catalog.rules, &ctx, now)
}

fn describe(status: &RuleStatus, loaded: &Loaded) -> String {
    let tz = loaded.settings.timezone;
    if !status.enabled {
        return format!("{} ({}): disabled", status.name, status.rule_id);
    }
    match (&status.error, status.next_start) {
        (Some(error), _) => format!("{} ({}): {error}", status.name, status.rule_id),
        (None, Some(next)) => format!(
            "{} ({}): next start {}",
            status.name,
            status.rule_id,
            next.with_timezone(&tz).format("%Y-%m-%d %H:%M %Z")
        ),
        (None, None) => format!("{} ({}): no upcoming window", status.name, status.rule_id),
    }
}
