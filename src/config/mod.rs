//! Configuration for lightkeeper: runtime settings plus the catalog.
//!
//! Everything lives in one `lightkeeper.toml`. The `[orchestrator]` table
//! holds runtime settings; the remaining array tables describe the LED
//! topology, presets, playlists, schedule rules and custom holidays.
//!
//! ## Configuration Sources
//!
//! 1. `--config <dir>` on the command line
//! 2. **XDG_CONFIG_HOME**/lightkeeper/lightkeeper.toml
//!
//! A commented default file is created when none exists.
//!
//! ## Configuration Structure
//!
//! ```toml
//! [orchestrator]
//! backend = "log"                 # Streaming backend: "log"
//! timezone = "America/New_York"   # IANA zone for rule evaluation (default: detected)
//! latitude = 40.7128              # Default coordinates for solar rules
//! longitude = -74.0060
//! tick_interval = 60              # Rule evaluation interval in seconds (10-300)
//! ramp_update_interval_ms = 500   # Brightness step while ramping (100-10000)
//! default_fps = 30                # Frame rate when none is given (1-240)
//! dispatch_max_attempts = 5       # Backend attempts per command (1-10)
//! dispatch_backoff_ms = 250       # First retry delay, doubled per attempt (10-10000)
//! resume_playback = true          # Resume the playing playlist after a restart
//!
//! [[devices]]
//! id = "porch"
//! led_count = 150
//!
//! [[groups]]
//! id = "front"
//! members = [{ device_id = "porch" }, { device_id = "eaves", start_led = 0, end_led = 59 }]
//!
//! [[presets]]
//! id = "warm"
//! effect = { type = "solid", color = "#ffb070" }
//!
//! [[playlists]]
//! id = "evening"
//! name = "Evening"
//! loop = true
//! targets = [{ type = "group", id = "front" }]
//! items = [{ id = "a", preset_id = "warm", duration = 300 }]
//! ```
//!
//! ## Validation
//!
//! Ranges, coordinates, duplicate ids and every playlist, rule and holiday
//! are checked at load time. A file that fails any check is rejected whole;
//! on hot reload the previous configuration stays in effect.

pub mod loading;
pub mod validation;
pub mod watcher;


use chrono_tz::Tz;
use serde::Deserialize;
use std::time::Duration as StdDuration;

use crate::backend::{BackendKind, RetryPolicy};
use crate::calendar::GeoPoint;
use crate::catalog::Catalog;
use crate::holiday::Holiday;
use crate::playlist::Playlist;
use crate::preset::Preset;
use crate::schedule::ScheduleRule;
use crate::schedule::engine::Cadence;
use crate::topology::{Device, Group, VirtualDevice};

pub use loading::{
    config_path, create_default_config, custom_config_dir, detect_timezone, load, load_from_path,
    set_config_dir,
};
pub use validation::validate;
pub use watcher::start_config_watcher;

/// The `[orchestrator]` table as written. Absent keys take defaults.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct OrchestratorConfig {
    pub backend: Option<BackendKind>,
    pub timezone: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub tick_interval: Option<u64>,
    pub ramp_update_interval_ms: Option<u64>,
    pub default_fps: Option<u32>,
    pub dispatch_max_attempts: Option<u32>,
    pub dispatch_backoff_ms: Option<u64>,
    pub resume_playback: Option<bool>,
}

/// The whole configuration file as written.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub devices: Vec<Device>,
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub virtuals: Vec<VirtualDevice>,
    #[serde(default)]
    pub presets: Vec<Preset>,
    #[serde(default)]
    pub playlists: Vec<Playlist>,
    #[serde(default)]
    pub rules: Vec<ScheduleRule>,
    /// Custom holidays, added to the built-in ones.
    #[serde(default)]
    pub holidays: Vec<Holiday>,
}

/// Runtime settings with defaults applied and ranges checked.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub backend: BackendKind,
    pub timezone: Tz,
    pub default_point: Option<GeoPoint>,
    pub tick_interval: u64,
    pub ramp_update_interval_ms: u64,
    pub default_fps: u32,
    pub retry: RetryPolicy,
    pub resume_playback: bool,
}

impl Settings {
    pub fn cadence(&self) -> Cadence {
        Cadence {
            tick: chrono::Duration::seconds(self.tick_interval as i64),
            ramp: chrono::Duration::milliseconds(self.ramp_update_interval_ms as i64),
        }
    }

    pub fn tick(&self) -> StdDuration {
        StdDuration::from_secs(self.tick_interval)
    }

    pub fn log_summary(&self, catalog: &Catalog) {
        log_indented!("Backend: {}", self.backend.as_str());
        log_indented!("Timezone: {}", self.timezone);
        if let Some(point) = self.default_point {
            let lat_dir = if point.latitude >= 0.0 { "N" } else { "S" };
            let lon_dir = if point.longitude >= 0.0 { "E" } else { "W" };
            log_indented!(
                "Location: {:.3}°{lat_dir}, {:.3}°{lon_dir}",
                point.latitude.abs(),
                point.longitude.abs()
            );
        }
        log_indented!("Tick interval: {} seconds", self.tick_interval);
        log_indented!(
            "Topology: {} devices, {} presets",
            catalog.topology.device_count(),
            catalog.presets.len()
        );
        log_indented!(
            "Playback: {} playlists, {} rules ({} enabled)",
            catalog.playlists.len(),
            catalog.rules.len(),
            catalog.rules.iter().filter(|rule| rule.enabled).count()
        );
        let custom = catalog.holidays.iter().filter(|h| h.is_custom).count();
        if custom > 0 {
            log_indented!("Custom holidays: {custom}");
        }
    }
}

/// A validated configuration ready to hand to the orchestrator.
#[derive(Debug, Clone)]
pub struct Loaded {
    pub settings: Settings,
    pub catalog: Catalog,
}
