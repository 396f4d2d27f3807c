//! Locating, creating and loading the configuration file.

use anyhow::{Context, Result};
use chrono_tz::Tz;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use super::validation::validate;
use super::{Config, Loaded};
use crate::constants::{APP_DIR_NAME, CONFIG_FILE_NAME};

/// Configuration directory override, set once at startup.
static CONFIG_DIR: OnceLock<Option<PathBuf>> = OnceLock::new();

pub(super) const DEFAULT_CONFIG: &str = r##"# lightkeeper configuration

[orchestrator]
backend = "log"                 # Streaming backend: "log"
# timezone = "America/New_York" # IANA zone for rule evaluation (default: detected)
# latitude = 40.7128            # Default coordinates for solar rules
# longitude = -74.0060
tick_interval = 60              # Rule evaluation interval in seconds (10-300)
ramp_update_interval_ms = 500   # Brightness step while ramping (100-10000)
default_fps = 30                # Frame rate when none is given (1-240)
dispatch_max_attempts = 5       # Backend attempts per command (1-10)
dispatch_backoff_ms = 250       # First retry delay in ms, doubled per attempt (10-10000)
resume_playback = true          # Resume the playing playlist after a restart

# [[devices]]
# id = "porch"
# led_count = 150

# [[groups]]
# id = "front"
# members = [{ device_id = "porch" }]

# [[presets]]
# id = "warm"
# effect = { type = "solid", color = "#ffb070" }

# [[playlists]]
# id = "evening"
# name = "Evening"
# loop = true
# targets = [{ type = "group", id = "front" }]
# items = [{ id = "a", preset_id = "warm", duration = 300 }]

# [[rules]]
# id = "dusk"
# name = "Porch at dusk"
# targets = [{ type = "device", id = "porch" }]
# sequence = [{ id = "a", preset_id = "warm", duration = 600 }]
# start = { type = "solar", event = "sunset", offset_minutes = -15 }
# end = { type = "time", time = "23:30" }
# ramp = { on_start = true, on_end = true, duration_seconds = 300 }
"##;

/// Set the configuration directory for this process. Only the first call takes effect.
pub fn set_config_dir(dir: Option<String>) -> Result<()> {
    CONFIG_DIR
        .set(dir.map(PathBuf::from))
        .map_err(|_| anyhow::anyhow!("Configuration directory already set"))
}

pub fn custom_config_dir() -> Option<PathBuf> {
    CONFIG_DIR.get().and_then(|d| d.clone())
}

/// Path of `lightkeeper.toml`, honoring `--config`.
pub fn config_path() -> Result<PathBuf> {
    if let Some(dir) = custom_config_dir() {
        return Ok(dir.join(CONFIG_FILE_NAME));
    }
    let config_dir = dirs::config_dir().context("Could not determine config directory")?;
    Ok(config_dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Write the commented default configuration to `path`.
pub fn create_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, DEFAULT_CONFIG)
        .with_context(|| format!("Failed to write default config to {}", path.display()))?;
    log_block_start!("Created default configuration at {}", path.display());
    Ok(())
}

/// Load the configuration, creating a default file if none exists.
pub fn load() -> Result<Loaded> {
    let path = config_path()?;
    if !path.exists() {
        create_default_config(&path)?;
    }
    load_from_path(&path)
}

/// Load and validate the configuration at `path`. Never creates a file.
pub fn load_from_path(path: &Path) -> Result<Loaded> {
    if !path.exists() {
        anyhow::bail!("Configuration file not found at {}", path.display());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config from {}", path.display()))?;
    validate(config).with_context(|| format!("Invalid configuration in {}", path.display()))
}

/// The system timezone from `TZ`, `/etc/timezone` or `/etc/localtime`, else UTC.
pub fn detect_timezone() -> Tz {
    let from_env = std::env::var("TZ")
        .ok()
        .and_then(|name| name.trim_start_matches(':').parse::<Tz>().ok());
    if let Some(tz) = from_env {
        return tz;
    }

    let from_file = fs::read_to_string("/etc/timezone")
        .ok()
        .and_then(|name| name.trim().parse::<Tz>().ok());
    if let Some(tz) = from_file {
        return tz;
    }

    fs::read_link("/etc/localtime")
        .ok()
        .and_then(|target| zone_from_localtime(&target))
        .unwrap_or(Tz::UTC)
}

pub(super) fn zone_from_localtime(target: &Path) -> Option<Tz> {
    let target = target.to_string_lossy();
    let (_, name) = target.split_once("zoneinfo/")?;
    name.parse::<Tz>().ok()
}
