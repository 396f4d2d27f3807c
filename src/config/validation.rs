//! Configuration validation.
//!
//! Turns a parsed [`Config`] into [`Settings`] and a [`Catalog`], or rejects
//! it with the first problem found. Nothing is partially applied.

use anyhow::{Context, Result};
use chrono_tz::Tz;
use std::collections::{HashMap, HashSet};
use std::time::Duration as StdDuration;

use super::{Config, Loaded, Settings};
use crate::backend::RetryPolicy;
use crate::calendar::GeoPoint;
use crate::catalog::Catalog;
use crate::constants::*;
use crate::holiday::builtin_holidays;
use crate::preset::Preset;
use crate::topology::Topology;

/// Validate `config` and build the settings and catalog it describes.
pub fn validate(config: Config) -> Result<Loaded> {
    let settings = validate_settings(&config)?;
    let catalog = build_catalog(config, &settings)?;
    Ok(Loaded { settings, catalog })
}

fn check_range<T>(name: &str, value: T, min: T, max: T, unit: &str) -> Result<T>
where
    T: PartialOrd + std::fmt::Display + Copy,
{
    if value < min || value > max {
        anyhow::bail!("{name} ({value}{unit}) must be between {min} and {max}{unit}");
    }
    Ok(value)
}

fn ensure_unique<'a>(kind: &str, ids: impl IntoIterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if id.trim().is_empty() {
            anyhow::bail!("A {kind} has an empty id");
        }
        if !seen.insert(id) {
            anyhow::bail!("Duplicate {kind} id '{id}'");
        }
    }
    Ok(())
}

pub(crate) fn validate_settings(config: &Config) -> Result<Settings> {
    let raw = &config.orchestrator;

    let timezone = match raw.timezone.as_deref() {
        Some(name) => name
            .parse::<Tz>()
            .map_err(|_| anyhow::anyhow!("Unknown timezone '{name}' (expected an IANA name like \"Europe/Berlin\")"))?,
        None => super::detect_timezone(),
    };

    let default_point = match (raw.latitude, raw.longitude) {
        (Some(latitude), Some(longitude)) => Some(GeoPoint::new(latitude, longitude)?),
        (None, None) => None,
        _ => anyhow::bail!("latitude and longitude must be set together"),
    };

    let tick_interval = check_range(
        "tick_interval",
        raw.tick_interval.unwrap_or(DEFAULT_TICK_INTERVAL),
        MINIMUM_TICK_INTERVAL,
        MAXIMUM_TICK_INTERVAL,
        "s",
    )?;
    let ramp_update_interval_ms = check_range(
        "ramp_update_interval_ms",
        raw.ramp_update_interval_ms.unwrap_or(DEFAULT_RAMP_UPDATE_INTERVAL_MS),
        MINIMUM_RAMP_UPDATE_INTERVAL_MS,
        MAXIMUM_RAMP_UPDATE_INTERVAL_MS,
        "ms",
    )?;
    let default_fps = check_range(
        "default_fps",
        raw.default_fps.unwrap_or(DEFAULT_FPS),
        MINIMUM_FPS,
        MAXIMUM_FPS,
        "",
    )?;
    let max_attempts = check_range(
        "dispatch_max_attempts",
        raw.dispatch_max_attempts.unwrap_or(DEFAULT_DISPATCH_MAX_ATTEMPTS),
        MINIMUM_DISPATCH_MAX_ATTEMPTS,
        MAXIMUM_DISPATCH_MAX_ATTEMPTS,
        "",
    )?;
    let backoff_ms = check_range(
        "dispatch_backoff_ms",
        raw.dispatch_backoff_ms.unwrap_or(DEFAULT_DISPATCH_BACKOFF_MS),
        MINIMUM_DISPATCH_BACKOFF_MS,
        MAXIMUM_DISPATCH_BACKOFF_MS,
        "ms",
    )?;

    Ok(Settings {
        backend: raw.backend.unwrap_or_default(),
        timezone,
        default_point,
        tick_interval,
        ramp_update_interval_ms,
        default_fps,
        retry: RetryPolicy {
            max_attempts,
            base_backoff: StdDuration::from_millis(backoff_ms),
        },
        resume_playback: raw.resume_playback.unwrap_or(true),
    })
}

fn check_fps(owner: &str, fps: Option<u32>) -> Result<()> {
    if let Some(fps) = fps {
        check_range(&format!("{owner} fps"), fps, MINIMUM_FPS, MAXIMUM_FPS, "")?;
    }
    Ok(())
}

pub(crate) fn build_catalog(config: Config, settings: &Settings) -> Result<Catalog> {
    let Config {
        devices,
        groups,
        virtuals,
        presets,
        mut playlists,
        rules,
        holidays: custom_holidays,
        ..
    } = config;

    ensure_unique("device", devices.iter().map(|d| d.id.as_str()))?;
    ensure_unique(
        "group or virtual device",
        groups
            .iter()
            .map(|g| g.id.as_str())
            .chain(virtuals.iter().map(|v| v.id.as_str())),
    )?;
    for virtual_device in &virtuals {
        for range in &virtual_device.led_ranges {
            if range.start_led > range.end_led {
                anyhow::bail!(
                    "virtual device '{}' has range {}..{} on '{}' with start after end",
                    virtual_device.id,
                    range.start_led,
                    range.end_led,
                    range.device_id
                );
            }
        }
    }

    ensure_unique("preset", presets.iter().map(|p| p.id.as_str()))?;
    for preset in &presets {
        preset.program()?;
    }
    let presets: HashMap<String, Preset> = presets.into_iter().map(|p| (p.id.clone(), p)).collect();

    let builtins = builtin_holidays();
    for holiday in &custom_holidays {
        if builtins.iter().any(|builtin| builtin.id == holiday.id) {
            anyhow::bail!("Custom holiday '{}' reuses a built-in holiday id", holiday.id);
        }
    }
    let mut holidays = builtins;
    holidays.extend(custom_holidays.into_iter().map(|mut holiday| {
        holiday.is_custom = true;
        holiday
    }));
    ensure_unique("holiday", holidays.iter().map(|h| h.id.as_str()))?;
    for holiday in &holidays {
        holiday
            .effective_spec()
            .with_context(|| format!("holiday '{}' has an invalid date", holiday.id))?;
    }

    ensure_unique("playlist", playlists.iter().map(|p| p.id.as_str()))?;
    for playlist in &mut playlists {
        playlist.normalize_order();
        ensure_unique(
            &format!("item in playlist '{}'", playlist.id),
            playlist.items.iter().map(|i| i.id.as_str()),
        )?;
        playlist.validate(&presets)?;
        check_fps(&format!("playlist '{}'", playlist.id), playlist.fps)?;
    }

    ensure_unique("rule", rules.iter().map(|r| r.id.as_str()))?;
    for rule in &rules {
        rule.validate(&presets, &holidays, settings.default_point)?;
        check_fps(&format!("rule '{}'", rule.id), rule.fps)?;
    }

    Ok(Catalog {
        topology: Topology::new(devices, groups, virtuals),
        presets,
        playlists: playlists.into_iter().map(|p| (p.id.clone(), p)).collect(),
        rules,
        holidays,
    })
}
