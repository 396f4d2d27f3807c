//! Schedule rules: when a lighting program should run unattended.
//!
//! A rule describes a daily window (start and end, each a clock time, a solar
//! event with offset, a duration or open-ended), the days and holidays it
//! applies on, an optional brightness ramp at either edge, and the item
//! sequence to play inside the window.
//!
//! ```toml
//! [[rules]]
//! id = "porch-evening"
//! name = "Porch evening"
//! days_of_week = [0, 5, 6]          # 0 = Sunday .. 6 = Saturday, empty = every day
//! targets = [{ type = "device", id = "porch" }]
//! sequence = [{ id = "a", preset_id = "warm", duration = 600 }]
//! sequence_loop = true
//!
//! [rules.start]
//! type = "solar"
//! event = "sunset"
//! offset_minutes = -15
//!
//! [rules.end]
//! type = "time"
//! time = "23:30"
//!
//! [rules.ramp]
//! on_start = true
//! on_end = true
//! duration_seconds = 300
//!
//! [rules.holidays]
//! mode = "skip_on"
//! ids = ["christmas-day"]
//! ```

pub mod engine;
pub mod ramp;
pub mod window;

use chrono::NaiveTime;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;

use crate::calendar::{GeoPoint, SolarKind};
use crate::constants::{
    MAXIMUM_HOLIDAY_WINDOW_DAYS, MAXIMUM_RAMP_DURATION, MAXIMUM_RULE_DURATION,
    MAXIMUM_SOLAR_OFFSET_MINUTES,
};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::holiday::{Holiday, ObservanceWindow};
use crate::playlist::{PlaylistItem, validate_items};
use crate::preset::Preset;
use crate::topology::StreamTarget;

pub use engine::{RuleScheduler, RuleStatus, SchedulerEvent};
pub use window::{CalendarContext, RuleWindow, SolarCache};

/// Clock times written as `HH:MM` or `HH:MM:SS`.
mod clock_time {
    use super::*;

    pub fn parse(value: &str) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(value, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
            .ok()
    }

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M:%S").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let value = String::deserialize(deserializer)?;
        parse(&value).ok_or_else(|| {
            serde::de::Error::custom(format!("invalid time '{value}', expected HH:MM or HH:MM:SS"))
        })
    }
}

/// A solar event with offset, optionally at its own coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolarEdge {
    pub event: SolarKind,
    #[serde(default)]
    pub offset_minutes: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

impl SolarEdge {
    /// The coordinate to compute the event at, falling back to `default`.
    pub fn point(&self, default: Option<GeoPoint>) -> Option<GeoPoint> {
        match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => GeoPoint::new(latitude, longitude).ok(),
            _ => default,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StartSpec {
    Time {
        #[serde(with = "clock_time")]
        time: NaiveTime,
    },
    Solar(SolarEdge),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EndSpec {
    Time {
        #[serde(with = "clock_time")]
        time: NaiveTime,
    },
    Solar(SolarEdge),
    Duration {
        seconds: u64,
    },
    /// Runs until the end of the day the window started on, continuing into
    /// the next day's window when that one starts right at midnight.
    #[default]
    Indefinite,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum HolidayPolicy {
    #[default]
    None,
    /// Run only on the listed holidays (all holidays when `ids` is empty).
    OnlyOn {
        #[serde(default)]
        ids: Vec<String>,
        #[serde(default)]
        days_before: u32,
        #[serde(default)]
        days_after: u32,
    },
    /// Skip the listed holidays (all holidays when `ids` is empty).
    SkipOn {
        #[serde(default)]
        ids: Vec<String>,
        #[serde(default)]
        days_before: u32,
        #[serde(default)]
        days_after: u32,
    },
}

impl HolidayPolicy {
    pub fn holiday_ids(&self) -> &[String] {
        match self {
            HolidayPolicy::None => &[],
            HolidayPolicy::OnlyOn { ids, .. } | HolidayPolicy::SkipOn { ids, .. } => ids,
        }
    }

    pub fn window(&self) -> ObservanceWindow {
        match self {
            HolidayPolicy::None => ObservanceWindow::exact_day(),
            HolidayPolicy::OnlyOn {
                days_before,
                days_after,
                ..
            }
            | HolidayPolicy::SkipOn {
                days_before,
                days_after,
                ..
            } => ObservanceWindow {
                days_before: *days_before,
                days_after: *days_after,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RampSpec {
    #[serde(default)]
    pub on_start: bool,
    #[serde(default)]
    pub on_end: bool,
    #[serde(default)]
    pub duration_seconds: u64,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRule {
    pub id: String,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 0 = Sunday .. 6 = Saturday. Empty means every day.
    #[serde(default)]
    pub days_of_week: Vec<u8>,
    pub start: StartSpec,
    #[serde(default)]
    pub end: EndSpec,
    #[serde(default)]
    pub ramp: RampSpec,
    #[serde(default)]
    pub holidays: HolidayPolicy,
    pub targets: Vec<StreamTarget>,
    pub sequence: Vec<PlaylistItem>,
    #[serde(default)]
    pub sequence_loop: bool,
    #[serde(default)]
    pub sequence_shuffle: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<u32>,
}

impl ScheduleRule {
    /// Check the rule against the catalog it will run in.
    pub fn validate(
        &self,
        presets: &HashMap<String, Preset>,
        holidays: &[Holiday],
        default_point: Option<GeoPoint>,
    ) -> OrchestratorResult<()> {
        let owner = format!("rule '{}'", self.id);

        if let Some(day) = self.days_of_week.iter().find(|day| **day > 6) {
            return Err(OrchestratorError::validation(format!(
                "{owner} has day of week {day} (expected 0-6, Sunday = 0)"
            )));
        }
        if self.targets.is_empty() {
            return Err(OrchestratorError::validation(format!("{owner} has no targets")));
        }
        validate_items(&owner, &self.sequence, presets)?;

        let solar_edges = [
            match &self.start {
                StartSpec::Solar(edge) => Some(edge),
                StartSpec::Time { .. } => None,
            },
            match &self.end {
                EndSpec::Solar(edge) => Some(edge),
                _ => None,
            },
        ];
        for edge in solar_edges.into_iter().flatten() {
            if edge.offset_minutes.unsigned_abs() > MAXIMUM_SOLAR_OFFSET_MINUTES {
                return Err(OrchestratorError::validation(format!(
                    "{owner} shifts its {} edge by {} minutes (at most {MAXIMUM_SOLAR_OFFSET_MINUTES})",
                    edge.event, edge.offset_minutes
                )));
            }
            if let (Some(latitude), Some(longitude)) = (edge.latitude, edge.longitude) {
                GeoPoint::new(latitude, longitude)?;
            } else if edge.latitude.is_some() != edge.longitude.is_some() {
                return Err(OrchestratorError::validation(format!(
                    "{owner} sets only one of latitude/longitude for its {} edge",
                    edge.event
                )));
            } else if default_point.is_none() {
                return Err(OrchestratorError::validation(format!(
                    "{owner} uses {} but no coordinates are configured",
                    edge.event
                )));
            }
        }

        if let EndSpec::Duration { seconds } = self.end
            && !(1..=MAXIMUM_RULE_DURATION).contains(&seconds)
        {
            return Err(OrchestratorError::validation(format!(
                "{owner} runs for {seconds}s (expected 1-{MAXIMUM_RULE_DURATION}s)"
            )));
        }
        if (self.ramp.on_start || self.ramp.on_end) && self.ramp.duration_seconds == 0 {
            return Err(OrchestratorError::validation(format!(
                "{owner} enables a ramp without a ramp duration"
            )));
        }
        if self.ramp.duration_seconds > MAXIMUM_RAMP_DURATION {
            return Err(OrchestratorError::validation(format!(
                "{owner} ramps over {}s (at most {MAXIMUM_RAMP_DURATION}s)",
                self.ramp.duration_seconds
            )));
        }

        let window = self.holidays.window();
        if window.days_before.max(window.days_after) > MAXIMUM_HOLIDAY_WINDOW_DAYS {
            return Err(OrchestratorError::validation(format!(
                "{owner} observes holidays over more than {MAXIMUM_HOLIDAY_WINDOW_DAYS} days"
            )));
        }

        for id in self.holidays.holiday_ids() {
            if !holidays.iter().any(|holiday| &holiday.id == id) {
                return Err(OrchestratorError::validation(format!(
                    "{owner} references unknown holiday '{id}'"
                )));
            }
        }
        Ok(())
    }

    /// Whether the rule applies on the day with this Sunday-based index.
    pub fn runs_on_weekday(&self, days_from_sunday: u32) -> bool {
        self.days_of_week.is_empty()
            || self
                .days_of_week
                .iter()
                .any(|day| u32::from(*day) == days_from_sunday)
    }
}
