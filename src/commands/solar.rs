//! Implementation of the solar command: sunrise and sunset for a coordinate.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;

use crate::calendar::{CalendarError, GeoPoint, SolarKind, solar_event_utc};
use crate::config;

#[derive(Debug)]
pub struct SolarTimes {
    pub sunrise: Result<DateTime<Utc>, CalendarError>,
    pub sunset: Result<DateTime<Utc>, CalendarError>,
}

pub fn solar_times(latitude: f64, longitude: f64, date: NaiveDate) -> Result<SolarTimes> {
    let point = GeoPoint::new(latitude, longitude)?;
    Ok(SolarTimes {
        sunrise: solar_event_utc(SolarKind::Sunrise, point, date),
        sunset: solar_event_utc(SolarKind::Sunset, point, date),
    })
}

pub fn handle_solar_command(latitude: f64, longitude: f64, date: Option<&str>) -> Result<()> {
    // Display in the configured zone when there is a usable configuration
    let tz: Tz = config::config_path()
        .ok()
        .and_then(|path| config::load_from_path(&path).ok())
        .map_or(chrono_tz::UTC, |loaded| loaded.settings.timezone);

    let date = match date {
        Some(text) => NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .with_context(|| format!("Invalid date '{text}', expected YYYY-MM-DD"))?,
        None => Utc::now().with_timezone(&tz).date_naive(),
    };

    log_version!();
    let times = solar_times(latitude, longitude, date)?;
    log_block_start!("Solar events on {date} at ({latitude:.4}, {longitude:.4})");
    for (label, instant) in [("Sunrise", &times.sunrise), ("Sunset", &times.sunset)] {
        match instant {
            Ok(at) => log_indented!("{label}: {}", at.with_timezone(&tz).format("%H:%M:%S %Z")),
            Err(e) => log_indented!("{label}: {e}"),
        }
    }
    log_end!();
    Ok(())
}
