//! Sunrise and sunset instants for a coordinate.
//!
//! The event times come from the `sunrise` crate. Before asking it, a quick
//! hour-angle check rejects days where the sun never crosses the horizon, so
//! polar day and polar night surface as [`CalendarError::NoSolarEvent`]
//! instead of a nonsensical instant.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::CalendarError;

/// Which horizon crossing to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolarKind {
    Sunrise,
    Sunset,
}

impl fmt::Display for SolarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolarKind::Sunrise => write!(f, "sunrise"),
            SolarKind::Sunset => write!(f, "sunset"),
        }
    }
}

/// A validated geographic coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, CalendarError> {
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(CalendarError::InvalidCoordinates {
                latitude,
                longitude,
            });
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }
}

/// Standard refraction-corrected altitude of the solar disc at sunrise/sunset.
const HORIZON_ALTITUDE_DEG: f64 = -0.833;

/// Whether the sun crosses the horizon at this latitude on `date`.
///
/// Uses Cooper's declination approximation and the sunrise hour-angle equation
/// `cos(H) = (sin(h0) - sin(phi) sin(delta)) / (cos(phi) cos(delta))`.
fn sun_crosses_horizon(latitude: f64, date: NaiveDate) -> bool {
    let day_of_year = f64::from(date.ordinal());
    let declination = 23.44_f64.to_radians()
        * ((360.0 / 365.0) * (284.0 + day_of_year)).to_radians().sin();
    let phi = latitude.to_radians();
    let denominator = phi.cos() * declination.cos();
    if denominator.abs() < f64::EPSILON {
        // At the poles the sun circles the sky; treat as no crossing.
        return false;
    }
    let cos_h =
        (HORIZON_ALTITUDE_DEG.to_radians().sin() - phi.sin() * declination.sin()) / denominator;
    cos_h.abs() <= 1.0
}

/// UTC instant of sunrise or sunset for the local calendar `date` at `point`.
pub fn solar_event_utc(
    kind: SolarKind,
    point: GeoPoint,
    date: NaiveDate,
) -> Result<DateTime<Utc>, CalendarError> {
    use sunrise::{Coordinates, SolarDay, SolarEvent};

    let no_event = || CalendarError::NoSolarEvent {
        kind,
        latitude: point.latitude,
        longitude: point.longitude,
        date,
    };

    if !sun_crosses_horizon(point.latitude, date) {
        return Err(no_event());
    }

    let coord = Coordinates::new(point.latitude, point.longitude).ok_or(
        CalendarError::InvalidCoordinates {
            latitude: point.latitude,
            longitude: point.longitude,
        },
    )?;
    let solar_day = SolarDay::new(coord, date);
    let event = match kind {
        SolarKind::Sunrise => SolarEvent::Sunrise,
        SolarKind::Sunset => SolarEvent::Sunset,
    };
    let instant = solar_day.event_time(event);

    // Guard against degenerate results right at the polar boundary.
    let noon = date
        .and_hms_opt(12, 0, 0)
        .map(|naive| naive.and_utc())
        .ok_or_else(no_event)?;
    if (instant - noon).num_hours().abs() > 36 {
        return Err(no_event());
    }
    Ok(instant)
}

/// Solar event for `date` shifted by `offset_minutes` (negative = earlier).
pub fn resolve_solar_event(
    kind: SolarKind,
    point: GeoPoint,
    date: NaiveDate,
    offset_minutes: i32,
) -> Result<DateTime<Utc>, CalendarError> {
    let instant = solar_event_utc(kind, point, date)?;
    Ok(instant + Duration::minutes(i64::from(offset_minutes)))
}
