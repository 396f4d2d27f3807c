//! Calendar resolution for schedule rules and holidays.
//!
//! This module turns abstract date rules into concrete dates and instants.
//! Everything here is pure: the reference year or date is always passed in,
//! nothing reads the wall clock.
//!
//! ## Date patterns
//!
//! - `MM-DD`: a fixed date that recurs every year (`12-25`)
//! - `YYYY-MM-DD`: a one-time date that ignores the reference year
//! - `WEEK_DAYOFWEEK_MONTH`: the Nth weekday of a month (`4TH_THURSDAY_NOVEMBER`),
//!   where `LAST` selects the final occurrence of that weekday in the month
//!
//! Solar events (sunrise/sunset at a coordinate) live in [`solar`].

pub mod solar;


use chrono::{Datelike, Duration, NaiveDate, Weekday};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub use solar::{GeoPoint, SolarKind, resolve_solar_event, solar_event_utc};

/// Failures raised while resolving calendar rules.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalendarError {
    /// The pattern itself is malformed (token count, unknown names, out-of-range numbers).
    #[error("invalid date pattern '{pattern}': {reason}")]
    InvalidDateSpec { pattern: String, reason: String },

    /// The pattern is well formed but has no occurrence in the requested year,
    /// e.g. `02-29` in a non-leap year or a fifth Monday that does not exist.
    #[error("'{pattern}' does not occur in {year}")]
    NotObservedInYear { pattern: String, year: i32 },

    #[error("coordinates out of range: latitude {latitude}, longitude {longitude}")]
    InvalidCoordinates { latitude: f64, longitude: f64 },

    /// The sun never crosses the horizon on that day (polar day or night).
    #[error("no {kind} at ({latitude:.4}, {longitude:.4}) on {date}")]
    NoSolarEvent {
        kind: SolarKind,
        latitude: f64,
        longitude: f64,
        date: NaiveDate,
    },
}

impl CalendarError {
    fn invalid(pattern: &str, reason: impl Into<String>) -> Self {
        CalendarError::InvalidDateSpec {
            pattern: pattern.to_string(),
            reason: reason.into(),
        }
    }
}

/// Which occurrence of a weekday within a month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WeekOrdinal {
    First,
    Second,
    Third,
    Fourth,
    Fifth,
    Last,
}

impl WeekOrdinal {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "1ST" | "FIRST" => Some(WeekOrdinal::First),
            "2ND" | "SECOND" => Some(WeekOrdinal::Second),
            "3RD" | "THIRD" => Some(WeekOrdinal::Third),
            "4TH" | "FOURTH" => Some(WeekOrdinal::Fourth),
            "5TH" | "FIFTH" => Some(WeekOrdinal::Fifth),
            "LAST" => Some(WeekOrdinal::Last),
            _ => None,
        }
    }

    fn as_token(&self) -> &'static str {
        match self {
            WeekOrdinal::First => "1ST",
            WeekOrdinal::Second => "2ND",
            WeekOrdinal::Third => "3RD",
            WeekOrdinal::Fourth => "4TH",
            WeekOrdinal::Fifth => "5TH",
            WeekOrdinal::Last => "LAST",
        }
    }

    /// Zero-based week offset; `None` for `Last`.
    fn index(&self) -> Option<u32> {
        match self {
            WeekOrdinal::First => Some(0),
            WeekOrdinal::Second => Some(1),
            WeekOrdinal::Third => Some(2),
            WeekOrdinal::Fourth => Some(3),
            WeekOrdinal::Fifth => Some(4),
            WeekOrdinal::Last => None,
        }
    }
}

const MONTH_NAMES: [&str; 12] = [
    "JANUARY",
    "FEBRUARY",
    "MARCH",
    "APRIL",
    "MAY",
    "JUNE",
    "JULY",
    "AUGUST",
    "SEPTEMBER",
    "OCTOBER",
    "NOVEMBER",
    "DECEMBER",
];

fn parse_month_name(token: &str) -> Option<u32> {
    MONTH_NAMES
        .iter()
        .position(|name| *name == token)
        .map(|idx| idx as u32 + 1)
}

fn month_name(month: u32) -> &'static str {
    MONTH_NAMES
        .get(month.saturating_sub(1) as usize)
        .copied()
        .unwrap_or("?")
}

fn parse_weekday_name(token: &str) -> Option<Weekday> {
    match token {
        "MONDAY" => Some(Weekday::Mon),
        "TUESDAY" => Some(Weekday::Tue),
        "WEDNESDAY" => Some(Weekday::Wed),
        "THURSDAY" => Some(Weekday::Thu),
        "FRIDAY" => Some(Weekday::Fri),
        "SATURDAY" => Some(Weekday::Sat),
        "SUNDAY" => Some(Weekday::Sun),
        _ => None,
    }
}

fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "MONDAY",
        Weekday::Tue => "TUESDAY",
        Weekday::Wed => "WEDNESDAY",
        Weekday::Thu => "THURSDAY",
        Weekday::Fri => "FRIDAY",
        Weekday::Sat => "SATURDAY",
        Weekday::Sun => "SUNDAY",
    }
}

/// Number of days in `month`, checked against a leap year so `02-29` parses.
fn max_day_in_any_year(month: u32) -> u32 {
    match month {
        2 => 29,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

fn parse_number(pattern: &str, token: &str, what: &str) -> Result<u32, CalendarError> {
    if token.is_empty() || !token.chars().all(|c| c.is_ascii_digit()) {
        return Err(CalendarError::invalid(pattern, format!("{what} must be numeric")));
    }
    token
        .parse::<u32>()
        .map_err(|_| CalendarError::invalid(pattern, format!("{what} out of range")))
}

/// An abstract calendar date rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DateSpec {
    /// `MM-DD`, recurring every year.
    Fixed { month: u32, day: u32 },
    /// `YYYY-MM-DD`, a single literal date.
    OneTime(NaiveDate),
    /// `WEEK_DAYOFWEEK_MONTH`, recurring.
    NthWeekday {
        week: WeekOrdinal,
        weekday: Weekday,
        month: u32,
    },
}

impl DateSpec {
    /// Parse a date pattern. Names are matched case-insensitively.
    pub fn parse(pattern: &str) -> Result<Self, CalendarError> {
        let trimmed = pattern.trim();
        if trimmed.is_empty() {
            return Err(CalendarError::invalid(pattern, "empty pattern"));
        }

        if trimmed.contains('_') {
            let upper = trimmed.to_ascii_uppercase();
            let tokens: Vec<&str> = upper.split('_').collect();
            let [week, weekday, month] = tokens.as_slice() else {
                return Err(CalendarError::invalid(
                    pattern,
                    format!("expected WEEK_DAYOFWEEK_MONTH, got {} tokens", tokens.len()),
                ));
            };
            let week = WeekOrdinal::parse(week)
                .ok_or_else(|| CalendarError::invalid(pattern, format!("unknown week '{week}'")))?;
            let weekday = parse_weekday_name(weekday).ok_or_else(|| {
                CalendarError::invalid(pattern, format!("unknown day '{weekday}'"))
            })?;
            let month = parse_month_name(month).ok_or_else(|| {
                CalendarError::invalid(pattern, format!("unknown month '{month}'"))
            })?;
            return Ok(DateSpec::NthWeekday {
                week,
                weekday,
                month,
            });
        }

        let tokens: Vec<&str> = trimmed.split('-').collect();
        match tokens.as_slice() {
            [month, day] => {
                let month = parse_number(pattern, month, "month")?;
                let day = parse_number(pattern, day, "day")?;
                if !(1..=12).contains(&month) {
                    return Err(CalendarError::invalid(pattern, "month must be 01-12"));
                }
                if day == 0 || day > max_day_in_any_year(month) {
                    return Err(CalendarError::invalid(
                        pattern,
                        format!("day {day} does not exist in {}", month_name(month)),
                    ));
                }
                Ok(DateSpec::Fixed { month, day })
            }
            [year, month, day] => {
                if year.len() != 4 {
                    return Err(CalendarError::invalid(pattern, "year must have four digits"));
                }
                let year = parse_number(pattern, year, "year")? as i32;
                let month = parse_number(pattern, month, "month")?;
                let day = parse_number(pattern, day, "day")?;
                NaiveDate::from_ymd_opt(year, month, day)
                    .map(DateSpec::OneTime)
                    .ok_or_else(|| CalendarError::invalid(pattern, "date does not exist"))
            }
            _ => Err(CalendarError::invalid(
                pattern,
                format!("expected MM-DD or YYYY-MM-DD, got {} tokens", tokens.len()),
            )),
        }
    }

    /// Whether the rule produces a date every year.
    pub fn is_recurring(&self) -> bool {
        !matches!(self, DateSpec::OneTime(_))
    }

    /// Resolve the rule to a concrete date in `year`.
    ///
    /// One-time dates ignore `year` and return their literal date.
    pub fn resolve(&self, year: i32) -> Result<NaiveDate, CalendarError> {
        match *self {
            DateSpec::OneTime(date) => Ok(date),
            DateSpec::Fixed { month, day } => {
                NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
                    CalendarError::NotObservedInYear {
                        pattern: self.to_string(),
                        year,
                    }
                })
            }
            DateSpec::NthWeekday {
                week,
                weekday,
                month,
            } => nth_weekday_of_month(year, month, weekday, week).ok_or_else(|| {
                CalendarError::NotObservedInYear {
                    pattern: self.to_string(),
                    year,
                }
            }),
        }
    }
}

impl FromStr for DateSpec {
    type Err = CalendarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DateSpec::parse(s)
    }
}

impl fmt::Display for DateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DateSpec::Fixed { month, day } => write!(f, "{month:02}-{day:02}"),
            DateSpec::OneTime(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            DateSpec::NthWeekday {
                week,
                weekday,
                month,
            } => write!(
                f,
                "{}_{}_{}",
                week.as_token(),
                weekday_name(*weekday),
                month_name(*month)
            ),
        }
    }
}

/// Compute the Nth (or last) occurrence of `weekday` in `month` of `year`.
///
/// Returns `None` when the occurrence does not exist (a fifth weekday in a
/// four-week month) or the month is invalid.
pub fn nth_weekday_of_month(
    year: i32,
    month: u32,
    weekday: Weekday,
    week: WeekOrdinal,
) -> Option<NaiveDate> {
    match week.index() {
        Some(n) => {
            let first = NaiveDate::from_ymd_opt(year, month, 1)?;
            let offset = (7 + weekday.num_days_from_monday()
                - first.weekday().num_days_from_monday())
                % 7;
            let date = first + Duration::days(i64::from(offset + 7 * n));
            (date.month() == month).then_some(date)
        }
        None => {
            let last = last_day_of_month(year, month)?;
            let back =
                (7 + last.weekday().num_days_from_monday() - weekday.num_days_from_monday()) % 7;
            Some(last - Duration::days(i64::from(back)))
        }
    }
}

fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1).map(|d| d - Duration::days(1))
}
