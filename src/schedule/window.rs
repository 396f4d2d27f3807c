//! Resolve the concrete active window of a rule around a point in time.
//!
//! A window belongs to the local day it starts on (the anchor day). Day of
//! week and holiday policy are checked against the anchor day, so a window
//! that crosses midnight keeps running into the next day. An end that falls
//! at or before the start on the anchor day is taken from the following day.

use chrono::{DateTime, Datelike, Days, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::HashMap;

use crate::calendar::{CalendarError, GeoPoint, SolarKind, solar_event_utc};
use crate::holiday::{Holiday, is_holiday};
use crate::schedule::{EndSpec, HolidayPolicy, ScheduleRule, SolarEdge, StartSpec};

/// How many anchor days before today can still own the current instant.
///
/// A solar start may be shifted half a day past its anchor and a duration
/// window then runs up to two more days.
const LOOKBACK_DAYS: u64 = 3;

/// Calendar settings shared by every rule.
#[derive(Debug, Clone, Copy)]
pub struct CalendarContext<'a> {
    pub timezone: Tz,
    pub default_point: Option<GeoPoint>,
    pub holidays: &'a [Holiday],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RuleWindow {
    pub anchor: NaiveDate,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// The end is the day boundary of an indefinite rule, not a real edge.
    pub open_ended: bool,
}

impl RuleWindow {
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        self.start <= now && now < self.end
    }
}

/// Solar instants keyed by event, coordinate and date, computed once per day.
#[derive(Debug, Default)]
pub struct SolarCache {
    entries: HashMap<(SolarKind, u64, u64, NaiveDate), Result<DateTime<Utc>, CalendarError>>,
}

impl SolarCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event(
        &mut self,
        kind: SolarKind,
        point: GeoPoint,
        date: NaiveDate,
    ) -> Result<DateTime<Utc>, CalendarError> {
        let key = (kind, point.latitude.to_bits(), point.longitude.to_bits(), date);
        self.entries
            .entry(key)
            .or_insert_with(|| solar_event_utc(kind, point, date))
            .clone()
    }

    /// Forget entries for dates before `date`.
    pub fn prune_before(&mut self, date: NaiveDate) {
        self.entries.retain(|(_, _, _, day), _| *day >= date);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Map a local wall-clock time to UTC, moving forward out of a DST gap.
fn local_instant(tz: Tz, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    let naive = date.and_time(time);
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or_else(|| naive.and_utc())
}

fn next_day(date: NaiveDate) -> NaiveDate {
    date.checked_add_days(Days::new(1)).unwrap_or(date)
}

fn solar_instant(
    edge: &SolarEdge,
    date: NaiveDate,
    ctx: &CalendarContext<'_>,
    cache: &mut SolarCache,
) -> Result<DateTime<Utc>, CalendarError> {
    let point = edge.point(ctx.default_point).ok_or(CalendarError::InvalidCoordinates {
        latitude: edge.latitude.unwrap_or(f64::NAN),
        longitude: edge.longitude.unwrap_or(f64::NAN),
    })?;
    let instant = cache.event(edge.event, point, date)?;
    Ok(instant + Duration::minutes(i64::from(edge.offset_minutes)))
}

/// Whether the rule's day-of-week and holiday policy allow a window on `anchor`.
pub fn applies_on(rule: &ScheduleRule, anchor: NaiveDate, ctx: &CalendarContext<'_>) -> bool {
    if !rule.runs_on_weekday(anchor.weekday().num_days_from_sunday()) {
        return false;
    }

    let selected = |ids: &[String]| -> Vec<&Holiday> {
        ctx.holidays
            .iter()
            .filter(|holiday| ids.is_empty() || ids.contains(&holiday.id))
            .collect()
    };
    match &rule.holidays {
        HolidayPolicy::None => true,
        policy @ HolidayPolicy::OnlyOn { ids, .. } => {
            is_holiday(anchor, selected(ids), policy.window())
        }
        policy @ HolidayPolicy::SkipOn { ids, .. } => {
            !is_holiday(anchor, selected(ids), policy.window())
        }
    }
}

/// The window the rule would have if it started on `anchor`, or `None` if it does not run that day.
pub fn window_for_anchor(
    rule: &ScheduleRule,
    anchor: NaiveDate,
    ctx: &CalendarContext<'_>,
    cache: &mut SolarCache,
) -> Result<Option<RuleWindow>, CalendarError> {
    if !applies_on(rule, anchor, ctx) {
        return Ok(None);
    }

    let tz = ctx.timezone;
    let start = match &rule.start {
        StartSpec::Time { time } => local_instant(tz, anchor, *time),
        StartSpec::Solar(edge) => solar_instant(edge, anchor, ctx, cache)?,
    };
    let midnight = local_instant(tz, next_day(anchor), NaiveTime::MIN);

    let (end, open_ended) = match &rule.end {
        EndSpec::Time { time } => {
            let same_day = local_instant(tz, anchor, *time);
            let end = if same_day <= start {
                local_instant(tz, next_day(anchor), *time)
            } else {
                same_day
            };
            (end, false)
        }
        EndSpec::Solar(edge) => {
            let same_day = solar_instant(edge, anchor, ctx, cache)?;
            let end = if same_day <= start {
                solar_instant(edge, next_day(anchor), ctx, cache)?
            } else {
                same_day
            };
            (end, false)
        }
        EndSpec::Duration { seconds } => (start + Duration::seconds(*seconds as i64), false),
        EndSpec::Indefinite if midnight > start => (midnight, true),
        EndSpec::Indefinite => (
            local_instant(tz, next_day(next_day(anchor)), NaiveTime::MIN),
            true,
        ),
    };

    Ok(Some(RuleWindow {
        anchor,
        start,
        end,
        open_ended,
    }))
}

/// Local calendar date of `now` in the configured timezone.
pub fn local_date(now: DateTime<Utc>, ctx: &CalendarContext<'_>) -> NaiveDate {
    now.with_timezone(&ctx.timezone).date_naive()
}

/// The window containing `now`, if any.
///
/// Anchors are tried from the earliest candidate day, so a window that
/// started yesterday and still runs wins over one starting later today.
/// A calendar error on one anchor day only matters if no window matched.
pub fn active_window(
    rule: &ScheduleRule,
    now: DateTime<Utc>,
    ctx: &CalendarContext<'_>,
    cache: &mut SolarCache,
) -> Result<Option<RuleWindow>, CalendarError> {
    let today = local_date(now, ctx);
    let mut first_error = None;

    for back in (0..=LOOKBACK_DAYS).rev() {
        let Some(anchor) = today.checked_sub_days(Days::new(back)) else {
            continue;
        };
        match window_for_anchor(rule, anchor, ctx, cache) {
            Ok(Some(window)) if window.contains(now) => return Ok(Some(window)),
            Ok(_) => {}
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(None),
    }
}

/// Start of the next window that begins after `now`, looking up to a week ahead.
pub fn next_start(
    rule: &ScheduleRule,
    now: DateTime<Utc>,
    ctx: &CalendarContext<'_>,
    cache: &mut SolarCache,
) -> Option<DateTime<Utc>> {
    let today = local_date(now, ctx);
    (0..=7)
        .filter_map(|ahead| today.checked_add_days(Days::new(ahead)))
        .filter_map(|anchor| window_for_anchor(rule, anchor, ctx, cache).ok().flatten())
        .map(|window| window.start)
        .find(|start| *start > now)
}
