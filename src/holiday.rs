//! Holiday definitions and observance matching.
//!
//! A holiday carries one of the date patterns understood by
//! [`DateSpec`](crate::calendar::DateSpec). Matching resolves the pattern for
//! the reference year (and its neighbours, so a window reaching across New
//! Year still hits) and checks whether the date falls inside the observance
//! window `[holiday - days_before, holiday + days_after]`.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::calendar::{CalendarError, DateSpec};

/// A holiday definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holiday {
    pub id: String,
    pub name: String,
    /// `MM-DD`, `YYYY-MM-DD` or `WEEK_DAYOFWEEK_MONTH`.
    pub date: String,
    #[serde(default = "default_recurring")]
    pub is_recurring: bool,
    /// Built-in holidays are not custom and cannot be deleted.
    #[serde(default = "default_custom")]
    pub is_custom: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_recurring() -> bool {
    true
}

fn default_custom() -> bool {
    true
}

impl Holiday {
    /// The date rule this holiday follows.
    ///
    /// A literal `YYYY-MM-DD` marked recurring repeats on the same month and
    /// day every year. A recurring pattern marked one-time is rejected since
    /// it has no literal year to match against.
    pub fn effective_spec(&self) -> Result<DateSpec, CalendarError> {
        let spec = DateSpec::parse(&self.date)?;
        match (spec, self.is_recurring) {
            (DateSpec::OneTime(date), true) => Ok(DateSpec::Fixed {
                month: date.month(),
                day: date.day(),
            }),
            (spec, false) if spec.is_recurring() => Err(CalendarError::InvalidDateSpec {
                pattern: self.date.clone(),
                reason: "one-time holidays need a full YYYY-MM-DD date".to_string(),
            }),
            (spec, _) => Ok(spec),
        }
    }

    /// Whether users may delete this holiday.
    pub fn is_deletable(&self) -> bool {
        self.is_custom
    }
}

/// Days around a holiday that also count as observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservanceWindow {
    #[serde(default)]
    pub days_before: u32,
    #[serde(default)]
    pub days_after: u32,
}

impl ObservanceWindow {
    pub fn exact_day() -> Self {
        Self::default()
    }

    fn contains(&self, holiday: NaiveDate, date: NaiveDate) -> bool {
        let first = holiday - Duration::days(i64::from(self.days_before));
        let last = holiday + Duration::days(i64::from(self.days_after));
        (first..=last).contains(&date)
    }
}

/// Whether `date` falls inside the observance window of `holiday`.
///
/// Holidays whose pattern does not occur in a year (Feb 29, a missing fifth
/// weekday) are skipped for that year. Malformed patterns never match.
pub fn observes(holiday: &Holiday, date: NaiveDate, window: ObservanceWindow) -> bool {
    let spec = match holiday.effective_spec() {
        Ok(spec) => spec,
        Err(e) => {
            log_warning!("Ignoring holiday '{}': {e}", holiday.id);
            return false;
        }
    };

    if !spec.is_recurring() {
        return spec
            .resolve(date.year())
            .is_ok_and(|resolved| window.contains(resolved, date));
    }

    (date.year() - 1..=date.year() + 1).any(|year| {
        spec.resolve(year)
            .is_ok_and(|resolved| window.contains(resolved, date))
    })
}

/// Ids of the holidays observed on `date`, in input order.
pub fn matching_holidays<'a, I>(date: NaiveDate, holidays: I, window: ObservanceWindow) -> Vec<String>
where
    I: IntoIterator<Item = &'a Holiday>,
{
    holidays
        .into_iter()
        .filter(|holiday| observes(holiday, date, window))
        .map(|holiday| holiday.id.clone())
        .collect()
}

/// Whether any of `holidays` is observed on `date`.
pub fn is_holiday<'a, I>(date: NaiveDate, holidays: I, window: ObservanceWindow) -> bool
where
    I: IntoIterator<Item = &'a Holiday>,
{
    holidays
        .into_iter()
        .any(|holiday| observes(holiday, date, window))
}

fn builtin(id: &str, name: &str, date: &str) -> Holiday {
    Holiday {
        id: id.to_string(),
        name: name.to_string(),
        date: date.to_string(),
        is_recurring: true,
        is_custom: false,
        description: None,
    }
}

/// Holidays shipped with the application.
pub fn builtin_holidays() -> Vec<Holiday> {
    vec![
        builtin("new-years-day", "New Year's Day", "01-01"),
        builtin("mlk-day", "Martin Luther King Jr. Day", "3RD_MONDAY_JANUARY"),
        builtin("valentines-day", "Valentine's Day", "02-14"),
        builtin("presidents-day", "Presidents' Day", "3RD_MONDAY_FEBRUARY"),
        builtin("st-patricks-day", "St. Patrick's Day", "03-17"),
        builtin("mothers-day", "Mother's Day", "2ND_SUNDAY_MAY"),
        builtin("memorial-day", "Memorial Day", "LAST_MONDAY_MAY"),
        builtin("fathers-day", "Father's Day", "3RD_SUNDAY_JUNE"),
        builtin("independence-day", "Independence Day", "07-04"),
        builtin("labor-day", "Labor Day", "1ST_MONDAY_SEPTEMBER"),
        builtin("halloween", "Halloween", "10-31"),
        builtin("thanksgiving", "Thanksgiving", "4TH_THURSDAY_NOVEMBER"),
        builtin("christmas-eve", "Christmas Eve", "12-24"),
        builtin("christmas-day", "Christmas Day", "12-25"),
        builtin("new-years-eve", "New Year's Eve", "12-31"),
    ]
}
