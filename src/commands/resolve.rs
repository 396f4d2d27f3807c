//! Implementation of the resolve command: the concrete date of a holiday pattern.

use anyhow::Result;
use chrono::{Datelike, NaiveDate, Utc};

use crate::calendar::{CalendarError, DateSpec};

/// Resolve `pattern` in `year`, or in the current year when none is given.
pub fn resolve_pattern(pattern: &str, year: i32) -> Result<NaiveDate, CalendarError> {
    DateSpec::parse(pattern)?.resolve(year)
}

pub fn handle_resolve_command(pattern: &str, year: Option<i32>) -> Result<()> {
    let year = year.unwrap_or_else(|| Utc::now().year());
    log_version!();
    match resolve_pattern(pattern, year) {
        Ok(date) => {
            log_block_start!("{pattern} in {year}");
            log_indented!("{}", date.format("%A, %B %-d, %Y"));
        }
        Err(CalendarError::NotObservedInYear { .. }) => {
            log_block_start!("{pattern} does not occur in {year}");
        }
        Err(e) => {
            log_error_exit!("{e}");
            std::process::exit(crate::constants::EXIT_FAILURE);
        }
    }
    log_end!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_pattern() {
        assert_eq!(
            resolve_pattern("4TH_THURSDAY_NOVEMBER", 2026).unwrap(),
            NaiveDate::from_ymd_opt(2026, 11, 26).unwrap()
        );
        assert!(matches!(
            resolve_pattern("02-29", 2027),
            Err(CalendarError::NotObservedInYear { .. })
        ));
        assert!(matches!(
            resolve_pattern("FIRST_MONDAY", 2026),
            Err(CalendarError::InvalidDateSpec { .. })
        ));
    }
}
