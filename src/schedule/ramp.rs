//! Linear brightness ramps at the edges of a rule window.

use chrono::{DateTime, Duration, Utc};

use crate::schedule::{RampSpec, RuleWindow};

/// Brightness for `now` inside `window`, in `0.0..=1.0`.
///
/// Ramp-on climbs from 0 at the window start to 1 after the ramp duration.
/// Ramp-off falls from 1 to 0, reaching 0 exactly at the window end. Where the
/// two overlap (a window shorter than two ramps) the lower level wins.
/// Open-ended windows never ramp off at their day boundary.
pub fn brightness_at(ramp: &RampSpec, window: &RuleWindow, now: DateTime<Utc>) -> f64 {
    if ramp.duration_seconds == 0 {
        return 1.0;
    }
    let span = ramp.duration_seconds as f64;
    let mut level: f64 = 1.0;

    if ramp.on_start {
        let elapsed = seconds(now - window.start);
        level = level.min(elapsed / span);
    }
    if ramp.on_end && !window.open_ended {
        let remaining = seconds(window.end - now);
        level = level.min(remaining / span);
    }
    level.clamp(0.0, 1.0)
}

/// Whether `now` falls inside either ramp of the window.
pub fn is_ramping(ramp: &RampSpec, window: &RuleWindow, now: DateTime<Utc>) -> bool {
    if ramp.duration_seconds == 0 || !window.contains(now) {
        return false;
    }
    let span = Duration::seconds(ramp.duration_seconds as i64);
    let ramping_on = ramp.on_start && now < window.start + span;
    let ramping_off = ramp.on_end && !window.open_ended && now >= window.end - span;
    ramping_on || ramping_off
}

/// The next instant a ramp begins or ends after `now`, if any.
pub fn next_ramp_edge(ramp: &RampSpec, window: &RuleWindow, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if ramp.duration_seconds == 0 {
        return None;
    }
    let span = Duration::seconds(ramp.duration_seconds as i64);
    let mut edges = Vec::with_capacity(2);
    if ramp.on_start {
        edges.push(window.start + span);
    }
    if ramp.on_end && !window.open_ended {
        edges.push(window.end - span);
    }
    edges.into_iter().filter(|edge| *edge > now).min()
}

fn seconds(duration: Duration) -> f64 {
    duration.num_milliseconds() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn window(minutes: i64) -> RuleWindow {
        let start = Utc.with_ymd_and_hms(2024, 12, 20, 22, 0, 0).unwrap();
        RuleWindow {
            anchor: start.date_naive(),
            start,
            end: start + Duration::minutes(minutes),
            open_ended: false,
        }
    }

    fn ramp(on_start: bool, on_end: bool) -> RampSpec {
        RampSpec {
            on_start,
            on_end,
            duration_seconds: 600,
        }
    }

    #[test]
    fn test_ramp_on_is_linear() {
        let w = window(120);
        let r = ramp(true, false);
        assert_eq!(brightness_at(&r, &w, w.start), 0.0);
        assert!((brightness_at(&r, &w, w.start + Duration::minutes(5)) - 0.5).abs() < 1e-9);
        assert_eq!(brightness_at(&r, &w, w.start + Duration::minutes(10)), 1.0);
        assert!(is_ramping(&r, &w, w.start + Duration::minutes(9)));
        assert!(!is_ramping(&r, &w, w.start + Duration::minutes(10)));
    }

    #[test]
    fn test_ramp_off_completes_at_end() {
        let w = window(120);
        let r = ramp(false, true);
        assert_eq!(brightness_at(&r, &w, w.end - Duration::minutes(20)), 1.0);
        assert!((brightness_at(&r, &w, w.end - Duration::minutes(2)) - 0.2).abs() < 1e-9);
        assert_eq!(brightness_at(&r, &w, w.end), 0.0);
        assert_eq!(
            next_ramp_edge(&r, &w, w.start),
            Some(w.end - Duration::minutes(10))
        );
    }

    #[test]
    fn test_short_window_takes_lower_ramp() {
        let w = window(12);
        let r = ramp(true, true);
        let level = brightness_at(&r, &w, w.start + Duration::minutes(8));
        assert!((level - 0.4).abs() < 1e-9, "{level}");
    }

    #[test]
    fn test_open_ended_window_never_ramps_off() {
        let mut w = window(120);
        w.open_ended = true;
        let r = ramp(false, true);
        assert_eq!(brightness_at(&r, &w, w.end - Duration::minutes(1)), 1.0);
        assert!(!is_ramping(&r, &w, w.end - Duration::minutes(1)));
        assert_eq!(next_ramp_edge(&r, &w, w.start), None);
    }
}
