//! Schedule rules driven through the public orchestrator and window API.

use chrono::{DateTime, TimeZone, Utc};
use lightkeeper::api::ObserverEvent;
use lightkeeper::config::{Config, Loaded, validate};
use lightkeeper::core::Orchestrator;
use lightkeeper::schedule::engine::DeactivationReason;
use lightkeeper::schedule::window::{active_window, next_start};
use lightkeeper::schedule::{CalendarContext, SolarCache};
use lightkeeper::session::SessionOwner;

/// Friday nights only, from sunset until the next sunrise.
const FRIDAY_NIGHTS: &str = r##"
[orchestrator]
timezone = "America/New_York"
latitude = 40.7128
longitude = -74.0060
tick_interval = 300

[[devices]]
id = "porch"
led_count = 150

[[presets]]
id = "warm"
effect = { type = "solid", color = "#ffb070" }

[[rules]]
id = "friday-night"
name = "Friday night"
days_of_week = [5]
targets = [{ type = "device", id = "porch" }]
sequence = [{ id = "a", preset_id = "warm", duration = 3600 }]
start = { type = "solar", event = "sunset" }
end = { type = "solar", event = "sunrise" }
"##;

fn loaded() -> Loaded {
    let config: Config = toml::from_str(FRIDAY_NIGHTS).unwrap();
    validate(config).unwrap()
}

/// Local New York wall time on the given June 2026 day.
fn local(day: u32, hour: u32) -> DateTime<Utc> {
    chrono_tz::America::New_York
        .with_ymd_and_hms(2026, 6, day, hour, 0, 0)
        .unwrap()
        .with_timezone(&Utc)
}

fn rule_sessions(orchestrator: &Orchestrator) -> usize {
    orchestrator
        .snapshot()
        .sessions
        .iter()
        .filter(|s| s.owner == SessionOwner::Rule("friday-night".to_string()))
        .count()
}

#[test]
fn test_overnight_window_belongs_to_its_start_day() {
    let loaded = loaded();
    let rule = &loaded.catalog.rules[0];
    let ctx = CalendarContext {
        timezone: loaded.settings.timezone,
        default_point: loaded.settings.default_point,
        holidays: &loaded.catalog.holidays,
    };
    let mut cache = SolarCache::new();

    // 2026-06-12 is a Friday
    let friday_late = active_window(rule, local(12, 23), &ctx, &mut cache)
        .unwrap()
        .expect("active late Friday");
    assert_eq!(
        friday_late.anchor,
        chrono::NaiveDate::from_ymd_opt(2026, 6, 12).unwrap()
    );

    let saturday_early = active_window(rule, local(13, 3), &ctx, &mut cache)
        .unwrap()
        .expect("still active before Saturday sunrise");
    assert_eq!(saturday_early, friday_late);
    assert!(friday_late.end > local(13, 4) && friday_late.end < local(13, 7));
    assert!(!friday_late.open_ended);

    // Saturday itself is not a scheduled day
    assert!(active_window(rule, local(13, 12), &ctx, &mut cache).unwrap().is_none());
    assert!(active_window(rule, local(13, 23), &ctx, &mut cache).unwrap().is_none());
    assert!(active_window(rule, local(12, 12), &ctx, &mut cache).unwrap().is_none());

    let next = next_start(rule, local(13, 12), &ctx, &mut cache).unwrap();
    assert!(next > local(19, 19) && next < local(19, 22));
}

#[test]
fn test_orchestrator_runs_rule_across_midnight() {
    let mut orchestrator = Orchestrator::new(loaded(), Some(3));

    orchestrator.boot(None, local(12, 23));
    let outbox = orchestrator.take_outbox();
    assert!(outbox.events.iter().any(|event| matches!(
        event,
        ObserverEvent::RuleActivated { rule_id, .. } if rule_id == "friday-night"
    )));
    assert_eq!(rule_sessions(&orchestrator), 1);

    orchestrator.fire_due(local(13, 3));
    let outbox = orchestrator.take_outbox();
    assert!(
        !outbox
            .events
            .iter()
            .any(|event| matches!(event, ObserverEvent::RuleDeactivated { .. }))
    );
    assert_eq!(rule_sessions(&orchestrator), 1);

    orchestrator.fire_due(local(13, 12));
    let outbox = orchestrator.take_outbox();
    assert!(outbox.events.iter().any(|event| matches!(
        event,
        ObserverEvent::RuleDeactivated { rule_id, reason: DeactivationReason::WindowEnded, .. }
            if rule_id == "friday-night"
    )));
    assert_eq!(rule_sessions(&orchestrator), 0);

    orchestrator.fire_due(local(13, 23));
    assert_eq!(rule_sessions(&orchestrator), 0);
}

#[test]
fn test_long_window_is_found_days_after_its_anchor() {
    let shifted = FRIDAY_NIGHTS
        .replace(
            r#"start = { type = "solar", event = "sunset" }"#,
            r#"start = { type = "solar", event = "sunset", offset_minutes = 720 }"#,
        )
        .replace(
            r#"end = { type = "solar", event = "sunrise" }"#,
            r#"end = { type = "duration", seconds = 172800 }"#,
        );
    let config: Config = toml::from_str(&shifted).unwrap();
    let loaded = validate(config).unwrap();
    let rule = &loaded.catalog.rules[0];
    let ctx = CalendarContext {
        timezone: loaded.settings.timezone,
        default_point: loaded.settings.default_point,
        holidays: &loaded.catalog.holidays,
    };
    let mut cache = SolarCache::new();

    // Friday sunset plus twelve hours lands Saturday morning, then runs two days
    let window = active_window(rule, local(15, 7), &ctx, &mut cache)
        .unwrap()
        .expect("still inside Friday's window on Monday morning");
    assert_eq!(window.anchor, chrono::NaiveDate::from_ymd_opt(2026, 6, 12).unwrap());
    assert!(window.start > local(13, 8) && window.start < local(13, 9));
    assert_eq!(window.end - window.start, chrono::Duration::seconds(172800));

    assert!(active_window(rule, local(15, 10), &ctx, &mut cache).unwrap().is_none());
}
