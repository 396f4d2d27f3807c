//! Rule sequences, ramps, weekdays and holiday policies through the orchestrator.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use lightkeeper::api::ObserverEvent;
use lightkeeper::backend::{StreamCommand, StreamSpec};
use lightkeeper::config::{Config, Loaded, validate};
use lightkeeper::core::{Orchestrator, Outbox};
use lightkeeper::schedule::CalendarContext;
use lightkeeper::schedule::engine::DeactivationReason;
use lightkeeper::schedule::window::applies_on;
use lightkeeper::session::SessionOwner;

const BASE: &str = r##"
[orchestrator]
timezone = "UTC"
tick_interval = 300

[[devices]]
id = "porch"
led_count = 150

[[presets]]
id = "red"
effect = { type = "solid", color = "#ff0000" }

[[presets]]
id = "green"
effect = { type = "solid", color = "#00ff00" }
"##;

const LOOPING: &str = r#"
[[rules]]
id = "evening"
name = "Evening"
sequence_loop = true
targets = [{ type = "device", id = "porch" }]
sequence = [
  { id = "a", preset_id = "red", duration = 60 },
  { id = "b", preset_id = "green", duration = 60 },
]
start = { type = "time", time = "18:00" }
end = { type = "time", time = "23:00" }
"#;

const HOLDING: &str = r#"
[[rules]]
id = "evening"
name = "Evening"
targets = [{ type = "device", id = "porch" }]
sequence = [
  { id = "a", preset_id = "red", duration = 60 },
  { id = "b", preset_id = "green", duration = 60 },
]
start = { type = "time", time = "18:00" }
end = { type = "time", time = "18:30" }
"#;

const RAMPED: &str = r#"
[[rules]]
id = "evening"
name = "Evening"
targets = [{ type = "device", id = "porch" }]
sequence = [{ id = "a", preset_id = "red", duration = 3600 }]
start = { type = "time", time = "18:00" }
end = { type = "time", time = "20:00" }
ramp = { on_start = true, on_end = true, duration_seconds = 600 }
"#;

const FRIDAYS: &str = r#"
[[rules]]
id = "evening"
name = "Evening"
days_of_week = [5]
targets = [{ type = "device", id = "porch" }]
sequence = [{ id = "a", preset_id = "red", duration = 600 }]
start = { type = "time", time = "18:00" }
end = { type = "time", time = "23:00" }
"#;

const CHRISTMAS_ONLY: &str = r#"
[[rules]]
id = "evening"
name = "Evening"
holidays = { mode = "only_on", ids = ["christmas-day"], days_before = 1 }
targets = [{ type = "device", id = "porch" }]
sequence = [{ id = "a", preset_id = "red", duration = 600 }]
start = { type = "time", time = "18:00" }
"#;

const SKIP_NEW_YEAR: &str = r#"
[[rules]]
id = "evening"
name = "Evening"
holidays = { mode = "skip_on", ids = ["new-years-day"], days_after = 1 }
targets = [{ type = "device", id = "porch" }]
sequence = [{ id = "a", preset_id = "red", duration = 600 }]
start = { type = "time", time = "18:00" }
"#;

fn loaded(rule: &str) -> Loaded {
    let config: Config = toml::from_str(&format!("{BASE}{rule}")).unwrap();
    validate(config).unwrap()
}

/// 2026-06-12 is a Friday.
fn friday(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 12, hour, minute, 0).unwrap()
}

fn booted(rule: &str, now: DateTime<Utc>) -> Orchestrator {
    let mut orchestrator = Orchestrator::new(loaded(rule), Some(5));
    orchestrator.boot(None, now);
    orchestrator
}

fn started(outbox: &Outbox) -> Vec<StreamSpec> {
    outbox
        .commands
        .iter()
        .filter_map(|command| match command {
            StreamCommand::Start(spec) => Some(spec.clone()),
            _ => None,
        })
        .collect()
}

fn stops(outbox: &Outbox) -> usize {
    outbox
        .commands
        .iter()
        .filter(|command| matches!(command, StreamCommand::Stop { .. }))
        .count()
}

fn brightness_levels(outbox: &Outbox) -> Vec<f64> {
    outbox
        .commands
        .iter()
        .filter_map(|command| match command {
            StreamCommand::SetBrightness { level, .. } => Some(*level),
            _ => None,
        })
        .collect()
}

fn rule_sessions(orchestrator: &Orchestrator) -> usize {
    orchestrator
        .snapshot()
        .sessions
        .iter()
        .filter(|s| s.owner == SessionOwner::Rule("evening".to_string()))
        .count()
}

fn window_ended(outbox: &Outbox) -> bool {
    outbox.events.iter().any(|event| {
        matches!(
            event,
            ObserverEvent::RuleDeactivated { rule_id, reason: DeactivationReason::WindowEnded, .. }
                if rule_id == "evening"
        )
    })
}

#[test]
fn test_looping_sequence_replaces_each_item_and_wraps() {
    let mut orchestrator = booted(LOOPING, friday(18, 0));
    let mut programs: Vec<_> = started(&orchestrator.take_outbox())
        .into_iter()
        .map(|spec| spec.program)
        .collect();
    assert_eq!(programs.len(), 1);

    for minute in 1..=3 {
        orchestrator.fire_due(friday(18, minute));
        let outbox = orchestrator.take_outbox();
        let specs = started(&outbox);
        assert_eq!(specs.len(), 1, "minute {minute}");
        assert_eq!(stops(&outbox), 1, "minute {minute}");
        programs.extend(specs.into_iter().map(|spec| spec.program));
        assert_eq!(rule_sessions(&orchestrator), 1);
    }

    assert_ne!(programs[0], programs[1]);
    assert_eq!(programs[0], programs[2]);
    assert_eq!(programs[1], programs[3]);
}

#[test]
fn test_finite_sequence_holds_last_item_until_window_ends() {
    let mut orchestrator = booted(HOLDING, friday(18, 0));
    orchestrator.take_outbox();

    orchestrator.fire_due(friday(18, 1));
    let outbox = orchestrator.take_outbox();
    assert_eq!(started(&outbox).len(), 1);
    let held = orchestrator.snapshot().sessions;

    // Evaluations after the last item keep the same session running
    for minute in [2, 5, 10, 25] {
        orchestrator.fire_due(friday(18, minute));
        let outbox = orchestrator.take_outbox();
        assert!(started(&outbox).is_empty(), "minute {minute}");
        assert_eq!(stops(&outbox), 0, "minute {minute}");
    }
    assert_eq!(orchestrator.snapshot().sessions, held);

    orchestrator.fire_due(friday(18, 30));
    let outbox = orchestrator.take_outbox();
    assert!(window_ended(&outbox));
    assert_eq!(stops(&outbox), 1);
    assert_eq!(rule_sessions(&orchestrator), 0);

    // The sequence timer died with the window
    orchestrator.fire_due(friday(18, 45));
    assert!(orchestrator.take_outbox().commands.is_empty());
}

#[test]
fn test_ramp_sends_brightness_updates_at_both_edges() {
    let mut orchestrator = booted(RAMPED, friday(18, 0));
    let outbox = orchestrator.take_outbox();
    let specs = started(&outbox);
    assert_eq!(specs.len(), 1);
    assert!(specs[0].brightness.abs() < 1e-9);

    orchestrator.fire_due(friday(18, 5));
    let levels = brightness_levels(&orchestrator.take_outbox());
    assert_eq!(levels.len(), 1);
    assert!((levels[0] - 0.5).abs() < 1e-6, "got {levels:?}");

    orchestrator.fire_due(friday(18, 10));
    let levels = brightness_levels(&orchestrator.take_outbox());
    assert!(matches!(levels.as_slice(), [level] if (level - 1.0).abs() < 1e-9));

    // Full brightness in the middle of the window sends nothing new
    orchestrator.fire_due(friday(19, 0));
    assert!(brightness_levels(&orchestrator.take_outbox()).is_empty());

    orchestrator.fire_due(friday(19, 55));
    let levels = brightness_levels(&orchestrator.take_outbox());
    assert!(matches!(levels.as_slice(), [level] if (level - 0.5).abs() < 1e-6));

    orchestrator.fire_due(friday(20, 0));
    let outbox = orchestrator.take_outbox();
    assert!(window_ended(&outbox));
    assert_eq!(rule_sessions(&orchestrator), 0);
}

#[test]
fn test_rule_stops_on_days_it_does_not_run() {
    let mut orchestrator = booted(FRIDAYS, friday(19, 0));
    orchestrator.take_outbox();
    assert_eq!(rule_sessions(&orchestrator), 1);

    // Moving the rule to Saturdays closes tonight's window
    let saturdays = FRIDAYS.replace("days_of_week = [5]", "days_of_week = [6]");
    orchestrator.reload(loaded(&saturdays), friday(19, 30));
    let outbox = orchestrator.take_outbox();
    assert!(window_ended(&outbox));
    assert_eq!(stops(&outbox), 1);
    assert_eq!(rule_sessions(&orchestrator), 0);

    let mut orchestrator = booted(FRIDAYS, friday(19, 0) + Duration::days(1));
    let outbox = orchestrator.take_outbox();
    assert!(started(&outbox).is_empty());
    assert_eq!(rule_sessions(&orchestrator), 0);
}

fn runs_on(rule: &str, year: i32, month: u32, day: u32) -> bool {
    let loaded = loaded(rule);
    let ctx = CalendarContext {
        timezone: loaded.settings.timezone,
        default_point: loaded.settings.default_point,
        holidays: &loaded.catalog.holidays,
    };
    let date = NaiveDate::from_ymd_opt(year, month, day).unwrap();
    applies_on(&loaded.catalog.rules[0], date, &ctx)
}

#[test]
fn test_only_on_holiday_includes_days_before() {
    assert!(!runs_on(CHRISTMAS_ONLY, 2026, 12, 23));
    assert!(runs_on(CHRISTMAS_ONLY, 2026, 12, 24));
    assert!(runs_on(CHRISTMAS_ONLY, 2026, 12, 25));
    assert!(!runs_on(CHRISTMAS_ONLY, 2026, 12, 26));
    assert!(!runs_on(CHRISTMAS_ONLY, 2026, 7, 4));
}

#[test]
fn test_skip_on_holiday_includes_days_after() {
    assert!(runs_on(SKIP_NEW_YEAR, 2026, 12, 31));
    assert!(!runs_on(SKIP_NEW_YEAR, 2027, 1, 1));
    assert!(!runs_on(SKIP_NEW_YEAR, 2027, 1, 2));
    assert!(runs_on(SKIP_NEW_YEAR, 2027, 1, 3));
}

#[test]
fn test_orchestrator_honours_holiday_policy() {
    let christmas_eve = Utc.with_ymd_and_hms(2026, 12, 24, 19, 0, 0).unwrap();
    let orchestrator = booted(CHRISTMAS_ONLY, christmas_eve);
    assert_eq!(rule_sessions(&orchestrator), 1);

    let orchestrator = booted(CHRISTMAS_ONLY, christmas_eve - Duration::days(2));
    assert_eq!(rule_sessions(&orchestrator), 0);

    let new_year = Utc.with_ymd_and_hms(2027, 1, 1, 19, 0, 0).unwrap();
    let orchestrator = booted(SKIP_NEW_YEAR, new_year);
    assert_eq!(rule_sessions(&orchestrator), 0);
    let orchestrator = booted(SKIP_NEW_YEAR, new_year + Duration::days(2));
    assert_eq!(rule_sessions(&orchestrator), 1);
}
