//! Playlist playback through the public orchestrator API.

use chrono::{DateTime, Duration, TimeZone, Utc};
use lightkeeper::api::{ApiRequest, ApiResponse, ApiResult, ObserverEvent};
use lightkeeper::backend::StreamCommand;
use lightkeeper::config::{Config, validate};
use lightkeeper::core::{Orchestrator, Outbox, PlaybackUpdate};
use lightkeeper::playlist::player::PlaybackEnd;
use lightkeeper::session::SessionId;
use lightkeeper::state::playback::ActivePlaybackRecord;

const SHOW: &str = r##"
[orchestrator]
timezone = "UTC"
tick_interval = 300

[[devices]]
id = "tree"
led_count = 200

[[presets]]
id = "red"
effect = { type = "solid", color = "#ff0000" }

[[presets]]
id = "green"
effect = { type = "solid", color = "#00ff00" }

[[presets]]
id = "white"
effect = { type = "solid", color = "#ffffff" }

[[playlists]]
id = "once"
name = "Once through"
targets = [{ type = "device", id = "tree" }]
items = [
  { id = "r", preset_id = "red", duration = 60 },
  { id = "g", preset_id = "green", duration = 90 },
]

[[playlists]]
id = "cycle"
name = "Cycle"
loop = true
targets = [{ type = "device", id = "tree" }]
items = [
  { id = "r", preset_id = "red", duration = 60 },
  { id = "g", preset_id = "green", duration = 60 },
  { id = "w", preset_id = "white", duration = 60 },
]

[[playlists]]
id = "party"
name = "Party"
loop = true
shuffle = true
targets = [{ type = "device", id = "tree" }]
items = [
  { id = "r", preset_id = "red", duration = 60 },
  { id = "g", preset_id = "green", duration = 60 },
  { id = "w", preset_id = "white", duration = 60 },
]

[[playlists]]
id = "long"
name = "Long"
targets = [{ type = "device", id = "tree" }]
items = [{ id = "w", preset_id = "white", duration = 600 }]
"##;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 12, 24, 18, 0, 0).unwrap()
}

fn orchestrator() -> Orchestrator {
    let config: Config = toml::from_str(SHOW).unwrap();
    let mut orchestrator = Orchestrator::new(validate(config).unwrap(), Some(11));
    orchestrator.boot(None, t0());
    orchestrator.take_outbox();
    orchestrator
}

fn play(orchestrator: &mut Orchestrator, playlist_id: &str, now: DateTime<Utc>) -> SessionId {
    let request = ApiRequest::PlayPlaylist {
        playlist_id: playlist_id.to_string(),
    };
    match orchestrator.handle_request(request, now) {
        ApiResponse::Ok {
            result: ApiResult::Started { id },
        } => id,
        other => panic!("unexpected response {other:?}"),
    }
}

fn saved(outbox: &Outbox) -> Vec<ActivePlaybackRecord> {
    outbox
        .playback
        .iter()
        .filter_map(|update| match update {
            PlaybackUpdate::Save(record) => Some(record.clone()),
            PlaybackUpdate::Clear => None,
        })
        .collect()
}

fn starts(outbox: &Outbox) -> usize {
    outbox
        .commands
        .iter()
        .filter(|command| matches!(command, StreamCommand::Start(_)))
        .count()
}

#[test]
fn test_non_looping_playlist_finishes_after_last_item() {
    let mut orchestrator = orchestrator();
    play(&mut orchestrator, "once", t0());
    orchestrator.take_outbox();

    orchestrator.fire_due(t0() + Duration::seconds(60));
    let outbox = orchestrator.take_outbox();
    assert_eq!(starts(&outbox), 1);
    assert!(matches!(saved(&outbox).as_slice(), [record] if record.position == 1));

    orchestrator.fire_due(t0() + Duration::seconds(150));
    let outbox = orchestrator.take_outbox();
    assert_eq!(starts(&outbox), 0);
    assert!(outbox.events.iter().any(|event| matches!(
        event,
        ObserverEvent::PlaylistStopped { playlist_id, reason: PlaybackEnd::Finished, .. }
            if playlist_id == "once"
    )));
    assert_eq!(outbox.playback, vec![PlaybackUpdate::Clear]);
    assert_eq!(orchestrator.active_playlist(), None);
    assert!(orchestrator.snapshot().sessions.is_empty());
}

#[test]
fn test_sequential_loop_wraps_in_the_same_order() {
    let mut orchestrator = orchestrator();
    play(&mut orchestrator, "cycle", t0());
    orchestrator.take_outbox();

    let mut played = Vec::new();
    for step in 1..=6 {
        orchestrator.fire_due(t0() + Duration::seconds(60 * step));
        let outbox = orchestrator.take_outbox();
        assert_eq!(starts(&outbox), 1, "step {step}");
        for record in saved(&outbox) {
            assert_eq!(record.order, vec![0, 1, 2]);
            played.push(record.order[record.position]);
        }
    }
    assert_eq!(played, vec![1, 2, 0, 1, 2, 0]);
    assert!(orchestrator.active_playlist().is_some());
}

#[test]
fn test_shuffled_loop_plays_every_item_each_cycle() {
    let mut orchestrator = orchestrator();
    play(&mut orchestrator, "party", t0());
    let mut played: Vec<usize> = saved(&orchestrator.take_outbox())
        .iter()
        .map(|record| record.order[record.position])
        .collect();

    for step in 1..9 {
        orchestrator.fire_due(t0() + Duration::seconds(60 * step));
        for record in saved(&orchestrator.take_outbox()) {
            played.push(record.order[record.position]);
        }
    }

    assert_eq!(played.len(), 9);
    for cycle in played.chunks(3) {
        let mut sorted = cycle.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 1, 2], "cycle {cycle:?}");
    }
}

#[test]
fn test_timer_from_replaced_playlist_is_ignored() {
    let mut orchestrator = orchestrator();
    let first = play(&mut orchestrator, "once", t0());
    orchestrator.take_outbox();

    let second = play(&mut orchestrator, "long", t0() + Duration::seconds(30));
    let outbox = orchestrator.take_outbox();
    assert_ne!(first, second);
    assert!(outbox.events.iter().any(|event| matches!(
        event,
        ObserverEvent::PlaylistStopped { playlist_id, reason: PlaybackEnd::Replaced, .. }
            if playlist_id == "once"
    )));

    // The first playlist's item would have ended here
    orchestrator.fire_due(t0() + Duration::seconds(60));
    let outbox = orchestrator.take_outbox();
    assert!(outbox.commands.is_empty());
    assert!(outbox.playback.is_empty());
    assert_eq!(
        orchestrator.active_playlist().map(|active| active.playlist_id),
        Some("long".to_string())
    );

    orchestrator.fire_due(t0() + Duration::seconds(630));
    let outbox = orchestrator.take_outbox();
    assert!(outbox.events.iter().any(|event| matches!(
        event,
        ObserverEvent::PlaylistStopped { playlist_id, reason: PlaybackEnd::Finished, .. }
            if playlist_id == "long"
    )));
}
