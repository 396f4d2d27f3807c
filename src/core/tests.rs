use super::*;
use crate::backend::DispatchOutcome;
use crate::config::{Config, validate};
use crate::error::ErrorKind;
use crate::playlist::player::PlaybackEnd;
use crate::session::{AdmissionPolicy, SessionPhase};
use crate::topology::{LeafTarget, StreamTarget};
use chrono::{Duration, TimeZone};

const HOME: &str = r##"
[orchestrator]
timezone = "America/New_York"
tick_interval = 300

[[devices]]
id = "porch"
led_count = 150

[[devices]]
id = "eaves"
led_count = 300

[[groups]]
id = "front"
members = [{ device_id = "porch" }, { device_id = "eaves", start_led = 0, end_led = 59 }]

[[presets]]
id = "warm"
effect = { type = "solid", color = "#ffb070" }

[[presets]]
id = "sparkle"
layers = [{ type = "solid", color = "#000010" }, { type = "twinkle" }]

[[playlists]]
id = "evening"
name = "Evening"
loop = true
targets = [{ type = "group", id = "front" }]
items = [
  { id = "a", preset_id = "warm", duration = 300 },
  { id = "b", preset_id = "sparkle", duration = 120 },
]
"##;

const ALL_DAY_RULE: &str = r#"
[[rules]]
id = "porch-day"
name = "Porch all day"
targets = [{ type = "device", id = "porch" }]
sequence = [{ id = "a", preset_id = "sparkle", duration = 600 }]
start = { type = "time", time = "00:00" }
"#;

fn loaded(text: &str) -> Loaded {
    let config: Config = toml::from_str(text).unwrap();
    validate(config).unwrap()
}

fn t0() -> DateTime<Utc> {
    // 12:00 in New York
    Utc.with_ymd_and_hms(2026, 6, 10, 16, 0, 0).unwrap()
}

fn booted(text: &str) -> Orchestrator {
    let mut orchestrator = Orchestrator::new(loaded(text), Some(7));
    orchestrator.boot(None, t0());
    orchestrator.take_outbox();
    orchestrator
}

fn play(orchestrator: &mut Orchestrator, now: DateTime<Utc>) -> SessionId {
    let response = orchestrator.handle_request(
        ApiRequest::PlayPlaylist {
            playlist_id: "evening".to_string(),
        },
        now,
    );
    match response {
        ApiResponse::Ok {
            result: ApiResult::Started { id },
        } => id,
        other => panic!("unexpected response {other:?}"),
    }
}

fn start_on(targets: Vec<StreamTarget>, policy: AdmissionPolicy) -> ApiRequest {
    ApiRequest::StartStream {
        targets,
        preset_id: Some("warm".to_string()),
        effect: None,
        layers: Vec::new(),
        fps: None,
        playlist_id: None,
        policy,
    }
}

fn error_kind(response: &ApiResponse) -> Option<ErrorKind> {
    match response {
        ApiResponse::Error { kind, .. } => Some(*kind),
        ApiResponse::Ok { .. } => None,
    }
}

fn started_ids(outbox: &Outbox) -> Vec<SessionId> {
    outbox
        .commands
        .iter()
        .filter_map(|command| match command {
            StreamCommand::Start(spec) => Some(spec.session_id),
            _ => None,
        })
        .collect()
}

fn stopped_ids(outbox: &Outbox) -> Vec<SessionId> {
    outbox
        .commands
        .iter()
        .filter_map(|command| match command {
            StreamCommand::Stop { session_id } => Some(*session_id),
            _ => None,
        })
        .collect()
}

#[test]
fn test_play_starts_first_item() {
    let mut orchestrator = booted(HOME);
    let id = play(&mut orchestrator, t0());
    let outbox = orchestrator.take_outbox();

    assert_eq!(started_ids(&outbox), vec![id]);
    let StreamCommand::Start(spec) = &outbox.commands[0] else {
        panic!("expected a start command");
    };
    assert!(spec.leaves.contains(&LeafTarget::whole("porch")));
    assert!(spec.leaves.contains(&LeafTarget::segment("eaves", 0, 59)));

    assert!(outbox.events.contains(&ObserverEvent::PlaylistStarted {
        playlist_id: "evening".to_string(),
        session_id: id,
    }));
    assert!(matches!(
        outbox.playback.as_slice(),
        [PlaybackUpdate::Save(record)] if record.playlist_id == "evening" && record.position == 0
    ));
    assert_eq!(
        orchestrator.active_playlist(),
        Some(ActivePlaylist {
            playlist_id: "evening".to_string(),
            session_id: Some(id),
        })
    );
    assert_eq!(
        orchestrator.next_deadline(),
        Some(t0() + Duration::seconds(300))
    );
}

#[test]
fn test_advance_replaces_session() {
    let mut orchestrator = booted(HOME);
    let first = play(&mut orchestrator, t0());
    orchestrator.take_outbox();

    orchestrator.fire_due(t0() + Duration::seconds(300));
    let outbox = orchestrator.take_outbox();

    assert_eq!(stopped_ids(&outbox), vec![first]);
    let second = started_ids(&outbox);
    assert_eq!(second.len(), 1);
    assert_ne!(second[0], first);
    assert!(outbox.events.contains(&ObserverEvent::StreamingStopped {
        session_id: first,
        reason: StopReason::Replaced,
    }));
    // Replacing an item is not a playlist stop
    assert!(
        !outbox
            .events
            .iter()
            .any(|event| matches!(event, ObserverEvent::PlaylistStopped { .. }))
    );
    assert!(matches!(
        outbox.playback.as_slice(),
        [PlaybackUpdate::Save(record)] if record.position == 1
    ));
}

#[test]
fn test_conflict_with_confirm_admits_nothing() {
    let mut orchestrator = booted(HOME);
    let playlist_session = play(&mut orchestrator, t0());
    orchestrator.take_outbox();

    let response = orchestrator.handle_request(
        start_on(vec![StreamTarget::device("porch")], AdmissionPolicy::Confirm),
        t0(),
    );
    assert_eq!(error_kind(&response), Some(ErrorKind::Conflict));
    let ApiResponse::Error { conflicts, .. } = &response else {
        unreachable!();
    };
    assert!(!conflicts.is_empty());

    assert_eq!(orchestrator.registry().len(), 1);
    assert!(orchestrator.registry().contains(playlist_session));
    assert!(orchestrator.take_outbox().is_empty());
}

#[test]
fn test_stop_policy_preempts_playlist() {
    let mut orchestrator = booted(HOME);
    let playlist_session = play(&mut orchestrator, t0());
    orchestrator.take_outbox();

    let response = orchestrator.handle_request(
        start_on(vec![StreamTarget::device("porch")], AdmissionPolicy::Stop),
        t0(),
    );
    assert!(response.is_ok());
    let outbox = orchestrator.take_outbox();

    assert_eq!(stopped_ids(&outbox), vec![playlist_session]);
    assert!(outbox.events.contains(&ObserverEvent::PlaylistStopped {
        playlist_id: "evening".to_string(),
        session_id: Some(playlist_session),
        reason: PlaybackEnd::Preempted,
    }));
    assert!(outbox.playback.contains(&PlaybackUpdate::Clear));
    assert_eq!(orchestrator.active_playlist(), None);

    // The advance timer went with the playlist
    orchestrator.fire_due(t0() + Duration::seconds(300));
    assert!(orchestrator.take_outbox().commands.is_empty());
}

#[test]
fn test_stop_all_clears_everything() {
    let mut orchestrator = booted(HOME);
    let playlist_session = play(&mut orchestrator, t0());
    let response = orchestrator.handle_request(
        start_on(vec![StreamTarget::device("eaves")], AdmissionPolicy::Shed),
        t0(),
    );
    assert!(response.is_ok());
    orchestrator.take_outbox();

    let response = orchestrator.handle_request(ApiRequest::StopAll, t0());
    let ApiResponse::Ok {
        result: ApiResult::StoppedAll { sessions },
    } = response
    else {
        panic!("unexpected response {response:?}");
    };
    assert_eq!(sessions.len(), 2);
    assert!(sessions.contains(&playlist_session));
    assert!(orchestrator.registry().is_empty());

    let outbox = orchestrator.take_outbox();
    assert_eq!(stopped_ids(&outbox).len(), 2);
    assert!(outbox.events.iter().any(|event| matches!(
        event,
        ObserverEvent::PlaylistStopped {
            reason: PlaybackEnd::Stopped,
            ..
        }
    )));
}

#[test]
fn test_failed_start_aborts_playlist() {
    let mut orchestrator = booted(HOME);
    play(&mut orchestrator, t0());
    let outbox = orchestrator.take_outbox();
    let command = outbox.commands[0].clone();

    orchestrator.on_dispatch(DispatchReport {
        command,
        outcome: DispatchOutcome::Failed("controller unreachable".to_string()),
        attempts: 3,
    });
    let outbox = orchestrator.take_outbox();

    assert!(orchestrator.registry().is_empty());
    assert!(outbox.events.iter().any(|event| matches!(
        event,
        ObserverEvent::PlaylistStopped {
            reason: PlaybackEnd::Aborted(message),
            ..
        } if message.contains("controller unreachable")
    )));
    assert!(outbox.playback.contains(&PlaybackUpdate::Clear));
}

#[test]
fn test_delivered_start_marks_session_active() {
    let mut orchestrator = booted(HOME);
    let id = play(&mut orchestrator, t0());
    let command = orchestrator.take_outbox().commands.remove(0);
    assert_eq!(
        orchestrator.registry().get(id).map(|s| s.phase),
        Some(SessionPhase::Starting)
    );

    orchestrator.on_dispatch(DispatchReport {
        command,
        outcome: DispatchOutcome::Delivered,
        attempts: 1,
    });
    assert_eq!(
        orchestrator.registry().get(id).map(|s| s.phase),
        Some(SessionPhase::Active)
    );
}

#[test]
fn test_exclusion_on_unknown_session_is_not_found() {
    let mut orchestrator = booted(HOME);
    let response = orchestrator.handle_request(
        ApiRequest::ExcludeDevice {
            session_id: SessionId(99),
            device_id: "porch".to_string(),
        },
        t0(),
    );
    assert_eq!(error_kind(&response), Some(ErrorKind::NotFound));
}

#[test]
fn test_exclusion_shrinks_playlist_session() {
    let mut orchestrator = booted(HOME);
    let id = play(&mut orchestrator, t0());
    orchestrator.take_outbox();

    let response = orchestrator.handle_request(
        ApiRequest::ExcludeDevice {
            session_id: id,
            device_id: "porch".to_string(),
        },
        t0(),
    );
    assert!(response.is_ok());
    let outbox = orchestrator.take_outbox();
    assert!(matches!(
        outbox.commands.as_slice(),
        [StreamCommand::Update { session_id, leaves }]
            if *session_id == id && leaves == &vec![LeafTarget::segment("eaves", 0, 59)]
    ));
    assert!(orchestrator.active_playlist().is_some());
}

#[test]
fn test_reload_drops_removed_device() {
    let two_devices = r#"
[[devices]]
id = "porch"
led_count = 150

[[devices]]
id = "eaves"
led_count = 300

[[presets]]
id = "warm"
effect = { type = "solid", color = "orange" }
"#;
    let mut orchestrator = booted(two_devices);
    let response = orchestrator.handle_request(
        start_on(
            vec![StreamTarget::device("porch"), StreamTarget::device("eaves")],
            AdmissionPolicy::Confirm,
        ),
        t0(),
    );
    assert!(response.is_ok());
    orchestrator.take_outbox();

    let eaves_only = two_devices.replacen("id = \"porch\"\nled_count = 150\n\n[[devices]]\n", "", 1);
    orchestrator.reload(loaded(&eaves_only), t0());
    let outbox = orchestrator.take_outbox();

    assert!(matches!(
        outbox.commands.as_slice(),
        [StreamCommand::Update { leaves, .. }] if leaves == &vec![LeafTarget::whole("eaves")]
    ));
    assert!(orchestrator.catalog().topology.device("porch").is_none());
}

#[test]
fn test_shutdown_keeps_playback_record() {
    let mut orchestrator = booted(HOME);
    let id = play(&mut orchestrator, t0());
    orchestrator.take_outbox();

    orchestrator.shutdown();
    let outbox = orchestrator.take_outbox();

    assert_eq!(stopped_ids(&outbox), vec![id]);
    assert!(outbox.events.contains(&ObserverEvent::StreamingStopped {
        session_id: id,
        reason: StopReason::Shutdown,
    }));
    assert!(outbox.playback.is_empty());
    assert_eq!(orchestrator.next_deadline(), None);
}

#[test]
fn test_boot_resumes_recorded_playlist() {
    let mut orchestrator = Orchestrator::new(loaded(HOME), Some(7));
    let record = ActivePlaybackRecord {
        playlist_id: "evening".to_string(),
        position: 0,
        order: vec![0, 1],
        item_started_at: t0() - Duration::seconds(350),
        epoch: 4,
    };
    orchestrator.boot(Some(record), t0());
    let outbox = orchestrator.take_outbox();

    assert_eq!(started_ids(&outbox).len(), 1);
    // 350s in: item a (300s) is over, item b started 50s ago
    assert!(matches!(
        outbox.playback.as_slice(),
        [PlaybackUpdate::Save(record)] if record.position == 1
    ));
    assert_eq!(
        orchestrator.next_deadline(),
        Some(t0() + Duration::seconds(70))
    );
}

#[test]
fn test_boot_without_resume_clears_record() {
    let text = HOME.replace(
        "timezone = \"America/New_York\"",
        "timezone = \"America/New_York\"\nresume_playback = false",
    );
    let mut orchestrator = Orchestrator::new(loaded(&text), Some(7));
    let record = ActivePlaybackRecord {
        playlist_id: "evening".to_string(),
        position: 0,
        order: vec![0, 1],
        item_started_at: t0(),
        epoch: 1,
    };
    orchestrator.boot(Some(record), t0());
    let outbox = orchestrator.take_outbox();

    assert!(outbox.commands.is_empty());
    assert_eq!(outbox.playback, vec![PlaybackUpdate::Clear]);
}

#[test]
fn test_session_preempted_in_same_step_never_reaches_backend() {
    let text = format!("{HOME}{ALL_DAY_RULE}");
    let mut orchestrator = Orchestrator::new(loaded(&text), Some(7));
    let record = ActivePlaybackRecord {
        playlist_id: "evening".to_string(),
        position: 0,
        order: vec![0, 1],
        item_started_at: t0(),
        epoch: 1,
    };
    // The resumed playlist session is displaced by the rule before the step ends
    orchestrator.boot(Some(record), t0());
    let outbox = orchestrator.take_outbox();

    let started = started_ids(&outbox);
    assert_eq!(started.len(), 1);
    let rule_session = orchestrator
        .registry()
        .get(started[0])
        .expect("rule session is running");
    assert_eq!(rule_session.owner, SessionOwner::Rule("porch-day".to_string()));
    assert!(stopped_ids(&outbox).is_empty());
    assert!(
        !outbox
            .events
            .iter()
            .any(|event| matches!(event, ObserverEvent::StreamingStopped { .. }))
    );
    assert!(outbox.events.iter().any(|event| matches!(
        event,
        ObserverEvent::PlaylistStopped {
            reason: PlaybackEnd::Preempted,
            ..
        }
    )));
    assert!(outbox.events.contains(&ObserverEvent::RuleActivated {
        rule_id: "porch-day".to_string(),
        session_id: started[0],
    }));
}

#[test]
fn test_invalid_fps_rejected() {
    let mut orchestrator = booted(HOME);
    let response = orchestrator.handle_request(
        ApiRequest::StartStream {
            targets: vec![StreamTarget::device("porch")],
            preset_id: Some("warm".to_string()),
            effect: None,
            layers: Vec::new(),
            fps: Some(0),
            playlist_id: None,
            policy: AdmissionPolicy::Confirm,
        },
        t0(),
    );
    assert_eq!(error_kind(&response), Some(ErrorKind::Validation));
    assert!(orchestrator.registry().is_empty());
}

#[test]
fn test_list_playlists_marks_playing() {
    let mut orchestrator = booted(HOME);
    play(&mut orchestrator, t0());

    let response = orchestrator.handle_request(ApiRequest::ListPlaylists, t0());
    let ApiResponse::Ok {
        result: ApiResult::Playlists(playlists),
    } = response
    else {
        panic!("unexpected response {response:?}");
    };
    assert_eq!(playlists.len(), 1);
    assert!(playlists[0].playing);
    assert_eq!(playlists[0].total_duration, 420);
}
