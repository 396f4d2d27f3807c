//! Status command: show what the running daemon is playing.
//!
//! One-shot mode asks for a snapshot and the rule states. Follow mode prints
//! every event the daemon pushes until interrupted.

use anyhow::{Context, Result};
use serde_json::Value;

use crate::api::{ApiRequest, Snapshot};
use crate::schedule::engine::RuleStatus;

pub fn handle_status_command(json: bool, follow: bool) -> Result<()> {
    let mut client = match super::connect() {
        Ok(client) => client,
        Err(e) => {
            log_error_standalone!("{e}");
            return Ok(());
        }
    };

    if follow {
        loop {
            let message = match client.receive() {
                Ok(message) => message,
                // Read timeouts just mean nothing happened
                Err(e) if is_timeout(&e) => continue,
                Err(e) => return Err(e),
            };
            if json {
                println!("{message}");
            } else {
                println!("{}", describe_event(&message));
            }
        }
    }

    let snapshot = super::request(&mut client, &ApiRequest::Snapshot)?;
    let rules = super::request(&mut client, &ApiRequest::RuleStatus)?;
    if json {
        let combined = serde_json::json!({
            "snapshot": snapshot.get("data"),
            "rules": rules.get("data"),
        });
        println!("{}", serde_json::to_string_pretty(&combined)?);
        return Ok(());
    }

    let snapshot: Snapshot = serde_json::from_value(snapshot.get("data").cloned().unwrap_or(Value::Null))
        .context("Malformed snapshot from lightkeeper")?;
    let rules: Vec<RuleStatus> = serde_json::from_value(rules.get("data").cloned().unwrap_or(Value::Null))
        .context("Malformed rule status from lightkeeper")?;
    print_status(&snapshot, &rules);
    Ok(())
}

fn is_timeout(error: &anyhow::Error) -> bool {
    error
        .chain()
        .filter_map(|cause| cause.downcast_ref::<std::io::Error>())
        .any(|io| {
            matches!(
                io.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
            )
        })
}

fn print_status(snapshot: &Snapshot, rules: &[RuleStatus]) {
    match &snapshot.active_playlist {
        Some(active) => match active.session_id {
            Some(id) => println!("Playlist: {} (session {id})", active.playlist_id),
            None => println!("Playlist: {}", active.playlist_id),
        },
        None => println!("Playlist: none"),
    }

    println!("Sessions: {}", snapshot.sessions.len());
    for session in &snapshot.sessions {
        let leaves: Vec<String> = session.leaves.iter().map(ToString::to_string).collect();
        println!(
            "  {} [{:?}] {} -> {} @ {} fps",
            session.id,
            session.phase,
            session.owner,
            leaves.join(", "),
            session.fps
        );
    }

    let active: Vec<&RuleStatus> = rules.iter().filter(|rule| rule.active).collect();
    if !active.is_empty() {
        println!("Active rules:");
        for rule in active {
            println!("  {} ({})", rule.name, rule.rule_id);
        }
    }
}

/// One-line summary of a pushed event.
fn describe_event(message: &Value) -> String {
    let field = |name: &str| message.get(name).map(label).unwrap_or_default();
    match message.get("event").and_then(Value::as_str) {
        Some("snapshot") => {
            let sessions = message
                .get("sessions")
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            format!("snapshot: {sessions} session(s)")
        }
        Some("playlist-started") => format!(
            "playlist '{}' started in session {}",
            field("playlist_id"),
            field("session_id")
        ),
        Some("playlist-stopped") => format!(
            "playlist '{}' stopped: {}",
            field("playlist_id"),
            field("reason")
        ),
        Some("session-started") => format!("session {} started", field("session_id")),
        Some("streaming-stopped") => format!(
            "session {} stopped: {}",
            field("session_id"),
            field("reason")
        ),
        Some("rule-activated") => format!("rule '{}' activated", field("rule_id")),
        Some("rule-deactivated") => format!(
            "rule '{}' deactivated: {}",
            field("rule_id"),
            field("reason")
        ),
        _ => message.to_string(),
    }
}

/// Readable form of an enum value as serialized by serde.
fn label(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Object(map) => {
            if let Some(kind) = map.get("kind").and_then(Value::as_str) {
                return match map.get("detail").and_then(Value::as_str) {
                    Some(detail) => format!("{kind} ({detail})"),
                    None => kind.to_string(),
                };
            }
            match map.iter().next() {
                Some((key, Value::String(detail))) if map.len() == 1 => format!("{key} ({detail})"),
                _ => value.to_string(),
            }
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ObserverEvent;
    use crate::playlist::player::PlaybackEnd;
    use crate::session::SessionId;

    #[test]
    fn test_describe_event() {
        let event = serde_json::to_value(ObserverEvent::PlaylistStopped {
            playlist_id: "evening".to_string(),
            session_id: Some(SessionId(2)),
            reason: PlaybackEnd::Finished,
        })
        .unwrap();
        assert_eq!(
            describe_event(&event),
            "playlist 'evening' stopped: finished"
        );

        let started = serde_json::to_value(ObserverEvent::PlaylistStarted {
            playlist_id: "evening".to_string(),
            session_id: SessionId(5),
        })
        .unwrap();
        assert_eq!(
            describe_event(&started),
            "playlist 'evening' started in session 5"
        );

        let failed = serde_json::to_value(ObserverEvent::StreamingStopped {
            session_id: SessionId(5),
            reason: crate::session::StopReason::Failed("timeout".to_string()),
        })
        .unwrap();
        assert_eq!(describe_event(&failed), "session 5 stopped: failed (timeout)");
    }
}
