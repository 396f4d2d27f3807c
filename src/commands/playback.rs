//! Client commands that start and stop playback on the running daemon.

use anyhow::Result;
use serde_json::Value;

use crate::api::ApiRequest;

pub fn handle_play_command(playlist_id: &str) -> Result<()> {
    let mut client = super::connect()?;
    let result = super::request(
        &mut client,
        &ApiRequest::PlayPlaylist {
            playlist_id: playlist_id.to_string(),
        },
    )?;
    match result.pointer("/data/id").and_then(Value::as_u64) {
        Some(id) => println!("Playing '{playlist_id}' in session {id}"),
        None => println!("Playing '{playlist_id}'"),
    }
    Ok(())
}

pub fn handle_stop_playlist_command() -> Result<()> {
    let mut client = super::connect()?;
    let result = super::request(&mut client, &ApiRequest::StopPlaylist)?;
    match result.pointer("/data/playlist_id").and_then(Value::as_str) {
        Some(id) => println!("Stopped playlist '{id}'"),
        None => println!("No playlist was playing"),
    }
    Ok(())
}

pub fn handle_stop_all_command() -> Result<()> {
    let mut client = super::connect()?;
    let result = super::request(&mut client, &ApiRequest::StopAll)?;
    let count = result
        .pointer("/data/sessions")
        .and_then(Value::as_array)
        .map_or(0, Vec::len);
    println!("Stopped {count} session(s)");
    Ok(())
}
