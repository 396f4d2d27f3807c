//! Messages from the orchestrator thread to the IPC server thread.

use anyhow::{Context, Result};
use serde::Serialize;

use crate::api::{ApiResponse, ObserverEvent, Snapshot};

/// Identifies one connected client for the lifetime of its connection.
pub type ClientId = u64;

#[derive(Debug, Clone)]
pub enum IpcOutbound {
    /// Push to every connected client.
    Event(ObserverEvent),
    /// Answer one client's request.
    Reply {
        client: ClientId,
        response: ApiResponse,
    },
    /// Latest state, sent to clients as they connect.
    Snapshot(Snapshot),
}

/// Serialize `value` as one newline-terminated JSON line.
pub fn encode_line<T: Serialize>(value: &T) -> Result<String> {
    let mut line = serde_json::to_string(value).context("Failed to serialize IPC message")?;
    line.push('\n');
    Ok(line)
}
