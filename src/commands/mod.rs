//! Command-line command handlers for lightkeeper.
//!
//! Offline commands (`check`, `resolve`, `solar`) work on the configuration or
//! the calendar directly. Client commands (`status`, `play`, `stop-playlist`,
//! `stop-all`) talk to the running daemon over its control socket, and
//! `reload`/`stop` signal it.

pub mod check;
pub mod playback;
pub mod reload;
pub mod resolve;
pub mod simulate;
pub mod solar;
pub mod status;
pub mod stop;

use anyhow::Result;
use serde_json::Value;

use crate::api::ApiRequest;
use crate::state::ipc::{self, client::IpcClient};

/// Connect to the daemon, or explain that none is running.
pub(crate) fn connect() -> Result<IpcClient> {
    let socket_path = ipc::socket_path();
    if !IpcClient::is_running(&socket_path) {
        anyhow::bail!("No lightkeeper daemon is running; start it with `lightkeeper run`");
    }
    IpcClient::connect(&socket_path)
}

/// Send `request` and return the `result` of a successful reply.
pub(crate) fn request(client: &mut IpcClient, request: &ApiRequest) -> Result<Value> {
    let reply = client.request(request)?;
    reply_result(reply)
}

/// Unwrap an `ApiResponse` line into its result, turning error replies into errors.
pub(crate) fn reply_result(reply: Value) -> Result<Value> {
    match reply.get("status").and_then(Value::as_str) {
        Some("ok") => Ok(reply.get("result").cloned().unwrap_or(Value::Null)),
        Some("error") => {
            let kind = reply.get("kind").and_then(Value::as_str).unwrap_or("error");
            let message = reply
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("request failed");
            anyhow::bail!("{message} ({kind})")
        }
        _ => anyhow::bail!("Unexpected reply from lightkeeper: {reply}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiResponse, ApiResult};
    use crate::error::OrchestratorError;
    use crate::session::SessionId;

    #[test]
    fn test_reply_result() {
        let ok = serde_json::to_value(ApiResponse::ok(ApiResult::Started { id: SessionId(3) }))
            .unwrap();
        assert_eq!(reply_result(ok).unwrap()["data"]["id"], 3);

        let error = serde_json::to_value(ApiResponse::from(OrchestratorError::not_found(
            "playlist", "evening",
        )))
        .unwrap();
        let err = reply_result(error).unwrap_err();
        assert!(err.to_string().contains("(not_found)"));

        assert!(reply_result(serde_json::json!({"event": "snapshot"})).is_err());
    }
}
