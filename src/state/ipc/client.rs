//! Client side of the control socket, used by the CLI commands.

use anyhow::{Context, Result};
use serde_json::Value;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

use super::events::encode_line;
use crate::api::ApiRequest;
use crate::constants::IPC_REPLY_TIMEOUT_MS;

pub struct IpcClient {
    stream: UnixStream,
    reader: BufReader<UnixStream>,
}

impl IpcClient {
    /// Connect to the daemon listening on `socket_path`.
    pub fn connect(socket_path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket_path).with_context(|| {
            format!(
                "Failed to connect to lightkeeper at {:?}. Is lightkeeper running?",
                socket_path
            )
        })?;
        stream
            .set_read_timeout(Some(Duration::from_millis(IPC_REPLY_TIMEOUT_MS)))
            .context("Failed to set read timeout on IPC socket")?;
        let reader = BufReader::new(
            stream
                .try_clone()
                .context("Failed to clone stream for reader")?,
        );
        Ok(Self { stream, reader })
    }

    /// Read the next line the daemon sent, event or reply.
    pub fn receive(&mut self) -> Result<Value> {
        let mut line = String::new();
        let read = self
            .reader
            .read_line(&mut line)
            .context("Failed to read from IPC socket")?;
        if read == 0 {
            anyhow::bail!("Connection closed by lightkeeper");
        }
        serde_json::from_str(line.trim())
            .with_context(|| format!("Failed to parse IPC message: {}", line.trim()))
    }

    /// Send `request` and wait for its reply. Events arriving meanwhile are skipped.
    pub fn request(&mut self, request: &ApiRequest) -> Result<Value> {
        let line = encode_line(request)?;
        self.stream
            .write_all(line.as_bytes())
            .context("Failed to send request")?;
        loop {
            let message = self.receive()?;
            if message.get("status").is_some() {
                return Ok(message);
            }
        }
    }

    /// Whether a daemon answers on `socket_path`.
    pub fn is_running(socket_path: &Path) -> bool {
        socket_path.exists() && UnixStream::connect(socket_path).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_without_daemon_fails() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("missing.sock");
        assert!(!IpcClient::is_running(&path));
        let err = IpcClient::connect(&path).err().unwrap();
        assert!(err.to_string().contains("Is lightkeeper running?"));
    }
}
