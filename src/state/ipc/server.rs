//! Unix socket server for the control socket.
//!
//! Accepts client connections, reads newline-delimited JSON requests and
//! forwards them to the orchestrator thread, and writes replies and pushed
//! events back. This thread is the only writer on every client stream.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use super::events::{ClientId, IpcOutbound, encode_line};
use crate::api::{ApiRequest, ApiResponse, Snapshot};
use crate::constants::IPC_POLL_INTERVAL_MS;
use crate::core::runtime::RuntimeEvent;
use crate::error::OrchestratorError;

/// Longest request line accepted from a client.
const MAX_LINE_BYTES: usize = 64 * 1024;

pub struct IpcSocketServer {
    socket_path: PathBuf,
    listener: UnixListener,
    clients: HashMap<ClientId, ClientConnection>,
    next_client_id: ClientId,
    current: Option<Snapshot>,
}

struct ClientConnection {
    raw_stream: UnixStream,
    writer: BufWriter<UnixStream>,
    pending: Vec<u8>,
    connected_at: Instant,
}

impl ClientConnection {
    fn send(&mut self, line: &str) -> bool {
        self.writer.write_all(line.as_bytes()).is_ok() && self.writer.flush().is_ok()
    }
}

impl IpcSocketServer {
    /// Bind the socket at `socket_path`, replacing a stale socket file.
    pub fn new(socket_path: PathBuf) -> Result<Self> {
        if socket_path.exists() {
            std::fs::remove_file(&socket_path)
                .with_context(|| format!("Failed to remove existing socket: {:?}", socket_path))?;
        }
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create socket directory: {:?}", parent))?;
        }

        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("Failed to bind Unix socket: {:?}", socket_path))?;
        listener
            .set_nonblocking(true)
            .context("Failed to set socket to non-blocking mode")?;

        Ok(Self {
            socket_path,
            listener,
            clients: HashMap::new(),
            next_client_id: 1,
            current: None,
        })
    }

    /// Serve until `running` goes false.
    pub fn run(
        mut self,
        outbound: mpsc::Receiver<IpcOutbound>,
        requests: mpsc::Sender<RuntimeEvent>,
        running: Arc<AtomicBool>,
    ) -> Result<()> {
        log_debug!("IPC server listening on {:?}", self.socket_path);

        while running.load(Ordering::SeqCst) {
            while let Ok(message) = outbound.try_recv() {
                self.deliver(message)?;
            }
            self.accept()?;
            self.read_requests(&requests)?;
            thread::sleep(Duration::from_millis(IPC_POLL_INTERVAL_MS));
        }

        // Replies queued before shutdown still go out
        while let Ok(message) = outbound.try_recv() {
            self.deliver(message)?;
        }
        log_debug!("IPC server shutting down");
        self.cleanup()
    }

    fn deliver(&mut self, message: IpcOutbound) -> Result<()> {
        match message {
            IpcOutbound::Event(event) => {
                let line = encode_line(&event)?;
                let failed: Vec<ClientId> = self
                    .clients
                    .iter_mut()
                    .filter_map(|(id, client)| (!client.send(&line)).then_some(*id))
                    .collect();
                for id in failed {
                    self.drop_client(id);
                }
            }
            IpcOutbound::Reply { client, response } => {
                let line = encode_line(&response)?;
                if let Some(connection) = self.clients.get_mut(&client)
                    && !connection.send(&line)
                {
                    self.drop_client(client);
                }
            }
            IpcOutbound::Snapshot(snapshot) => self.current = Some(snapshot),
        }
        Ok(())
    }

    fn accept(&mut self) -> Result<()> {
        loop {
            match self.listener.accept() {
                Ok((stream, _addr)) => {
                    let client_id = self.next_client_id;
                    self.next_client_id += 1;

                    stream
                        .set_nonblocking(true)
                        .context("Failed to set client stream to non-blocking mode")?;
                    let writer_stream = stream
                        .try_clone()
                        .context("Failed to clone stream for writer")?;

                    let mut client = ClientConnection {
                        raw_stream: stream,
                        writer: BufWriter::new(writer_stream),
                        pending: Vec::new(),
                        connected_at: Instant::now(),
                    };

                    if let Some(snapshot) = &self.current {
                        let line = encode_line(&crate::api::ObserverEvent::Snapshot(
                            snapshot.clone(),
                        ))?;
                        if !client.send(&line) {
                            log_debug!("Failed to send snapshot to client {client_id}");
                            continue;
                        }
                    }

                    self.clients.insert(client_id, client);
                    log_debug!("IPC connections: {}", self.clients.len());
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    log_debug!("Error accepting client connection: {e}");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Read whatever each client has sent and forward complete lines.
    fn read_requests(&mut self, requests: &mpsc::Sender<RuntimeEvent>) -> Result<()> {
        let mut disconnected = Vec::new();
        let mut malformed = Vec::new();

        for (client_id, client) in &mut self.clients {
            let mut buffer = [0u8; 4096];
            loop {
                match client.raw_stream.read(&mut buffer) {
                    Ok(0) => {
                        disconnected.push(*client_id);
                        break;
                    }
                    Ok(n) => client.pending.extend_from_slice(&buffer[..n]),
                    Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(_) => {
                        disconnected.push(*client_id);
                        break;
                    }
                }
            }

            while let Some(end) = client.pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = client.pending.drain(..=end).collect();
                let text = String::from_utf8_lossy(&line);
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }
                match serde_json::from_str::<ApiRequest>(text) {
                    Ok(request) => {
                        let event = RuntimeEvent::Request {
                            client: *client_id,
                            request,
                        };
                        if requests.send(event).is_err() {
                            return Ok(());
                        }
                    }
                    Err(e) => malformed.push((*client_id, e.to_string())),
                }
            }
            if client.pending.len() > MAX_LINE_BYTES {
                malformed.push((*client_id, "request line too long".to_string()));
                client.pending.clear();
            }
        }

        for (client, message) in malformed {
            let response: ApiResponse =
                OrchestratorError::validation(format!("malformed request: {message}")).into();
            self.deliver(IpcOutbound::Reply { client, response })?;
        }
        for client in disconnected {
            self.drop_client(client);
        }
        Ok(())
    }

    fn drop_client(&mut self, client_id: ClientId) {
        if let Some(client) = self.clients.remove(&client_id) {
            let duration = client.connected_at.elapsed();
            if duration.as_secs() < 2 {
                log_debug!(
                    "IPC one-shot client served ({}ms) - connections: {}",
                    duration.as_millis(),
                    self.clients.len()
                );
            } else {
                log_debug!(
                    "IPC client disconnected after {}s - connections: {}",
                    duration.as_secs(),
                    self.clients.len()
                );
            }
        }
    }

    fn cleanup(&self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)
                .with_context(|| format!("Failed to remove socket file: {:?}", self.socket_path))?;
        }
        Ok(())
    }
}
