//! Control socket for observers and the CLI.
//!
//! A Unix socket carrying newline-delimited JSON. Clients send
//! [`ApiRequest`](crate::api::ApiRequest) lines and get one
//! [`ApiResponse`](crate::api::ApiResponse) line back for each; every client
//! also receives [`ObserverEvent`](crate::api::ObserverEvent)s as they
//! happen, starting with a snapshot when it connects.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread::JoinHandle;

use crate::api::{ApiResponse, ObserverEvent, Snapshot};
use crate::constants::SOCKET_FILE_NAME;
use crate::core::runtime::RuntimeEvent;

pub mod client;
pub mod events;
mod server;

pub use events::{ClientId, IpcOutbound};

/// Path of the control socket.
pub fn socket_path() -> PathBuf {
    crate::state::runtime_dir().join(SOCKET_FILE_NAME)
}

/// Sending half used by the orchestrator thread. Never blocks.
#[derive(Clone)]
pub struct IpcNotifier {
    sender: mpsc::Sender<IpcOutbound>,
}

impl IpcNotifier {
    pub fn send_event(&self, event: ObserverEvent) {
        let _ = self.sender.send(IpcOutbound::Event(event));
    }

    pub fn send_reply(&self, client: ClientId, response: ApiResponse) {
        let _ = self.sender.send(IpcOutbound::Reply { client, response });
    }

    pub fn send_snapshot(&self, snapshot: Snapshot) {
        let _ = self.sender.send(IpcOutbound::Snapshot(snapshot));
    }
}

/// The socket server running on its own thread.
pub struct IpcServer {
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl IpcServer {
    /// Bind `socket_path` and start serving. Requests are forwarded to `requests`.
    pub fn start(
        socket_path: PathBuf,
        requests: mpsc::Sender<RuntimeEvent>,
    ) -> Result<(Self, IpcNotifier)> {
        let socket_server = server::IpcSocketServer::new(socket_path)
            .context("Failed to create IPC socket server")?;
        let (sender, outbound) = mpsc::channel();
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        let thread_handle = std::thread::Builder::new()
            .name("lightkeeper-ipc".to_string())
            .spawn(move || {
                if let Err(e) = socket_server.run(outbound, requests, flag) {
                    log_warning!("IPC server stopped: {e:#}");
                }
            })
            .context("Failed to spawn IPC server thread")?;

        Ok((
            Self {
                running,
                thread_handle: Some(thread_handle),
            },
            IpcNotifier { sender },
        ))
    }

    /// Stop serving, deliver anything still queued and remove the socket.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            handle
                .join()
                .map_err(|_| anyhow::anyhow!("IPC server thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
