//! Application coordinator for the lightkeeper daemon.
//!
//! Acquires the process-wide resources (configuration, instance lock, state
//! directory, signal handlers, config watcher, control socket), hands them to
//! the [`Runtime`] and releases them when it returns.
//!
//! - Normal startup: `Lightkeeper::new(debug_enabled).run()`
//! - Simulation: `Lightkeeper::new(debug_enabled).simulation().run()`

use anyhow::{Context, Result};

use crate::backend::{BackendKind, create_backend};
use crate::config;
use crate::core::Orchestrator;
use crate::core::runtime::{Runtime, RuntimeEvent, RuntimeParams, event_channel};
use crate::io::instance;
use crate::io::signals::setup_signal_handler;
use crate::logger::Log;
use crate::state::{self, ipc, playback::PlaybackStore};

pub struct Lightkeeper {
    debug_enabled: bool,
    simulation: bool,
    show_headers: bool,
}

impl Lightkeeper {
    pub fn new(debug_enabled: bool) -> Self {
        Self {
            debug_enabled,
            simulation: false,
            show_headers: true,
        }
    }

    /// Run against the installed simulated clock: log backend only, no
    /// instance lock, no control socket and no durable playback record.
    pub fn simulation(mut self) -> Self {
        self.simulation = true;
        self.show_headers = false;
        self
    }

    pub fn run(self) -> Result<()> {
        if self.show_headers {
            log_version!();
        }
        if self.debug_enabled {
            log_pipe!();
            log_debug!("Debug mode enabled - showing detailed orchestration");
        }

        let config_path = config::config_path()?;
        let loaded = match config::load() {
            Ok(loaded) => loaded,
            Err(e) => {
                log_error_exit!("Configuration failed");
                eprintln!("{e:?}");
                std::process::exit(crate::constants::EXIT_FAILURE);
            }
        };
        Log::set_timezone(loaded.settings.timezone);

        let lock = if self.simulation {
            None
        } else {
            Some(instance::ensure_single_instance(config::custom_config_dir())?)
        };

        log_block_start!("Loaded configuration from {}", config_path.display());
        loaded.settings.log_summary(&loaded.catalog);

        let store = if self.simulation {
            None
        } else {
            let dir = state::state_dir(config::custom_config_dir().as_deref())?;
            Some(PlaybackStore::new(&dir))
        };
        let backend = if self.simulation {
            create_backend(BackendKind::Log)
        } else {
            create_backend(loaded.settings.backend)
        };

        let (sender, receiver) = event_channel();
        let _running = setup_signal_handler(sender.clone())?;
        if !self.simulation {
            let watcher_sender = sender.clone();
            config::start_config_watcher(config_path.clone(), move || {
                let _ = watcher_sender.send(RuntimeEvent::ConfigChanged);
            })
            .context("Failed to start config watcher")?;
        }

        let orchestrator = Orchestrator::new(loaded, None);
        let runtime = Runtime::new(
            orchestrator,
            RuntimeParams {
                backend,
                store,
                config_path: (!self.simulation).then_some(config_path),
                socket_path: (!self.simulation).then(ipc::socket_path),
                events: (sender, receiver),
            },
        )?;
        let result = runtime.run();

        if let Some(lock) = lock {
            lock.release();
        }
        log_block_start!("lightkeeper stopped");
        log_end!();
        result
    }
}
