//! Hot reload of the configuration file.
//!
//! The parent directory is watched rather than the file itself, since most
//! editors save by writing a temporary file and renaming it over the original.

use anyhow::{Context, Result};
use notify::{
    Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

/// Editors often write a file in several steps; collapse them into one reload.
const DEBOUNCE_MS: u64 = 500;

/// Whether a filesystem event touches `config_path`.
fn affects(event: &Event, config_path: &Path) -> bool {
    let Some(file_name) = config_path.file_name() else {
        return false;
    };
    event.paths.iter().any(|path| {
        path == config_path
            || (path.parent() == config_path.parent()
                && path.file_name() == Some(file_name))
    })
}

/// Watch `config_path` and call `on_change` once per burst of edits.
///
/// The watcher lives on a background thread for the rest of the process.
pub fn start_config_watcher<F>(config_path: PathBuf, on_change: F) -> Result<()>
where
    F: Fn() + Send + 'static,
{
    let parent = config_path
        .parent()
        .map(Path::to_path_buf)
        .context("Configuration path has no parent directory")?;

    let (tx, rx) = mpsc::channel();
    let mut watcher = RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res
                && matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                )
            {
                let _ = tx.send(event);
            }
        },
        NotifyConfig::default(),
    )
    .context("Failed to create file watcher")?;

    watcher
        .watch(&parent, RecursiveMode::NonRecursive)
        .with_context(|| format!("Failed to watch directory: {}", parent.display()))?;

    log_debug!("Watching {} for changes", config_path.display());

    thread::Builder::new()
        .name("lightkeeper-config-watch".to_string())
        .spawn(move || {
            // Dropping the watcher would end the event stream
            let _watcher = watcher;
            let debounce = Duration::from_millis(DEBOUNCE_MS);
            let mut pending: Option<Instant> = None;

            loop {
                let timeout = match pending {
                    Some(since) => debounce.saturating_sub(since.elapsed()),
                    None => Duration::from_secs(3600),
                };
                match rx.recv_timeout(timeout) {
                    Ok(event) => {
                        if affects(&event, &config_path) {
                            pending.get_or_insert_with(Instant::now);
                        }
                    }
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        if pending.take().is_some() {
                            log_debug!("Configuration file changed, requesting reload");
                            on_change();
                        }
                    }
                    Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }
        })
        .context("Failed to spawn config watcher thread")?;

    Ok(())
}
