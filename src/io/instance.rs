//! Coordination with a running lightkeeper daemon.
//!
//! Builds on the lock file in [`crate::io::lock`]: the holder writes its PID
//! and configuration directory there so later invocations can find it.

use anyhow::{Context, Result};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};

use crate::io::lock::{self, LockFile};

/// What the running daemon wrote into the lock file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceInfo {
    pub pid: u32,
    /// Custom config directory, if the daemon was started with `--config`.
    pub config_dir: Option<PathBuf>,
}

impl InstanceInfo {
    /// Parse lock file contents: the PID on line 1, the config directory
    /// (empty for the default) on line 2.
    pub fn from_lock_contents(contents: &str) -> Result<Self> {
        let mut lines = contents.lines();
        let pid = lines
            .next()
            .filter(|line| !line.trim().is_empty())
            .context("Lock file is empty")?
            .trim()
            .parse::<u32>()
            .context("Invalid PID format in lock file")?;
        let config_dir = lines
            .next()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(PathBuf::from);
        Ok(Self { pid, config_dir })
    }

    pub fn to_lock_contents(&self) -> String {
        let dir = self
            .config_dir
            .as_ref()
            .map(|dir| dir.display().to_string())
            .unwrap_or_default();
        format!("{}\n{dir}\n", self.pid)
    }
}

pub fn is_instance_running(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

/// The daemon holding the lock, if it is still alive.
pub fn running_instance() -> Result<Option<InstanceInfo>> {
    let lock_path = lock::main_lock_path();
    let Ok(contents) = std::fs::read_to_string(&lock_path) else {
        return Ok(None);
    };
    if contents.trim().is_empty() {
        return Ok(None);
    }
    let info = InstanceInfo::from_lock_contents(&contents)?;
    Ok(is_instance_running(info.pid).then_some(info))
}

pub fn terminate_instance(pid: u32) -> Result<()> {
    kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
        .map_err(|e| anyhow::anyhow!("Failed to send SIGTERM to process: {e}"))
}

pub fn send_reload_signal(pid: u32) -> Result<()> {
    kill(Pid::from_raw(pid as i32), Signal::SIGUSR2)
        .map_err(|e| anyhow::anyhow!("Failed to send reload signal: {e}"))
}

/// Take the instance lock, or fail naming the daemon that holds it.
pub fn ensure_single_instance(config_dir: Option<PathBuf>) -> Result<LockFile> {
    let lock_path = lock::main_lock_path();
    let Some(mut lock) = LockFile::try_acquire(&lock_path)? else {
        match running_instance().ok().flatten() {
            Some(info) => anyhow::bail!("lightkeeper is already running (PID: {})", info.pid),
            None => anyhow::bail!(
                "lightkeeper is already running (lock held on {})",
                lock_path.display()
            ),
        }
    };

    let info = InstanceInfo {
        pid: std::process::id(),
        config_dir,
    };
    lock.write(&info.to_lock_contents())?;
    Ok(lock)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_contents_round_trip() {
        let info = InstanceInfo {
            pid: 4242,
            config_dir: Some(PathBuf::from("/srv/lights")),
        };
        assert_eq!(InstanceInfo::from_lock_contents(&info.to_lock_contents()).unwrap(), info);

        let default = InstanceInfo::from_lock_contents("77\n\n").unwrap();
        assert_eq!(default.config_dir, None);

        assert!(InstanceInfo::from_lock_contents("").is_err());
        assert!(InstanceInfo::from_lock_contents("pid\n").is_err());
    }

    #[test]
    fn test_own_process_is_running() {
        assert!(is_instance_running(std::process::id()));
    }
}
