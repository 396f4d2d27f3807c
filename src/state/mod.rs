//! Where lightkeeper keeps its state, following XDG Base Directory standards.
//!
//! Durable state (the active-playback record) goes under `XDG_STATE_HOME`;
//! the control socket and lock file go under `XDG_RUNTIME_DIR`.

pub mod ipc;
pub mod playback;

use anyhow::{Context, Result};
use nix::unistd::getuid;
use std::path::{Path, PathBuf};

use crate::constants::APP_DIR_NAME;

/// State directory for a configuration directory.
///
/// State is stored in XDG_STATE_HOME/lightkeeper/{namespace} where namespace is:
/// - "default" for the default config directory
/// - "custom_<hash>" for custom config directories (via --config)
pub fn state_dir(config_dir: Option<&Path>) -> Result<PathBuf> {
    let state_home = std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".local/state")
        });

    let namespace = match config_dir {
        None => "default".to_string(),
        Some(path) => {
            let default_config = dirs::config_dir()
                .context("Could not determine config directory")?
                .join(APP_DIR_NAME);
            if path == default_config {
                "default".to_string()
            } else {
                state_namespace(path)
            }
        }
    };

    Ok(state_home.join(APP_DIR_NAME).join(namespace))
}

/// Stable namespace for a custom config directory.
fn state_namespace(config_dir: &Path) -> String {
    let canonical = config_dir
        .canonicalize()
        .unwrap_or_else(|_| config_dir.to_path_buf());
    let hash = sha256::digest(canonical.to_string_lossy().as_bytes());
    format!("custom_{}", &hash[..16])
}

/// Per-user runtime directory for the socket and lock file.
///
/// - Primary: `$XDG_RUNTIME_DIR/lightkeeper`
/// - Fallback: `/run/user/{uid}/lightkeeper`
pub fn runtime_dir() -> PathBuf {
    let base = match std::env::var("XDG_RUNTIME_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => PathBuf::from(format!("/run/user/{}", getuid())),
    };
    base.join(APP_DIR_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::tempdir;

    #[test]
    #[serial]
    fn test_state_dir_namespaces() {
        let temp = tempdir().unwrap();
        let original = std::env::var("XDG_STATE_HOME").ok();
        unsafe {
            std::env::set_var("XDG_STATE_HOME", temp.path());
        }

        let default = state_dir(None).unwrap();
        let custom_a = state_dir(Some(Path::new("/srv/lights/a"))).unwrap();
        let custom_a_again = state_dir(Some(Path::new("/srv/lights/a"))).unwrap();
        let custom_b = state_dir(Some(Path::new("/srv/lights/b"))).unwrap();

        unsafe {
            match original {
                Some(val) => std::env::set_var("XDG_STATE_HOME", val),
                None => std::env::remove_var("XDG_STATE_HOME"),
            }
        }

        assert_eq!(default, temp.path().join("lightkeeper").join("default"));
        assert_eq!(custom_a, custom_a_again);
        assert_ne!(custom_a, custom_b);
        let name = custom_a.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("custom_"));
        assert_eq!(name.len(), "custom_".len() + 16);
    }

    #[test]
    #[serial]
    fn test_runtime_dir_honors_xdg() {
        let original = std::env::var("XDG_RUNTIME_DIR").ok();
        unsafe {
            std::env::set_var("XDG_RUNTIME_DIR", "/run/user/4242");
        }
        let dir = runtime_dir();
        unsafe {
            match original {
                Some(val) => std::env::set_var("XDG_RUNTIME_DIR", val),
                None => std::env::remove_var("XDG_RUNTIME_DIR"),
            }
        }
        assert_eq!(dir, PathBuf::from("/run/user/4242/lightkeeper"));
    }
}
