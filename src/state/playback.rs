//! Durable record of the playlist that is currently playing.
//!
//! The record is rewritten each time an item starts and removed when
//! playback ends, so after a crash or restart the player can work out where
//! it should be from the item start time and the recorded order.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::ACTIVE_PLAYBACK_FILE;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivePlaybackRecord {
    pub playlist_id: String,
    /// Position in `order` of the item that was playing.
    pub position: usize,
    /// Play order as item indices.
    pub order: Vec<usize>,
    pub item_started_at: DateTime<Utc>,
    pub epoch: u64,
}

/// Reads and writes the active-playback record in a state directory.
#[derive(Debug, Clone)]
pub struct PlaybackStore {
    path: PathBuf,
}

impl PlaybackStore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join(ACTIVE_PLAYBACK_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the record, if any. A corrupt record is discarded with a warning.
    pub fn load(&self) -> Result<Option<ActivePlaybackRecord>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        match serde_json::from_str(&content) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                log_warning!("Discarding unreadable playback record: {e}");
                self.clear()?;
                Ok(None)
            }
        }
    }

    /// Write the record atomically (temp file + rename).
    pub fn save(&self, record: &ActivePlaybackRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(record)?;
        fs::write(&tmp, content).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", self.path.display())),
        }
    }
}
