//! Playlists: ordered preset sequences played against a fixed target set.
//!
//! The [`Playlist`] entity is user-edited data. Its playback is runtime state
//! owned by the [`player::PlaylistPlayer`].

pub mod order;
pub mod player;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::constants::{MAXIMUM_ITEM_DURATION, MINIMUM_ITEM_DURATION};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::preset::Preset;
use crate::topology::StreamTarget;

pub use order::{PlaybackOrder, Step};
pub use player::{PlayerEvent, PlayerPhase, PlaylistPlaybackState, PlaylistPlayer};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistItem {
    pub id: String,
    pub preset_id: String,
    /// Seconds, at least one.
    pub duration: u64,
    /// Dense zero-based rank within the playlist.
    #[serde(default)]
    pub order: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    pub items: Vec<PlaylistItem>,
    #[serde(default)]
    pub shuffle: bool,
    #[serde(default, rename = "loop")]
    pub looping: bool,
    pub targets: Vec<StreamTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<u32>,
}

/// Check one playable item list. Shared by playlists and rule sequences.
pub fn validate_items(
    owner: &str,
    items: &[PlaylistItem],
    presets: &HashMap<String, Preset>,
) -> OrchestratorResult<()> {
    if items.is_empty() {
        return Err(OrchestratorError::validation(format!("{owner} has no items")));
    }
    for item in items {
        if !(MINIMUM_ITEM_DURATION..=MAXIMUM_ITEM_DURATION).contains(&item.duration) {
            return Err(OrchestratorError::validation(format!(
                "{owner} item '{}' has duration {}s (expected {MINIMUM_ITEM_DURATION}-{MAXIMUM_ITEM_DURATION}s)",
                item.id, item.duration
            )));
        }
        if !presets.contains_key(&item.preset_id) {
            return Err(OrchestratorError::validation(format!(
                "{owner} item '{}' references unknown preset '{}'",
                item.id, item.preset_id
            )));
        }
    }
    Ok(())
}

impl Playlist {
    pub fn validate(&self, presets: &HashMap<String, Preset>) -> OrchestratorResult<()> {
        let owner = format!("playlist '{}'", self.id);
        validate_items(&owner, &self.items, presets)?;
        if self.targets.is_empty() {
            return Err(OrchestratorError::validation(format!("{owner} has no targets")));
        }
        Ok(())
    }

    /// Sort items by their stored rank and renumber densely from zero.
    pub fn normalize_order(&mut self) {
        self.items.sort_by_key(|item| item.order);
        self.renumber();
    }

    /// Insert `item` at position `at` (clamped to the end).
    pub fn insert_item(&mut self, at: usize, item: PlaylistItem) -> OrchestratorResult<()> {
        if self.items.iter().any(|existing| existing.id == item.id) {
            return Err(OrchestratorError::validation(format!(
                "playlist '{}' already has an item '{}'",
                self.id, item.id
            )));
        }
        let at = at.min(self.items.len());
        self.items.insert(at, item);
        self.renumber();
        Ok(())
    }

    pub fn remove_item(&mut self, item_id: &str) -> Option<PlaylistItem> {
        let index = self.items.iter().position(|item| item.id == item_id)?;
        let removed = self.items.remove(index);
        self.renumber();
        Some(removed)
    }

    /// Move an item to position `to` (clamped to the end).
    pub fn move_item(&mut self, item_id: &str, to: usize) -> OrchestratorResult<()> {
        let from = self
            .items
            .iter()
            .position(|item| item.id == item_id)
            .ok_or_else(|| OrchestratorError::not_found("playlist item", item_id))?;
        let item = self.items.remove(from);
        let to = to.min(self.items.len());
        self.items.insert(to, item);
        self.renumber();
        Ok(())
    }

    /// Sum of all item durations in seconds.
    pub fn total_duration(&self) -> u64 {
        self.items.iter().map(|item| item.duration).sum()
    }

    fn renumber(&mut self) {
        for (rank, item) in self.items.iter_mut().enumerate() {
            item.order = rank;
        }
    }
}
