//! Validated, immutable snapshot of everything the user configured.
//!
//! A new catalog replaces the old one wholesale on reload; the orchestrator
//! never edits one in place.

use std::collections::{BTreeMap, HashMap};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::holiday::Holiday;
use crate::playlist::Playlist;
use crate::preset::Preset;
use crate::schedule::ScheduleRule;
use crate::topology::Topology;

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub topology: Topology,
    pub presets: HashMap<String, Preset>,
    pub playlists: BTreeMap<String, Playlist>,
    /// Rules in configuration order.
    pub rules: Vec<ScheduleRule>,
    /// Built-in holidays followed by custom ones.
    pub holidays: Vec<Holiday>,
}

impl Catalog {
    pub fn preset(&self, id: &str) -> OrchestratorResult<&Preset> {
        self.presets
            .get(id)
            .ok_or_else(|| OrchestratorError::not_found("preset", id))
    }

    pub fn playlist(&self, id: &str) -> OrchestratorResult<&Playlist> {
        self.playlists
            .get(id)
            .ok_or_else(|| OrchestratorError::not_found("playlist", id))
    }

    pub fn rule(&self, id: &str) -> Option<&ScheduleRule> {
        self.rules.iter().find(|rule| rule.id == id)
    }
}
