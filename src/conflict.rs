//! Conflict detection between a candidate target set and active sessions.
//!
//! Both sides are compared at leaf level. For each active session the leaves
//! it owns that overlap any candidate leaf are collected. The session can shed
//! them and keep running (`can_partial_stop`) only if some leaf of its own
//! overlaps none of the shed ones, since excluding a segment also removes
//! every other leaf touching it. Otherwise it has to stop.

use serde::{Deserialize, Serialize};

use crate::session::SessionId;
use crate::topology::{LeafTarget, SourcedLeaf, TargetKind};

/// One active session colliding with a candidate target set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub session_id: SessionId,
    /// Leaves of the session that overlap the candidate, in the session's order.
    pub overlapping_leaves: Vec<LeafTarget>,
    pub can_partial_stop: bool,
    /// Kind of target the first overlapping leaf was expanded from.
    pub conflict_source_type: TargetKind,
}

impl Conflict {
    /// Device ids touched by the overlap, deduplicated in order.
    pub fn overlapping_devices(&self) -> Vec<String> {
        let mut devices: Vec<String> = Vec::new();
        for leaf in &self.overlapping_leaves {
            if !devices.contains(&leaf.device_id) {
                devices.push(leaf.device_id.clone());
            }
        }
        devices
    }
}

/// Compare `candidate` against one session's effective leaves.
pub fn conflict_with(
    candidate: &[LeafTarget],
    session_id: SessionId,
    session_leaves: &[SourcedLeaf],
) -> Option<Conflict> {
    let overlapping: Vec<&SourcedLeaf> = session_leaves
        .iter()
        .filter(|owned| candidate.iter().any(|c| c.overlaps(&owned.leaf)))
        .collect();

    let first = overlapping.first()?;
    let survives_shedding = session_leaves
        .iter()
        .any(|owned| !overlapping.iter().any(|shed| shed.leaf.overlaps(&owned.leaf)));
    Some(Conflict {
        session_id,
        conflict_source_type: first.source,
        can_partial_stop: survives_shedding,
        overlapping_leaves: overlapping.iter().map(|s| s.leaf.clone()).collect(),
    })
}

/// Conflicts between `candidate` and every active session, ordered by session id.
///
/// The result depends only on the two leaf sets, never on iteration order of
/// the input, so repeated checks of the same pair classify identically.
pub fn detect_conflicts<'a, I>(candidate: &[LeafTarget], active: I) -> Vec<Conflict>
where
    I: IntoIterator<Item = (SessionId, &'a [SourcedLeaf])>,
{
    let mut conflicts: Vec<Conflict> = active
        .into_iter()
        .filter_map(|(id, leaves)| conflict_with(candidate, id, leaves))
        .collect();
    conflicts.sort_by_key(|c| c.session_id);
    conflicts
}
