//! Single-shot timers for the orchestrator actor.
//!
//! Timers are the only source of asynchronous re-entry. Each one carries the
//! token of the playback instance that armed it (owner id, epoch, index), and
//! the handler compares that token with current state before mutating
//! anything, so a timer that outlived its playback is a silent no-op.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerKind {
    /// Move a playlist on to the item at `index`.
    PlaylistAdvance {
        playlist_id: String,
        epoch: u64,
        index: usize,
    },
    /// Move a rule's sequence on to the item at `index`.
    RuleAdvance {
        rule_id: String,
        epoch: u64,
        index: usize,
    },
    /// Re-evaluate schedule rules.
    ScheduleTick,
}

/// Deadline-ordered timer queue. Timers armed for the same instant fire in arm order.
#[derive(Debug, Default)]
pub struct TimerQueue {
    entries: BTreeMap<(DateTime<Utc>, u64), TimerKind>,
    seq: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, deadline: DateTime<Utc>, kind: TimerKind) {
        self.seq += 1;
        self.entries.insert((deadline, self.seq), kind);
    }

    /// Remove every pending timer matching `predicate`, returning how many were cancelled.
    pub fn cancel_where<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(&TimerKind) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|_, kind| !predicate(kind));
        before - self.entries.len()
    }

    pub fn cancel_playlist(&mut self, id: &str) -> usize {
        self.cancel_where(|kind| {
            matches!(kind, TimerKind::PlaylistAdvance { playlist_id, .. } if playlist_id == id)
        })
    }

    pub fn cancel_rule(&mut self, id: &str) -> usize {
        self.cancel_where(
            |kind| matches!(kind, TimerKind::RuleAdvance { rule_id, .. } if rule_id == id),
        )
    }

    /// Remove and return every timer due at or before `now`, earliest first.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<TimerKind> {
        let mut due = Vec::new();
        while let Some(entry) = self.entries.first_entry() {
            if entry.key().0 > now {
                break;
            }
            due.push(entry.remove());
        }
        due
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.entries.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Deadline of the first pending timer matching `predicate`.
    pub fn deadline_of<F>(&self, mut predicate: F) -> Option<DateTime<Utc>>
    where
        F: FnMut(&TimerKind) -> bool,
    {
        self.entries
            .iter()
            .find(|(_, kind)| predicate(kind))
            .map(|((deadline, _), _)| *deadline)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn advance(id: &str, epoch: u64, index: usize) -> TimerKind {
        TimerKind::PlaylistAdvance {
            playlist_id: id.to_string(),
            epoch,
            index,
        }
    }

    #[test]
    fn test_due_timers_fire_in_deadline_order() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut timers = TimerQueue::new();
        timers.arm(t0 + Duration::seconds(5), advance("b", 1, 1));
        timers.arm(t0 + Duration::seconds(1), advance("a", 1, 1));
        timers.arm(t0 + Duration::seconds(1), TimerKind::ScheduleTick);

        assert_eq!(timers.next_deadline(), Some(t0 + Duration::seconds(1)));
        assert!(timers.pop_due(t0).is_empty());
        assert_eq!(
            timers.pop_due(t0 + Duration::seconds(2)),
            vec![advance("a", 1, 1), TimerKind::ScheduleTick]
        );
        assert_eq!(timers.len(), 1);
    }

    #[test]
    fn test_cancellation_is_scoped_to_owner() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut timers = TimerQueue::new();
        timers.arm(t0, advance("a", 1, 1));
        timers.arm(t0, advance("b", 1, 1));
        timers.arm(
            t0,
            TimerKind::RuleAdvance {
                rule_id: "a".to_string(),
                epoch: 1,
                index: 1,
            },
        );

        assert_eq!(timers.cancel_playlist("a"), 1);
        assert_eq!(timers.cancel_rule("a"), 1);
        assert_eq!(timers.pop_due(t0), vec![advance("b", 1, 1)]);
        assert!(timers.is_empty());
    }
}
