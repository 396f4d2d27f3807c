//! Play order for an item sequence.
//!
//! With shuffle enabled, every step re-randomises only the tail that has not
//! been played yet; positions already played keep their item. Wrapping a
//! looping sequence therefore starts a freshly shuffled pass. Without
//! shuffle the order is the item order and every pass is identical.

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// Outcome of moving to a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Play the item at `item` (an index into the item list), at `position` in the order.
    Play { position: usize, item: usize },
    /// The sequence ran out and does not loop.
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackOrder {
    order: Vec<usize>,
    shuffle: bool,
    looping: bool,
}

impl PlaybackOrder {
    pub fn new<R: Rng + ?Sized>(len: usize, shuffle: bool, looping: bool, rng: &mut R) -> Self {
        let mut order = Self {
            order: (0..len).collect(),
            shuffle,
            looping,
        };
        order.shuffle_from(0, rng);
        order
    }

    /// Rebuild from a recorded order. Returns `None` if it is not a permutation of `0..len`.
    pub fn restore(recorded: Vec<usize>, len: usize, shuffle: bool, looping: bool) -> Option<Self> {
        let mut sorted = recorded.clone();
        sorted.sort_unstable();
        if sorted != (0..len).collect::<Vec<_>>() {
            return None;
        }
        Some(Self {
            order: recorded,
            shuffle,
            looping,
        })
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    /// Item index at `position` without reshuffling.
    pub fn item_at(&self, position: usize) -> Option<usize> {
        self.order.get(position).copied()
    }

    /// Move to `position`, wrapping or finishing past the end.
    pub fn step_to<R: Rng + ?Sized>(&mut self, position: usize, rng: &mut R) -> Step {
        if self.order.is_empty() {
            return Step::Finished;
        }
        let position = if position >= self.order.len() {
            if !self.looping {
                return Step::Finished;
            }
            0
        } else {
            position
        };
        self.shuffle_from(position, rng);
        Step::Play {
            position,
            item: self.order[position],
        }
    }

    fn shuffle_from<R: Rng + ?Sized>(&mut self, position: usize, rng: &mut R) {
        if self.shuffle && position < self.order.len() {
            self.order[position..].shuffle(rng);
        }
    }
}
