//! Borrowed view of orchestrator state handed to the playback drivers.
//!
//! The player and the rule engine both start and stop sessions and arm
//! timers. Instead of owning those they borrow them from the orchestrator for
//! the duration of one run-to-completion step.

use rand::rngs::StdRng;

use crate::catalog::Catalog;
use crate::core::timers::TimerQueue;
use crate::session::SessionRegistry;

pub struct PlaybackEnv<'a> {
    pub registry: &'a mut SessionRegistry,
    pub timers: &'a mut TimerQueue,
    pub catalog: &'a Catalog,
    pub rng: &'a mut StdRng,
    /// Frame rate used when a playlist or rule does not set one.
    pub default_fps: u32,
}
