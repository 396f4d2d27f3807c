//! Process-level plumbing: the single-instance lock and Unix signal delivery.

pub mod instance;
pub mod lock;
pub mod signals;
