//! # Lightkeeper Library
//!
//! Internals of the `lightkeeper` binary, a daemon that plays effects on
//! addressable LED hardware over time.
//!
//! ## Architecture
//!
//! - **Model**: `topology` (devices, groups, virtual devices and their
//!   expansion to LED ranges), `preset`, `playlist`, `schedule` rules, `holiday`
//!   and the `calendar` date and solar resolver
//! - **Arbitration**: `conflict` detection and the `session` registry that owns
//!   every running stream
//! - **Core**: the single-threaded `core::Orchestrator` driving the playlist
//!   player and the rule scheduler from a timer queue, and the
//!   `core::runtime` event loop around it
//! - **Edges**: `backend` dispatch to hardware, `state` (durable playback
//!   record and the observer socket), `io` (signals and the instance lock),
//!   `config` with hot reload, and the CLI `commands`

// Import macros from logger module for use in all submodules
#[macro_use]
pub mod logger;

pub mod api;
pub mod args;
pub mod backend;
pub mod calendar;
pub mod catalog;
pub mod commands;
pub mod config;
pub mod conflict;
pub mod constants;
pub mod core;
pub mod error;
pub mod holiday;
pub mod io;
pub mod playlist;
pub mod preset;
pub mod schedule;
pub mod session;
pub mod state;
pub mod time_source;
pub mod topology;

mod lightkeeper;

pub use lightkeeper::Lightkeeper;
