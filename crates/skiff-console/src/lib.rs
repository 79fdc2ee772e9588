//! Main-thread controller for Skiff interactive code execution.
//!
//! This crate provides:
//! - `Console`: worker lifecycle (spawn, initialize, run, stop, respawn)
//!   and the imperative API a host calls
//! - The UI-facing event stream and session state machine
//! - Transcript accumulation for terminal-style rendering

pub mod controller;
pub mod error;
pub mod events;

pub use controller::{Console, ConsoleConfig, DEFAULT_GRACE_PERIOD};
pub use error::{Error, Result};
pub use events::{RunOutcome, SessionEvent, SessionPhase};
