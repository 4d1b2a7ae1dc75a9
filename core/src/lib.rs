//! Debug and hazard-detection layer for a forking graph-traversal engine.
//!
//! The engine's units call into a [`Debugger`] at instruction boundaries,
//! forks, finishes and mutations; observers drive it with pause, continue,
//! step and kill commands and listen on its event bus.

pub mod breakpoints;
pub mod cli;
pub mod config;
pub mod debugger;
pub mod error;
pub mod events;
pub mod frames;
pub mod hazard;
pub mod lineage;
pub mod logging;
pub mod sim;
pub mod slow_motion;
pub mod stepping;
pub mod tree;
pub mod types;
pub mod unit;
pub mod watches;

#[cfg(test)]
pub mod test_helpers;

#[cfg(test)]
mod tests;

// Re-export main types
pub use types::*;

pub use config::Config;
pub use debugger::Debugger;
pub use error::{DebugError, Result};
pub use events::{DebugEvent, EventBus};
pub use hazard::{AttachedRegistry, HazardReport};
pub use unit::{ExecutionUnit, NodeStore, ProcessorPool, UnitHandle, UnitRef};
