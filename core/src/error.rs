use thiserror::Error;

use crate::breakpoints::PathId;
use crate::types::UnitId;

/// Failures surfaced to the controlling caller.
///
/// Hazards and bookkeeping inconsistencies are not errors in this sense: they
/// are logged and published on the event bus and never unwind across units.
#[derive(Debug, Error)]
pub enum DebugError {
    #[error("unable to stop {remaining} execution unit(s) after {attempts} attempts")]
    StopTimeout { remaining: usize, attempts: u32 },

    #[error("unknown execution unit {0}")]
    UnknownUnit(UnitId),

    #[error("unknown saved path {0}")]
    UnknownPath(PathId),

    #[error("index {index} is out of range for saved path {path} ({len} items)")]
    PathIndexOutOfRange { path: PathId, index: usize, len: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, DebugError>;
