use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a node in the graph store.
///
/// The debug core never looks inside a node; it only compares ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Stable identity of an execution unit (processor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(pub u64);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit-{}", self.0)
    }
}

/// Identity of a user-declared variable slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableId(pub u64);

impl fmt::Display for VariableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "var-{}", self.0)
    }
}

/// Well-known system roles a unit keeps a "current" node for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialRole {
    CurrentFrom,
    CurrentTo,
    CurrentMeaning,
    CurrentSin,
    CurrentInfo,
}

impl SpecialRole {
    pub const ALL: [SpecialRole; 5] = [
        SpecialRole::CurrentFrom,
        SpecialRole::CurrentTo,
        SpecialRole::CurrentMeaning,
        SpecialRole::CurrentSin,
        SpecialRole::CurrentInfo,
    ];

    /// Slot index used by fixed per-role tables.
    pub fn index(self) -> usize {
        match self {
            SpecialRole::CurrentFrom => 0,
            SpecialRole::CurrentTo => 1,
            SpecialRole::CurrentMeaning => 2,
            SpecialRole::CurrentSin => 3,
            SpecialRole::CurrentInfo => 4,
        }
    }
}

impl fmt::Display for SpecialRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SpecialRole::CurrentFrom => "CurrentFrom",
            SpecialRole::CurrentTo => "CurrentTo",
            SpecialRole::CurrentMeaning => "CurrentMeaning",
            SpecialRole::CurrentSin => "CurrentSin",
            SpecialRole::CurrentInfo => "CurrentInfo",
        };
        f.write_str(name)
    }
}

/// Instrumentation level of a unit. Fixed for the unit's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugMode {
    /// No instrumentation at all.
    #[default]
    Off,
    /// Pause on breakpoints, pause requests and single steps.
    Normal,
    /// Pause at every boundary, auto-advanced by the shared ticker.
    SlowMotion,
}

impl DebugMode {
    pub fn is_off(self) -> bool {
        self == DebugMode::Off
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitState {
    Running,
    Paused,
    Finished,
}

/// Why a unit stopped at an instruction boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    Breakpoint,
    Step,
    Requested,
    Hazard,
    Exception,
    PathBreakpoint,
    SlowMotion,
}

impl PauseReason {
    /// Reasons that hold the unit until an explicit continue, even in slow motion.
    pub fn is_latching(self) -> bool {
        !matches!(self, PauseReason::Step | PauseReason::SlowMotion)
    }
}
