//! Engine contracts and the per-unit debug handle
//!
//! The interpreter, the graph store and the worker pool live outside this
//! crate. They are consumed through the three traits below; everything the
//! debugger keeps about one unit is bundled in [`UnitHandle`].

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::frames::FrameStack;
use crate::lineage::SplitPath;
use crate::stepping::StepController;
use crate::types::{DebugMode, NodeId, SpecialRole, UnitId, UnitState, VariableId};
use crate::events::EventBus;

/* ===================== Engine contracts ===================== */

/// One interpreter instance traversing the graph.
///
/// Variable and role accessors are read cross-thread by observers; the unit's
/// own worker is the only writer.
pub trait ExecutionUnit: Send + Sync {
    fn id(&self) -> UnitId;

    fn name(&self) -> String;

    fn is_finished(&self) -> bool;

    /// True while the unit is producing children.
    fn is_splitting(&self) -> bool;

    fn stack_depth(&self) -> usize;

    /// Values bound to `var`, in store order.
    fn variable_values(&self, var: VariableId) -> Vec<NodeId>;

    fn role_node(&self, role: SpecialRole) -> Option<NodeId>;

    /// Ask the unit to stop at its next opportunity.
    fn request_stop(&self);

    /// True while the engine cannot kill the unit (e.g. blocked in a host
    /// call). A forced stop does not wait for such units.
    fn blocks_kill(&self) -> bool {
        false
    }
}

/// Read access to the graph store.
pub trait NodeStore: Send + Sync {
    fn contains(&self, id: NodeId) -> bool;

    fn label(&self, id: NodeId) -> Option<String>;
}

/// The worker pool running the units.
pub trait ProcessorPool: Send + Sync {
    fn active_count(&self) -> usize;

    /// Lift engine-level exclusive locks so stopped units can unwind.
    fn break_deadlocks(&self) {}
}

/* ===================== Unit handle ===================== */

pub type UnitRef = Arc<UnitHandle>;

pub struct UnitHandle {
    id: UnitId,
    unit: Arc<dyn ExecutionUnit>,
    control: StepController,
    frames: FrameStack,
    split_path: Mutex<SplitPath>,
    finished: AtomicBool,
}

impl UnitHandle {
    pub fn new(unit: Arc<dyn ExecutionUnit>, mode: DebugMode, events: EventBus) -> UnitRef {
        Self::with_split_path(unit, mode, events, SplitPath::new())
    }

    pub fn with_split_path(
        unit: Arc<dyn ExecutionUnit>,
        mode: DebugMode,
        events: EventBus,
        split_path: SplitPath,
    ) -> UnitRef {
        let id = unit.id();
        Arc::new(Self {
            id,
            unit,
            control: StepController::new(id, mode, events),
            frames: FrameStack::new(),
            split_path: Mutex::new(split_path),
            finished: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn name(&self) -> String {
        self.unit.name()
    }

    pub fn unit(&self) -> &Arc<dyn ExecutionUnit> {
        &self.unit
    }

    pub fn control(&self) -> &StepController {
        &self.control
    }

    pub fn frames(&self) -> &FrameStack {
        &self.frames
    }

    pub fn mode(&self) -> DebugMode {
        self.control.mode()
    }

    pub fn state(&self) -> UnitState {
        if self.is_finished() {
            UnitState::Finished
        } else {
            self.control.state()
        }
    }

    /// A copy; the handle's own path is never shared.
    pub fn split_path(&self) -> SplitPath {
        self.split_path.lock().clone()
    }

    pub fn push_split(&self, relation: NodeId) {
        self.split_path.lock().push(relation);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire) || self.unit.is_finished()
    }

    /// Returns false if the unit had already been marked.
    pub fn mark_finished(&self) -> bool {
        let first = !self.finished.swap(true, Ordering::AcqRel);
        if first {
            self.control.mark_finished();
        }
        first
    }
}

impl fmt::Debug for UnitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitHandle")
            .field("id", &self.id)
            .field("name", &self.unit.name())
            .field("mode", &self.mode())
            .field("split_path", &self.split_path())
            .finish()
    }
}
