//! Debugger facade
//!
//! Wires the engine's callbacks (instruction boundaries, splits, finishes,
//! mutations, assignments) to the step controllers, the hazard detector,
//! the watch registry and the execution tree, and exposes the observer
//! commands (pause/continue/step/kill, watches, breakpoints, saved paths,
//! forced stop).
//!
//! ```ignore
//! let debugger = Arc::new(Debugger::new(config));
//! let unit = debugger.activate(processor);
//! // worker thread, for every instruction:
//! debugger.on_instruction_boundary(&unit, stmt, index);
//! ...
//! debugger.after_instruction(&unit);
//! ```

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use crate::breakpoints::{BreakpointSet, PathId, PathItem, SavedPath};
use crate::config::Config;
use crate::error::{DebugError, Result};
use crate::events::{DebugEvent, EventBus};
use crate::frames::ExecutionFrame;
use crate::hazard::AttachedRegistry;
use crate::slow_motion::SlowMotionTicker;
use crate::tree::{ExecutionTree, TreeShape};
use crate::types::{DebugMode, NodeId, PauseReason, SpecialRole, UnitId, VariableId};
use crate::unit::{ExecutionUnit, NodeStore, ProcessorPool, UnitHandle, UnitRef};
use crate::watches::{Watch, WatchId, WatchRef, WatchRegistry, WatchTarget, WatchValue};

pub struct Debugger {
    config: Config,
    events: EventBus,
    breakpoints: BreakpointSet,
    watches: WatchRegistry,
    attached: AttachedRegistry,
    tree: Arc<ExecutionTree>,
    ticker: Mutex<Option<SlowMotionTicker>>,
}

impl Debugger {
    pub fn new(config: Config) -> Self {
        let events = EventBus::new(config.events.capacity);
        let attached = AttachedRegistry::new(events.clone());
        Self::assemble(config, events, attached)
    }

    /// Hazard messages will carry node labels from `store`.
    pub fn with_store(config: Config, store: Arc<dyn NodeStore>) -> Self {
        let events = EventBus::new(config.events.capacity);
        let attached = AttachedRegistry::with_store(events.clone(), store);
        Self::assemble(config, events, attached)
    }

    fn assemble(config: Config, events: EventBus, attached: AttachedRegistry) -> Self {
        Self {
            config,
            events,
            breakpoints: BreakpointSet::new(),
            watches: WatchRegistry::new(),
            attached,
            tree: Arc::new(ExecutionTree::new()),
            ticker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DebugEvent> {
        self.events.subscribe()
    }

    pub fn breakpoints(&self) -> &BreakpointSet {
        &self.breakpoints
    }

    pub fn watches(&self) -> &WatchRegistry {
        &self.watches
    }

    pub fn attached(&self) -> &AttachedRegistry {
        &self.attached
    }

    pub fn tree(&self) -> &ExecutionTree {
        &self.tree
    }

    /* ===================== Unit lifecycle ===================== */

    /// Register a new root unit with the configured debug mode.
    pub fn activate(&self, unit: Arc<dyn ExecutionUnit>) -> UnitRef {
        self.activate_with_mode(unit, self.config.debug.mode)
    }

    pub fn activate_with_mode(&self, unit: Arc<dyn ExecutionUnit>, mode: DebugMode) -> UnitRef {
        let handle = UnitHandle::new(unit, mode, self.events.clone());
        debug!(unit = %handle.id(), ?mode, "unit activated");
        self.tree.add_root(handle.clone());
        self.events.publish(DebugEvent::TreeChanged);
        handle
    }

    /// `parent` forked. Each child is paired with the relation it follows;
    /// `parent_relation` is the relation the parent itself continues along,
    /// if any.
    ///
    /// Children get a copy of the parent's split path (before the parent's
    /// own relation is appended) extended by their relation, the parent's
    /// mode, frames and pending pause.
    pub fn on_units_split(
        &self,
        parent: &UnitRef,
        parent_relation: Option<NodeId>,
        children: Vec<(Arc<dyn ExecutionUnit>, NodeId)>,
    ) -> Vec<UnitRef> {
        let base = parent.split_path();
        let mode = parent.mode();
        let stopping = parent.control().is_stopping();

        let handles: Vec<UnitRef> = children
            .into_iter()
            .map(|(unit, relation)| {
                let child = UnitHandle::with_split_path(
                    unit,
                    mode,
                    self.events.clone(),
                    base.fork(relation),
                );
                if !mode.is_off() {
                    child.frames().inherit(parent.frames());
                    child.control().inherit_pending(parent.control());
                }
                if stopping {
                    child.unit().request_stop();
                    child.control().begin_stop();
                }
                child
            })
            .collect();

        if let Some(relation) = parent_relation {
            parent.push_split(relation);
        }

        if !mode.is_off() && !stopping {
            let forked = handles
                .iter()
                .chain(parent_relation.is_some().then_some(parent));
            for unit in forked {
                if self.breakpoints.should_break_after_split(&unit.split_path()) {
                    debug!(unit = %unit.id(), path = %unit.split_path(), "saved path breakpoint");
                    unit.control().request_pause(PauseReason::PathBreakpoint);
                }
            }
        }

        if !mode.is_off() {
            self.attached.on_unit_split(&handles, &self.watches);
        }
        self.tree.on_procs_added(parent, &handles);

        let children: Vec<UnitId> = handles.iter().map(|h| h.id()).collect();
        debug!(parent = %parent.id(), ?children, "unit split");
        self.events.publish(DebugEvent::Split {
            parent: parent.id(),
            children,
        });
        self.events.publish(DebugEvent::TreeChanged);
        handles
    }

    pub fn on_unit_finished(&self, unit: &UnitRef) {
        if !unit.mark_finished() {
            return;
        }
        if !unit.mode().is_off() {
            self.attached.on_unit_finished(unit.id());
            self.watches.forget_unit(unit.id());
        }
        self.tree.remove_from_owner(unit.id());
        debug!(unit = %unit.id(), "unit finished");
        self.events.publish(DebugEvent::Finished { unit: unit.id() });
        self.events.publish(DebugEvent::TreeChanged);
    }

    /* ===================== Worker callbacks ===================== */

    pub fn enter_frame(&self, unit: &UnitRef, code: NodeId, len: usize) {
        if unit.mode().is_off() {
            return;
        }
        unit.frames().push(code, len);
    }

    pub fn exit_frame(&self, unit: &UnitRef) {
        if unit.mode().is_off() {
            return;
        }
        unit.frames().pop();
    }

    /// Blocks the calling worker while the unit is paused.
    pub fn on_instruction_boundary(&self, unit: &UnitRef, instruction: NodeId, index: usize) {
        unit.control()
            .on_instruction_boundary(unit.frames(), &self.breakpoints, instruction, index);
    }

    pub fn after_instruction(&self, unit: &UnitRef) {
        unit.control().after_instruction();
    }

    pub fn on_exception(&self, unit: &UnitRef, message: &str) {
        warn!(unit = %unit.id(), "exception: {}", message);
        if self.config.debug.pause_on_exception {
            unit.control().request_pause(PauseReason::Exception);
        }
    }

    /* ===================== Mutations and assignments ===================== */

    /// Must run on the mutating worker before the change is applied.
    pub fn on_node_mutated(&self, unit: &UnitRef, node: NodeId, description: &str) -> bool {
        self.attached.on_mutation_notification(node, unit, description)
    }

    pub fn on_link_changed(
        &self,
        unit: &UnitRef,
        from: NodeId,
        to: NodeId,
        meaning: NodeId,
        info: Option<NodeId>,
        description: &str,
    ) -> bool {
        self.attached
            .on_link_changed(unit, from, to, meaning, info, description)
    }

    /// A variable of `unit` now holds `values`. Watched values get attached
    /// and nodes the variable no longer holds are released.
    /// Units running with debugging off never attach.
    pub fn on_variable_assigned(&self, unit: &UnitRef, var: VariableId, values: &[NodeId]) {
        self.track(unit, WatchTarget::Variable(var), values);
    }

    pub fn on_role_assigned(&self, unit: &UnitRef, role: SpecialRole, node: Option<NodeId>) {
        let values: Vec<NodeId> = node.into_iter().collect();
        self.track(unit, WatchTarget::Role(role), &values);
    }

    fn track(&self, unit: &UnitRef, target: WatchTarget, values: &[NodeId]) {
        if unit.mode().is_off() {
            return;
        }
        let watches = self.watches.watches_for(target);
        if watches.is_empty() {
            return;
        }

        let ids: Vec<WatchId> = watches.iter().map(|w| w.id).collect();
        for old in self.watches.take_replaced(target, unit.id(), values) {
            self.attached.release(old.node, old.token, &ids);
        }
        for &node in values {
            if let Some(token) = self.attached.attach_tracked(node, unit, watches.clone()) {
                self.watches.record_attachment(target, node, unit.id(), token);
            }
        }
    }

    /// The graph store was reset.
    pub fn network_cleared(&self) {
        self.attached.on_network_cleared();
        self.watches.clear_attachments();
    }

    /* ===================== Watches ===================== */

    pub fn add_watch(&self, watch: WatchRef) -> bool {
        self.watches.monitor(watch)
    }

    /// Withdraw `watch` from the nodes attached because of its target. A node
    /// no other watch covers is detached.
    pub fn remove_watch(&self, watch: &Watch) {
        for recorded in self.watches.remove(watch) {
            self.attached.release(recorded.node, recorded.token, &[watch.id]);
        }
    }

    pub fn watch_values(&self, unit: UnitId) -> Result<Vec<WatchValue>> {
        let unit = self.unit(unit)?;
        Ok(self.watches.snapshot(unit.unit().as_ref()))
    }

    /* ===================== Observer queries ===================== */

    pub fn unit(&self, unit: UnitId) -> Result<UnitRef> {
        self.tree.find(unit).ok_or(DebugError::UnknownUnit(unit))
    }

    pub fn frames(&self, unit: UnitId) -> Result<Vec<ExecutionFrame>> {
        Ok(self.unit(unit)?.frames().snapshot())
    }

    pub fn next_statement(&self, unit: UnitId) -> Result<Option<(NodeId, usize)>> {
        Ok(self.unit(unit)?.frames().next_statement())
    }

    /// Length of the lineage two units share.
    pub fn common_lineage(&self, a: UnitId, b: UnitId) -> Result<usize> {
        let a = self.unit(a)?.split_path();
        let b = self.unit(b)?.split_path();
        Ok(a.common_prefix_len(&b))
    }

    pub fn tree_snapshot(&self) -> Vec<TreeShape> {
        self.tree.snapshot()
    }

    /* ===================== Commands ===================== */

    pub fn pause(&self, unit: UnitId) -> Result<()> {
        self.unit(unit)?.control().request_pause(PauseReason::Requested);
        Ok(())
    }

    pub fn resume(&self, unit: UnitId) -> Result<()> {
        self.unit(unit)?.control().resume();
        Ok(())
    }

    pub fn step(&self, unit: UnitId) -> Result<()> {
        self.unit(unit)?.control().step();
        Ok(())
    }

    /// Stop one unit; a paused unit is released so it can unwind.
    pub fn kill(&self, unit: UnitId) -> Result<()> {
        let unit = self.unit(unit)?;
        debug!(unit = %unit.id(), "kill requested");
        unit.unit().request_stop();
        unit.control().begin_stop();
        Ok(())
    }

    pub fn pause_all(&self) {
        for unit in self.tree.units() {
            unit.control().request_pause(PauseReason::Requested);
        }
    }

    pub fn continue_all(&self) {
        for unit in self.tree.units() {
            unit.control().resume();
        }
    }

    /// Live units the engine cannot kill right now.
    pub fn unkillable_count(&self) -> usize {
        self.tree
            .units()
            .iter()
            .filter(|unit| !unit.is_finished() && unit.unit().blocks_kill())
            .count()
    }

    fn remaining(&self, pool: &dyn ProcessorPool) -> usize {
        pool.active_count().saturating_sub(self.unkillable_count())
    }

    /// Stop every unit, releasing paused ones and engine locks, then wait
    /// for the pool to drain, not counting units that block kills.
    ///
    /// Polls up to `stop.max_attempts` times with a backoff capped at
    /// `stop.poll_interval_ms`; gives up with [`DebugError::StopTimeout`].
    pub async fn stop_and_unblock(&self, pool: &dyn ProcessorPool) -> Result<()> {
        let units = self.tree.units();
        debug!(units = units.len(), "stopping all units");
        for unit in &units {
            unit.unit().request_stop();
            unit.control().begin_stop();
        }
        pool.break_deadlocks();

        let attempts = self.config.stop.max_attempts;
        let cap = self.config.stop_poll_interval();
        let mut delay = Duration::from_millis(1).min(cap);

        for attempt in 1..=attempts {
            if self.remaining(pool) == 0 {
                debug!(attempt, "all units stopped");
                return Ok(());
            }
            // Units forked while the stop was spreading.
            for unit in self.tree.units() {
                if !unit.control().is_stopping() {
                    unit.unit().request_stop();
                    unit.control().begin_stop();
                }
            }
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(cap);
        }

        let remaining = self.remaining(pool);
        if remaining == 0 {
            return Ok(());
        }
        error!(remaining, attempts, "unable to stop execution units");
        self.events.publish(DebugEvent::StopFailed { remaining });
        Err(DebugError::StopTimeout {
            remaining,
            attempts,
        })
    }

    /* ===================== Breakpoints and saved paths ===================== */

    pub fn add_breakpoint(&self, node: NodeId) -> bool {
        self.breakpoints.add(node)
    }

    pub fn remove_breakpoint(&self, node: NodeId) -> bool {
        self.breakpoints.remove(node)
    }

    pub fn toggle_breakpoint(&self, node: NodeId) -> bool {
        self.breakpoints.toggle(node)
    }

    pub fn add_path(&self, name: impl Into<String>, items: Vec<PathItem>) -> PathId {
        self.breakpoints.add_path(SavedPath::new(name, items))
    }

    /// Save the current lineage of `unit` as a new path.
    pub fn save_unit_path(&self, unit: UnitId, name: impl Into<String>) -> Result<PathId> {
        let split = self.unit(unit)?.split_path();
        Ok(self
            .breakpoints
            .add_path(SavedPath::from_split_path(name, &split)))
    }

    pub fn rename_path(&self, id: PathId, name: impl Into<String>) -> Result<()> {
        self.breakpoints.rename_path(id, name)
    }

    pub fn replace_path_items(&self, id: PathId, items: Vec<PathItem>) -> Result<()> {
        self.breakpoints.replace_items(id, items)
    }

    pub fn toggle_path_breakpoint(&self, id: PathId, index: usize) -> Result<bool> {
        self.breakpoints.toggle_path_breakpoint(id, index)
    }

    pub fn remove_path(&self, id: PathId) -> Result<SavedPath> {
        self.breakpoints.remove_path(id)
    }

    pub fn paths(&self) -> Vec<SavedPath> {
        self.breakpoints.paths()
    }

    /// Saved paths the unit currently belongs to.
    pub fn paths_for_unit(&self, unit: UnitId) -> Result<Vec<SavedPath>> {
        let split = self.unit(unit)?.split_path();
        Ok(self.breakpoints.paths_for(&split))
    }

    /* ===================== Slow motion ===================== */

    /// Start the shared ticker on `runtime`. No-op if already running.
    pub fn start_slow_motion(&self, runtime: &Handle) {
        let mut ticker = self.ticker.lock();
        if ticker.as_ref().is_some_and(SlowMotionTicker::is_running) {
            return;
        }
        *ticker = Some(SlowMotionTicker::start(
            runtime,
            self.tree.clone(),
            self.config.slow_motion_interval(),
        ));
    }

    pub fn stop_slow_motion(&self) {
        if let Some(ticker) = self.ticker.lock().take() {
            ticker.stop();
        }
    }
}
