//! Test helpers shared by unit and scenario tests
//!
//! A scriptable stand-in for an engine unit, plus small polling utilities.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::events::EventBus;
use crate::types::{DebugMode, NodeId, SpecialRole, UnitId, VariableId};
use crate::unit::{ExecutionUnit, UnitHandle, UnitRef};

#[derive(Debug, Default)]
pub struct FakeUnit {
    pub id: u64,
    pub variables: RwLock<HashMap<VariableId, Vec<NodeId>>>,
    pub roles: RwLock<[Option<NodeId>; 5]>,
    pub finished: AtomicBool,
    pub stop_requested: AtomicBool,
    pub blocks_kill: AtomicBool,
    pub depth: AtomicUsize,
}

impl FakeUnit {
    pub fn new(id: u64) -> Arc<FakeUnit> {
        Arc::new(FakeUnit {
            id,
            ..Default::default()
        })
    }

    pub fn set_variable(&self, var: VariableId, values: &[u64]) {
        self.variables
            .write()
            .insert(var, values.iter().copied().map(NodeId).collect());
    }

    pub fn set_role(&self, role: SpecialRole, node: Option<u64>) {
        self.roles.write()[role.index()] = node.map(NodeId);
    }
}

impl ExecutionUnit for FakeUnit {
    fn id(&self) -> UnitId {
        UnitId(self.id)
    }

    fn name(&self) -> String {
        format!("fake-{}", self.id)
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn is_splitting(&self) -> bool {
        false
    }

    fn stack_depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    fn variable_values(&self, var: VariableId) -> Vec<NodeId> {
        self.variables.read().get(&var).cloned().unwrap_or_default()
    }

    fn role_node(&self, role: SpecialRole) -> Option<NodeId> {
        self.roles.read()[role.index()]
    }

    fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    fn blocks_kill(&self) -> bool {
        self.blocks_kill.load(Ordering::Acquire)
    }
}

/// A fake unit wrapped in a debug handle.
pub fn fake_handle(id: u64, mode: DebugMode) -> (Arc<FakeUnit>, UnitRef) {
    let unit = FakeUnit::new(id);
    let handle = UnitHandle::new(unit.clone(), mode, EventBus::new(64));
    (unit, handle)
}

/// Poll `cond` every few milliseconds until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// Async flavour of [`wait_until`] for tokio tests.
pub async fn wait_until_async(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    cond()
}
