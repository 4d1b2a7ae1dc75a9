//! Reference execution unit.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::types::{NodeId, SpecialRole, UnitId, VariableId};
use crate::unit::ExecutionUnit;

#[derive(Debug)]
pub struct Processor {
    id: UnitId,
    name: String,
    variables: RwLock<HashMap<VariableId, Vec<NodeId>>>,
    roles: RwLock<[Option<NodeId>; 5]>,
    depth: AtomicUsize,
    finished: AtomicBool,
    splitting: AtomicBool,
    host_call: AtomicBool,
    stop: AtomicBool,
}

impl Processor {
    pub fn new(id: UnitId) -> Self {
        Self {
            id,
            name: format!("proc-{}", id.0),
            variables: RwLock::new(HashMap::new()),
            roles: RwLock::new([None; 5]),
            depth: AtomicUsize::new(0),
            finished: AtomicBool::new(false),
            splitting: AtomicBool::new(false),
            host_call: AtomicBool::new(false),
            stop: AtomicBool::new(false),
        }
    }

    /// A child sharing this processor's variables and roles at fork time.
    pub fn fork(&self, id: UnitId) -> Self {
        let child = Self::new(id);
        *child.variables.write() = self.variables.read().clone();
        *child.roles.write() = *self.roles.read();
        child
    }

    pub fn assign(&self, var: VariableId, values: Vec<NodeId>) {
        self.variables.write().insert(var, values);
    }

    pub fn set_role(&self, role: SpecialRole, node: Option<NodeId>) {
        self.roles.write()[role.index()] = node;
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn set_splitting(&self, splitting: bool) {
        self.splitting.store(splitting, Ordering::Release);
    }

    pub fn set_host_call(&self, active: bool) {
        self.host_call.store(active, Ordering::Release);
    }

    pub fn enter(&self) {
        self.depth.fetch_add(1, Ordering::AcqRel);
    }

    pub fn exit(&self) {
        self.depth.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn finish(&self) {
        self.finished.store(true, Ordering::Release);
    }
}

impl ExecutionUnit for Processor {
    fn id(&self) -> UnitId {
        self.id
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn is_splitting(&self) -> bool {
        self.splitting.load(Ordering::Acquire)
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
        self.stop.store(true, Ordering::Release);
    }

    fn blocks_kill(&self) -> bool {
        self.host_call.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fork_copies_state() {
        let parent = Processor::new(UnitId(1));
        parent.assign(VariableId(1), vec![NodeId(4)]);
        parent.set_role(SpecialRole::CurrentSin, Some(NodeId(9)));

        let child = parent.fork(UnitId(2));
        parent.assign(VariableId(1), vec![NodeId(5)]);

        assert_eq!(child.variable_values(VariableId(1)), vec![NodeId(4)]);
        assert_eq!(child.role_node(SpecialRole::CurrentSin), Some(NodeId(9)));
        assert_eq!(child.name(), "proc-2");
    }
}
