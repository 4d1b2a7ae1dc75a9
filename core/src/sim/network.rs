//! In-memory semantic network for the reference engine.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::types::{NodeId, SpecialRole, VariableId};
use crate::unit::NodeStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Assign { var: VariableId, values: Vec<NodeId> },
    SetRole { role: SpecialRole, node: Option<NodeId> },
    Link { from: NodeId, meaning: NodeId, to: NodeId },
    Unlink { from: NodeId, meaning: NodeId, to: NodeId },
    Fail { message: String },
    /// Simulated work.
    Wait(Duration),
    /// Work the engine cannot interrupt; the processor blocks kills meanwhile.
    HostCall(Duration),
    Nop,
}

/// A statement is a node of its own, so it can carry a breakpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub id: NodeId,
    pub op: Op,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    /// Identity of the relation; what a split path records.
    pub relation: NodeId,
    pub meaning: NodeId,
    pub to: NodeId,
}

#[derive(Debug, Default)]
struct NodeData {
    label: String,
    code: Vec<Statement>,
    links: Vec<Link>,
}

#[derive(Debug)]
pub struct Network {
    nodes: RwLock<HashMap<NodeId, NodeData>>,
    next_id: AtomicU64,
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

impl Network {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn add_node(&self, label: impl Into<String>) -> NodeId {
        let id = NodeId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.nodes.write().insert(
            id,
            NodeData {
                label: label.into(),
                ..Default::default()
            },
        );
        id
    }

    /// Append a statement to the code list of `node`.
    pub fn add_statement(&self, node: NodeId, op: Op) -> NodeId {
        let id = self.add_node(format!("stmt of {}", node));
        if let Some(data) = self.nodes.write().get_mut(&node) {
            data.code.push(Statement { id, op });
        }
        id
    }

    /// Add `from -[meaning]-> to`; returns the relation id.
    pub fn add_link(&self, from: NodeId, meaning: NodeId, to: NodeId) -> NodeId {
        let relation = self.add_node(format!("{} -> {}", from, to));
        if let Some(data) = self.nodes.write().get_mut(&from) {
            data.links.push(Link {
                relation,
                meaning,
                to,
            });
        }
        relation
    }

    pub fn remove_link(&self, from: NodeId, meaning: NodeId, to: NodeId) -> bool {
        let mut nodes = self.nodes.write();
        let Some(data) = nodes.get_mut(&from) else {
            return false;
        };
        let before = data.links.len();
        data.links.retain(|l| !(l.meaning == meaning && l.to == to));
        data.links.len() != before
    }

    pub fn code(&self, node: NodeId) -> Vec<Statement> {
        self.nodes
            .read()
            .get(&node)
            .map(|data| data.code.clone())
            .unwrap_or_default()
    }

    pub fn links(&self, node: NodeId) -> Vec<Link> {
        self.nodes
            .read()
            .get(&node)
            .map(|data| data.links.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    pub fn clear(&self) {
        self.nodes.write().clear();
    }
}

impl NodeStore for Network {
    fn contains(&self, id: NodeId) -> bool {
        self.nodes.read().contains_key(&id)
    }

    fn label(&self, id: NodeId) -> Option<String> {
        self.nodes.read().get(&id).map(|data| data.label.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_links_and_statements() {
        let net = Network::new();
        let a = net.add_node("a");
        let b = net.add_node("b");
        let is = net.add_node("is");

        let stmt = net.add_statement(a, Op::Nop);
        let relation = net.add_link(a, is, b);

        assert_eq!(net.code(a), vec![Statement { id: stmt, op: Op::Nop }]);
        assert_eq!(net.links(a)[0].relation, relation);
        assert_eq!(net.label(a).as_deref(), Some("a"));

        assert!(net.remove_link(a, is, b));
        assert!(!net.remove_link(a, is, b));
        assert!(net.links(a).is_empty());
    }
}
