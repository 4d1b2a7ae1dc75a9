//! Execution tree manager
//!
//! The forest of debug-visible units. Roots are independently scheduled
//! units; when a unit forks for the first time its leaf is replaced, at the
//! same position, by a fork group holding the unit followed by its children.
//! When units finish, groups left with one child are replaced by that child
//! and empty groups are pruned, repeatedly up the tree.
//!
//! The whole forest sits behind one coarse lock, so a fork and a collapse
//! touching the same group are serialized without any lock ordering between
//! levels.

use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use crate::types::{UnitId, UnitState};
use crate::unit::UnitRef;

#[derive(Debug, Clone)]
pub enum TreeNode {
    Leaf(UnitRef),
    Group(ForkGroup),
}

#[derive(Debug, Clone)]
pub struct ForkGroup {
    /// The unit whose split created the group; its leaf comes first.
    pub split_start: UnitId,
    pub children: Vec<TreeNode>,
}

/// Owned snapshot of the forest for rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TreeShape {
    Leaf {
        unit: UnitId,
        name: String,
        state: UnitState,
        /// Call-stack depth reported by the engine.
        depth: usize,
        splitting: bool,
    },
    Group {
        split_start: UnitId,
        children: Vec<TreeShape>,
    },
}

impl TreeNode {
    fn shape(&self) -> TreeShape {
        match self {
            TreeNode::Leaf(unit) => TreeShape::Leaf {
                unit: unit.id(),
                name: unit.name(),
                state: unit.state(),
                depth: unit.unit().stack_depth(),
                splitting: unit.unit().is_splitting(),
            },
            TreeNode::Group(group) => TreeShape::Group {
                split_start: group.split_start,
                children: group.children.iter().map(TreeNode::shape).collect(),
            },
        }
    }

    fn collect_units(&self, out: &mut Vec<UnitRef>) {
        match self {
            TreeNode::Leaf(unit) => out.push(unit.clone()),
            TreeNode::Group(group) => {
                for child in &group.children {
                    child.collect_units(out);
                }
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct ExecutionTree {
    roots: RwLock<Vec<TreeNode>>,
}

impl ExecutionTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_root(&self, unit: UnitRef) {
        debug!(unit = %unit.id(), "root unit added");
        self.roots.write().push(TreeNode::Leaf(unit));
    }

    /// `parent` forked into `children`.
    ///
    /// The first split of a unit turns its leaf into a fork group; later
    /// splits of the same unit append to that group. Returns false if the
    /// parent was no longer in the tree, in which case the children become
    /// roots.
    pub fn on_procs_added(&self, parent: &UnitRef, children: &[UnitRef]) -> bool {
        let mut roots = self.roots.write();
        let leaves = children.iter().cloned().map(TreeNode::Leaf);

        let Some(path) = locate(&roots, parent.id()) else {
            debug!(unit = %parent.id(), "split of a unit outside the tree");
            roots.extend(leaves);
            return false;
        };
        let Some((&index, owner)) = path.split_last() else {
            return false;
        };

        let in_own_group = matches!(
            node_at(&roots, owner),
            Some(TreeNode::Group(group)) if group.split_start == parent.id()
        );
        let Some(collection) = collection_mut(&mut roots, owner) else {
            return false;
        };

        if in_own_group {
            collection.extend(leaves);
        } else {
            let leaf = collection.remove(index);
            let group = ForkGroup {
                split_start: parent.id(),
                children: std::iter::once(leaf).chain(leaves).collect(),
            };
            collection.insert(index, TreeNode::Group(group));
        }
        true
    }

    /// Remove a finished unit and collapse the groups above it.
    ///
    /// Returns false if the unit was not found; a sweep then drops every
    /// finished leaf left anywhere in the forest.
    pub fn remove_from_owner(&self, unit: UnitId) -> bool {
        let mut roots = self.roots.write();
        let Some(path) = locate(&roots, unit) else {
            debug!(unit = %unit, "finished unit not in tree, sweeping");
            sweep(&mut roots);
            return false;
        };
        let Some((&index, owner)) = path.split_last() else {
            return false;
        };
        if let Some(collection) = collection_mut(&mut roots, owner) {
            collection.remove(index);
        }

        let mut owner = owner.to_vec();
        while !owner.is_empty() {
            let Some(children) = collection_mut(&mut roots, &owner) else {
                break;
            };
            match children.len() {
                0 => {
                    let Some(index) = owner.pop() else { break };
                    if let Some(parent) = collection_mut(&mut roots, &owner) {
                        parent.remove(index);
                    }
                }
                1 => {
                    let only = children.pop();
                    if let (Some(only), Some(slot)) = (only, node_at_mut(&mut roots, &owner)) {
                        *slot = only;
                    }
                    break;
                }
                _ => break,
            }
        }
        true
    }

    /// Every unit in the forest, depth first.
    pub fn units(&self) -> Vec<UnitRef> {
        let mut out = Vec::new();
        for node in self.roots.read().iter() {
            node.collect_units(&mut out);
        }
        out
    }

    pub fn find(&self, unit: UnitId) -> Option<UnitRef> {
        self.units().into_iter().find(|u| u.id() == unit)
    }

    pub fn len(&self) -> usize {
        self.units().len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.read().is_empty()
    }

    pub fn snapshot(&self) -> Vec<TreeShape> {
        self.roots.read().iter().map(TreeNode::shape).collect()
    }
}

/* ===================== Path helpers ===================== */

/// Index path from the roots down to the leaf of `unit`.
fn locate(nodes: &[TreeNode], unit: UnitId) -> Option<Vec<usize>> {
    for (i, node) in nodes.iter().enumerate() {
        match node {
            TreeNode::Leaf(leaf) if leaf.id() == unit => return Some(vec![i]),
            TreeNode::Leaf(_) => {}
            TreeNode::Group(group) => {
                if let Some(mut rest) = locate(&group.children, unit) {
                    rest.insert(0, i);
                    return Some(rest);
                }
            }
        }
    }
    None
}

fn node_at<'a>(nodes: &'a [TreeNode], path: &[usize]) -> Option<&'a TreeNode> {
    let (first, rest) = path.split_first()?;
    let node = nodes.get(*first)?;
    if rest.is_empty() {
        return Some(node);
    }
    match node {
        TreeNode::Group(group) => node_at(&group.children, rest),
        TreeNode::Leaf(_) => None,
    }
}

fn node_at_mut<'a>(nodes: &'a mut [TreeNode], path: &[usize]) -> Option<&'a mut TreeNode> {
    let (first, rest) = path.split_first()?;
    let node = nodes.get_mut(*first)?;
    if rest.is_empty() {
        return Some(node);
    }
    match node {
        TreeNode::Group(group) => node_at_mut(&mut group.children, rest),
        TreeNode::Leaf(_) => None,
    }
}

/// The collection a node at `owner ++ [i]` lives in: the roots for an empty
/// path, otherwise the children of the group at `owner`.
fn collection_mut<'a>(
    roots: &'a mut Vec<TreeNode>,
    owner: &[usize],
) -> Option<&'a mut Vec<TreeNode>> {
    if owner.is_empty() {
        return Some(roots);
    }
    match node_at_mut(roots, owner)? {
        TreeNode::Group(group) => Some(&mut group.children),
        TreeNode::Leaf(_) => None,
    }
}

/// Drop finished leaves everywhere and restore the group invariants.
fn sweep(nodes: &mut Vec<TreeNode>) {
    let mut kept = Vec::with_capacity(nodes.len());
    for node in nodes.drain(..) {
        match node {
            TreeNode::Leaf(unit) if unit.is_finished() => {}
            TreeNode::Leaf(unit) => kept.push(TreeNode::Leaf(unit)),
            TreeNode::Group(mut group) => {
                sweep(&mut group.children);
                match group.children.len() {
                    0 => {}
                    1 => kept.extend(group.children.pop()),
                    _ => kept.push(TreeNode::Group(group)),
                }
            }
        }
    }
    *nodes = kept;
}
