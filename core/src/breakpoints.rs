//! Breakpoints and saved paths
//!
//! Two independent sets:
//! - breakable nodes: an instruction whose node is in the set pauses the unit
//! - saved paths: named fork lineages; a unit belongs to a path while its own
//!   split path is a prefix of the saved one, and an item flagged as a
//!   breakpoint pauses the child created at that fork.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

use crate::error::{DebugError, Result};
use crate::lineage::SplitPath;
use crate::types::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathId(pub Uuid);

impl PathId {
    pub fn new() -> Self {
        PathId(Uuid::new_v4())
    }
}

impl Default for PathId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathItem {
    pub node: NodeId,
    /// Pause the child that takes this relation.
    pub is_breakpoint: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedPath {
    pub id: PathId,
    pub name: String,
    pub items: Vec<PathItem>,
}

impl SavedPath {
    pub fn new(name: impl Into<String>, items: Vec<PathItem>) -> Self {
        Self {
            id: PathId::new(),
            name: name.into(),
            items,
        }
    }

    /// Save a unit's lineage, without breakpoints.
    pub fn from_split_path(name: impl Into<String>, split: &SplitPath) -> Self {
        let items = split
            .as_slice()
            .iter()
            .map(|&node| PathItem {
                node,
                is_breakpoint: false,
            })
            .collect();
        Self::new(name, items)
    }

    /// A unit belongs to this path while every fork it took matches the
    /// saved item at the same position. The saved path may be longer.
    pub fn matches(&self, split: &SplitPath) -> bool {
        let taken = split.as_slice();
        taken.len() <= self.items.len()
            && taken
                .iter()
                .zip(self.items.iter())
                .all(|(node, item)| item.node == *node)
    }

    /// True if the item for the most recent fork of `split` is a breakpoint.
    pub fn breaks_at(&self, split: &SplitPath) -> bool {
        if split.is_empty() || !self.matches(split) {
            return false;
        }
        self.items[split.len() - 1].is_breakpoint
    }
}

#[derive(Debug, Default)]
pub struct BreakpointSet {
    nodes: RwLock<HashSet<NodeId>>,
    paths: RwLock<Vec<SavedPath>>,
}

impl BreakpointSet {
    pub fn new() -> Self {
        Self::default()
    }

    /* ===================== Breakable nodes ===================== */

    /// Returns false if the node already was a breakpoint.
    pub fn add(&self, node: NodeId) -> bool {
        self.nodes.write().insert(node)
    }

    pub fn remove(&self, node: NodeId) -> bool {
        self.nodes.write().remove(&node)
    }

    /// Flip a breakpoint; returns the new state.
    pub fn toggle(&self, node: NodeId) -> bool {
        let mut nodes = self.nodes.write();
        if nodes.remove(&node) {
            false
        } else {
            nodes.insert(node);
            true
        }
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.read().contains(&node)
    }

    pub fn nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self.nodes.read().iter().copied().collect();
        nodes.sort();
        nodes
    }

    /* ===================== Saved paths ===================== */

    pub fn add_path(&self, path: SavedPath) -> PathId {
        let id = path.id;
        self.paths.write().push(path);
        id
    }

    pub fn remove_path(&self, id: PathId) -> Result<SavedPath> {
        let mut paths = self.paths.write();
        let pos = paths
            .iter()
            .position(|p| p.id == id)
            .ok_or(DebugError::UnknownPath(id))?;
        Ok(paths.remove(pos))
    }

    pub fn rename_path(&self, id: PathId, name: impl Into<String>) -> Result<()> {
        self.with_path(id, |path| {
            path.name = name.into();
            Ok(())
        })
    }

    pub fn replace_items(&self, id: PathId, items: Vec<PathItem>) -> Result<()> {
        self.with_path(id, |path| {
            path.items = items;
            Ok(())
        })
    }

    /// Flip the breakpoint flag of one item; returns the new state.
    pub fn toggle_path_breakpoint(&self, id: PathId, index: usize) -> Result<bool> {
        self.with_path(id, |path| {
            let len = path.items.len();
            let item = path
                .items
                .get_mut(index)
                .ok_or(DebugError::PathIndexOutOfRange { path: id, index, len })?;
            item.is_breakpoint = !item.is_breakpoint;
            Ok(item.is_breakpoint)
        })
    }

    pub fn path(&self, id: PathId) -> Option<SavedPath> {
        self.paths.read().iter().find(|p| p.id == id).cloned()
    }

    pub fn paths(&self) -> Vec<SavedPath> {
        self.paths.read().clone()
    }

    /// All saved paths the unit with this lineage currently belongs to.
    pub fn paths_for(&self, split: &SplitPath) -> Vec<SavedPath> {
        self.paths
            .read()
            .iter()
            .filter(|p| p.matches(split))
            .cloned()
            .collect()
    }

    /// True if a unit that just forked into `split` must auto-pause.
    pub fn should_break_after_split(&self, split: &SplitPath) -> bool {
        self.paths.read().iter().any(|p| p.breaks_at(split))
    }

    fn with_path<T>(&self, id: PathId, f: impl FnOnce(&mut SavedPath) -> Result<T>) -> Result<T> {
        let mut paths = self.paths.write();
        let path = paths
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(DebugError::UnknownPath(id))?;
        f(path)
    }
}
