//! Split lineage
//!
//! Every unit carries the ordered list of relation ids it took at each fork.
//! A child gets its own copy of the parent's path plus one id; nothing is
//! shared afterwards, so later changes to either side never leak.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::NodeId;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SplitPath(Vec<NodeId>);

impl SplitPath {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// The path of a child that took `relation` at this fork.
    pub fn fork(&self, relation: NodeId) -> SplitPath {
        let mut items = Vec::with_capacity(self.0.len() + 1);
        items.extend_from_slice(&self.0);
        items.push(relation);
        SplitPath(items)
    }

    /// Record a fork taken by the unit that owns this path.
    pub fn push(&mut self, relation: NodeId) {
        self.0.push(relation);
    }

    pub fn as_slice(&self) -> &[NodeId] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of leading forks two units have in common.
    pub fn common_prefix_len(&self, other: &SplitPath) -> usize {
        self.0
            .iter()
            .zip(other.0.iter())
            .take_while(|(a, b)| a == b)
            .count()
    }
}

impl From<Vec<NodeId>> for SplitPath {
    fn from(items: Vec<NodeId>) -> Self {
        SplitPath(items)
    }
}

impl fmt::Display for SplitPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" > ")?;
            }
            write!(f, "{}", id)?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(ids: &[u64]) -> SplitPath {
        ids.iter().copied().map(NodeId).collect::<Vec<_>>().into()
    }

    #[test]
    fn test_fork_appends_exactly_one_id() {
        let parent = path(&[1, 2]);
        let child = parent.fork(NodeId(9));
        assert_eq!(child, path(&[1, 2, 9]));
        assert_eq!(parent, path(&[1, 2]));
    }

    #[test]
    fn test_children_do_not_share_storage() {
        let mut parent = path(&[4]);
        let mut first = parent.fork(NodeId(7));
        let second = parent.fork(NodeId(9));

        first.push(NodeId(100));
        parent.push(NodeId(200));

        assert_eq!(second, path(&[4, 9]));
        assert_eq!(first, path(&[4, 7, 100]));
        assert_eq!(parent, path(&[4, 200]));
    }

    #[test]
    fn test_common_prefix() {
        let a = path(&[1, 2, 3]);
        let b = path(&[1, 2, 5, 6]);
        assert_eq!(a.common_prefix_len(&b), 2);
        assert_eq!(b.common_prefix_len(&a), 2);
        assert_eq!(SplitPath::new().common_prefix_len(&a), 0);
    }

    #[test]
    fn test_display() {
        assert_eq!(path(&[3, 5]).to_string(), "[#3 > #5]");
        assert_eq!(SplitPath::new().to_string(), "[]");
    }
}
