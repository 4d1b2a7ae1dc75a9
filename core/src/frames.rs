//! Call-frame bookkeeping
//!
//! One frame per active code list. The step controller records the index of
//! the instruction about to run so a paused unit can be rendered ("next
//! statement") and resumed at the exact position.

use parking_lot::Mutex;
use serde::Serialize;

use crate::types::NodeId;

/* ===================== Frames ===================== */

/// Execution frame - one per function call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionFrame {
    /// Node that owns the code list being executed
    pub code: NodeId,

    /// Number of instructions in the code list
    pub len: usize,

    /// Instruction currently executing (None before the first boundary)
    pub current: Option<usize>,

    /// Instruction that runs after the current one
    pub next: usize,
}

impl ExecutionFrame {
    pub fn new(code: NodeId, len: usize) -> Self {
        Self {
            code,
            len,
            current: None,
            next: 0,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.next >= self.len
    }
}

/* ===================== Frame Stack ===================== */

/// Per-unit frame stack.
///
/// Written only by the unit's own worker; observers take short read snapshots.
/// The lock is never held while the unit waits at a pause.
#[derive(Debug, Default)]
pub struct FrameStack {
    frames: Mutex<Vec<ExecutionFrame>>,
}

impl FrameStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, code: NodeId, len: usize) {
        self.frames.lock().push(ExecutionFrame::new(code, len));
    }

    pub fn pop(&self) -> Option<ExecutionFrame> {
        self.frames.lock().pop()
    }

    /// Mark `index` of the top frame as the instruction about to run.
    pub fn set_position(&self, index: usize) {
        let mut frames = self.frames.lock();
        if let Some(top) = frames.last_mut() {
            top.current = Some(index);
            top.next = index + 1;
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn top(&self) -> Option<ExecutionFrame> {
        self.frames.lock().last().cloned()
    }

    /// Code list and index of the statement that runs when the unit resumes.
    pub fn next_statement(&self) -> Option<(NodeId, usize)> {
        let frames = self.frames.lock();
        let top = frames.last()?;
        Some((top.code, top.current.unwrap_or(top.next)))
    }

    /// Copy of the whole stack, innermost frame last.
    pub fn snapshot(&self) -> Vec<ExecutionFrame> {
        self.frames.lock().clone()
    }

    /// Copy the stack of a parent at fork time.
    pub fn inherit(&self, parent: &FrameStack) {
        let copied = parent.snapshot();
        *self.frames.lock() = copied;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_tracks_top_frame() {
        let stack = FrameStack::new();
        stack.push(NodeId(10), 3);
        stack.push(NodeId(20), 2);
        stack.set_position(1);

        let top = stack.top().unwrap();
        assert_eq!(top.code, NodeId(20));
        assert_eq!(top.current, Some(1));
        assert_eq!(top.next, 2);
        assert!(top.is_exhausted());
        assert_eq!(stack.next_statement(), Some((NodeId(20), 1)));

        stack.pop();
        assert_eq!(stack.depth(), 1);
        assert_eq!(stack.next_statement(), Some((NodeId(10), 0)));
    }

    #[test]
    fn test_set_position_on_empty_stack_is_ignored() {
        let stack = FrameStack::new();
        stack.set_position(4);
        assert_eq!(stack.depth(), 0);
        assert_eq!(stack.next_statement(), None);
    }

    #[test]
    fn test_inherit_copies_frames() {
        let parent = FrameStack::new();
        parent.push(NodeId(1), 5);
        parent.set_position(2);

        let child = FrameStack::new();
        child.inherit(&parent);
        parent.pop();

        assert_eq!(parent.depth(), 0);
        assert_eq!(child.snapshot(), vec![ExecutionFrame {
            code: NodeId(1),
            len: 5,
            current: Some(2),
            next: 3,
        }]);
    }
}
