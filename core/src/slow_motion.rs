//! Shared slow-motion ticker
//!
//! One background task for the whole forest: every interval it releases
//! each paused slow-motion unit that has no manual pause latched.

use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::tree::ExecutionTree;

/// Release every eligible unit once. Returns how many were released.
pub fn tick(tree: &ExecutionTree) -> usize {
    tree.units()
        .iter()
        .filter(|unit| unit.control().release_for_tick())
        .count()
}

/// Runs until dropped or stopped.
#[derive(Debug)]
pub struct SlowMotionTicker {
    task: JoinHandle<()>,
}

impl SlowMotionTicker {
    /// Spawn the ticker on `runtime`.
    pub fn start(runtime: &Handle, tree: Arc<ExecutionTree>, interval: Duration) -> Self {
        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let released = tick(&tree);
                if released > 0 {
                    debug!(released, "slow-motion tick");
                }
            }
        });
        Self { task }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for SlowMotionTicker {
    fn drop(&mut self) {
        self.task.abort();
    }
}
