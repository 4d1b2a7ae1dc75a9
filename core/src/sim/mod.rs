//! Reference engine
//!
//! A small forking graph interpreter used by the CLI demos and the scenario
//! tests. Each processor runs on a worker from tokio's blocking pool and
//! walks the network: it executes the code list of the current node, then
//! follows the outgoing links. With several links it splits: the processor
//! keeps the first relation and a child is forked for each other one.
//!
//! Every mutation is checked by the debugger on the mutating worker before
//! it is applied to the network.

pub mod network;
pub mod processor;

pub use network::{Link, Network, Op, Statement};
pub use processor::Processor;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::debug;

use crate::debugger::Debugger;
use crate::types::{NodeId, UnitId};
use crate::unit::{ExecutionUnit, ProcessorPool, UnitRef};

pub struct SimEngine {
    network: Arc<Network>,
    debugger: Arc<Debugger>,
    runtime: Handle,
    active: AtomicUsize,
    next_unit: AtomicU64,
}

impl SimEngine {
    pub fn new(network: Arc<Network>, debugger: Arc<Debugger>, runtime: Handle) -> Arc<Self> {
        Arc::new(Self {
            network,
            debugger,
            runtime,
            active: AtomicUsize::new(0),
            next_unit: AtomicU64::new(1),
        })
    }

    pub fn network(&self) -> &Arc<Network> {
        &self.network
    }

    pub fn debugger(&self) -> &Arc<Debugger> {
        &self.debugger
    }

    /// Activate a root processor and start it at `node`.
    pub fn start(self: &Arc<Self>, node: NodeId) -> UnitRef {
        let processor = Arc::new(Processor::new(self.next_id()));
        let handle = self.debugger.activate(processor.clone());
        self.spawn(handle.clone(), processor, node);
        handle
    }

    /// Wait until every processor has finished.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.active_count() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        true
    }

    fn next_id(&self) -> UnitId {
        UnitId(self.next_unit.fetch_add(1, Ordering::Relaxed))
    }

    fn spawn(self: &Arc<Self>, handle: UnitRef, processor: Arc<Processor>, node: NodeId) {
        self.active.fetch_add(1, Ordering::AcqRel);
        let engine = self.clone();
        self.runtime.spawn_blocking(move || {
            engine.run(&handle, &processor, node);
            engine.active.fetch_sub(1, Ordering::AcqRel);
        });
    }

    fn run(self: &Arc<Self>, handle: &UnitRef, processor: &Arc<Processor>, start: NodeId) {
        let mut node = start;
        loop {
            self.execute(handle, processor, node);
            if processor.stop_requested() {
                break;
            }

            let links = self.network.links(node);
            let Some((first, others)) = links.split_first() else {
                break;
            };
            if !others.is_empty() {
                self.split(handle, processor, first, others);
            }
            node = first.to;
        }

        processor.finish();
        self.debugger.on_unit_finished(handle);
        debug!(unit = %handle.id(), "processor done");
    }

    fn split(self: &Arc<Self>, handle: &UnitRef, processor: &Processor, first: &Link, others: &[Link]) {
        processor.set_splitting(true);
        let children: Vec<(Arc<Processor>, Link)> = others
            .iter()
            .map(|link| (Arc::new(processor.fork(self.next_id())), *link))
            .collect();

        let units = children
            .iter()
            .map(|(child, link)| (child.clone() as Arc<dyn ExecutionUnit>, link.relation))
            .collect();
        let handles = self
            .debugger
            .on_units_split(handle, Some(first.relation), units);
        processor.set_splitting(false);

        for ((child, link), child_handle) in children.into_iter().zip(handles) {
            self.spawn(child_handle, child, link.to);
        }
    }

    fn execute(&self, handle: &UnitRef, processor: &Processor, node: NodeId) {
        let code = self.network.code(node);
        processor.enter();
        self.debugger.enter_frame(handle, node, code.len());

        for (index, statement) in code.iter().enumerate() {
            if processor.stop_requested() {
                break;
            }
            self.debugger
                .on_instruction_boundary(handle, statement.id, index);
            if processor.stop_requested() {
                break;
            }
            self.apply(handle, processor, &statement.op);
            self.debugger.after_instruction(handle);
        }

        self.debugger.exit_frame(handle);
        processor.exit();
    }

    fn apply(&self, handle: &UnitRef, processor: &Processor, op: &Op) {
        match op {
            Op::Assign { var, values } => {
                processor.assign(*var, values.clone());
                self.debugger.on_variable_assigned(handle, *var, values);
            }
            Op::SetRole { role, node } => {
                processor.set_role(*role, *node);
                self.debugger.on_role_assigned(handle, *role, *node);
            }
            Op::Link { from, meaning, to } => {
                self.debugger
                    .on_link_changed(handle, *from, *to, *meaning, None, "link added");
                self.network.add_link(*from, *meaning, *to);
            }
            Op::Unlink { from, meaning, to } => {
                self.debugger
                    .on_link_changed(handle, *from, *to, *meaning, None, "link removed");
                self.network.remove_link(*from, *meaning, *to);
            }
            Op::Fail { message } => self.debugger.on_exception(handle, message),
            Op::Wait(duration) => std::thread::sleep(*duration),
            Op::HostCall(duration) => {
                processor.set_host_call(true);
                std::thread::sleep(*duration);
                processor.set_host_call(false);
            }
            Op::Nop => {}
        }
    }
}

impl ProcessorPool for SimEngine {
    fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    fn break_deadlocks(&self) {
        debug!("no engine locks to break");
    }
}
