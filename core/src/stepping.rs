//! Breakpoint & step controller
//!
//! Gates the forward progress of one execution unit at instruction
//! boundaries. The unit's worker thread is the only caller of
//! [`StepController::on_instruction_boundary`] and
//! [`StepController::after_instruction`]; every other method may be called
//! from any thread (observers, the hazard detector, the slow-motion ticker).
//!
//! ## Pause triggers
//!
//! 1. the instruction's node is a registered breakpoint
//! 2. a pause is pending (manual request, hazard, exception, saved-path
//!    breakpoint, or the boundary after a single step)
//! 3. slow motion: every boundary, released by the shared ticker
//!
//! With `DebugMode::Off` every entry point returns before touching a lock.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

use crate::breakpoints::BreakpointSet;
use crate::events::{DebugEvent, EventBus};
use crate::frames::FrameStack;
use crate::types::{DebugMode, NodeId, PauseReason, UnitId, UnitState};

/* ===================== Gate ===================== */

/// Manual-reset wait primitive.
///
/// `signal` opens the gate and wakes every waiter, `reset` closes it again
/// for the next pause, `wait` blocks the caller until the gate is open.
#[derive(Debug, Default)]
pub struct Gate {
    open: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        let mut open = self.open.lock();
        *open = true;
        self.cv.notify_all();
    }

    pub fn reset(&self) {
        *self.open.lock() = false;
    }

    pub fn wait(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.cv.wait(&mut open);
        }
    }

    pub fn is_open(&self) -> bool {
        *self.open.lock()
    }
}

/* ===================== Controller ===================== */

#[derive(Debug)]
pub struct StepController {
    unit: UnitId,
    mode: DebugMode,
    events: EventBus,
    state: Mutex<UnitState>,
    gate: Gate,
    pending: Mutex<Option<PauseReason>>,
    /// Held until an explicit continue; the slow-motion ticker skips it.
    manual: AtomicBool,
    /// Set by `step`, turned into a pending pause once the instruction ran.
    single_step: AtomicBool,
    stopping: AtomicBool,
}

impl StepController {
    pub fn new(unit: UnitId, mode: DebugMode, events: EventBus) -> Self {
        Self {
            unit,
            mode,
            events,
            state: Mutex::new(UnitState::Running),
            gate: Gate::new(),
            pending: Mutex::new(None),
            manual: AtomicBool::new(false),
            single_step: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
        }
    }

    pub fn mode(&self) -> DebugMode {
        self.mode
    }

    pub fn state(&self) -> UnitState {
        if self.mode.is_off() {
            return UnitState::Running;
        }
        *self.state.lock()
    }

    pub fn is_paused(&self) -> bool {
        self.state() == UnitState::Paused
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    pub fn has_manual_pause(&self) -> bool {
        self.manual.load(Ordering::Acquire)
    }

    pub fn pending_pause(&self) -> Option<PauseReason> {
        if self.mode.is_off() {
            return None;
        }
        *self.pending.lock()
    }

    /// Called by the unit's worker right before `instruction` (at `index`
    /// in the current frame) executes. Blocks while the unit is paused.
    pub fn on_instruction_boundary(
        &self,
        frames: &FrameStack,
        breakpoints: &BreakpointSet,
        instruction: NodeId,
        index: usize,
    ) {
        if self.mode.is_off() {
            return;
        }

        frames.set_position(index);

        // Re-arm before reading any pause state: a continue or stop that
        // lands from here on leaves the gate open.
        self.gate.reset();

        // A unit being force-stopped must never wait on an operator.
        if self.is_stopping() {
            return;
        }

        let pending = self.pending.lock().take();
        let reason = if breakpoints.contains(instruction) {
            self.manual.store(true, Ordering::Release);
            Some(PauseReason::Breakpoint)
        } else if pending.is_some() {
            pending
        } else if self.mode == DebugMode::SlowMotion {
            Some(PauseReason::SlowMotion)
        } else {
            None
        };

        if let Some(reason) = reason {
            self.wait_at_boundary(reason);
        }
    }

    /// Called by the unit's worker once the instruction has executed.
    ///
    /// The single-step flag survives until here so that a fork inside the
    /// stepped instruction hands it to every child.
    pub fn after_instruction(&self) {
        if self.mode.is_off() {
            return;
        }
        if self.single_step.swap(false, Ordering::AcqRel) {
            self.pending.lock().get_or_insert(PauseReason::Step);
        }
    }

    /// Latch a pause for the next boundary.
    pub fn request_pause(&self, reason: PauseReason) {
        if self.mode.is_off() || self.is_stopping() {
            return;
        }
        if reason.is_latching() {
            self.manual.store(true, Ordering::Release);
        }
        let mut pending = self.pending.lock();
        match *pending {
            Some(existing) if existing.is_latching() => {}
            _ => *pending = Some(reason),
        }
    }

    /// Clear every latch and let the unit run freely.
    pub fn resume(&self) {
        if self.mode.is_off() {
            return;
        }
        self.manual.store(false, Ordering::Release);
        self.single_step.store(false, Ordering::Release);
        self.pending.lock().take();
        self.gate.signal();
    }

    /// Run exactly one instruction, then pause again.
    pub fn step(&self) {
        if self.mode.is_off() {
            return;
        }
        self.single_step.store(true, Ordering::Release);
        self.gate.signal();
    }

    /// Slow-motion tick: release the unit unless a manual pause is latched.
    pub fn release_for_tick(&self) -> bool {
        if self.mode != DebugMode::SlowMotion || self.has_manual_pause() || !self.is_paused() {
            return false;
        }
        self.gate.signal();
        true
    }

    /// Suppress further pauses and drive a waiting unit past its gate.
    pub fn begin_stop(&self) {
        self.stopping.store(true, Ordering::Release);
        if self.mode.is_off() {
            return;
        }
        self.manual.store(false, Ordering::Release);
        self.pending.lock().take();
        self.gate.signal();
    }

    /// A child created by a fork stops at its first boundary if the parent
    /// was stepping or had a pause pending.
    pub fn inherit_pending(&self, parent: &StepController) {
        if self.mode.is_off() {
            return;
        }
        let stepping = parent.single_step.load(Ordering::Acquire);
        if stepping || parent.pending_pause().is_some() {
            self.pending.lock().get_or_insert(PauseReason::Step);
        }
    }

    pub fn mark_finished(&self) {
        if self.mode.is_off() {
            return;
        }
        *self.state.lock() = UnitState::Finished;
    }

    fn wait_at_boundary(&self, reason: PauseReason) {
        *self.state.lock() = UnitState::Paused;
        debug!(unit = %self.unit, ?reason, "unit paused");
        self.events.publish(DebugEvent::Paused {
            unit: self.unit,
            reason,
        });

        self.gate.wait();

        *self.state.lock() = UnitState::Running;
        debug!(unit = %self.unit, "unit continued");
        self.events.publish(DebugEvent::Continued { unit: self.unit });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    struct Harness {
        control: Arc<StepController>,
        frames: Arc<FrameStack>,
        breakpoints: Arc<BreakpointSet>,
    }

    impl Harness {
        fn new(mode: DebugMode) -> Self {
            let frames = Arc::new(FrameStack::new());
            frames.push(NodeId(100), 10);
            Self {
                control: Arc::new(StepController::new(UnitId(1), mode, EventBus::new(16))),
                frames,
                breakpoints: Arc::new(BreakpointSet::new()),
            }
        }

        /// Run `count` instructions (node ids 1..=count) on a worker thread.
        fn run(&self, count: u64) -> thread::JoinHandle<()> {
            let control = self.control.clone();
            let frames = self.frames.clone();
            let breakpoints = self.breakpoints.clone();
            thread::spawn(move || {
                for i in 0..count {
                    control.on_instruction_boundary(&frames, &breakpoints, NodeId(i + 1), i as usize);
                    control.after_instruction();
                }
            })
        }
    }

    #[test]
    fn test_gate_signal_before_wait_does_not_block() {
        let gate = Gate::new();
        gate.signal();
        gate.wait();
        assert!(gate.is_open());
        gate.reset();
        assert!(!gate.is_open());
    }

    #[test]
    fn test_off_mode_never_pauses() {
        let h = Harness::new(DebugMode::Off);
        h.breakpoints.add(NodeId(1));
        h.control.request_pause(PauseReason::Requested);
        h.run(3).join().unwrap();
        assert_eq!(h.control.state(), UnitState::Running);
        // Off mode does not even record the position.
        assert_eq!(h.frames.top().unwrap().current, None);
    }

    #[test]
    fn test_breakpoint_pauses_until_resumed() {
        let h = Harness::new(DebugMode::Normal);
        let mut events = h.control.events.subscribe();
        h.breakpoints.add(NodeId(2));

        let worker = h.run(3);
        assert!(wait_until(Duration::from_secs(2), || h.control.is_paused()));
        assert_eq!(h.frames.top().unwrap().current, Some(1));
        assert!(matches!(
            events.blocking_recv(),
            Ok(DebugEvent::Paused { reason: PauseReason::Breakpoint, .. })
        ));

        h.control.resume();
        worker.join().unwrap();
        assert_eq!(h.control.state(), UnitState::Running);
    }

    #[test]
    fn test_single_step_pauses_at_next_boundary() {
        let h = Harness::new(DebugMode::Normal);
        h.control.request_pause(PauseReason::Requested);

        let worker = h.run(3);
        assert!(wait_until(Duration::from_secs(2), || h.control.is_paused()));
        assert_eq!(h.frames.top().unwrap().current, Some(0));

        h.control.step();
        assert!(wait_until(Duration::from_secs(2), || {
            h.control.is_paused() && h.frames.top().unwrap().current == Some(1)
        }));

        h.control.resume();
        worker.join().unwrap();
    }

    #[test]
    fn test_slow_motion_tick_skips_manual_pause() {
        let h = Harness::new(DebugMode::SlowMotion);
        let worker = h.run(2);

        assert!(wait_until(Duration::from_secs(2), || h.control.is_paused()));
        assert!(h.control.release_for_tick());
        assert!(wait_until(Duration::from_secs(2), || {
            h.control.is_paused() && h.frames.top().unwrap().current == Some(1)
        }));

        h.control.request_pause(PauseReason::Requested);
        assert!(!h.control.release_for_tick());

        h.control.resume();
        worker.join().unwrap();
    }

    #[test]
    fn test_begin_stop_releases_and_suppresses() {
        let h = Harness::new(DebugMode::Normal);
        h.breakpoints.add(NodeId(1));
        h.breakpoints.add(NodeId(2));

        let worker = h.run(2);
        assert!(wait_until(Duration::from_secs(2), || h.control.is_paused()));

        h.control.begin_stop();
        worker.join().unwrap();
        assert!(h.control.is_stopping());
    }

    #[test]
    fn test_stop_racing_a_boundary_never_strands_the_worker() {
        for round in 0..200u64 {
            let h = Harness::new(DebugMode::SlowMotion);
            let control = h.control.clone();
            let frames = h.frames.clone();
            let breakpoints = h.breakpoints.clone();
            let worker = thread::spawn(move || {
                let mut index = 0;
                while !control.is_stopping() {
                    control.on_instruction_boundary(&frames, &breakpoints, NodeId(1), index % 10);
                    control.after_instruction();
                    index += 1;
                }
            });

            thread::sleep(Duration::from_micros(round % 50));
            h.control.begin_stop();
            assert!(wait_until(Duration::from_secs(2), || worker.is_finished()));
            worker.join().unwrap();
        }
    }

    #[test]
    fn test_resume_racing_a_pending_pause_is_not_lost() {
        for round in 0..200u64 {
            let h = Harness::new(DebugMode::Normal);
            h.control.request_pause(PauseReason::Requested);
            let worker = h.run(1);

            thread::sleep(Duration::from_micros(round % 50));
            h.control.resume();
            assert!(wait_until(Duration::from_secs(2), || worker.is_finished()));
            worker.join().unwrap();
        }
    }

    #[test]
    fn test_child_inherits_step() {
        let parent = StepController::new(UnitId(1), DebugMode::Normal, EventBus::new(4));
        let child = StepController::new(UnitId(2), DebugMode::Normal, EventBus::new(4));
        parent.step();
        child.inherit_pending(&parent);
        assert_eq!(child.pending_pause(), Some(PauseReason::Step));
    }

    #[test]
    fn test_latching_reason_is_not_overwritten() {
        let control = StepController::new(UnitId(1), DebugMode::Normal, EventBus::new(4));
        control.request_pause(PauseReason::Hazard);
        control.request_pause(PauseReason::Step);
        assert_eq!(control.pending_pause(), Some(PauseReason::Hazard));
        assert!(control.has_manual_pause());
    }
}
