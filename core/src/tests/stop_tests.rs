//! Forced stop of the whole forest.

use std::time::Duration;
use tokio_test::assert_ok;

use super::helpers::{fixture, TIMEOUT};
use crate::events::DebugEvent;
use crate::sim::Op;
use crate::test_helpers::wait_until_async;
use crate::types::{DebugMode, PauseReason, VariableId};
use crate::unit::ProcessorPool;
use crate::watches::Watch;

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_releases_paused_and_running_units() {
    let mut fx = fixture(DebugMode::Normal);
    let x = VariableId(1);
    let shared = fx.net.add_node("shared");
    let likes = fx.net.add_node("likes");
    let next = fx.net.add_node("next");

    // Keeps running and owns `shared`.
    let spin = fx.net.add_node("spin");
    fx.net.add_statement(spin, Op::Assign { var: x, values: vec![shared] });
    fx.net.add_statement(spin, Op::Wait(Duration::from_millis(2)));
    fx.net.add_link(spin, next, spin);
    fx.debugger.add_watch(Watch::variable("x", x));

    let running = fx.engine.start(spin);
    let owner = running.id();
    let debugger = fx.debugger.clone();
    assert!(
        wait_until_async(TIMEOUT, move || {
            debugger.attached().owner_of(shared) == Some(owner)
        })
        .await
    );

    // Both would mutate `shared` if they were allowed to go on.
    let mut paused = Vec::new();
    for name in ["first", "second"] {
        let node = fx.net.add_node(name);
        let stmt = fx.net.add_statement(node, Op::Link { from: shared, meaning: likes, to: node });
        fx.debugger.add_breakpoint(stmt);
        paused.push(fx.engine.start(node));
    }
    for unit in &paused {
        assert!(fx.wait_paused(unit.id(), PauseReason::Breakpoint).await);
    }
    assert_eq!(fx.engine.active_count(), 3);

    assert_ok!(fx.debugger.stop_and_unblock(fx.engine.as_ref()).await);

    assert_eq!(fx.engine.active_count(), 0);
    assert!(running.is_finished());
    assert!(paused.iter().all(|u| u.is_finished()));
    assert!(fx.debugger.tree().is_empty());
    assert!(fx.debugger.attached().is_empty());

    let events = fx.drain();
    assert!(!events.iter().any(|e| matches!(e, DebugEvent::Hazard(_))));
    assert!(!events.iter().any(|e| matches!(e, DebugEvent::StopFailed { .. })));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_reaches_units_forked_while_stopping() {
    let fx = fixture(DebugMode::Normal);
    let hub = fx.net.add_node("hub");
    let via = fx.net.add_node("via");
    fx.net.add_statement(hub, Op::Wait(Duration::from_millis(5)));
    // Every pass through the hub forks a second walker.
    fx.net.add_link(hub, via, hub);
    fx.net.add_link(hub, via, hub);

    fx.engine.start(hub);
    let debugger = fx.debugger.clone();
    assert!(wait_until_async(TIMEOUT, move || debugger.tree().len() >= 4).await);

    assert_ok!(fx.debugger.stop_and_unblock(fx.engine.as_ref()).await);
    assert_eq!(fx.engine.active_count(), 0);
    assert!(fx.debugger.tree().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_kill_stops_only_one_unit() {
    let fx = fixture(DebugMode::Normal);
    let next = fx.net.add_node("next");
    let spin = fx.net.add_node("spin");
    fx.net.add_statement(spin, Op::Wait(Duration::from_millis(2)));
    fx.net.add_link(spin, next, spin);

    let doomed = fx.engine.start(spin);
    let survivor = fx.engine.start(spin);

    assert_ok!(fx.debugger.kill(doomed.id()));
    let engine = fx.engine.clone();
    assert!(wait_until_async(TIMEOUT, move || engine.active_count() == 1).await);
    assert!(doomed.is_finished());
    assert!(!survivor.is_finished());

    assert_ok!(fx.debugger.stop_and_unblock(fx.engine.as_ref()).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_does_not_wait_for_unit_in_host_call() {
    let fx = fixture(DebugMode::Normal);
    let start = fx.net.add_node("start");
    fx.net.add_statement(start, Op::HostCall(Duration::from_millis(300)));
    fx.net.add_statement(start, Op::Nop);

    let unit = fx.engine.start(start);
    let debugger = fx.debugger.clone();
    assert!(wait_until_async(TIMEOUT, move || debugger.unkillable_count() == 1).await);

    assert_ok!(fx.debugger.stop_and_unblock(fx.engine.as_ref()).await);
    // Still inside the host call; it unwinds once the call returns.
    assert_eq!(fx.engine.active_count(), 1);
    assert!(fx.engine.wait_idle(TIMEOUT).await);
    assert!(unit.is_finished());
}
