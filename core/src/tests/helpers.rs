//! Test helpers for scenario tests
//!
//! Builds a network, a debugger wired to it and an engine on the current
//! tokio runtime.

use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;

use crate::config::Config;
use crate::debugger::Debugger;
use crate::events::DebugEvent;
use crate::sim::{Network, SimEngine};
use crate::types::{DebugMode, PauseReason, UnitId};

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub struct Fixture {
    pub net: Arc<Network>,
    pub debugger: Arc<Debugger>,
    pub engine: Arc<SimEngine>,
    pub events: broadcast::Receiver<DebugEvent>,
    pub seen: Vec<DebugEvent>,
}

/// Must be called from inside a tokio runtime.
pub fn fixture(mode: DebugMode) -> Fixture {
    let mut config = Config::default();
    config.debug.mode = mode;
    config.debug.slow_motion_interval_ms = 10;
    config.stop.poll_interval_ms = 5;
    fixture_with(config)
}

pub fn fixture_with(config: Config) -> Fixture {
    let net = Arc::new(Network::new());
    let debugger = Arc::new(Debugger::with_store(config, net.clone()));
    let events = debugger.subscribe();
    let engine = SimEngine::new(net.clone(), debugger.clone(), Handle::current());
    Fixture {
        net,
        debugger,
        engine,
        events,
        seen: Vec::new(),
    }
}

impl Fixture {
    /// Everything published so far.
    pub fn drain(&mut self) -> Vec<DebugEvent> {
        while let Ok(event) = self.events.try_recv() {
            self.seen.push(event);
        }
        self.seen.clone()
    }

    /// First event (already seen or still to come) matching `pred`.
    pub async fn wait_for(&mut self, pred: impl Fn(&DebugEvent) -> bool) -> Option<DebugEvent> {
        if let Some(event) = self.seen.iter().find(|e| pred(e)) {
            return Some(event.clone());
        }
        let deadline = tokio::time::Instant::now() + TIMEOUT;
        loop {
            match tokio::time::timeout_at(deadline, self.events.recv()).await {
                Ok(Ok(event)) => {
                    let hit = pred(&event);
                    self.seen.push(event.clone());
                    if hit {
                        return Some(event);
                    }
                }
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                _ => return None,
            }
        }
    }

    pub async fn wait_paused(&mut self, unit: UnitId, reason: PauseReason) -> bool {
        self.wait_for(|e| {
            matches!(e, DebugEvent::Paused { unit: u, reason: r } if *u == unit && *r == reason)
        })
        .await
        .is_some()
    }

    /// Stop whatever is left so the runtime can shut down.
    pub async fn shutdown(&self) {
        self.debugger.continue_all();
        if !self.engine.wait_idle(Duration::from_millis(500)).await {
            self.debugger
                .stop_and_unblock(self.engine.as_ref())
                .await
                .expect("units did not stop");
        }
    }
}
