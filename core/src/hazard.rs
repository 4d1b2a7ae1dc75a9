//! Hazard detector (attached registry)
//!
//! A node reachable through a watched variable or special role is "attached"
//! to the unit that currently holds it. Any mutation of an attached node by a
//! different unit is a hazard: both units are paused for inspection and a
//! [`HazardReport`] goes out on the event bus.
//!
//! Every mutation in the engine funnels through
//! [`AttachedRegistry::on_mutation_notification`], so the registry keeps an
//! `active` flag outside its lock. While nothing is attached, the check costs
//! one atomic load.

use chrono::{DateTime, Utc};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::events::{DebugEvent, EventBus};
use crate::types::{NodeId, PauseReason, SpecialRole, UnitId};
use crate::unit::{NodeStore, UnitRef};
use crate::watches::{WatchId, WatchRef, WatchRegistry, WatchTarget};

/// Identifies one attachment. A detach carrying an older token than the
/// current attachment of the same node is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct AttachToken(pub(crate) u64);

#[derive(Debug, Clone)]
pub struct AttachedItem {
    pub owner: UnitRef,
    pub watches: Vec<WatchRef>,
    pub token: AttachToken,
}

#[derive(Debug, Clone, Serialize)]
pub struct HazardReport {
    pub message: String,
    pub node: NodeId,
    pub node_label: Option<String>,
    pub watches: Vec<String>,
    pub owner: UnitId,
    pub owner_name: String,
    pub originator: UnitId,
    pub originator_name: String,
    pub raised_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Attachments {
    items: HashMap<NodeId, AttachedItem>,
    by_unit: HashMap<UnitId, Vec<NodeId>>,
}

impl Attachments {
    fn insert(&mut self, node: NodeId, item: AttachedItem) {
        self.by_unit.entry(item.owner.id()).or_default().push(node);
        self.items.insert(node, item);
    }

    fn remove(&mut self, node: NodeId) -> Option<AttachedItem> {
        let item = self.items.remove(&node)?;
        let owner = item.owner.id();
        if let Some(nodes) = self.by_unit.get_mut(&owner) {
            nodes.retain(|n| *n != node);
            if nodes.is_empty() {
                self.by_unit.remove(&owner);
            }
        }
        Some(item)
    }
}

pub struct AttachedRegistry {
    active: AtomicBool,
    next_token: AtomicU64,
    lock_count: AtomicU64,
    inner: RwLock<Attachments>,
    events: EventBus,
    store: Option<Arc<dyn NodeStore>>,
}

impl AttachedRegistry {
    pub fn new(events: EventBus) -> Self {
        Self {
            active: AtomicBool::new(false),
            next_token: AtomicU64::new(1),
            lock_count: AtomicU64::new(0),
            inner: RwLock::new(Attachments::default()),
            events,
            store: None,
        }
    }

    /// Use `store` to put node labels into hazard messages.
    pub fn with_store(events: EventBus, store: Arc<dyn NodeStore>) -> Self {
        Self {
            store: Some(store),
            ..Self::new(events)
        }
    }

    /* ===================== Attach / detach ===================== */

    /// Register `unit` as owner of `node`. False if another unit owns it.
    pub fn attach(&self, node: NodeId, unit: &UnitRef, watches: Vec<WatchRef>) -> bool {
        self.attach_tracked(node, unit, watches).is_some()
    }

    /// Like [`attach`](Self::attach), returning the token of the attachment
    /// (new or existing) so the caller can later detach exactly this one.
    pub fn attach_tracked(
        &self,
        node: NodeId,
        unit: &UnitRef,
        watches: Vec<WatchRef>,
    ) -> Option<AttachToken> {
        let mut inner = self.write();
        if let Some(item) = inner.items.get_mut(&node) {
            if item.owner.id() != unit.id() {
                return None;
            }
            merge_watches(&mut item.watches, watches);
            return Some(item.token);
        }

        let token = self.new_token();
        inner.insert(
            node,
            AttachedItem {
                owner: unit.clone(),
                watches,
                token,
            },
        );
        self.active.store(true, Ordering::Release);
        debug!(node = %node, unit = %unit.id(), "node attached");
        Some(token)
    }

    /// Attach even if another unit owns the node; the reassignment is logged.
    pub fn attach_or_reassign(
        &self,
        node: NodeId,
        unit: &UnitRef,
        watches: Vec<WatchRef>,
    ) -> AttachToken {
        let mut inner = self.write();
        if let Some(item) = inner.items.get_mut(&node) {
            if item.owner.id() == unit.id() {
                merge_watches(&mut item.watches, watches);
                return item.token;
            }
            warn!(
                node = %node,
                from = %item.owner.id(),
                to = %unit.id(),
                "reassigning attached node to another unit"
            );
            inner.remove(node);
        }

        let token = self.new_token();
        inner.insert(
            node,
            AttachedItem {
                owner: unit.clone(),
                watches,
                token,
            },
        );
        self.active.store(true, Ordering::Release);
        token
    }

    /// Drop the attachment of `node`, whoever owns it. Idempotent.
    pub fn detach(&self, node: NodeId) -> bool {
        if !self.is_active() {
            return false;
        }
        let mut inner = self.write();
        let removed = inner.remove(node).is_some();
        self.refresh_active(&inner);
        removed
    }

    /// Withdraw `watches` from the attachment of `node`, provided it is still
    /// the one `token` was issued for. The node is detached once no watch
    /// references it. Returns true if it was detached.
    pub fn release(&self, node: NodeId, token: AttachToken, watches: &[WatchId]) -> bool {
        if !self.is_active() {
            return false;
        }
        let mut inner = self.write();
        let Some(item) = inner.items.get_mut(&node) else {
            return false;
        };
        if item.token != token {
            return false;
        }
        item.watches.retain(|w| !watches.contains(&w.id));
        if !item.watches.is_empty() {
            return false;
        }
        inner.remove(node);
        self.refresh_active(&inner);
        debug!(node = %node, "node released");
        true
    }

    /* ===================== Engine notifications ===================== */

    /// Check a mutation of `node` made by `mutator`.
    ///
    /// Returns true if a hazard was raised. Both the owner and the mutator
    /// are paused at their next instruction boundary.
    pub fn on_mutation_notification(
        &self,
        node: NodeId,
        mutator: &UnitRef,
        description: &str,
    ) -> bool {
        if !self.is_active() {
            return false;
        }

        let (owner, watches) = {
            let mut inner = self.write();
            let Some(item) = inner.items.get(&node) else {
                return false;
            };
            if item.owner.id() == mutator.id() {
                return false;
            }
            if item.owner.is_finished() {
                error!(
                    node = %node,
                    owner = %item.owner.id(),
                    "attached node is owned by a finished unit, discarding attachment"
                );
                inner.remove(node);
                self.refresh_active(&inner);
                return false;
            }
            (item.owner.clone(), item.watches.clone())
        };

        let report = self.build_report(node, &owner, mutator, &watches, description);
        warn!(
            node = %node,
            owner = %owner.id(),
            originator = %mutator.id(),
            "{}",
            report.message
        );

        owner.control().request_pause(PauseReason::Hazard);
        mutator.control().request_pause(PauseReason::Hazard);
        self.events.publish(DebugEvent::Hazard(report));
        true
    }

    /// A link `from -> to` labelled `meaning` (optionally carrying `info`)
    /// was added or removed. Candidates are checked in that order and the
    /// first hazard ends the check.
    pub fn on_link_changed(
        &self,
        mutator: &UnitRef,
        from: NodeId,
        to: NodeId,
        meaning: NodeId,
        info: Option<NodeId>,
        description: &str,
    ) -> bool {
        if !self.is_active() {
            return false;
        }
        [Some(from), Some(to), Some(meaning), info]
            .into_iter()
            .flatten()
            .any(|node| self.on_mutation_notification(node, mutator, description))
    }

    /// Bulk-detach everything attached because of `unit`.
    pub fn on_unit_finished(&self, unit: UnitId) -> usize {
        if !self.is_active() {
            return 0;
        }
        let mut inner = self.write();
        let nodes = inner.by_unit.remove(&unit).unwrap_or_default();
        let mut removed = 0;
        for node in nodes {
            // Skip entries that were reassigned in the meantime.
            let owned = inner
                .items
                .get(&node)
                .is_some_and(|item| item.owner.id() == unit);
            if owned {
                inner.items.remove(&node);
                removed += 1;
            }
        }
        self.refresh_active(&inner);
        if removed > 0 {
            debug!(unit = %unit, removed, "detached nodes of finished unit");
        }
        removed
    }

    /// After a fork every child owns its own copy of the special roles:
    /// re-derive the role attachments for each child.
    pub fn on_unit_split(&self, children: &[UnitRef], watches: &WatchRegistry) {
        for child in children {
            for role in SpecialRole::ALL {
                let Some(node) = child.unit().role_node(role) else {
                    continue;
                };
                let role_watches = watches.watches_for_role(role);
                if role_watches.is_empty() {
                    continue;
                }
                let token = self.attach_or_reassign(node, child, role_watches);
                watches.record_attachment(WatchTarget::Role(role), node, child.id(), token);
            }
        }
    }

    /// The graph store was reset: nothing is attached any more.
    pub fn on_network_cleared(&self) {
        let mut inner = self.write();
        inner.items.clear();
        inner.by_unit.clear();
        self.active.store(false, Ordering::Release);
    }

    /* ===================== Queries ===================== */

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn owner_of(&self, node: NodeId) -> Option<UnitId> {
        if !self.is_active() {
            return None;
        }
        self.read().items.get(&node).map(|item| item.owner.id())
    }

    pub fn item(&self, node: NodeId) -> Option<AttachedItem> {
        if !self.is_active() {
            return None;
        }
        self.read().items.get(&node).cloned()
    }

    pub fn attached_by(&self, unit: UnitId) -> Vec<NodeId> {
        if !self.is_active() {
            return Vec::new();
        }
        self.read().by_unit.get(&unit).cloned().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        if !self.is_active() {
            return 0;
        }
        self.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of times the registry lock was taken.
    pub fn lock_acquisitions(&self) -> u64 {
        self.lock_count.load(Ordering::Relaxed)
    }

    /* ===================== Internals ===================== */

    fn read(&self) -> RwLockReadGuard<'_, Attachments> {
        self.lock_count.fetch_add(1, Ordering::Relaxed);
        self.inner.read()
    }

    fn write(&self) -> RwLockWriteGuard<'_, Attachments> {
        self.lock_count.fetch_add(1, Ordering::Relaxed);
        self.inner.write()
    }

    fn refresh_active(&self, inner: &Attachments) {
        self.active.store(!inner.items.is_empty(), Ordering::Release);
    }

    fn new_token(&self) -> AttachToken {
        AttachToken(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    fn build_report(
        &self,
        node: NodeId,
        owner: &UnitRef,
        originator: &UnitRef,
        watches: &[WatchRef],
        description: &str,
    ) -> HazardReport {
        let node_label = self.store.as_ref().and_then(|store| store.label(node));
        let owner_name = owner.name();
        let originator_name = originator.name();
        let shown = match &node_label {
            Some(label) => format!("'{}' ({})", label, node),
            None => node.to_string(),
        };
        let message = format!(
            "{} was changed by {} while attached to {}: {}",
            shown, originator_name, owner_name, description
        );

        HazardReport {
            message,
            node,
            node_label,
            watches: watches.iter().map(|w| w.name.clone()).collect(),
            owner: owner.id(),
            owner_name,
            originator: originator.id(),
            originator_name,
            raised_at: Utc::now(),
        }
    }
}

fn merge_watches(existing: &mut Vec<WatchRef>, added: Vec<WatchRef>) {
    for watch in added {
        if !existing.iter().any(|w| w.id == watch.id) {
            existing.push(watch);
        }
    }
}
