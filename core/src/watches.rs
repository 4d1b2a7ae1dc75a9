//! Watch registry
//!
//! Observers declare interest in a variable or in one of the five special
//! roles. Role watches live in fixed per-role registrations, variable watches
//! are grouped per variable. A [`WatchRegistration`] also remembers the nodes
//! attached because of its target, so withdrawing a watch or re-binding the
//! target releases exactly those nodes.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::hazard::AttachToken;
use crate::types::{NodeId, SpecialRole, UnitId, VariableId};
use crate::unit::ExecutionUnit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WatchId(pub Uuid);

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "target", rename_all = "snake_case")]
pub enum WatchTarget {
    Variable(VariableId),
    Role(SpecialRole),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Watch {
    pub id: WatchId,
    pub name: String,
    pub target: WatchTarget,
}

pub type WatchRef = Arc<Watch>;

impl Watch {
    pub fn new(name: impl Into<String>, target: WatchTarget) -> WatchRef {
        Arc::new(Watch {
            id: WatchId(Uuid::new_v4()),
            name: name.into(),
            target,
        })
    }

    pub fn variable(name: impl Into<String>, var: VariableId) -> WatchRef {
        Self::new(name, WatchTarget::Variable(var))
    }

    pub fn role(role: SpecialRole) -> WatchRef {
        Self::new(role.to_string(), WatchTarget::Role(role))
    }
}

/// Current value(s) of one watch for one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchValue {
    pub watch: WatchId,
    pub name: String,
    pub values: Vec<NodeId>,
}

/// A node attached because of one watch target, and the attachment it got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedAttachment {
    pub node: NodeId,
    pub owner: UnitId,
    pub token: AttachToken,
}

#[derive(Debug, Default)]
pub struct WatchRegistration {
    watches: Vec<WatchRef>,
    attached: Vec<RecordedAttachment>,
}

impl WatchRegistration {
    pub fn watches(&self) -> &[WatchRef] {
        &self.watches
    }

    pub fn attached(&self) -> &[RecordedAttachment] {
        &self.attached
    }
}

#[derive(Debug, Default)]
pub struct WatchRegistry {
    roles: RwLock<[WatchRegistration; 5]>,
    variables: RwLock<HashMap<VariableId, WatchRegistration>>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if this watch was already monitored.
    pub fn monitor(&self, watch: WatchRef) -> bool {
        self.with_registration(watch.target, true, |registration| {
            if registration.watches.iter().any(|w| w.id == watch.id) {
                return false;
            }
            registration.watches.push(watch.clone());
            true
        })
        .unwrap_or(false)
    }

    /// Remove a watch and return the attachments recorded for its target, so
    /// the caller can withdraw the watch from each of them. A variable
    /// registration is dropped with its last watch, a role list forgets its
    /// attachments. Unknown watches are a no-op.
    pub fn remove(&self, watch: &Watch) -> Vec<RecordedAttachment> {
        let released = self.with_registration(watch.target, false, |registration| {
            let before = registration.watches.len();
            registration.watches.retain(|w| w.id != watch.id);
            if registration.watches.len() == before {
                return None;
            }
            if registration.watches.is_empty() {
                return Some(std::mem::take(&mut registration.attached));
            }
            Some(registration.attached.clone())
        });
        let Some(Some(released)) = released else {
            return Vec::new();
        };
        if let WatchTarget::Variable(var) = watch.target {
            let mut variables = self.variables.write();
            if variables.get(&var).is_some_and(|r| r.watches.is_empty()) {
                variables.remove(&var);
            }
        }
        released
    }

    pub fn find(&self, id: WatchId) -> Option<WatchRef> {
        self.all().into_iter().find(|w| w.id == id)
    }

    pub fn watches_for_variable(&self, var: VariableId) -> Vec<WatchRef> {
        self.watches_for(WatchTarget::Variable(var))
    }

    pub fn watches_for_role(&self, role: SpecialRole) -> Vec<WatchRef> {
        self.watches_for(WatchTarget::Role(role))
    }

    pub fn watches_for(&self, target: WatchTarget) -> Vec<WatchRef> {
        match target {
            WatchTarget::Role(role) => self.roles.read()[role.index()].watches.clone(),
            WatchTarget::Variable(var) => self
                .variables
                .read()
                .get(&var)
                .map(|registration| registration.watches.clone())
                .unwrap_or_default(),
        }
    }

    /// Remember that `node` was attached to `owner` because of `target`.
    /// A node is listed once; a newer attachment replaces the old entry.
    pub fn record_attachment(
        &self,
        target: WatchTarget,
        node: NodeId,
        owner: UnitId,
        token: AttachToken,
    ) {
        let entry = RecordedAttachment { node, owner, token };
        self.with_registration(target, false, |registration| {
            match registration.attached.iter_mut().find(|a| a.node == node) {
                Some(existing) => *existing = entry,
                None => registration.attached.push(entry),
            }
        });
    }

    /// `owner` re-bound `target` to `values`: drop and return its recorded
    /// attachments for nodes it no longer holds.
    pub fn take_replaced(
        &self,
        target: WatchTarget,
        owner: UnitId,
        values: &[NodeId],
    ) -> Vec<RecordedAttachment> {
        self.with_registration(target, false, |registration| {
            let (replaced, kept): (Vec<_>, Vec<_>) = registration
                .attached
                .drain(..)
                .partition(|a| a.owner == owner && !values.contains(&a.node));
            registration.attached = kept;
            replaced
        })
        .unwrap_or_default()
    }

    /// Forget every attachment recorded for a finished unit.
    pub fn forget_unit(&self, owner: UnitId) {
        for registration in self.roles.write().iter_mut() {
            registration.attached.retain(|a| a.owner != owner);
        }
        for registration in self.variables.write().values_mut() {
            registration.attached.retain(|a| a.owner != owner);
        }
    }

    /// Forget every recorded attachment (the graph store was reset).
    pub fn clear_attachments(&self) {
        for registration in self.roles.write().iter_mut() {
            registration.attached.clear();
        }
        for registration in self.variables.write().values_mut() {
            registration.attached.clear();
        }
    }

    /// Every monitored watch: role watches first, then variables.
    pub fn all(&self) -> Vec<WatchRef> {
        let mut all: Vec<WatchRef> = self
            .roles
            .read()
            .iter()
            .flat_map(|registration| registration.watches.iter().cloned())
            .collect();
        all.extend(
            self.variables
                .read()
                .values()
                .flat_map(|registration| registration.watches.iter().cloned()),
        );
        all
    }

    pub fn is_empty(&self) -> bool {
        self.roles
            .read()
            .iter()
            .all(|registration| registration.watches.is_empty())
            && self.variables.read().is_empty()
    }

    /// Current value(s) of `watch` in `unit`. Read-only.
    pub fn resolve_values_for(&self, unit: &dyn ExecutionUnit, watch: &Watch) -> Vec<NodeId> {
        match watch.target {
            WatchTarget::Variable(var) => unit.variable_values(var),
            WatchTarget::Role(role) => unit.role_node(role).into_iter().collect(),
        }
    }

    /// Values of every monitored watch for `unit`.
    pub fn snapshot(&self, unit: &dyn ExecutionUnit) -> Vec<WatchValue> {
        self.all()
            .into_iter()
            .map(|watch| WatchValue {
                watch: watch.id,
                name: watch.name.clone(),
                values: self.resolve_values_for(unit, &watch),
            })
            .collect()
    }

    /// Run `f` on the registration of `target`. Variable registrations are
    /// created on demand only when `create` is set.
    fn with_registration<R>(
        &self,
        target: WatchTarget,
        create: bool,
        f: impl FnOnce(&mut WatchRegistration) -> R,
    ) -> Option<R> {
        match target {
            WatchTarget::Role(role) => Some(f(&mut self.roles.write()[role.index()])),
            WatchTarget::Variable(var) => {
                let mut variables = self.variables.write();
                if create {
                    return Some(f(variables.entry(var).or_default()));
                }
                variables.get_mut(&var).map(f)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::FakeUnit;

    const X: VariableId = VariableId(1);

    #[test]
    fn test_role_watches_use_fixed_lists() {
        let registry = WatchRegistry::new();
        let to = Watch::role(SpecialRole::CurrentTo);
        assert!(registry.monitor(to.clone()));
        assert!(!registry.monitor(to.clone()));

        assert_eq!(registry.watches_for_role(SpecialRole::CurrentTo).len(), 1);
        assert!(registry.watches_for_role(SpecialRole::CurrentFrom).is_empty());

        assert!(registry.remove(&to).is_empty());
        assert!(registry.is_empty());
    }

    fn recorded(node: u64, owner: u64, token: u64) -> RecordedAttachment {
        RecordedAttachment {
            node: NodeId(node),
            owner: UnitId(owner),
            token: AttachToken(token),
        }
    }

    #[test]
    fn test_every_removal_returns_recorded_nodes() {
        let registry = WatchRegistry::new();
        let first = Watch::variable("x", X);
        let second = Watch::variable("x again", X);
        registry.monitor(first.clone());
        registry.monitor(second.clone());

        let x = WatchTarget::Variable(X);
        registry.record_attachment(x, NodeId(42), UnitId(1), AttachToken(1));
        registry.record_attachment(x, NodeId(43), UnitId(1), AttachToken(2));
        registry.record_attachment(x, NodeId(42), UnitId(1), AttachToken(3));

        // The remaining watch still covers both nodes.
        assert_eq!(registry.remove(&first), vec![recorded(42, 1, 3), recorded(43, 1, 2)]);
        assert_eq!(registry.watches_for_variable(X).len(), 1);

        assert_eq!(registry.remove(&second), vec![recorded(42, 1, 3), recorded(43, 1, 2)]);
        assert!(registry.watches_for_variable(X).is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_role_removal_returns_recorded_nodes() {
        let registry = WatchRegistry::new();
        let to = Watch::role(SpecialRole::CurrentTo);
        registry.monitor(to.clone());
        registry.record_attachment(WatchTarget::Role(SpecialRole::CurrentTo), NodeId(50), UnitId(1), AttachToken(4));

        assert_eq!(registry.remove(&to), vec![recorded(50, 1, 4)]);
        assert!(registry.remove(&to).is_empty());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = WatchRegistry::new();
        let watch = Watch::variable("x", X);
        registry.monitor(watch.clone());
        registry.record_attachment(WatchTarget::Variable(X), NodeId(7), UnitId(1), AttachToken(1));

        assert_eq!(registry.remove(&watch).len(), 1);
        assert!(registry.remove(&watch).is_empty());
    }

    #[test]
    fn test_record_without_registration_is_ignored() {
        let registry = WatchRegistry::new();
        registry.record_attachment(WatchTarget::Variable(X), NodeId(1), UnitId(1), AttachToken(1));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_take_replaced_only_touches_the_rebinding_unit() {
        let registry = WatchRegistry::new();
        registry.monitor(Watch::variable("x", X));
        let x = WatchTarget::Variable(X);
        registry.record_attachment(x, NodeId(42), UnitId(1), AttachToken(1));
        registry.record_attachment(x, NodeId(43), UnitId(1), AttachToken(2));
        registry.record_attachment(x, NodeId(44), UnitId(2), AttachToken(3));

        let replaced = registry.take_replaced(x, UnitId(1), &[NodeId(43)]);
        assert_eq!(replaced, vec![recorded(42, 1, 1)]);

        registry.forget_unit(UnitId(2));
        let remaining = registry.take_replaced(x, UnitId(1), &[]);
        assert_eq!(remaining, vec![recorded(43, 1, 2)]);
    }

    #[test]
    fn test_resolve_is_stable_and_ordered() {
        let registry = WatchRegistry::new();
        let unit = FakeUnit::new(1);
        unit.set_variable(X, &[5, 3, 9]);
        unit.set_role(SpecialRole::CurrentMeaning, Some(11));

        let var_watch = Watch::variable("x", X);
        let role_watch = Watch::role(SpecialRole::CurrentMeaning);
        registry.monitor(var_watch.clone());
        registry.monitor(role_watch.clone());

        let first = registry.resolve_values_for(unit.as_ref(), &var_watch);
        let second = registry.resolve_values_for(unit.as_ref(), &var_watch);
        assert_eq!(first, vec![NodeId(5), NodeId(3), NodeId(9)]);
        assert_eq!(first, second);

        assert_eq!(
            registry.resolve_values_for(unit.as_ref(), &role_watch),
            vec![NodeId(11)]
        );

        let snapshot = registry.snapshot(unit.as_ref());
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].name, "CurrentMeaning");
    }
}
