//! The local node's active role set.

use mitosis_core::{RoleType, Subject};
use std::collections::BTreeSet;
use tokio::sync::mpsc;

#[derive(Debug)]
pub struct RoleManager {
    roles: BTreeSet<RoleType>,
    changes: Subject<BTreeSet<RoleType>>,
}

impl RoleManager {
    pub fn new(initial: impl IntoIterator<Item = RoleType>) -> Self {
        Self {
            roles: initial.into_iter().collect(),
            changes: Subject::new(),
        }
    }

    pub fn roles(&self) -> &BTreeSet<RoleType> {
        &self.roles
    }

    pub fn has_role(&self, role: RoleType) -> bool {
        self.roles.contains(&role)
    }

    /// Merge roles granted by a signal. Granted roles are added, none are
    /// taken away, except that holding `Peer` ends the `Newbie` phase.
    /// Returns `true` and notifies observers if the set changed.
    pub fn merge(&mut self, granted: &[RoleType]) -> bool {
        let mut next = self.roles.clone();
        next.extend(granted.iter().copied());
        if next.contains(&RoleType::Peer) {
            next.remove(&RoleType::Newbie);
        }
        if next == self.roles {
            return false;
        }
        self.roles = next;
        self.changes.publish(self.roles.clone());
        true
    }

    /// Stream of the full role set after every change.
    pub fn observe_role_changes(&mut self) -> mpsc::UnboundedReceiver<BTreeSet<RoleType>> {
        self.changes.subscribe()
    }
}
