//! Change tracking for one unit of work.

use std::collections::BTreeSet;

use super::notify::ObjectsChanged;
use super::object::ObjectRef;

/// Inserted, updated and deleted objects.
///
/// `updated` may still hold an object that was later deleted so that
/// re-inserting it restores its pending update; every public view
/// subtracts `deleted` from it.
#[derive(Debug, Clone, Default)]
pub(crate) struct ChangeSet {
    pub inserted: BTreeSet<ObjectRef>,
    pub updated: BTreeSet<ObjectRef>,
    pub deleted: BTreeSet<ObjectRef>,
}

impl ChangeSet {
    pub fn has_changes(&self) -> bool {
        !self.inserted.is_empty()
            || !self.deleted.is_empty()
            || self.updated.iter().any(|r| !self.deleted.contains(r))
    }

    pub fn effective_updated(&self) -> impl Iterator<Item = ObjectRef> + '_ {
        self.updated
            .iter()
            .copied()
            .filter(|r| !self.deleted.contains(r))
    }

    /// Forgets an object entirely.
    pub fn forget(&mut self, object: ObjectRef) {
        self.inserted.remove(&object);
        self.updated.remove(&object);
        self.deleted.remove(&object);
    }

    pub fn clear(&mut self) {
        self.inserted.clear();
        self.updated.clear();
        self.deleted.clear();
    }
}

/// Changes recorded since the last `process_pending_changes`.
#[derive(Debug, Clone, Default)]
pub(crate) struct PendingChanges {
    changed: ObjectsChanged,
}

impl PendingChanges {
    pub fn inserted(&mut self, object: ObjectRef) {
        self.changed.deleted.remove(&object);
        self.changed.inserted.insert(object);
    }

    pub fn updated(&mut self, object: ObjectRef) {
        if !self.changed.inserted.contains(&object) {
            self.changed.updated.insert(object);
        }
    }

    pub fn deleted(&mut self, object: ObjectRef) {
        self.changed.updated.remove(&object);
        if !self.changed.inserted.remove(&object) {
            self.changed.deleted.insert(object);
        }
    }

    /// Drops a pending deletion that was undone before being processed.
    pub fn cancel_delete(&mut self, object: ObjectRef) {
        self.changed.deleted.remove(&object);
    }

    /// Takes everything recorded so far.
    pub fn take(&mut self) -> ObjectsChanged {
        std::mem::take(&mut self.changed)
    }

    pub fn clear(&mut self) {
        self.changed = ObjectsChanged::default();
    }
}
