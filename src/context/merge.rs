//! Absorbing saves made by other contexts.

use std::collections::BTreeSet;

use tracing::debug;

use crate::error::{ContextError, GraphResult};

use super::notify::SaveNotification;
use super::object::{FaultState, ObjectRef};
use super::ObjectContext;

impl ObjectContext {
    /// Applies another context's committed save to this context.
    ///
    /// Loaded objects take the saved values; faults are left to load fresh
    /// data later. Saved inserts become loaded objects here. Deleted objects
    /// are unregistered and dropped from every relationship. Nothing merged
    /// is marked as a local change.
    pub fn merge_changes_from_save_notification(
        &mut self,
        notification: &SaveNotification,
    ) -> GraphResult<()> {
        if notification.coordinator != self.coordinator.id() {
            return Err(ContextError::IncompatibleContext.into());
        }
        self.merging = true;
        let result = self.merge_nodes(notification);
        self.merging = false;
        result?;

        debug!(
            context = %self.id,
            inserted = notification.inserted.len(),
            updated = notification.updated.len(),
            deleted = notification.deleted.len(),
            "merged save notification"
        );
        self.process_pending_changes();
        Ok(())
    }

    fn merge_nodes(&mut self, notification: &SaveNotification) -> GraphResult<()> {
        let inserted = notification.inserted.iter().map(|n| (n, true));
        let updated = notification.updated.iter().map(|n| (n, false));

        for (node, is_insert) in inserted.chain(updated) {
            let store = self.coordinator.route(&node.id)?;
            match self.registry.get(&node.id).copied() {
                Some(key) => {
                    let object = ObjectRef {
                        context: self.id,
                        key,
                    };
                    if self.is_fault(object) {
                        continue;
                    }
                    self.fill_from_node(object, node, store.as_ref(), true)?;
                    self.pending.updated(object);
                }
                None if is_insert => {
                    let object = self.object_with_id(&node.id)?;
                    self.fill_from_node(object, node, store.as_ref(), false)?;
                    self.obj_mut(object)?.state = FaultState::Loaded;
                    self.pending.updated(object);
                }
                None => {}
            }
        }

        let mut gone = BTreeSet::new();
        for id in &notification.deleted {
            if let Some(key) = self.registry.get(id).copied() {
                let object = ObjectRef {
                    context: self.id,
                    key,
                };
                self.unregister(object);
                self.pending.deleted(object);
                gone.insert(object);
            }
        }
        self.scrub_references(&gone);
        Ok(())
    }
}
