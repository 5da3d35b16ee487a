//! Per-context change notifications.
//!
//! Each context owns a [`NotificationCenter`]. Subscribers get a bounded
//! channel; posting never blocks the context. When a subscriber's buffer is
//! full the event is dropped for that subscriber and counted.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::error::{GraphError, GraphResult};
use crate::id::ObjectId;
use crate::storage::StoreCacheNode;

use super::object::ObjectRef;

/// Immutable record of one committed save.
///
/// Another context sharing the same coordinator can absorb it with
/// [`super::ObjectContext::merge_changes_from_save_notification`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaveNotification {
    /// Coordinator the saving context belongs to.
    pub coordinator: Uuid,
    pub inserted: Vec<StoreCacheNode>,
    pub updated: Vec<StoreCacheNode>,
    pub deleted: Vec<ObjectId>,
}

/// Objects touched since the last `process_pending_changes`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectsChanged {
    pub inserted: BTreeSet<ObjectRef>,
    pub updated: BTreeSet<ObjectRef>,
    pub deleted: BTreeSet<ObjectRef>,
}

impl ObjectsChanged {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyChange {
    pub object: ObjectRef,
    pub property: String,
}

#[derive(Debug, Clone)]
pub enum ContextEvent {
    WillSave,
    DidSave(Arc<SaveNotification>),
    ObjectsDidChange(Arc<ObjectsChanged>),
    PropertyDidChange(PropertyChange),
}

/// Which events a subscription receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    All,
    /// `WillSave` and `DidSave`.
    Saves,
    ObjectChanges,
    /// Property changes of one object, optionally of one property.
    Property {
        object: ObjectRef,
        property: Option<String>,
    },
}

impl EventFilter {
    fn accepts(&self, event: &ContextEvent) -> bool {
        match (self, event) {
            (Self::All, _)
            | (Self::Saves, ContextEvent::WillSave | ContextEvent::DidSave(_))
            | (Self::ObjectChanges, ContextEvent::ObjectsDidChange(_)) => true,
            (Self::Property { object, property }, ContextEvent::PropertyDidChange(change)) => {
                *object == change.object
                    && property.as_ref().map_or(true, |p| *p == change.property)
            }
            _ => false,
        }
    }
}

/// Receiving end of a subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    rx: Receiver<ContextEvent>,
}

impl Subscription {
    /// Next event, if one is queued.
    #[must_use]
    pub fn try_recv(&self) -> Option<ContextEvent> {
        self.rx.try_recv().ok()
    }

    /// Waits up to `timeout` for the next event.
    pub fn recv_timeout(&self, timeout: Duration) -> GraphResult<ContextEvent> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => GraphError::internal(format!(
                "no context event within {}ms",
                timeout.as_millis()
            )),
            RecvTimeoutError::Disconnected => GraphError::internal("context was dropped"),
        })
    }

    /// Every queued event, oldest first.
    #[must_use]
    pub fn drain(&self) -> Vec<ContextEvent> {
        self.rx.try_iter().collect()
    }
}

#[derive(Debug)]
struct Subscriber {
    filter: EventFilter,
    tx: Sender<ContextEvent>,
}

#[derive(Debug)]
pub(crate) struct NotificationCenter {
    capacity: usize,
    subscribers: Vec<Subscriber>,
    dropped: u64,
}

impl NotificationCenter {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscribers: Vec::new(),
            dropped: 0,
        }
    }

    pub fn subscribe(&mut self, filter: EventFilter) -> Subscription {
        let (tx, rx) = bounded(self.capacity);
        self.subscribers.push(Subscriber { filter, tx });
        Subscription { rx }
    }

    pub fn has_subscribers(&self) -> bool {
        !self.subscribers.is_empty()
    }

    /// Events dropped because a subscriber's buffer was full.
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn post(&mut self, event: &ContextEvent) {
        let mut dropped = 0;
        self.subscribers.retain(|sub| {
            if !sub.filter.accepts(event) {
                return true;
            }
            match sub.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    dropped += 1;
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            }
        });

        if dropped > 0 {
            self.dropped += dropped;
            warn!(dropped, total = self.dropped, "context notification buffer full, event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::object::ContextId;

    fn object(key: u64) -> ObjectRef {
        ObjectRef {
            context: ContextId::next(),
            key,
        }
    }

    #[test]
    fn test_filters_route_events() {
        let mut center = NotificationCenter::new(8);
        let saves = center.subscribe(EventFilter::Saves);
        let all = center.subscribe(EventFilter::All);

        center.post(&ContextEvent::WillSave);
        center.post(&ContextEvent::ObjectsDidChange(Arc::default()));

        assert_eq!(saves.drain().len(), 1);
        assert_eq!(all.drain().len(), 2);
    }

    #[test]
    fn test_property_filter_matches_object_and_name() {
        let target = object(1);
        let mut center = NotificationCenter::new(8);
        let sub = center.subscribe(EventFilter::Property {
            object: target,
            property: Some("name".into()),
        });

        center.post(&ContextEvent::PropertyDidChange(PropertyChange {
            object: target,
            property: "age".into(),
        }));
        center.post(&ContextEvent::PropertyDidChange(PropertyChange {
            object: object(2),
            property: "name".into(),
        }));
        center.post(&ContextEvent::PropertyDidChange(PropertyChange {
            object: target,
            property: "name".into(),
        }));

        let events = sub.drain();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_full_buffer_drops_and_counts() {
        let mut center = NotificationCenter::new(1);
        let sub = center.subscribe(EventFilter::All);
        center.post(&ContextEvent::WillSave);
        center.post(&ContextEvent::WillSave);
        assert_eq!(center.dropped(), 1);
        assert_eq!(sub.drain().len(), 1);
    }

    #[test]
    fn test_dropped_subscription_is_pruned() {
        let mut center = NotificationCenter::new(4);
        drop(center.subscribe(EventFilter::All));
        center.post(&ContextEvent::WillSave);
        assert!(!center.has_subscribers());
    }
}
