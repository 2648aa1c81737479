//! Listener set for broadcasting change events.

use crossbeam_channel::{bounded, TrySendError};
use parking_lot::RwLock;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{error, warn};

use super::types::{
    ChangeEvent, DropReason, ListenerId, ListenerResult, StoreEvent, SubscriptionHandle,
};

type Listener = Arc<dyn Fn(&ChangeEvent) -> ListenerResult + Send + Sync>;

struct Inner {
    /// Registered listeners in subscription order.
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
    /// Counter for generating listener IDs.
    next_id: AtomicU64,
}

impl Inner {
    fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }
}

/// De-registration token returned by `subscribe`.
///
/// Dropping it leaves the listener registered; call [`Subscription::unsubscribe`].
#[must_use = "the listener stays registered until `unsubscribe` is called"]
pub struct Subscription {
    id: ListenerId,
    set: Weak<Inner>,
}

impl Subscription {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Whether the listener is still registered.
    pub fn is_active(&self) -> bool {
        self.set
            .upgrade()
            .map_or(false, |inner| inner.listeners.read().iter().any(|(id, _)| *id == self.id))
    }

    /// Remove the listener. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        self.set.upgrade().map_or(false, |inner| inner.remove(self.id))
    }
}

/// Synchronous, in-line listener registry.
///
/// Listeners run on the notifying thread in subscription order. A listener
/// that returns an error or panics is logged and skipped; the remaining
/// listeners still run and the notifying operation is unaffected.
#[derive(Clone)]
pub struct ListenerSet {
    inner: Arc<Inner>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                listeners: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    fn next_id(&self) -> ListenerId {
        ListenerId(self.inner.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Register a listener.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ChangeEvent) -> ListenerResult + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.inner.listeners.write().push((id, Arc::new(listener)));

        Subscription {
            id,
            set: Arc::downgrade(&self.inner),
        }
    }

    /// Register a bounded channel as a listener.
    ///
    /// When the buffer is full or the receiver is gone the subscriber is
    /// removed and, best effort, sent a `Dropped` event.
    pub fn subscribe_channel(&self, buffer_size: usize) -> SubscriptionHandle {
        let (sender, receiver) = bounded(buffer_size.max(1));
        let id = self.next_id();
        let set = Arc::downgrade(&self.inner);

        let listener: Listener = Arc::new(move |event: &ChangeEvent| {
            let reason = match sender.try_send(StoreEvent::Change(event.clone())) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(_)) => DropReason::BufferOverflow,
                Err(TrySendError::Disconnected(_)) => DropReason::Disconnected,
            };

            if let Some(inner) = set.upgrade() {
                inner.remove(id);
            }
            let _ = sender.try_send(StoreEvent::Dropped {
                reason: reason.clone(),
            });
            Err(format!("channel subscriber dropped: {:?}", reason).into())
        });
        self.inner.listeners.write().push((id, listener));

        SubscriptionHandle {
            id,
            receiver,
            subscription: Subscription {
                id,
                set: Arc::downgrade(&self.inner),
            },
        }
    }

    /// Remove a listener by id.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.inner.remove(id)
    }

    pub fn len(&self) -> usize {
        self.inner.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every listener. Returns how many succeeded.
    pub fn notify(&self, event: &ChangeEvent) -> usize {
        // Snapshot so listeners may (un)subscribe while being notified.
        let listeners: Vec<(ListenerId, Listener)> = self.inner.listeners.read().clone();
        let mut delivered = 0;

        for (id, listener) in listeners {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => warn!(
                    store = %event.store,
                    action = %event.action,
                    listener = id.0,
                    error = %e,
                    "listener failed"
                ),
                Err(payload) => error!(
                    store = %event.store,
                    action = %event.action,
                    listener = id.0,
                    panic = panic_message(payload.as_ref()),
                    "listener panicked"
                ),
            }
        }

        delivered
    }
}

impl Default for ListenerSet {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
