//! Change notification types.

use crate::types::Record;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which mutating operation produced an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
    BulkReplace,
    Clear,
    Import,
}

impl ChangeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Create => "create",
            ChangeAction::Update => "update",
            ChangeAction::Delete => "delete",
            ChangeAction::BulkReplace => "bulk-replace",
            ChangeAction::Clear => "clear",
            ChangeAction::Import => "import",
        }
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an event is about.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChangePayload {
    /// Created, updated or deleted record.
    Record(Record),
    /// New full contents (bulk replace) or records added by an import.
    Records(Vec<Record>),
    /// Nothing left to describe (clear).
    Empty,
}

impl ChangePayload {
    pub fn record(&self) -> Option<&Record> {
        match self {
            ChangePayload::Record(r) => Some(r),
            _ => None,
        }
    }

    pub fn records(&self) -> &[Record] {
        match self {
            ChangePayload::Record(r) => std::slice::from_ref(r),
            ChangePayload::Records(rs) => rs,
            ChangePayload::Empty => &[],
        }
    }
}

/// A single change notification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub action: ChangeAction,
    pub payload: ChangePayload,
    /// Name of the store the change happened in.
    pub store: String,
}

/// Error a listener may report. Logged, never propagated.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Return type of listener callbacks.
pub type ListenerResult = std::result::Result<(), ListenerError>;

/// Unique identifier for a listener within one set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Events delivered to channel subscribers.
#[derive(Clone, Debug, PartialEq)]
pub enum StoreEvent {
    Change(ChangeEvent),
    /// Subscription was dropped; no further events follow.
    Dropped { reason: DropReason },
}

/// Why a channel subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Receiver went away.
    Disconnected,
}

/// Handle for a channel subscription.
pub struct SubscriptionHandle {
    pub id: ListenerId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<StoreEvent>,
    pub(crate) subscription: super::Subscription,
}

impl SubscriptionHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<StoreEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<StoreEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<StoreEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything currently buffered.
    pub fn drain(&self) -> Vec<StoreEvent> {
        self.receiver.try_iter().collect()
    }

    /// Stop receiving events.
    pub fn unsubscribe(self) {
        self.subscription.unsubscribe();
    }
}
