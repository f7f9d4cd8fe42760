//! Lifecycle events and the listener registry.
//!
//! The engine emits one event stream per logical operation: `Sending` before
//! each attempt is prepared, `ResponseReceived` when a response (of any
//! status) arrives, `Retrying` when another attempt has been granted, and
//! `RequestCompleted` when the attempt finishes: exactly once per attempt,
//! always paired with exactly one prior `Sending`, even when building or
//! signing the request fails.
//!
//! Listener registries are explicit objects, not hidden process-wide statics:
//! the client owns one bus for global subscribers and each
//! [`OperationContext`](crate::OperationContext) owns its own. Firing takes a
//! snapshot of the listener list, so subscribers can be added or removed
//! concurrently without blocking senders.

use crate::location::StorageLocation;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use uuid::Uuid;

/// The four lifecycle event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// An attempt is about to be prepared and dispatched.
    Sending,
    /// A response was obtained for an attempt, success or error.
    ResponseReceived,
    /// A retry has been granted; fired before the backoff pause.
    Retrying,
    /// The attempt finished, on any path.
    RequestCompleted,
}

/// Fields common to every lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventPayload {
    /// Zero-based index of the attempt within its logical operation.
    pub attempt_index: u32,
    /// Replica the attempt targets or targeted.
    pub location: StorageLocation,
    /// HTTP status, once one is known.
    pub status: Option<u16>,
    /// Client-generated correlation id of the logical operation.
    pub client_request_id: Uuid,
}

/// One lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationEvent {
    /// See [`EventKind::Sending`].
    Sending(EventPayload),
    /// See [`EventKind::ResponseReceived`].
    ResponseReceived(EventPayload),
    /// See [`EventKind::Retrying`]. Carries the decided backoff interval.
    Retrying {
        /// Attempt that failed and is being retried.
        payload: EventPayload,
        /// Backoff that will elapse before the next attempt.
        interval: Duration,
    },
    /// See [`EventKind::RequestCompleted`].
    RequestCompleted(EventPayload),
}

impl OperationEvent {
    /// The event's kind.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Sending(_) => EventKind::Sending,
            Self::ResponseReceived(_) => EventKind::ResponseReceived,
            Self::Retrying { .. } => EventKind::Retrying,
            Self::RequestCompleted(_) => EventKind::RequestCompleted,
        }
    }

    /// The event's common fields.
    pub fn payload(&self) -> &EventPayload {
        match self {
            Self::Sending(payload)
            | Self::ResponseReceived(payload)
            | Self::RequestCompleted(payload) => payload,
            Self::Retrying { payload, .. } => payload,
        }
    }
}

type Listener = Arc<dyn Fn(&OperationEvent) + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

struct Entry {
    id: ListenerId,
    kind: EventKind,
    listener: Listener,
}

/// A concurrent listener registry with snapshot broadcast.
#[derive(Default)]
pub struct EventBus {
    entries: RwLock<Vec<Entry>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl EventBus {
    /// An empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for one event kind.
    pub fn subscribe(
        &self,
        kind: EventKind,
        listener: impl Fn(&OperationEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries
            .write()
            .expect("event bus lock poisoned")
            .push(Entry {
                id,
                kind,
                listener: Arc::new(listener),
            });
        id
    }

    /// Remove a listener. Returns whether it was still registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.write().expect("event bus lock poisoned");
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        entries.len() != before
    }

    /// Number of registered listeners, across all kinds.
    pub fn listener_count(&self) -> usize {
        self.entries.read().expect("event bus lock poisoned").len()
    }

    /// Drop every listener. Intended for test teardown.
    pub fn clear(&self) {
        self.entries
            .write()
            .expect("event bus lock poisoned")
            .clear();
    }

    /// Fire an event to every listener registered for its kind.
    ///
    /// The listener list is snapshotted under the read lock and invoked
    /// outside it, so a listener may freely subscribe or unsubscribe.
    pub fn emit(&self, event: &OperationEvent) {
        let kind = event.kind();
        let snapshot: Vec<Listener> = {
            let entries = self.entries.read().expect("event bus lock poisoned");
            entries
                .iter()
                .filter(|entry| entry.kind == kind)
                .map(|entry| Arc::clone(&entry.listener))
                .collect()
        };
        for listener in snapshot {
            listener(event);
        }
    }
}
