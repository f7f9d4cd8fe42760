//! Per-operation context: attempt history, correlation id, and listeners.
//!
//! One `OperationContext` spans one logical operation and is driven by one
//! task; retries are sequential, so the attempt list needs no locking, only
//! clear ownership through the execution loop. Callers may reuse a context
//! across operations: [`OperationContext::initialize`] resets the transient
//! attempt history while keeping the context's identity (its client request
//! id) and its event subscriptions.

use crate::events::EventBus;
use crate::location::StorageLocation;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Record of one physical HTTP attempt.
///
/// Built while the attempt runs; frozen by [`AttemptRecord::finish`] and then
/// appended to the context. Append order is chronological order.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    /// When the attempt began.
    pub started_at: DateTime<Utc>,
    /// When the attempt finished, on any path.
    pub finished_at: Option<DateTime<Utc>>,
    /// Replica the attempt targeted.
    pub target: StorageLocation,
    /// HTTP status, when a response arrived.
    pub status: Option<u16>,
    /// Service-assigned request id, from `x-ms-request-id`.
    pub service_request_id: Option<String>,
    /// Client-generated correlation id, shared by all attempts of the
    /// logical operation.
    pub client_request_id: Uuid,
    /// Response body bytes transferred.
    pub bytes_transferred: u64,
    /// Description of the failure, when the attempt failed.
    pub error: Option<String>,
}

impl AttemptRecord {
    /// Start recording an attempt against `target`.
    pub fn begin(target: StorageLocation, client_request_id: Uuid) -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            target,
            status: None,
            service_request_id: None,
            client_request_id,
            bytes_transferred: 0,
            error: None,
        }
    }

    /// Stamp the stop time. The record is immutable afterwards.
    pub fn finish(&mut self) {
        if self.finished_at.is_none() {
            self.finished_at = Some(Utc::now());
        }
    }

    /// Whether the attempt has finished.
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

/// Mutable record of one logical operation.
#[derive(Debug)]
pub struct OperationContext {
    client_request_id: Uuid,
    attempts: Vec<AttemptRecord>,
    events: EventBus,
}

impl Default for OperationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationContext {
    /// A fresh context with a newly generated client request id.
    pub fn new() -> Self {
        Self {
            client_request_id: Uuid::new_v4(),
            attempts: Vec::new(),
            events: EventBus::new(),
        }
    }

    /// The client-generated correlation id. Stable for the lifetime of the
    /// context, across `initialize` calls.
    pub fn client_request_id(&self) -> Uuid {
        self.client_request_id
    }

    /// Reset transient state for a new logical operation: the attempt list is
    /// cleared, the id and event listeners are kept.
    pub fn initialize(&mut self) {
        self.attempts.clear();
    }

    /// Attempts recorded so far, in chronological order.
    pub fn attempts(&self) -> &[AttemptRecord] {
        &self.attempts
    }

    /// The most recent attempt, if any.
    pub fn last_attempt(&self) -> Option<&AttemptRecord> {
        self.attempts.last()
    }

    /// Number of attempts recorded.
    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }

    /// This context's listener registry.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Append a finished attempt.
    pub fn record_attempt(&mut self, mut record: AttemptRecord) {
        record.finish();
        self.attempts.push(record);
    }
}
