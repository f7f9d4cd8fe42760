//! Per-operation options and client-default layering.
//!
//! A client carries default options; each `execute` call may override them.
//! Defaults are resolved into a concrete set once, at operation start, so
//! mutating the client's defaults never affects an in-flight operation.

use crate::location::LocationMode;
use crate::retry::RetryPolicyFactory;
use std::time::Duration;

/// Options governing one logical operation.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Retry policy description; a fresh instance is minted per operation.
    pub retry: RetryPolicyFactory,
    /// Replica-selection policy. `None` falls back to the client default.
    pub location_mode: Option<LocationMode>,
    /// Wall-clock budget for the whole logical operation, measured from the
    /// first attempt's start. `None` means unbounded.
    pub max_execution_time: Option<Duration>,
    /// Timeout for each physical attempt, reset on every retry. Always
    /// subordinate to `max_execution_time`.
    pub per_attempt_timeout: Option<Duration>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicyFactory::default(),
            location_mode: None,
            max_execution_time: None,
            per_attempt_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl RequestOptions {
    /// Options that never retry; the building block for tests and probes.
    pub fn no_retry() -> Self {
        Self {
            retry: RetryPolicyFactory::NoRetry,
            ..Self::default()
        }
    }

    /// Resolve unset fields from the client defaults, once, at start.
    pub(crate) fn resolved_against(&self, defaults: &RequestOptions) -> RequestOptions {
        RequestOptions {
            retry: self.retry.clone(),
            location_mode: self.location_mode.or(defaults.location_mode),
            max_execution_time: self.max_execution_time.or(defaults.max_execution_time),
            per_attempt_timeout: self.per_attempt_timeout.or(defaults.per_attempt_timeout),
        }
    }
}
