//! Error taxonomy for the execution engine.
//!
//! Every terminal failure of a logical operation maps onto exactly one
//! `StorageError` variant, and the variant decides what the engine was allowed
//! to do about it:
//! - `Config` and `Build` are raised before anything is sent.
//! - `Sign` aborts the attempt that was being prepared.
//! - `Transport` and `Service` feed the retry policy.
//! - `Timeout` means the wall-clock execution budget ran out; it is always
//!   reported distinctly from a service rejection so callers can tell
//!   "service said no" from "client gave up".

use crate::location::StorageLocation;
use crate::transport::TransportFailure;
use std::time::Duration;
use thiserror::Error;

/// Detail of a non-success HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceErrorInfo {
    /// HTTP status code of the failed attempt.
    pub status: u16,
    /// Service-supplied error code, from the `x-ms-error-code` header.
    pub error_code: Option<String>,
    /// Human-readable message, when one was available without parsing a body.
    pub message: Option<String>,
    /// Service-assigned request id, from the `x-ms-request-id` header.
    pub request_id: Option<String>,
    /// Replica that produced the response.
    pub location: StorageLocation,
}

impl ServiceErrorInfo {
    /// Build error info from a response's status and headers.
    pub fn from_response(
        status: u16,
        headers: &http::HeaderMap,
        location: StorageLocation,
    ) -> Self {
        let header_str = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Self {
            status,
            error_code: header_str("x-ms-error-code"),
            message: None,
            request_id: header_str("x-ms-request-id"),
            location,
        }
    }
}

impl std::fmt::Display for ServiceErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "service returned status {}", self.status)?;
        if let Some(code) = &self.error_code {
            write!(f, " ({code})")?;
        }
        if let Some(id) = &self.request_id {
            write!(f, ", request id {id}")?;
        }
        write!(f, ", from {}", self.location)
    }
}

/// Unified error type surfaced by [`Executor::execute`](crate::Executor::execute).
#[derive(Debug, Error)]
pub enum StorageError {
    /// Invalid combination of options. Raised before any network I/O.
    #[error("invalid client configuration: {0}")]
    Config(String),

    /// The operation's request builder failed. Nothing was sent.
    #[error("request construction failed: {source}")]
    Build {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Signing or credential transformation failed for an attempt.
    #[error("request signing failed: {0}")]
    Sign(String),

    /// Connection-level failure while dispatching an attempt.
    #[error("transport failure against {location}: {failure}")]
    Transport {
        /// The connection-level failure.
        #[source]
        failure: TransportFailure,
        /// Replica the attempt targeted.
        location: StorageLocation,
    },

    /// The service answered with a status outside the operation's success set.
    #[error("{0}")]
    Service(ServiceErrorInfo),

    /// The wall-clock execution-time budget was exhausted.
    #[error("maximum execution time exceeded after {elapsed:?} (budget {budget:?})")]
    Timeout { elapsed: Duration, budget: Duration },

    /// The operation's response parser rejected a successful response.
    #[error("response parsing failed: {source}")]
    Parse {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl StorageError {
    /// Wrap a builder failure.
    pub fn build(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Build {
            source: Box::new(source),
        }
    }

    /// Wrap a parser failure.
    pub fn parse(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Parse {
            source: Box::new(source),
        }
    }

    /// Check if this error is the execution-time budget expiring.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if this error is a client-side configuration error.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Check if this error carries a service response.
    pub fn is_service(&self) -> bool {
        matches!(self, Self::Service(_))
    }

    /// HTTP status of the failing response, when there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Service(info) => Some(info.status),
            _ => None,
        }
    }

    /// Service error detail, when present.
    pub fn service_info(&self) -> Option<&ServiceErrorInfo> {
        match self {
            Self::Service(info) => Some(info),
            _ => None,
        }
    }
}
