//! The logical-operation contract.
//!
//! A `StorageOperation` is the unit of work a caller hands to the engine: a
//! request builder, a response parser, and the operation's own success
//! criteria. The engine owns everything in between: endpoint choice,
//! signing, dispatch, classification, retry.

use crate::context::OperationContext;
use crate::error::StorageError;
use crate::signing::SigningScheme;
use bytes::Bytes;
use http::Uri;
use std::time::Duration;

/// One caller-visible operation, realized as one or more physical attempts.
pub trait StorageOperation: Send {
    /// Parsed result of a successful response.
    type Output: Send;

    /// Build the request skeleton for one attempt against `endpoint`.
    ///
    /// Called once per attempt, since the target endpoint (and legitimately
    /// the body, for re-read streams) can differ between attempts. A failure
    /// here is a non-retryable local error; nothing is sent.
    fn build_request(
        &mut self,
        endpoint: &Uri,
        per_attempt_timeout: Option<Duration>,
        ctx: &OperationContext,
    ) -> Result<http::Request<Bytes>, StorageError>;

    /// Parse a response the engine classified as success.
    fn parse_response(
        &mut self,
        response: &http::Response<Bytes>,
        ctx: &OperationContext,
    ) -> Result<Self::Output, StorageError>;

    /// Status codes that count as success for this operation.
    fn success_codes(&self) -> &[u16] {
        &[200]
    }

    /// Whether this operation mutates state and must therefore target the
    /// primary regardless of the configured location mode. Secondary
    /// replicas are read-only.
    fn requires_primary(&self) -> bool {
        false
    }

    /// Signing scheme this operation's resource type requires.
    fn signing_scheme(&self) -> SigningScheme {
        SigningScheme::Full
    }
}
