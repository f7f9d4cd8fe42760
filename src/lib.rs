#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # mirrorstore
//!
//! Client execution engine for a geo-replicated HTTP storage service: one
//! logical operation in, one or more signed physical attempts out.
//!
//! The engine decides which replica each attempt targets, signs every attempt
//! with the account credentials, classifies the outcome, applies a retry
//! policy with client-computed backoff, enforces a wall-clock execution-time
//! budget, and emits lifecycle events. All of it is deterministic and
//! testable without a network, through injectable transport, clock, sleeper,
//! and RNG seams.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use mirrorstore::{
//!     Credentials, Executor, LocationMode, OperationContext, RequestOptions,
//!     RetryPolicyFactory, StorageUri,
//! };
//! use std::time::Duration;
//!
//! # async fn example(transport: impl mirrorstore::HttpSend + 'static,
//! #                  mut op: impl mirrorstore::StorageOperation<Output = ()>) {
//! let endpoints = StorageUri::with_secondary(
//!     "https://acct.blob.example.net".parse().unwrap(),
//!     "https://acct-secondary.blob.example.net".parse().unwrap(),
//! );
//! let executor = Executor::builder(transport, endpoints)
//!     .credentials(Credentials::with_sas_token("sig=..."))
//!     .default_location_mode(LocationMode::PrimaryThenSecondary)
//!     .build();
//!
//! let options = RequestOptions {
//!     retry: RetryPolicyFactory::linear(Duration::from_secs(4), 3),
//!     max_execution_time: Some(Duration::from_secs(90)),
//!     ..RequestOptions::default()
//! };
//! let mut ctx = OperationContext::new();
//! let result = executor.execute(&mut op, &options, &mut ctx).await;
//! # let _ = result;
//! # }
//! ```
//!
//! The transport ([`HttpSend`]) and the per-resource request builders and
//! parsers ([`StorageOperation`]) are collaborators supplied by the caller;
//! this crate owns everything between them.

pub mod clock;
pub mod context;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod events;
pub mod location;
pub mod operation;
pub mod options;
pub mod retry;
pub mod signing;
pub mod transport;

// Re-exports
pub use clock::{Clock, InstantSleeper, ManualClock, MonotonicClock, RecordingSleeper, Sleeper, TokioSleeper};
pub use context::{AttemptRecord, OperationContext};
pub use credentials::Credentials;
pub use engine::{Executor, ExecutorBuilder};
pub use error::{ServiceErrorInfo, StorageError};
pub use events::{EventBus, EventKind, EventPayload, ListenerId, OperationEvent};
pub use location::{LocationMode, LocationSelector, StorageLocation, StorageUri};
pub use operation::StorageOperation;
pub use options::RequestOptions;
pub use retry::{
    ExponentialRetry, LinearRetry, RetryContext, RetryDecision, RetryPolicy, RetryPolicyFactory,
    MAX_BACKOFF, MIN_BACKOFF,
};
pub use signing::SigningScheme;
pub use transport::{HttpSend, TransportFailure};
