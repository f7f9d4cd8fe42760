//! The execution engine.
//!
//! `Executor` turns one logical operation into one or more physical attempts.
//! Each attempt walks the same path: choose a target replica, build and sign
//! a request for exactly that attempt, check the execution-time budget,
//! dispatch, classify the outcome, and either return, fail, or consult the
//! retry policy and go around again after a backoff pause.
//!
//! Invariants the loop maintains:
//! - Retries are sequential. One logical operation is driven by one task and
//!   its attempts never overlap.
//! - Every attempt produces exactly one `Sending` and one `RequestCompleted`
//!   event, in that order, even when building or signing fails before
//!   anything is dispatched.
//! - Attempts land in the `OperationContext` in chronological order.
//! - The execution-time budget is enforced before dispatching, while waiting
//!   on the transport, and before any backoff pause. The budget expiring
//!   always wins over a still-running per-attempt timeout.

use crate::clock::{Clock, MonotonicClock, Sleeper, TokioSleeper};
use crate::context::{AttemptRecord, OperationContext};
use crate::credentials::Credentials;
use crate::error::{ServiceErrorInfo, StorageError};
use crate::events::{EventBus, EventPayload, OperationEvent};
use crate::location::{LocationMode, LocationSelector, StorageLocation, StorageUri};
use crate::operation::StorageOperation;
use crate::options::RequestOptions;
use crate::retry::RetryContext;
use crate::transport::{HttpSend, TransportFailure};
use http::header::{HeaderValue, CONTENT_LENGTH};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Drives logical operations against a replicated storage account.
///
/// Cheap to clone; safe to share across concurrent logical operations.
/// Retry-policy instances are minted per operation, endpoint-selection state
/// lives inside each `execute` call, and credentials are read-only.
#[derive(Debug, Clone)]
pub struct Executor {
    transport: Arc<dyn HttpSend>,
    credentials: Arc<Credentials>,
    endpoints: StorageUri,
    defaults: RequestOptions,
    default_location_mode: LocationMode,
    events: Arc<EventBus>,
    sleeper: Arc<dyn Sleeper>,
    clock: Arc<dyn Clock>,
}

/// Builder for [`Executor`].
pub struct ExecutorBuilder {
    transport: Arc<dyn HttpSend>,
    endpoints: StorageUri,
    credentials: Credentials,
    defaults: RequestOptions,
    default_location_mode: LocationMode,
    events: Arc<EventBus>,
    sleeper: Arc<dyn Sleeper>,
    clock: Arc<dyn Clock>,
}

impl ExecutorBuilder {
    /// Account credentials. Defaults to anonymous.
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Client-default request options, copied into each operation at start.
    pub fn defaults(mut self, defaults: RequestOptions) -> Self {
        self.defaults = defaults;
        self
    }

    /// Client-default location mode, used when an operation's options leave
    /// it unset. Defaults to `PrimaryOnly`.
    pub fn default_location_mode(mut self, mode: LocationMode) -> Self {
        self.default_location_mode = mode;
        self
    }

    /// Client-wide event bus. Per-context listeners are registered on the
    /// [`OperationContext`] instead.
    pub fn events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    /// Override how backoff pauses are applied.
    pub fn with_sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Override the budget clock.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Finish the builder.
    pub fn build(self) -> Executor {
        Executor {
            transport: self.transport,
            credentials: Arc::new(self.credentials),
            endpoints: self.endpoints,
            defaults: self.defaults,
            default_location_mode: self.default_location_mode,
            events: self.events,
            sleeper: self.sleeper,
            clock: self.clock,
        }
    }
}

impl Executor {
    /// Start building an executor over the given transport and endpoints.
    pub fn builder(transport: impl HttpSend + 'static, endpoints: StorageUri) -> ExecutorBuilder {
        ExecutorBuilder {
            transport: Arc::new(transport),
            endpoints,
            credentials: Credentials::Anonymous,
            defaults: RequestOptions::default(),
            default_location_mode: LocationMode::PrimaryOnly,
            events: Arc::new(EventBus::new()),
            sleeper: Arc::new(TokioSleeper),
            clock: Arc::new(MonotonicClock::default()),
        }
    }

    /// The client-wide event bus.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Execute one logical operation to completion.
    ///
    /// On failure the returned error carries the last attempt's detail; the
    /// full attempt history stays readable on `ctx`.
    pub async fn execute<O: StorageOperation>(
        &self,
        operation: &mut O,
        options: &RequestOptions,
        ctx: &mut OperationContext,
    ) -> Result<O::Output, StorageError> {
        let options = options.resolved_against(&self.defaults);
        ctx.initialize();

        let configured = options.location_mode.unwrap_or(self.default_location_mode);
        // Mutating operations always go to the primary: secondaries are
        // read-only, whatever the caller configured.
        let mode = if operation.requires_primary() {
            LocationMode::PrimaryOnly
        } else {
            configured
        };
        let mut selector = LocationSelector::start(mode, &self.endpoints)?;
        let mut policy = options.retry.create_instance();

        let budget = options.max_execution_time;
        let started_millis = self.clock.now_millis();
        let mut retry_count: u32 = 0;

        loop {
            let location = selector.current();
            let payload = EventPayload {
                attempt_index: retry_count,
                location,
                status: None,
                client_request_id: ctx.client_request_id(),
            };
            let mut record = AttemptRecord::begin(location, ctx.client_request_id());

            debug!(attempt = retry_count, %location, "dispatching attempt");
            self.emit(ctx, &OperationEvent::Sending(payload.clone()));

            let outcome = self
                .run_attempt(
                    operation,
                    location,
                    retry_count,
                    &options,
                    budget,
                    started_millis,
                    ctx,
                    &mut record,
                )
                .await;

            if let Err(err) = &outcome {
                record.error = Some(err.to_string());
            }
            let status = record.status;
            ctx.record_attempt(record);
            self.emit(
                ctx,
                &OperationEvent::RequestCompleted(EventPayload {
                    status,
                    ..payload.clone()
                }),
            );

            let err = match outcome {
                Ok(output) => {
                    debug!(attempt = retry_count, "operation succeeded");
                    return Ok(output);
                }
                Err(err) => err,
            };

            match &err {
                // Local failures and the budget expiring are terminal.
                StorageError::Config(_)
                | StorageError::Build { .. }
                | StorageError::Sign(_)
                | StorageError::Parse { .. }
                | StorageError::Timeout { .. } => return Err(err),
                // An unmet precondition is a successful exchange whose
                // condition did not hold: never a fault, never retried,
                // never a reason to switch replicas.
                StorageError::Service(info) if info.status == 304 || info.status == 412 => {
                    return Err(err);
                }
                _ => {}
            }

            let (last_status, transport_retryable) = match &err {
                StorageError::Service(info) => (Some(info.status), false),
                StorageError::Transport { failure, .. } => (None, failure.is_retryable()),
                _ => return Err(err),
            };

            let decision = policy.evaluate(&RetryContext {
                retry_count,
                last_status,
                last_location: location,
                mode: selector.mode(),
                transport_retryable,
            });

            if !decision.retry {
                warn!(attempt = retry_count, error = %err, "not retrying");
                return Err(err);
            }

            // Never sleep past the budget: a backoff that would overrun it
            // fails now, with the timeout error, instead of waiting.
            if let Some(budget) = budget {
                let elapsed = self.elapsed_since(started_millis);
                if elapsed + decision.interval > budget {
                    warn!(?elapsed, ?budget, "backoff would exceed execution budget");
                    return Err(StorageError::Timeout { elapsed, budget });
                }
            }

            warn!(
                attempt = retry_count,
                interval = ?decision.interval,
                error = %err,
                "retrying"
            );
            self.emit(
                ctx,
                &OperationEvent::Retrying {
                    payload: EventPayload {
                        status: last_status,
                        ..payload
                    },
                    interval: decision.interval,
                },
            );

            self.sleeper.sleep(decision.interval).await;

            selector.advance_after_failure();
            if decision.updated_mode.is_some() {
                warn!(mode = ?decision.updated_mode, "retry decision changed location mode");
            }
            selector.apply_override(decision.target, decision.updated_mode);
            retry_count += 1;
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_attempt<O: StorageOperation>(
        &self,
        operation: &mut O,
        location: StorageLocation,
        attempt_index: u32,
        options: &RequestOptions,
        budget: Option<Duration>,
        started_millis: u64,
        ctx: &OperationContext,
        record: &mut AttemptRecord,
    ) -> Result<O::Output, StorageError> {
        let endpoint = self.endpoints.endpoint(location).ok_or_else(|| {
            StorageError::Config(format!("no endpoint configured for {location}"))
        })?;

        // BUILDING: a fresh skeleton per attempt, signed for exactly this
        // attempt's endpoint and content length.
        let request = operation.build_request(endpoint, options.per_attempt_timeout, ctx)?;
        let (mut parts, body) = request.into_parts();
        parts.uri = self.credentials.transform_uri(&parts.uri)?;
        parts
            .headers
            .insert(CONTENT_LENGTH, HeaderValue::from(body.len() as u64));
        self.credentials
            .sign(&mut parts, operation.signing_scheme())?;
        let request = http::Request::from_parts(parts, body);

        // SENDING: budget gate, then dispatch under the tighter of the
        // per-attempt timeout and the remaining budget.
        let remaining = match budget {
            Some(budget) => {
                let elapsed = self.elapsed_since(started_millis);
                if elapsed >= budget {
                    return Err(StorageError::Timeout { elapsed, budget });
                }
                Some(budget - elapsed)
            }
            None => None,
        };
        let cap = match (options.per_attempt_timeout, remaining) {
            (Some(per_attempt), Some(remaining)) => Some(per_attempt.min(remaining)),
            (Some(per_attempt), None) => Some(per_attempt),
            (None, Some(remaining)) => Some(remaining),
            (None, None) => None,
        };

        let sent = match cap {
            Some(cap) => match tokio::time::timeout(cap, self.transport.send(request)).await {
                Ok(result) => result,
                Err(_) => {
                    let budget_bound = match (remaining, options.per_attempt_timeout) {
                        (Some(remaining), Some(per_attempt)) => remaining <= per_attempt,
                        (Some(_), None) => true,
                        _ => false,
                    };
                    if budget_bound {
                        // The parent budget expired while the attempt was in
                        // flight; it wins over the per-attempt timeout.
                        let budget = budget.expect("remaining implies budget");
                        return Err(StorageError::Timeout {
                            elapsed: self.elapsed_since(started_millis),
                            budget,
                        });
                    }
                    Err(TransportFailure::TimedOut { elapsed: cap })
                }
            },
            None => self.transport.send(request).await,
        };
        let response = sent.map_err(|failure| StorageError::Transport { failure, location })?;

        record.status = Some(response.status().as_u16());
        record.service_request_id = response
            .headers()
            .get("x-ms-request-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        record.bytes_transferred = response.body().len() as u64;

        self.emit(
            ctx,
            &OperationEvent::ResponseReceived(EventPayload {
                attempt_index,
                location,
                status: record.status,
                client_request_id: ctx.client_request_id(),
            }),
        );

        // EVALUATING: membership in the operation's success set decides.
        let status = response.status().as_u16();
        if operation.success_codes().contains(&status) {
            operation.parse_response(&response, ctx)
        } else {
            Err(StorageError::Service(ServiceErrorInfo::from_response(
                status,
                response.headers(),
                location,
            )))
        }
    }

    fn elapsed_since(&self, started_millis: u64) -> Duration {
        Duration::from_millis(self.clock.now_millis().saturating_sub(started_millis))
    }

    fn emit(&self, ctx: &OperationContext, event: &OperationEvent) {
        self.events.emit(event);
        ctx.events().emit(event);
    }
}
