//! Retry policies and decisions.
//!
//! Semantics:
//! - A policy decision maps `(retry count, last outcome)` to "retry or not"
//!   plus a backoff interval and an optional endpoint override.
//! - Statuses in `[400, 500)` are never retried, with one carve-out: a 404
//!   from the **secondary** replica retries against the primary and demotes
//!   the operation's mode to `PrimaryOnly` (the secondary may simply not have
//!   caught up yet; the resource can still exist on the primary).
//! - Backoff is always client-computed; no server hint is consulted.
//! - Policies are minted fresh per logical operation via
//!   [`RetryPolicyFactory::create_instance`], so concurrent operations never
//!   share mutable retry state.
//!
//! The exponential interval is `min(min + (2^n − 1) · jitter(delta), max)`,
//! where `jitter(delta)` draws uniformly from `[0.8·delta, 1.2·delta]`. The
//! randomized shape spreads simultaneous retries from many clients hitting
//! the same partition. Tests reproduce intervals exactly by evaluating with a
//! seeded [`rand::rngs::StdRng`].

use crate::location::{LocationMode, StorageLocation};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// Floor applied to the linear-retry interval.
pub const MIN_BACKOFF: Duration = Duration::from_secs(3);
/// Ceiling applied to the linear-retry interval.
pub const MAX_BACKOFF: Duration = Duration::from_secs(90);

/// Input to a retry decision: the accumulated state of one logical operation.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Retries already granted (0 when deciding after the first attempt).
    pub retry_count: u32,
    /// HTTP status of the last attempt, `None` for a transport failure.
    pub last_status: Option<u16>,
    /// Replica the last attempt targeted.
    pub last_location: StorageLocation,
    /// The operation's current location mode.
    pub mode: LocationMode,
    /// Whether a transport failure (when `last_status` is `None`) is
    /// eligible for retry at all. Cancellation, for example, is not.
    pub transport_retryable: bool,
}

/// Output of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryDecision {
    /// Whether another attempt should be made.
    pub retry: bool,
    /// Backoff to sleep before the next attempt.
    pub interval: Duration,
    /// Explicit target for the next attempt, overriding the selector.
    pub target: Option<StorageLocation>,
    /// Permanent mode change for the remainder of the operation.
    pub updated_mode: Option<LocationMode>,
}

impl RetryDecision {
    /// Terminal decision: no further attempts.
    pub fn stop() -> Self {
        Self {
            retry: false,
            interval: Duration::ZERO,
            target: None,
            updated_mode: None,
        }
    }

    /// Retry after the given interval, leaving endpoint selection alone.
    pub fn after(interval: Duration) -> Self {
        Self {
            retry: true,
            interval,
            target: None,
            updated_mode: None,
        }
    }

    fn demote_to_primary(interval: Duration) -> Self {
        Self {
            retry: true,
            interval,
            target: Some(StorageLocation::Primary),
            updated_mode: Some(LocationMode::PrimaryOnly),
        }
    }
}

/// Outcome of the shared status/transport gate.
enum Gate {
    /// Eligible for retry, subject to the attempt-count check.
    Eligible,
    /// Eligible, but only against the primary with the mode pinned there.
    Demote,
    /// Never retried.
    Never,
}

fn gate(ctx: &RetryContext) -> Gate {
    match ctx.last_status {
        Some(404) if ctx.last_location == StorageLocation::Secondary => Gate::Demote,
        Some(status) if (400..500).contains(&status) => Gate::Never,
        Some(_) => Gate::Eligible,
        None => {
            if ctx.transport_retryable {
                Gate::Eligible
            } else {
                Gate::Never
            }
        }
    }
}

/// A retry policy instance, owned by exactly one logical operation.
///
/// A closed set of variants; there is no open extension point.
#[derive(Debug)]
pub enum RetryPolicy {
    /// Never retries.
    NoRetry,
    /// Constant interval between attempts.
    Linear(LinearRetry),
    /// Randomized exponential growth between attempts.
    Exponential(ExponentialRetry),
}

impl RetryPolicy {
    /// Decide whether, when, and where to retry.
    pub fn evaluate(&mut self, ctx: &RetryContext) -> RetryDecision {
        match self {
            Self::NoRetry => RetryDecision::stop(),
            Self::Linear(policy) => policy.evaluate(ctx),
            Self::Exponential(policy) => policy.evaluate(ctx),
        }
    }
}

/// Constant-interval retry.
#[derive(Debug)]
pub struct LinearRetry {
    delta: Duration,
    max_attempts: u32,
}

impl LinearRetry {
    /// Create a linear policy instance.
    pub fn new(delta: Duration, max_attempts: u32) -> Self {
        Self {
            delta,
            max_attempts,
        }
    }

    fn interval(&self) -> Duration {
        self.delta.clamp(MIN_BACKOFF, MAX_BACKOFF)
    }

    fn evaluate(&mut self, ctx: &RetryContext) -> RetryDecision {
        if ctx.retry_count >= self.max_attempts {
            return RetryDecision::stop();
        }
        match gate(ctx) {
            Gate::Never => RetryDecision::stop(),
            Gate::Eligible => RetryDecision::after(self.interval()),
            Gate::Demote => RetryDecision::demote_to_primary(self.interval()),
        }
    }
}

/// Randomized exponential retry.
#[derive(Debug)]
pub struct ExponentialRetry {
    min: Duration,
    delta: Duration,
    max: Duration,
    max_attempts: u32,
    rng: StdRng,
}

impl ExponentialRetry {
    /// Create an exponential policy instance with a freshly seeded RNG.
    pub fn new(min: Duration, delta: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            min,
            delta,
            max,
            max_attempts,
            rng: StdRng::from_rng(&mut rand::rng()),
        }
    }

    /// Deterministic instance for tests: same seed, same interval sequence.
    pub fn with_seed(
        min: Duration,
        delta: Duration,
        max: Duration,
        max_attempts: u32,
        seed: u64,
    ) -> Self {
        Self {
            min,
            delta,
            max,
            max_attempts,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// `min(min + (2^n − 1) · jitter(delta), max)` with the uniform
    /// `[0.8·delta, 1.2·delta]` jitter band. Saturates instead of wrapping.
    fn interval(&mut self, retry_count: u32) -> Duration {
        let delta_ms = u64::try_from(self.delta.as_millis()).unwrap_or(u64::MAX);
        let low = delta_ms.saturating_mul(4) / 5;
        let high = delta_ms.saturating_mul(6) / 5;
        let jittered = if high == 0 {
            0
        } else {
            self.rng.random_range(low..=high)
        };

        let growth = 2u128
            .saturating_pow(retry_count)
            .saturating_sub(1)
            .saturating_mul(u128::from(jittered));
        let interval_ms = u128::from(u64::try_from(self.min.as_millis()).unwrap_or(u64::MAX))
            .saturating_add(growth)
            .min(self.max.as_millis());
        Duration::from_millis(u64::try_from(interval_ms).unwrap_or(u64::MAX))
    }

    fn evaluate(&mut self, ctx: &RetryContext) -> RetryDecision {
        if ctx.retry_count >= self.max_attempts {
            return RetryDecision::stop();
        }
        match gate(ctx) {
            Gate::Never => RetryDecision::stop(),
            Gate::Eligible => RetryDecision::after(self.interval(ctx.retry_count)),
            Gate::Demote => RetryDecision::demote_to_primary(self.interval(ctx.retry_count)),
        }
    }
}

/// Cheap, cloneable description of a retry policy. The engine mints one
/// fresh [`RetryPolicy`] instance per logical operation from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryPolicyFactory {
    /// Never retry.
    NoRetry,
    /// Constant interval.
    Linear {
        /// Interval between attempts, clamped to `[MIN_BACKOFF, MAX_BACKOFF]`.
        delta: Duration,
        /// Maximum number of retries granted (not counting the first attempt).
        max_attempts: u32,
    },
    /// Randomized exponential growth.
    Exponential {
        /// Interval floor.
        min: Duration,
        /// Jitter base; each retry draws from `[0.8·delta, 1.2·delta]`.
        delta: Duration,
        /// Interval ceiling.
        max: Duration,
        /// Maximum number of retries granted.
        max_attempts: u32,
    },
}

impl RetryPolicyFactory {
    /// Linear policy description.
    pub fn linear(delta: Duration, max_attempts: u32) -> Self {
        Self::Linear {
            delta,
            max_attempts,
        }
    }

    /// Exponential policy description.
    pub fn exponential(min: Duration, delta: Duration, max: Duration, max_attempts: u32) -> Self {
        Self::Exponential {
            min,
            delta,
            max,
            max_attempts,
        }
    }

    /// Mint a fresh, independently-stateful policy instance.
    pub fn create_instance(&self) -> RetryPolicy {
        match self {
            Self::NoRetry => RetryPolicy::NoRetry,
            Self::Linear {
                delta,
                max_attempts,
            } => RetryPolicy::Linear(LinearRetry::new(*delta, *max_attempts)),
            Self::Exponential {
                min,
                delta,
                max,
                max_attempts,
            } => RetryPolicy::Exponential(ExponentialRetry::new(
                *min,
                *delta,
                *max,
                *max_attempts,
            )),
        }
    }
}

impl Default for RetryPolicyFactory {
    /// Exponential with a 3 s floor, 4 s jitter base, 120 s ceiling, 3 retries.
    fn default() -> Self {
        Self::Exponential {
            min: Duration::from_secs(3),
            delta: Duration::from_secs(4),
            max: Duration::from_secs(120),
            max_attempts: 3,
        }
    }
}
