//! Replica endpoints and per-attempt target selection.
//!
//! A storage account exposes a primary endpoint and, when geo-replication is
//! enabled, a read-only secondary. `LocationMode` is the caller's policy for
//! which replica an operation may use; `LocationSelector` is the per-operation
//! state machine that turns that policy plus attempt outcomes into a concrete
//! target for each attempt.
//!
//! Invariants:
//! - `SecondaryOnly` and both alternating modes require a secondary URI; the
//!   violation surfaces at first use as a `Config` error, before any attempt.
//! - Once an alternating operation has moved off its starting replica it stays
//!   on the other one, unless a retry decision explicitly overrides the target
//!   or mode.

use crate::error::StorageError;
use http::Uri;

/// One of the two replica endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageLocation {
    /// The writable primary endpoint.
    Primary,
    /// The read-only geo-replicated secondary endpoint.
    Secondary,
}

impl std::fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Secondary => write!(f, "secondary"),
        }
    }
}

/// Policy for which replica an operation targets, attempt over attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationMode {
    /// Every attempt targets the primary.
    PrimaryOnly,
    /// Every attempt targets the secondary.
    SecondaryOnly,
    /// First attempt targets the primary; after a primary failure, retries
    /// move to the secondary and stay there.
    PrimaryThenSecondary,
    /// Mirror of `PrimaryThenSecondary`, starting at the secondary.
    SecondaryThenPrimary,
}

impl LocationMode {
    /// Target of attempt zero under this mode.
    pub fn initial_location(&self) -> StorageLocation {
        match self {
            Self::PrimaryOnly | Self::PrimaryThenSecondary => StorageLocation::Primary,
            Self::SecondaryOnly | Self::SecondaryThenPrimary => StorageLocation::Secondary,
        }
    }

    /// Whether this mode can ever target the secondary.
    pub fn uses_secondary(&self) -> bool {
        !matches!(self, Self::PrimaryOnly)
    }
}

/// Pair of replica endpoint URIs. The secondary is optional.
#[derive(Debug, Clone)]
pub struct StorageUri {
    primary: Uri,
    secondary: Option<Uri>,
}

impl StorageUri {
    /// Endpoints with no secondary replica.
    pub fn new(primary: Uri) -> Self {
        Self {
            primary,
            secondary: None,
        }
    }

    /// Endpoints for a geo-replicated account.
    pub fn with_secondary(primary: Uri, secondary: Uri) -> Self {
        Self {
            primary,
            secondary: Some(secondary),
        }
    }

    /// Endpoint for the given location, if configured.
    pub fn endpoint(&self, location: StorageLocation) -> Option<&Uri> {
        match location {
            StorageLocation::Primary => Some(self.primary()),
            StorageLocation::Secondary => self.secondary(),
        }
    }

    /// The primary endpoint.
    pub fn primary(&self) -> &Uri {
        &self.primary
    }

    /// The secondary endpoint, when configured.
    pub fn secondary(&self) -> Option<&Uri> {
        self.secondary.as_ref()
    }
}

/// Per-operation endpoint selection state.
///
/// Owned by the execution loop of a single logical operation; never shared.
#[derive(Debug)]
pub struct LocationSelector {
    mode: LocationMode,
    current: StorageLocation,
}

impl LocationSelector {
    /// Seed the selector and validate the mode against the configured
    /// endpoints. Fails with `Config` before any attempt is made.
    pub fn start(mode: LocationMode, endpoints: &StorageUri) -> Result<Self, StorageError> {
        if mode.uses_secondary() && endpoints.secondary().is_none() {
            return Err(StorageError::Config(format!(
                "location mode {mode:?} requires a secondary endpoint, but none is configured"
            )));
        }
        Ok(Self {
            mode,
            current: mode.initial_location(),
        })
    }

    /// Target for the upcoming attempt.
    pub fn current(&self) -> StorageLocation {
        self.current
    }

    /// The effective mode, including any override applied so far.
    pub fn mode(&self) -> LocationMode {
        self.mode
    }

    /// Advance the target after a failed attempt, per the alternation rule:
    /// the target switches only when the failed attempt hit the mode's
    /// starting replica; afterwards it is sticky.
    pub fn advance_after_failure(&mut self) {
        match (self.mode, self.current) {
            (LocationMode::PrimaryThenSecondary, StorageLocation::Primary) => {
                self.current = StorageLocation::Secondary;
            }
            (LocationMode::SecondaryThenPrimary, StorageLocation::Secondary) => {
                self.current = StorageLocation::Primary;
            }
            _ => {}
        }
    }

    /// Apply a retry decision's explicit target and/or permanent mode change.
    pub fn apply_override(
        &mut self,
        target: Option<StorageLocation>,
        mode: Option<LocationMode>,
    ) {
        if let Some(mode) = mode {
            self.mode = mode;
            self.current = mode.initial_location();
        }
        if let Some(target) = target {
            self.current = target;
        }
    }
}
