//! Per-service lifecycle state machine.
//!
//! Uses `ArcSwap` compare-and-swap so transitions are lock-free and a
//! transition is either applied entirely or rejected.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;

/// Service lifecycle state.
///
/// State machine: Unconfigured -> Configured -> Running -> Stopped.
/// `Configured` may also go straight to `Stopped`. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Constructed, settings not yet accepted.
    Unconfigured,
    /// Settings accepted; eligible to start.
    Configured,
    /// `start` has been issued.
    Running,
    /// `stop` has been issued. Terminal.
    Stopped,
}

impl ServiceState {
    /// Whether `self -> next` is a legal transition.
    #[must_use]
    pub fn can_become(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Unconfigured, Self::Configured)
                | (Self::Configured, Self::Running)
                | (Self::Configured | Self::Running, Self::Stopped)
        )
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unconfigured => "unconfigured",
            Self::Configured => "configured",
            Self::Running => "running",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Rejected lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("invalid lifecycle transition {from} -> {to}")]
    InvalidTransition { from: ServiceState, to: ServiceState },
}

/// Shared, lock-free lifecycle cell for one registered service.
#[derive(Debug)]
pub struct Lifecycle {
    state: ArcSwap<ServiceState>,
}

impl Lifecycle {
    /// Creates a lifecycle in the `Unconfigured` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ArcSwap::from_pointee(ServiceState::Unconfigured),
        }
    }

    #[must_use]
    pub fn state(&self) -> ServiceState {
        **self.state.load()
    }

    /// Move to `next`, returning the state that was replaced.
    ///
    /// # Errors
    ///
    /// Returns `LifecycleError::InvalidTransition` if the current state cannot
    /// become `next`. The state is left unchanged.
    pub fn advance(&self, next: ServiceState) -> Result<ServiceState, LifecycleError> {
        let mut current = self.state.load();
        loop {
            let from = **current;
            if !from.can_become(next) {
                return Err(LifecycleError::InvalidTransition { from, to: next });
            }
            let previous = self.state.compare_and_swap(&*current, Arc::new(next));
            if Arc::ptr_eq(&*previous, &*current) {
                return Ok(from);
            }
            // Lost a race; re-validate against the winner's state.
            current = previous;
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
