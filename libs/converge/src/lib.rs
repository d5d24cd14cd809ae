//! State-convergence primitives.
//!
//! This library provides the generic machinery for waiting on a remote
//! entity that reports its state: evaluating a declarative target predicate
//! against what has been observed so far, and a bounded polling loop that
//! drives the fetch/evaluate/sleep cycle. Key concepts:
//!
//! - **Observation**: one reading of the entity's state, with an optional
//!   per-state instance breakdown.
//! - **Predicate**: the target condition (exact state, residency range, or
//!   instance-count range).
//! - **Convergence**: polling until the predicate holds, a failure state is
//!   seen, or the attempt budget is spent.
//!
//! # Invariants
//!
//! - Every poll is bounded by `max_attempts × interval`
//! - Transient fetch errors consume attempts but are never returned on their own
//! - An observed failure state aborts immediately, without consuming the budget

use std::time::Duration;

use thiserror::Error;

mod poller;
mod predicate;

pub use poller::{Converged, PollConfig, Poller};
pub use predicate::{
    History, Mode, Observation, Record, ResidencyUnit, StateRange, StatusPredicate, Verdict,
};

/// Convergence errors.
#[derive(Debug, Error)]
pub enum ConvergeError {
    /// Predicate or poll configuration is unusable.
    #[error("invalid convergence config: {0}")]
    InvalidConfig(String),

    /// Attempt budget exhausted without satisfying the predicate.
    #[error("timeout after {elapsed:?} ({attempts} attempts) waiting for {resource}, last state {last_state}")]
    Timeout {
        resource: String,
        last_state: String,
        elapsed: Duration,
        attempts: u32,
    },

    /// An explicit failure state was observed.
    #[error("{resource} reached failure state {state} after {elapsed:?}")]
    Abort {
        resource: String,
        state: String,
        elapsed: Duration,
        attempts: u32,
    },

    /// Every attempt failed to fetch state.
    #[error("could not fetch state of {resource} in {attempts} attempts: {last_error}")]
    FetchExhausted {
        resource: String,
        attempts: u32,
        last_error: String,
    },

    /// Shutdown was signalled mid-poll.
    #[error("cancelled after {elapsed:?} waiting for {resource}")]
    Cancelled { resource: String, elapsed: Duration },
}

impl ConvergeError {
    /// Returns true if the attempt budget ran out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::FetchExhausted { .. })
    }

    /// Returns true if a failure state was observed.
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Abort { .. })
    }
}

/// Default number of fetches per convergence.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 60;

/// Default sleep between fetches.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
