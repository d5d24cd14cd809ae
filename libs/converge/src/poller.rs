//! Bounded convergence loop.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::predicate::{History, Observation, StatusPredicate, Verdict};
use crate::{ConvergeError, DEFAULT_MAX_ATTEMPTS, DEFAULT_POLL_INTERVAL};

/// Attempt budget for one convergence.
///
/// The effective timeout is `max_attempts × interval`; nothing else bounds a
/// poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Number of fetches before giving up. Must be at least 1.
    pub max_attempts: u32,

    /// Sleep between fetches.
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl PollConfig {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Upper bound on how long a convergence can take, excluding fetch latency.
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts.saturating_sub(1)
    }
}

/// Successful convergence.
#[derive(Debug, Clone)]
pub struct Converged<S> {
    /// Wall-clock time from the first fetch to the satisfying one.
    pub elapsed: Duration,

    /// Fetches consumed, including failed ones.
    pub attempts: u32,

    /// The observation that satisfied the predicate.
    pub observation: Observation<S>,
}

/// Drives one entity toward a predicate.
///
/// A poller holds no state between calls to [`converge`](Self::converge);
/// independent entities get independent pollers and can be driven
/// concurrently.
#[derive(Debug, Clone)]
pub struct Poller {
    resource: String,
    config: PollConfig,
    shutdown: Option<watch::Receiver<bool>>,
}

impl Poller {
    /// Create a poller for `resource` (used in logs and errors).
    pub fn new(resource: impl Into<String>, config: PollConfig) -> Self {
        Self {
            resource: resource.into(),
            config,
            shutdown: None,
        }
    }

    /// Abort between attempts once `shutdown` flips to `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Fetch and evaluate until the predicate is satisfied, fails, or the
    /// attempt budget runs out.
    ///
    /// Fetch errors are logged and consume an attempt; they are only surfaced
    /// (as [`ConvergeError::FetchExhausted`]) when no fetch ever succeeded.
    pub async fn converge<S, F, Fut, E>(
        &self,
        predicate: &StatusPredicate<S>,
        mut fetch: F,
    ) -> Result<Converged<S>, ConvergeError>
    where
        S: Clone + Ord + fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Observation<S>, E>>,
        E: fmt::Display,
    {
        if self.config.max_attempts == 0 {
            return Err(ConvergeError::InvalidConfig(format!(
                "max_attempts must be at least 1 for {}",
                self.resource
            )));
        }

        let start = Instant::now();
        let mut history = History::new();
        let mut last_error: Option<String> = None;

        info!(
            resource = %self.resource,
            predicate = %predicate,
            max_attempts = self.config.max_attempts,
            interval_ms = self.config.interval.as_millis() as u64,
            "Waiting for convergence"
        );

        for attempt in 1..=self.config.max_attempts {
            match fetch().await {
                Ok(observation) => {
                    if history.latest().map(|o| &o.state) != Some(&observation.state) {
                        info!(
                            resource = %self.resource,
                            state = %observation.state,
                            attempt,
                            "Transitioned to state"
                        );
                    }
                    history.push(observation);

                    match predicate.evaluate(&history) {
                        Verdict::Satisfied => {
                            let elapsed = start.elapsed();
                            let observation = history
                                .latest()
                                .cloned()
                                .ok_or_else(|| {
                                    ConvergeError::InvalidConfig("empty history".to_string())
                                })?;
                            info!(
                                resource = %self.resource,
                                elapsed_ms = elapsed.as_millis() as u64,
                                attempts = attempt,
                                "Converged"
                            );
                            return Ok(Converged {
                                elapsed,
                                attempts: attempt,
                                observation,
                            });
                        }
                        Verdict::Failed => {
                            let state = history
                                .latest()
                                .map(|o| o.state.to_string())
                                .unwrap_or_default();
                            warn!(
                                resource = %self.resource,
                                state = %state,
                                attempt,
                                "Observed failure state, aborting"
                            );
                            return Err(ConvergeError::Abort {
                                resource: self.resource.clone(),
                                state,
                                elapsed: start.elapsed(),
                                attempts: attempt,
                            });
                        }
                        Verdict::Pending => {
                            if let Some(latest) = history.latest() {
                                debug!(
                                    resource = %self.resource,
                                    observed = %latest,
                                    attempt,
                                    "Not converged yet"
                                );
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        resource = %self.resource,
                        error = %e,
                        attempt,
                        "Fetch failed, will retry"
                    );
                    last_error = Some(e.to_string());
                }
            }

            if attempt < self.config.max_attempts {
                self.pause(start).await?;
            }
        }

        let elapsed = start.elapsed();
        match history.latest() {
            Some(latest) => {
                warn!(
                    resource = %self.resource,
                    last_state = %latest,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Attempt budget exhausted"
                );
                Err(ConvergeError::Timeout {
                    resource: self.resource.clone(),
                    last_state: latest.to_string(),
                    elapsed,
                    attempts: self.config.max_attempts,
                })
            }
            None => Err(ConvergeError::FetchExhausted {
                resource: self.resource.clone(),
                attempts: self.config.max_attempts,
                last_error: last_error.unwrap_or_default(),
            }),
        }
    }

    /// Sleep one interval, waking early only for shutdown.
    async fn pause(&self, start: Instant) -> Result<(), ConvergeError> {
        let Some(shutdown) = &self.shutdown else {
            tokio::time::sleep(self.config.interval).await;
            return Ok(());
        };

        let mut shutdown = shutdown.clone();
        let cancelled = || ConvergeError::Cancelled {
            resource: self.resource.clone(),
            elapsed: start.elapsed(),
        };

        if *shutdown.borrow() {
            return Err(cancelled());
        }

        let sleep = tokio::time::sleep(self.config.interval);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return Ok(()),
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        // Sender gone; nobody can cancel us any more.
                        (&mut sleep).await;
                        return Ok(());
                    }
                    if *shutdown.borrow() {
                        info!(resource = %self.resource, "Convergence cancelled");
                        return Err(cancelled());
                    }
                }
            }
        }
    }
}
