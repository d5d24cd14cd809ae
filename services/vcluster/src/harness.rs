//! Helpers for end-to-end test suites driving a virtual cluster.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use vcluster_converge::{Observation, PollConfig, Poller, StatusPredicate};
use vcluster_id::{JobId, Label};
use vcluster_scheduler::{JobState, SchedulerClient};

use crate::error::Result;

const UP: &str = "UP";
const DOWN: &str = "DOWN";

/// Poll `url` until it answers with a 2xx status. Returns the time taken.
pub async fn wait_for_http_ok(
    client: &reqwest::Client,
    url: &str,
    poll: PollConfig,
) -> Result<Duration> {
    let poller = Poller::new(url.to_string(), poll);
    let converged = poller
        .converge(&StatusPredicate::exact(UP), || async move {
            let response = client.get(url).send().await?;
            let status = response.status();
            debug!(url, status = %status, "Probed endpoint");
            Ok::<_, reqwest::Error>(Observation::new(if status.is_success() {
                UP
            } else {
                DOWN
            }))
        })
        .await?;
    Ok(converged.elapsed)
}

/// Stop every active workload owned by `label`.
///
/// Per-test cleanup hook; stop failures are logged and skipped so one stuck
/// job does not leak the rest. Returns the jobs that were stopped.
pub async fn cleanup_workloads(client: &dyn SchedulerClient, label: &Label) -> Result<Vec<JobId>> {
    let ids = client
        .list_workloads_by_label(label, "", &JobState::ACTIVE)
        .await?;

    let mut stopped = Vec::with_capacity(ids.len());
    for id in ids {
        match client.stop_workload(&id).await {
            Ok(()) => {
                info!(job_id = %id, label = %label, "Stopped leftover workload");
                stopped.push(id);
            }
            Err(e) => warn!(job_id = %id, error = %e, "Failed to stop leftover workload"),
        }
    }
    Ok(stopped)
}

/// Outcome counters of a test run.
#[derive(Debug)]
pub struct TestMetrics {
    started_at: DateTime<Utc>,
    start: Instant,
    passed: u32,
    failed: u32,
}

/// Summary produced when a run ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSummary {
    pub started_at: DateTime<Utc>,
    pub passed: u32,
    pub failed: u32,
    pub total: u32,
    pub duration: Duration,
    /// 1 if any test failed, 0 otherwise.
    pub watchdog_result: u8,
}

impl TestMetrics {
    /// Start counting a run.
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            start: Instant::now(),
            passed: 0,
            failed: 0,
        }
    }

    pub fn record_passed(&mut self) {
        self.passed += 1;
    }

    pub fn record_failed(&mut self) {
        self.failed += 1;
    }

    /// End the run and log its summary.
    pub fn flush(self) -> MetricsSummary {
        let summary = MetricsSummary {
            started_at: self.started_at,
            passed: self.passed,
            failed: self.failed,
            total: self.passed + self.failed,
            duration: self.start.elapsed(),
            watchdog_result: u8::from(self.failed > 0),
        };
        info!(
            passed = summary.passed,
            failed = summary.failed,
            total = summary.total,
            duration_ms = summary.duration.as_millis() as u64,
            watchdog_result = summary.watchdog_result,
            "Test run finished"
        );
        summary
    }
}

impl Default for TestMetrics {
    fn default() -> Self {
        Self::new()
    }
}
