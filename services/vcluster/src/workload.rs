//! One scheduled job under test.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};
use vcluster_converge::{Converged, PollConfig, Poller, StatusPredicate};
use vcluster_id::{JobId, ResourcePoolId};
use vcluster_scheduler::{format_stats, JobState, SchedulerClient, Value, WorkloadSpec, WorkloadStatus};

use crate::error::{Error, Result};

/// Handle on a workload: its spec, and its scheduler-assigned ID once created.
///
/// The ID is assigned exactly once; the spec is fixed from creation on.
pub struct Workload {
    client: Arc<dyn SchedulerClient>,
    spec: WorkloadSpec,
    id: Option<JobId>,
    last_state: Option<JobState>,
    poll: PollConfig,
    shutdown: Option<watch::Receiver<bool>>,
}

impl Workload {
    /// A workload that has not been submitted yet.
    pub fn new(client: Arc<dyn SchedulerClient>, spec: WorkloadSpec) -> Self {
        Self {
            client,
            spec,
            id: None,
            last_state: None,
            poll: PollConfig::default(),
            shutdown: None,
        }
    }

    /// A handle on an existing job.
    pub fn attach(client: Arc<dyn SchedulerClient>, spec: WorkloadSpec, id: JobId) -> Self {
        let mut workload = Self::new(client, spec);
        workload.id = Some(id);
        workload
    }

    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn id(&self) -> Option<&JobId> {
        self.id.as_ref()
    }

    pub fn spec(&self) -> &WorkloadSpec {
        &self.spec
    }

    /// State seen by the most recent successful fetch. Diagnostic only.
    pub fn last_observed_state(&self) -> Option<JobState> {
        self.last_state
    }

    /// Place the workload in a resolved resource pool. Only valid before create.
    pub fn bind_pool(&mut self, pool: ResourcePoolId) -> Result<()> {
        if self.id.is_some() {
            return Err(Error::Config(format!(
                "workload {} is already created",
                self.spec.name
            )));
        }
        self.spec.respool_id = Some(Value::new(pool));
        Ok(())
    }

    /// Submit the workload.
    pub async fn create(&mut self) -> Result<JobId> {
        if let Some(id) = &self.id {
            return Err(Error::Config(format!(
                "workload {} already created as {id}",
                self.spec.name
            )));
        }

        let id = self.client.create_workload(&self.spec).await?;
        info!(
            job_id = %id,
            name = %self.spec.name,
            instances = self.spec.instance_count,
            "Created workload"
        );
        self.id = Some(id.clone());
        Ok(id)
    }

    /// Stop every task of the workload.
    pub async fn stop(&self) -> Result<()> {
        let id = self.require_id()?;
        self.client.stop_workload(id).await?;
        info!(job_id = %id, name = %self.spec.name, "Stopped workload");
        Ok(())
    }

    /// Hard-delete the workload. The scheduler refuses non-terminal jobs.
    pub async fn delete(&self) -> Result<()> {
        let id = self.require_id()?;
        self.client.delete_workload(id).await?;
        info!(job_id = %id, name = %self.spec.name, "Deleted workload");
        Ok(())
    }

    /// Current aggregate state and per-state counts.
    pub async fn runtime(&mut self) -> Result<WorkloadStatus> {
        let id = self.require_id()?.clone();
        let status = self.client.get_workload(&id).await?;
        self.last_state = Some(status.state);
        Ok(status)
    }

    /// Poll until `predicate` holds.
    pub async fn wait_for(
        &mut self,
        predicate: &StatusPredicate<JobState>,
    ) -> Result<Converged<JobState>> {
        let id = self.require_id()?.clone();

        let mut poller = Poller::new(format!("{} ({id})", self.spec.name), self.poll);
        if let Some(shutdown) = &self.shutdown {
            poller = poller.with_shutdown(shutdown.clone());
        }

        let client = Arc::clone(&self.client);
        let converged = poller
            .converge(predicate, || {
                let client = Arc::clone(&client);
                let id = id.clone();
                async move {
                    let status = client.get_workload(&id).await?;
                    debug!(
                        job_id = %id,
                        state = %status.state,
                        stats = %format_stats(&status.task_stats),
                        "Polled workload"
                    );
                    Ok::<_, vcluster_scheduler::ClientError>(status.observation())
                }
            })
            .await?;

        self.last_state = Some(converged.observation.state);
        Ok(converged)
    }

    /// Wait for the aggregate state to reach `goal` with every instance in it,
    /// aborting as soon as `failed` is observed. Returns the time taken.
    pub async fn wait_for_state(&mut self, goal: JobState, failed: JobState) -> Result<Duration> {
        let predicate = StatusPredicate::exact_or_fail(goal, failed);
        let converged = self.wait_for(&predicate).await?;

        let expected = self.spec.instance_count;
        let actual = converged.observation.count(&goal);
        if actual != expected {
            return Err(Error::StructuralMismatch {
                resource: self.spec.name.clone(),
                expected,
                actual,
            });
        }

        info!(
            name = %self.spec.name,
            state = %goal,
            elapsed_ms = converged.elapsed.as_millis() as u64,
            "Workload reached state"
        );
        Ok(converged.elapsed)
    }

    fn require_id(&self) -> Result<&JobId> {
        self.id.as_ref().ok_or_else(|| {
            Error::Config(format!("workload {} has not been created", self.spec.name))
        })
    }
}

#[cfg(test)]
mod tests {
    use vcluster_scheduler::TaskConfig;
    use vcluster_testing::FakeScheduler;

    use super::*;
    use crate::error::ErrorKind;

    fn status(state: JobState, stats: &[(JobState, u32)]) -> WorkloadStatus {
        WorkloadStatus::new(state, stats.iter().copied())
    }

    fn workload(fake: &Arc<FakeScheduler>, name: &str, count: u32) -> Workload {
        let client: Arc<dyn SchedulerClient> = fake.clone();
        Workload::new(client, WorkloadSpec::new(name, count, TaskConfig::default()))
            .with_poll_config(PollConfig::new(3, Duration::from_secs(1)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_assigns_id_once() {
        let fake = Arc::new(FakeScheduler::new());
        let mut job = workload(&fake, "job", 1);

        let id = job.create().await.unwrap();
        assert_eq!(job.id(), Some(&id));

        let err = job.create().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert_eq!(fake.jobs_named("job").len(), 1);
        assert!(job.bind_pool(ResourcePoolId::generate()).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_operations_require_creation() {
        let fake = Arc::new(FakeScheduler::new());
        let mut job = workload(&fake, "job", 1);

        assert_eq!(job.stop().await.unwrap_err().kind(), ErrorKind::Config);
        assert_eq!(job.runtime().await.unwrap_err().kind(), ErrorKind::Config);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_state_succeeds() {
        let fake = Arc::new(FakeScheduler::new());
        fake.script(
            "job",
            vec![
                status(JobState::Pending, &[(JobState::Pending, 2)]),
                status(JobState::Running, &[(JobState::Running, 2)]),
            ],
        );
        let mut job = workload(&fake, "job", 2);
        job.create().await.unwrap();

        let elapsed = job
            .wait_for_state(JobState::Running, JobState::Failed)
            .await
            .unwrap();
        assert_eq!(elapsed, Duration::from_secs(1));
        assert_eq!(job.last_observed_state(), Some(JobState::Running));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_state_structural_mismatch() {
        let fake = Arc::new(FakeScheduler::new());
        fake.script(
            "job",
            vec![status(
                JobState::Running,
                &[(JobState::Running, 3), (JobState::Pending, 2)],
            )],
        );
        let mut job = workload(&fake, "job", 5);
        job.create().await.unwrap();

        let err = job
            .wait_for_state(JobState::Running, JobState::Failed)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StructuralMismatch);
        assert!(matches!(
            err,
            Error::StructuralMismatch {
                expected: 5,
                actual: 3,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_state_aborts_on_failure() {
        let fake = Arc::new(FakeScheduler::new());
        fake.script(
            "job",
            vec![
                status(JobState::Pending, &[]),
                status(JobState::Failed, &[]),
            ],
        );
        let mut job = workload(&fake, "job", 1);
        job.create().await.unwrap();

        let err = job
            .wait_for_state(JobState::Running, JobState::Failed)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Abort);
        assert_eq!(
            fake.count_calls(|c| matches!(c, vcluster_testing::Call::Get { .. })),
            2
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_state_times_out() {
        let fake = Arc::new(FakeScheduler::new());
        fake.script("job", vec![status(JobState::Pending, &[])]);
        let mut job = workload(&fake, "job", 1);
        job.create().await.unwrap();

        let err = job
            .wait_for_state(JobState::Running, JobState::Failed)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(
            fake.count_calls(|c| matches!(c, vcluster_testing::Call::Get { .. })),
            3
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_fetch_errors_are_absorbed() {
        let fake = Arc::new(FakeScheduler::new());
        let mut job = workload(&fake, "job", 1);
        job.create().await.unwrap();
        fake.fail_next_gets(2);

        job.wait_for_state(JobState::Running, JobState::Failed)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_runtime_updates_last_state() {
        let fake = Arc::new(FakeScheduler::new());
        let mut job = workload(&fake, "job", 1);
        job.create().await.unwrap();

        let status = job.runtime().await.unwrap();
        assert_eq!(status.state, JobState::Running);
        assert_eq!(job.last_observed_state(), Some(JobState::Running));
    }
}
