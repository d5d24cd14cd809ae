//! Fake scheduler.
//!
//! Unscripted jobs follow a simplified lifecycle: all instances are RUNNING
//! as soon as the job is created; a stop moves the job through one KILLING
//! observation to KILLED. A script registered for a job name replaces the
//! status sequence returned by `get_workload` for jobs created under that
//! name; the last scripted status repeats forever.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;
use vcluster_id::{JobId, Label, ResourcePoolId};
use vcluster_scheduler::{
    ClientError, JobState, ResourcePoolConfig, SchedulerClient, TaskInfo, WorkloadSpec,
    WorkloadStatus,
};

/// Base of the dynamic port range handed out to tasks.
const DYNAMIC_PORT_BASE: u32 = 31000;

/// One recorded scheduler call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Create { name: String, id: JobId },
    Stop(JobId),
    Delete(JobId),
    Get { id: JobId, status: WorkloadStatus },
    List { label: String, name: String },
    ListTasks(JobId),
    CreatePool(String),
    LookupPool(String),
}

struct FakeJob {
    spec: WorkloadSpec,
    script: VecDeque<WorkloadStatus>,
    current: WorkloadStatus,
}

impl FakeJob {
    fn advance(&mut self) -> WorkloadStatus {
        if self.script.len() > 1 {
            if let Some(next) = self.script.pop_front() {
                self.current = next;
            }
        } else if let Some(last) = self.script.front() {
            self.current = last.clone();
        }
        self.current.clone()
    }
}

#[derive(Default)]
struct State {
    jobs: BTreeMap<JobId, FakeJob>,
    scripts: HashMap<String, Vec<WorkloadStatus>>,
    stop_scripts: HashMap<String, Vec<WorkloadStatus>>,
    pools: BTreeMap<String, ResourcePoolId>,
    calls: Vec<Call>,
    failing_gets: u32,
    reject_creates: bool,
    pool_lookup_error: Option<fn(String) -> ClientError>,
}

/// In-memory [`SchedulerClient`].
#[derive(Default)]
pub struct FakeScheduler {
    state: Mutex<State>,
}

impl FakeScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not hide the original failure.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Status sequence for jobs created under `name`.
    pub fn script(&self, name: impl Into<String>, statuses: Vec<WorkloadStatus>) {
        self.lock().scripts.insert(name.into(), statuses);
    }

    /// Status sequence that replaces the default KILLING/KILLED progression
    /// after a stop of a job named `name`.
    pub fn script_stop(&self, name: impl Into<String>, statuses: Vec<WorkloadStatus>) {
        self.lock().stop_scripts.insert(name.into(), statuses);
    }

    /// Fail the next `n` `get_workload` calls with a transient error.
    pub fn fail_next_gets(&self, n: u32) {
        self.lock().failing_gets = n;
    }

    /// Reject every subsequent job or pool create with `InvalidConfig`.
    pub fn reject_creates(&self) {
        self.lock().reject_creates = true;
    }

    /// Fail every pool lookup with the error built by `make`, e.g.
    /// `ClientError::InvalidPath`.
    pub fn set_pool_lookup_error(&self, make: fn(String) -> ClientError) {
        self.lock().pool_lookup_error = Some(make);
    }

    /// Register an existing resource pool.
    pub fn add_pool(&self, path: impl Into<String>, id: ResourcePoolId) {
        self.lock().pools.insert(path.into(), id);
    }

    /// Snapshot of the call log.
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Number of calls matching `pred`.
    pub fn count_calls(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| pred(c)).count()
    }

    /// Spec of a created job.
    pub fn spec(&self, id: &JobId) -> Option<WorkloadSpec> {
        self.lock().jobs.get(id).map(|job| job.spec.clone())
    }

    /// IDs of jobs created under `name`, in creation order.
    pub fn jobs_named(&self, name: &str) -> Vec<JobId> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Create { name: n, id } if n == name => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Whether the job has been deleted.
    pub fn is_deleted(&self, id: &JobId) -> bool {
        !self.lock().jobs.contains_key(id)
    }
}

fn uniform(state: JobState, count: u32) -> WorkloadStatus {
    WorkloadStatus::new(state, [(state, count)])
}

#[async_trait]
impl SchedulerClient for FakeScheduler {
    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<JobId, ClientError> {
        let mut state = self.lock();
        if state.reject_creates || spec.instance_count == 0 {
            return Err(ClientError::InvalidConfig(format!(
                "rejected job {}",
                spec.name
            )));
        }

        let id = JobId::generate();
        let script: VecDeque<_> = state
            .scripts
            .get(&spec.name)
            .cloned()
            .unwrap_or_default()
            .into();
        let job = FakeJob {
            spec: spec.clone(),
            script,
            current: uniform(JobState::Running, spec.instance_count),
        };
        debug!(job_id = %id, name = %spec.name, "[FAKE] Created job");

        state.jobs.insert(id.clone(), job);
        state.calls.push(Call::Create {
            name: spec.name.clone(),
            id: id.clone(),
        });
        Ok(id)
    }

    async fn stop_workload(&self, id: &JobId) -> Result<(), ClientError> {
        let mut state = self.lock();
        state.calls.push(Call::Stop(id.clone()));

        let State {
            jobs, stop_scripts, ..
        } = &mut *state;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| ClientError::NotFound(id.to_string()))?;

        if job.current.state.is_terminal() {
            return Ok(());
        }

        let n = job.spec.instance_count;
        job.script = stop_scripts
            .get(&job.spec.name)
            .cloned()
            .unwrap_or_else(|| vec![uniform(JobState::Killing, n), uniform(JobState::Killed, n)])
            .into();
        Ok(())
    }

    async fn delete_workload(&self, id: &JobId) -> Result<(), ClientError> {
        let mut state = self.lock();
        state.calls.push(Call::Delete(id.clone()));

        let job = state
            .jobs
            .get(id)
            .ok_or_else(|| ClientError::NotFound(id.to_string()))?;
        if !job.current.state.is_terminal() {
            return Err(ClientError::InvalidState {
                id: id.to_string(),
                state: job.current.state.to_string(),
            });
        }

        state.jobs.remove(id);
        Ok(())
    }

    async fn get_workload(&self, id: &JobId) -> Result<WorkloadStatus, ClientError> {
        let mut state = self.lock();
        if state.failing_gets > 0 {
            state.failing_gets -= 1;
            return Err(ClientError::Unavailable("injected failure".to_string()));
        }

        let status = state
            .jobs
            .get_mut(id)
            .ok_or_else(|| ClientError::NotFound(id.to_string()))?
            .advance();
        state.calls.push(Call::Get {
            id: id.clone(),
            status: status.clone(),
        });
        Ok(status)
    }

    async fn list_workloads_by_label(
        &self,
        label: &Label,
        name: &str,
        states: &[JobState],
    ) -> Result<Vec<JobId>, ClientError> {
        let mut state = self.lock();
        state.calls.push(Call::List {
            label: label.to_string(),
            name: name.to_string(),
        });

        Ok(state
            .jobs
            .iter()
            .filter(|(_, job)| job.spec.owner() == Some(label.as_str()))
            .filter(|(_, job)| name.is_empty() || job.spec.name == name)
            .filter(|(_, job)| states.is_empty() || states.contains(&job.current.state))
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn list_tasks(&self, id: &JobId) -> Result<Vec<TaskInfo>, ClientError> {
        let mut state = self.lock();
        state.calls.push(Call::ListTasks(id.clone()));

        let job = state
            .jobs
            .get(id)
            .ok_or_else(|| ClientError::NotFound(id.to_string()))?;

        Ok((0..job.spec.instance_count)
            .map(|i| {
                let config = job.spec.config_for(i);
                let host = config
                    .command
                    .environment
                    .get("MESOS_HOSTNAME")
                    .cloned()
                    .unwrap_or_else(|| format!("fake-host-{i}"));
                let ports = config
                    .ports
                    .iter()
                    .map(|p| {
                        let value = if p.value == 0 {
                            DYNAMIC_PORT_BASE + i
                        } else {
                            p.value
                        };
                        (p.name.clone(), value)
                    })
                    .collect();
                TaskInfo {
                    instance_id: i,
                    state: job.current.state,
                    host: Some(host),
                    ports,
                }
            })
            .collect())
    }

    async fn create_resource_pool(&self, config: &ResourcePoolConfig) -> Result<(), ClientError> {
        let mut state = self.lock();
        state.calls.push(Call::CreatePool(config.name.clone()));
        if state.reject_creates {
            return Err(ClientError::InvalidConfig(format!(
                "rejected pool {}",
                config.name
            )));
        }

        let path = config.path();
        if state.pools.contains_key(&path) {
            return Err(ClientError::AlreadyExists(path));
        }
        state.pools.insert(path, ResourcePoolId::generate());
        Ok(())
    }

    async fn lookup_resource_pool(&self, path: &str) -> Result<ResourcePoolId, ClientError> {
        let mut state = self.lock();
        state.calls.push(Call::LookupPool(path.to_string()));
        if let Some(make) = state.pool_lookup_error {
            return Err(make(path.to_string()));
        }

        if !path.starts_with('/') {
            return Err(ClientError::InvalidPath(path.to_string()));
        }
        state
            .pools
            .get(path)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(path.to_string()))
    }
}
