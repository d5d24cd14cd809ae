//! Scheduler capability set consumed by vcluster.

use async_trait::async_trait;
use thiserror::Error;
use vcluster_id::{JobId, Label, ResourcePoolId};

use crate::types::{JobState, ResourcePoolConfig, TaskInfo, WorkloadSpec, WorkloadStatus};

/// Errors returned by a scheduler client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network failure, timeout or server overload. Worth retrying.
    #[error("scheduler unavailable: {0}")]
    Unavailable(String),

    /// The scheduler rejected a job or pool configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// A resource with the same name already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A resource pool path is malformed.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The operation is not allowed in the resource's current state.
    #[error("{id} cannot be modified in state {state}")]
    InvalidState { id: String, state: String },

    /// RPC-level failure that fits none of the above.
    #[error("{procedure} failed with status {status}: {message}")]
    Rpc {
        procedure: String,
        status: u16,
        message: String,
    },

    /// The response could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl ClientError {
    /// Returns true if retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Scheduler control-plane operations.
///
/// Implementations must be safe to call concurrently from independent tasks;
/// the scheduler itself serializes conflicting writes to the same job.
#[async_trait]
pub trait SchedulerClient: Send + Sync {
    /// Submit a new job. Fails with `InvalidConfig` if the spec is rejected.
    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<JobId, ClientError>;

    /// Stop all tasks of a job. Stopping an already stopped job is not an error.
    async fn stop_workload(&self, id: &JobId) -> Result<(), ClientError>;

    /// Delete a job. Fails with `InvalidState` while the job is mid-transition.
    async fn delete_workload(&self, id: &JobId) -> Result<(), ClientError>;

    /// Aggregate state of a job and the per-state instance counts.
    async fn get_workload(&self, id: &JobId) -> Result<WorkloadStatus, ClientError>;

    /// Jobs owned by `label` named exactly `name`. An empty `name` matches
    /// every job of the label; an empty `states` slice matches every state.
    async fn list_workloads_by_label(
        &self,
        label: &Label,
        name: &str,
        states: &[JobState],
    ) -> Result<Vec<JobId>, ClientError>;

    /// Runtime of every task instance of a job, ordered by instance id.
    async fn list_tasks(&self, id: &JobId) -> Result<Vec<TaskInfo>, ClientError>;

    /// Create a resource pool. A name collision yields `AlreadyExists`.
    async fn create_resource_pool(&self, config: &ResourcePoolConfig) -> Result<(), ClientError>;

    /// Resolve a pool path such as `/vcluster` to its ID.
    async fn lookup_resource_pool(&self, path: &str) -> Result<ResourcePoolId, ClientError>;
}
