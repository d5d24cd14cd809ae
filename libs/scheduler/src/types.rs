//! Job, task and resource pool types as exchanged with the scheduler.
//!
//! Field names follow the scheduler's JSON encoding (camelCase), so these
//! types double as the wire format of the RPC client.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use vcluster_converge::Observation;
use vcluster_id::{Label, ResourcePoolId};

/// Reported state of a job, or of one of its task instances.
///
/// Jobs and tasks share one state namespace: the per-state instance counts of
/// a job are keyed by task states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobState {
    Unknown,
    Uninitialized,
    Initialized,
    Pending,
    Ready,
    Placing,
    Placed,
    Launching,
    Launched,
    Starting,
    Running,
    Succeeded,
    Failed,
    Lost,
    Preempting,
    Killing,
    Killed,
    Deleted,
}

impl JobState {
    /// Job states after which nothing else happens without user action.
    pub const TERMINAL: [JobState; 3] = [JobState::Succeeded, JobState::Failed, JobState::Killed];

    /// Job states in which tasks may still be running.
    pub const ACTIVE: [JobState; 4] = [
        JobState::Initialized,
        JobState::Pending,
        JobState::Running,
        JobState::Killing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Unknown => "UNKNOWN",
            JobState::Uninitialized => "UNINITIALIZED",
            JobState::Initialized => "INITIALIZED",
            JobState::Pending => "PENDING",
            JobState::Ready => "READY",
            JobState::Placing => "PLACING",
            JobState::Placed => "PLACED",
            JobState::Launching => "LAUNCHING",
            JobState::Launched => "LAUNCHED",
            JobState::Starting => "STARTING",
            JobState::Running => "RUNNING",
            JobState::Succeeded => "SUCCEEDED",
            JobState::Failed => "FAILED",
            JobState::Lost => "LOST",
            JobState::Preempting => "PREEMPTING",
            JobState::Killing => "KILLING",
            JobState::Killed => "KILLED",
            JobState::Deleted => "DELETED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        Self::TERMINAL.contains(self)
    }

    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = std::convert::Infallible;

    /// Unrecognized names map to `Unknown`; newer schedulers add states.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let state = match s.to_ascii_uppercase().as_str() {
            "UNINITIALIZED" => JobState::Uninitialized,
            "INITIALIZED" => JobState::Initialized,
            "PENDING" => JobState::Pending,
            "READY" => JobState::Ready,
            "PLACING" => JobState::Placing,
            "PLACED" => JobState::Placed,
            "LAUNCHING" => JobState::Launching,
            "LAUNCHED" => JobState::Launched,
            "STARTING" => JobState::Starting,
            "RUNNING" => JobState::Running,
            "SUCCEEDED" => JobState::Succeeded,
            "FAILED" => JobState::Failed,
            "LOST" => JobState::Lost,
            "PREEMPTING" => JobState::Preempting,
            "KILLING" => JobState::Killing,
            "KILLED" => JobState::Killed,
            "DELETED" => JobState::Deleted,
            _ => JobState::Unknown,
        };
        Ok(state)
    }
}

impl From<String> for JobState {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(state) => state,
            Err(never) => match never {},
        }
    }
}

impl From<JobState> for String {
    fn from(state: JobState) -> Self {
        state.as_str().to_string()
    }
}

/// `{ "value": ... }` wrapper used for IDs and paths on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Value<T> {
    pub value: T,
}

impl<T> Value<T> {
    pub fn new(value: T) -> Self {
        Self { value }
    }
}

/// Key/value label attached to a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLabel {
    pub key: String,
    pub value: String,
}

/// Label key under which a job records the test cluster that owns it.
pub const OWNER_LABEL_KEY: &str = "vcluster";

impl JobLabel {
    /// The ownership label for `label`.
    pub fn owner(label: &Label) -> Self {
        Self {
            key: OWNER_LABEL_KEY.to_string(),
            value: label.to_string(),
        }
    }
}

/// Job type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    #[default]
    Batch,
    Service,
}

/// Container image and options for a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerConfig {
    pub image: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub network_host: bool,
}

/// Command line run inside the container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub shell: bool,
}

/// Resource limits for one task instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceConfig {
    pub cpu_limit: f64,
    pub mem_limit_mb: f64,
    pub disk_limit_mb: f64,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            cpu_limit: 1.0,
            mem_limit_mb: 512.0,
            disk_limit_mb: 1024.0,
        }
    }
}

/// Named port a task wants; `value == 0` asks for a dynamic port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortConfig {
    pub name: String,
    #[serde(default)]
    pub value: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_name: Option<String>,
}

/// Configuration of one task instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskConfig {
    pub name: String,
    pub container: ContainerConfig,
    pub command: CommandConfig,
    pub resource: ResourceConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortConfig>,
}

/// Desired configuration of a workload (job).
///
/// `instance_config` holds per-instance overrides keyed by instance index;
/// instances without an entry run `default_config`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSpec {
    pub name: String,
    #[serde(rename = "type", default)]
    pub job_type: JobType,
    #[serde(default)]
    pub owning_team: String,
    #[serde(default)]
    pub labels: Vec<JobLabel>,
    pub instance_count: u32,
    pub default_config: TaskConfig,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub instance_config: BTreeMap<u32, TaskConfig>,
    #[serde(
        rename = "respoolID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub respool_id: Option<Value<ResourcePoolId>>,
}

impl WorkloadSpec {
    /// A spec running `instance_count` copies of `default_config`.
    pub fn new(name: impl Into<String>, instance_count: u32, default_config: TaskConfig) -> Self {
        Self {
            name: name.into(),
            job_type: JobType::Batch,
            owning_team: "vcluster".to_string(),
            labels: Vec::new(),
            instance_count,
            default_config,
            instance_config: BTreeMap::new(),
            respool_id: None,
        }
    }

    /// The owner label value, if the spec carries one.
    pub fn owner(&self) -> Option<&str> {
        self.labels
            .iter()
            .find(|l| l.key == OWNER_LABEL_KEY)
            .map(|l| l.value.as_str())
    }

    /// Effective configuration of instance `index`.
    pub fn config_for(&self, index: u32) -> &TaskConfig {
        self.instance_config
            .get(&index)
            .unwrap_or(&self.default_config)
    }
}

/// Aggregate runtime state of a workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadStatus {
    pub state: JobState,
    #[serde(default)]
    pub task_stats: BTreeMap<JobState, u32>,
}

impl WorkloadStatus {
    pub fn new(state: JobState, task_stats: impl IntoIterator<Item = (JobState, u32)>) -> Self {
        Self {
            state,
            task_stats: task_stats.into_iter().collect(),
        }
    }

    /// Number of instances currently in `state`.
    pub fn count(&self, state: JobState) -> u32 {
        self.task_stats.get(&state).copied().unwrap_or(0)
    }

    /// The status as a convergence observation.
    pub fn observation(&self) -> Observation<JobState> {
        Observation::with_counts(self.state, self.task_stats.clone())
    }
}

/// Runtime of one task instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    pub instance_id: u32,
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default)]
    pub ports: BTreeMap<String, u32>,
}

/// One resource dimension of a pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub kind: String,
    pub reservation: f64,
    pub limit: f64,
    pub share: f64,
}

/// Root of the resource pool tree.
pub const RESPOOL_ROOT: &str = "/";

/// Configuration of a resource pool directly under the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePoolConfig {
    pub name: String,
    #[serde(default)]
    pub resources: Vec<ResourceSpec>,
    #[serde(default = "default_policy")]
    pub policy: String,
}

impl ResourcePoolConfig {
    /// Hierarchical path of this pool, e.g. `/vcluster`.
    pub fn path(&self) -> String {
        format!("{RESPOOL_ROOT}{}", self.name)
    }
}

/// Format per-state counts for debug logs: `pending: 2 running: 3`.
pub fn format_stats(stats: &BTreeMap<JobState, u32>) -> String {
    stats
        .iter()
        .map(|(state, n)| format!("{}: {n}", state.as_str().to_lowercase()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn default_policy() -> String {
    "PriorityFIFO".to_string()
}

fn is_false(b: &bool) -> bool {
    !*b
}
