//! Cluster service modules.
//!
//! A [`Module`] owns the jobs of one cluster service, scoped by the cluster
//! label. Setup renders one task config per instance, submits a single
//! multi-instance job and waits until at least one instance runs. Teardown
//! finds the service's jobs by label, stops them and waits until no instance
//! runs; with `remove` it also waits out KILLING and deletes them.
//!
//! # Invariants
//!
//! - At most one job per module between a setup and the next teardown
//! - Delete is never issued before KILLING count 0 has been observed

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;
use vcluster_converge::{PollConfig, StatusPredicate};
use vcluster_id::{JobId, Label, ResourcePoolId};
use vcluster_scheduler::{JobLabel, JobState, SchedulerClient, TaskConfig, WorkloadSpec};

use crate::error::{Error, Result};
use crate::workload::Workload;

/// Port name under which ZooKeeper tasks publish their client port.
pub const ZOO_PORT: &str = "ZOO_PORT";

/// Peloton control-plane components, in bring-up order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PelotonComponent {
    ResourceManager,
    HostManager,
    Placement,
    JobManager,
}

impl PelotonComponent {
    pub const ALL: [PelotonComponent; 4] = [
        PelotonComponent::ResourceManager,
        PelotonComponent::HostManager,
        PelotonComponent::Placement,
        PelotonComponent::JobManager,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PelotonComponent::ResourceManager => "resmgr",
            PelotonComponent::HostManager => "hostmgr",
            PelotonComponent::Placement => "placement",
            PelotonComponent::JobManager => "jobmgr",
        }
    }
}

/// Which cluster service a module runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    Zookeeper,
    MesosMaster,
    MesosAgent,
    Cassandra,
    Peloton(PelotonComponent),
}

impl ModuleKind {
    /// Module name; also the suffix of the default job name.
    pub fn name(&self) -> String {
        match self {
            ModuleKind::Zookeeper => "zookeeper".to_string(),
            ModuleKind::MesosMaster => "mesos-master".to_string(),
            ModuleKind::MesosAgent => "mesos-agent".to_string(),
            ModuleKind::Cassandra => "cassandra".to_string(),
            ModuleKind::Peloton(component) => format!("peloton_{}", component.as_str()),
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Lifecycle of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Unconfigured,
    SettingUp,
    Running,
    TearingDown,
    Stopped,
}

/// Inputs available when rendering an instance's config.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub label: &'a Label,
    pub module: &'a str,
    pub version: Option<&'a str>,
    /// Environment computed at bring-up time, e.g. the ZooKeeper endpoint.
    pub env: &'a BTreeMap<String, String>,
}

/// Produces the task config of each instance of a module's job.
pub trait InstanceConfigRenderer: Send + Sync {
    fn render(&self, ctx: &RenderContext<'_>, index: u32) -> TaskConfig;
}

/// Every instance runs the same config.
#[derive(Debug, Clone)]
pub struct SharedConfig {
    template: TaskConfig,
}

impl SharedConfig {
    pub fn new(template: TaskConfig) -> Self {
        Self { template }
    }
}

impl InstanceConfigRenderer for SharedConfig {
    fn render(&self, ctx: &RenderContext<'_>, _index: u32) -> TaskConfig {
        render_base(&self.template, ctx)
    }
}

/// Compute agents: each instance gets its own `MESOS_HOSTNAME`, so agents
/// sharing a physical host register as distinct agents.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    template: TaskConfig,
}

impl AgentConfig {
    pub fn new(template: TaskConfig) -> Self {
        Self { template }
    }
}

impl InstanceConfigRenderer for AgentConfig {
    fn render(&self, ctx: &RenderContext<'_>, index: u32) -> TaskConfig {
        let mut config = render_base(&self.template, ctx);
        let hostname = format!("{}-{}-{index}-{}", ctx.label, ctx.module, Uuid::new_v4());
        config
            .command
            .environment
            .insert("MESOS_HOSTNAME".to_string(), hostname);
        config
    }
}

fn render_base(template: &TaskConfig, ctx: &RenderContext<'_>) -> TaskConfig {
    let mut config = template.clone();
    if config.name.is_empty() {
        config.name = ctx.module.to_string();
    }
    config
        .command
        .environment
        .extend(ctx.env.iter().map(|(k, v)| (k.clone(), v.clone())));
    if let Some(version) = ctx.version {
        config.container.image = with_tag(&config.container.image, version);
    }
    config
}

/// Replace (or add) the tag of an image reference.
fn with_tag(image: &str, tag: &str) -> String {
    let name_start = image.rfind('/').map_or(0, |i| i + 1);
    let repo = match image[name_start..].find(':') {
        Some(i) => &image[..name_start + i],
        None => image,
    };
    format!("{repo}:{tag}")
}

/// One cluster service.
pub struct Module {
    kind: ModuleKind,
    name: String,
    label: Label,
    client: Arc<dyn SchedulerClient>,
    renderer: Box<dyn InstanceConfigRenderer>,
    poll: PollConfig,
    shutdown: Option<watch::Receiver<bool>>,
    respool: Option<ResourcePoolId>,
    version: Option<String>,
    job_name: Option<String>,
    job_id: Option<JobId>,
    state: ModuleState,
}

impl Module {
    /// A module rendering `template` with the kind's default renderer.
    pub fn new(
        kind: ModuleKind,
        label: Label,
        client: Arc<dyn SchedulerClient>,
        template: TaskConfig,
    ) -> Self {
        let renderer: Box<dyn InstanceConfigRenderer> = match kind {
            ModuleKind::MesosAgent => Box::new(AgentConfig::new(template)),
            _ => Box::new(SharedConfig::new(template)),
        };
        Self {
            kind,
            name: kind.name(),
            label,
            client,
            renderer,
            poll: PollConfig::default(),
            shutdown: None,
            respool: None,
            version: None,
            job_name: None,
            job_id: None,
            state: ModuleState::Unconfigured,
        }
    }

    pub fn with_renderer(mut self, renderer: Box<dyn InstanceConfigRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.set_poll_config(poll);
        self
    }

    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.set_shutdown(shutdown);
        self
    }

    pub fn set_poll_config(&mut self, poll: PollConfig) {
        self.poll = poll;
    }

    pub fn set_shutdown(&mut self, shutdown: watch::Receiver<bool>) {
        self.shutdown = Some(shutdown);
    }

    /// Submit jobs into `pool`.
    pub fn set_resource_pool(&mut self, pool: ResourcePoolId) {
        self.respool = Some(pool);
    }

    pub fn kind(&self) -> ModuleKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn label(&self) -> &Label {
        &self.label
    }

    pub fn state(&self) -> ModuleState {
        self.state
    }

    pub fn job_id(&self) -> Option<&JobId> {
        self.job_id.as_ref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// `{label}_{name}`.
    pub fn default_job_name(&self) -> String {
        format!("{}_{}", self.label, self.name)
    }

    /// Bring the service up and wait until at least one instance runs.
    ///
    /// On timeout or failure the job is left in place for inspection.
    pub async fn setup(
        &mut self,
        dynamic_env: &BTreeMap<String, String>,
        instance_count: u32,
        job_name: Option<&str>,
        version: Option<&str>,
    ) -> Result<JobId> {
        if let Some(id) = &self.job_id {
            return Err(Error::Config(format!(
                "module {} is already set up as {id}; tear it down first",
                self.name
            )));
        }
        if instance_count == 0 {
            return Err(Error::Config(format!(
                "module {} needs at least one instance",
                self.name
            )));
        }

        self.state = ModuleState::SettingUp;
        self.version = version.map(str::to_string);
        let job_name = job_name.map_or_else(|| self.default_job_name(), str::to_string);

        let ctx = RenderContext {
            label: &self.label,
            module: &self.name,
            version,
            env: dynamic_env,
        };
        let configs: Vec<TaskConfig> = (0..instance_count)
            .map(|i| self.renderer.render(&ctx, i))
            .collect();

        let mut spec = WorkloadSpec::new(job_name.clone(), instance_count, configs[0].clone());
        if configs.iter().any(|c| c != &configs[0]) {
            spec.instance_config = (0..instance_count).zip(configs).collect();
        }
        spec.labels.push(JobLabel::owner(&self.label));

        let mut workload = self.workload(spec);
        if let Some(pool) = &self.respool {
            workload.bind_pool(pool.clone())?;
        }

        let id = workload.create().await?;
        self.job_name = Some(job_name);
        self.job_id = Some(id.clone());

        info!(
            module = %self.name,
            label = %self.label,
            job_id = %id,
            instances = instance_count,
            "Waiting for module to start"
        );

        let running = StatusPredicate::instance_count(JobState::Running, 1.0..)?;
        if let Err(e) = workload.wait_for(&running).await {
            warn!(module = %self.name, job_id = %id, error = %e, "Module failed to start");
            return Err(Error::launch(self.name.clone(), e));
        }

        self.state = ModuleState::Running;
        info!(module = %self.name, job_id = %id, "Module running");
        Ok(id)
    }

    /// Stop every job of this module and wait until none of its instances
    /// runs. With `remove`, wait for KILLING to drain and delete the jobs.
    ///
    /// Returns the IDs of the jobs torn down.
    pub async fn teardown(&mut self, job_name: Option<&str>, remove: bool) -> Result<Vec<JobId>> {
        self.state = ModuleState::TearingDown;
        let job_name = job_name
            .map(str::to_string)
            .or_else(|| self.job_name.clone())
            .unwrap_or_else(|| self.default_job_name());

        let states: &[JobState] = if remove { &[] } else { &[JobState::Running] };
        let ids = self
            .client
            .list_workloads_by_label(&self.label, &job_name, states)
            .await?;

        let stopped = StatusPredicate::instance_count(JobState::Running, ..=0.0)?;
        let drained = StatusPredicate::instance_count(JobState::Killing, ..=0.0)?;

        for id in &ids {
            info!(module = %self.name, job_id = %id, remove, "Tearing down job");
            let mut workload =
                self.attach(WorkloadSpec::new(job_name.clone(), 0, TaskConfig::default()), id);

            workload.stop().await?;
            workload.wait_for(&stopped).await?;

            if remove {
                workload.wait_for(&drained).await?;
                workload.delete().await?;
            }
        }

        self.job_id = None;
        self.job_name = None;
        self.state = ModuleState::Stopped;
        info!(module = %self.name, jobs = ids.len(), "Module torn down");
        Ok(ids)
    }

    /// Host and `port_name` port of the module's first task.
    pub async fn task_endpoint(&self, port_name: &str) -> Result<(String, u32)> {
        let id = match &self.job_id {
            Some(id) => id.clone(),
            None => {
                let job_name = self
                    .job_name
                    .clone()
                    .unwrap_or_else(|| self.default_job_name());
                self.client
                    .list_workloads_by_label(&self.label, &job_name, &[JobState::Running])
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| {
                        Error::Config(format!("module {} has no running job", self.name))
                    })?
            }
        };

        let tasks = self.client.list_tasks(&id).await?;
        let task = tasks
            .first()
            .ok_or_else(|| Error::Config(format!("job {id} of {} has no tasks", self.name)))?;
        let host = task
            .host
            .clone()
            .ok_or_else(|| Error::Config(format!("task 0 of {id} is not placed yet")))?;
        let port = task.ports.get(port_name).copied().ok_or_else(|| {
            Error::Config(format!("task 0 of {id} has no port named {port_name}"))
        })?;
        Ok((host, port))
    }

    /// ZooKeeper client endpoint of this module.
    pub async fn host_port(&self) -> Result<(String, u32)> {
        if self.kind != ModuleKind::Zookeeper {
            return Err(Error::Config(format!(
                "module {} does not serve a coordination endpoint",
                self.name
            )));
        }
        self.task_endpoint(ZOO_PORT).await
    }

    fn workload(&self, spec: WorkloadSpec) -> Workload {
        let workload =
            Workload::new(Arc::clone(&self.client), spec).with_poll_config(self.poll);
        match &self.shutdown {
            Some(shutdown) => workload.with_shutdown(shutdown.clone()),
            None => workload,
        }
    }

    fn attach(&self, spec: WorkloadSpec, id: &JobId) -> Workload {
        let workload = Workload::attach(Arc::clone(&self.client), spec, id.clone())
            .with_poll_config(self.poll);
        match &self.shutdown {
            Some(shutdown) => workload.with_shutdown(shutdown.clone()),
            None => workload,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use rstest::rstest;
    use vcluster_scheduler::{PortConfig, WorkloadStatus};
    use vcluster_testing::{Call, FakeScheduler};

    use super::*;
    use crate::error::ErrorKind;

    fn label() -> Label {
        Label::parse("l1").unwrap()
    }

    fn module(fake: &Arc<FakeScheduler>, kind: ModuleKind) -> Module {
        let client: Arc<dyn SchedulerClient> = fake.clone();
        let mut template = TaskConfig::default();
        template.container.image = "registry.local:5000/zookeeper:3.4.10".to_string();
        template.ports.push(PortConfig {
            name: ZOO_PORT.to_string(),
            value: 0,
            env_name: None,
        });
        Module::new(kind, label(), client, template)
            .with_poll_config(PollConfig::new(5, Duration::from_secs(1)))
    }

    #[rstest]
    #[case("zookeeper:3.4.10", "zookeeper:3.5.0")]
    #[case("zookeeper", "zookeeper:3.5.0")]
    #[case("registry.local:5000/zookeeper", "registry.local:5000/zookeeper:3.5.0")]
    #[case("registry.local:5000/zk/zookeeper:old", "registry.local:5000/zk/zookeeper:3.5.0")]
    fn test_with_tag(#[case] image: &str, #[case] expected: &str) {
        assert_eq!(with_tag(image, "3.5.0"), expected);
    }

    #[test]
    fn test_names() {
        assert_eq!(ModuleKind::MesosAgent.name(), "mesos-agent");
        assert_eq!(
            ModuleKind::Peloton(PelotonComponent::JobManager).name(),
            "peloton_jobmgr"
        );
    }

    #[test]
    fn test_agent_hostnames_are_distinct() {
        let renderer = AgentConfig::new(TaskConfig::default());
        let label = label();
        let env = BTreeMap::new();
        let ctx = RenderContext {
            label: &label,
            module: "mesos-agent",
            version: None,
            env: &env,
        };

        let hostnames: Vec<String> = (0..3)
            .map(|i| renderer.render(&ctx, i).command.environment["MESOS_HOSTNAME"].clone())
            .collect();

        for (i, hostname) in hostnames.iter().enumerate() {
            assert!(hostname.starts_with(&format!("l1-mesos-agent-{i}-")));
        }
        let unique: HashSet<_> = hostnames.iter().collect();
        assert_eq!(unique.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_submits_labelled_job() {
        let fake = Arc::new(FakeScheduler::new());
        let mut zk = module(&fake, ModuleKind::Zookeeper);
        let env = BTreeMap::from([("ZK_DATA".to_string(), "/tmp".to_string())]);

        let id = zk.setup(&env, 3, None, Some("3.5.0")).await.unwrap();

        assert_eq!(zk.state(), ModuleState::Running);
        assert_eq!(zk.job_id(), Some(&id));
        let spec = fake.spec(&id).unwrap();
        assert_eq!(spec.name, "l1_zookeeper");
        assert_eq!(spec.owner(), Some("l1"));
        assert_eq!(spec.instance_count, 3);
        assert!(spec.instance_config.is_empty());
        assert_eq!(
            spec.default_config.container.image,
            "registry.local:5000/zookeeper:3.5.0"
        );
        assert_eq!(spec.default_config.command.environment["ZK_DATA"], "/tmp");
    }

    #[tokio::test(start_paused = true)]
    async fn test_agent_setup_fans_out_instance_configs() {
        let fake = Arc::new(FakeScheduler::new());
        let mut agents = module(&fake, ModuleKind::MesosAgent);

        let id = agents.setup(&BTreeMap::new(), 3, None, None).await.unwrap();

        let spec = fake.spec(&id).unwrap();
        assert_eq!(spec.instance_config.len(), 3);
        let hostnames: HashSet<_> = (0..3)
            .map(|i| spec.config_for(i).command.environment["MESOS_HOSTNAME"].clone())
            .collect();
        assert_eq!(hostnames.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_setup_requires_teardown() {
        let fake = Arc::new(FakeScheduler::new());
        let mut zk = module(&fake, ModuleKind::Zookeeper);
        zk.setup(&BTreeMap::new(), 1, None, None).await.unwrap();

        let err = zk.setup(&BTreeMap::new(), 1, None, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);

        zk.teardown(None, false).await.unwrap();
        zk.setup(&BTreeMap::new(), 1, None, None).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_timeout_is_launch_error() {
        let fake = Arc::new(FakeScheduler::new());
        fake.script(
            "l1_zookeeper",
            vec![WorkloadStatus::new(JobState::Pending, [(JobState::Pending, 1)])],
        );
        let mut zk = module(&fake, ModuleKind::Zookeeper);

        let err = zk.setup(&BTreeMap::new(), 1, None, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Launch);
        assert!(matches!(&err, Error::Launch { source, .. } if source.kind() == ErrorKind::Timeout));
        // The job stays in place.
        let id = zk.job_id().unwrap().clone();
        assert!(!fake.is_deleted(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_without_remove_never_deletes() {
        let fake = Arc::new(FakeScheduler::new());
        let mut zk = module(&fake, ModuleKind::Zookeeper);
        let id = zk.setup(&BTreeMap::new(), 2, None, None).await.unwrap();

        let ids = zk.teardown(None, false).await.unwrap();

        assert_eq!(ids, vec![id.clone()]);
        assert_eq!(zk.state(), ModuleState::Stopped);
        assert_eq!(zk.job_id(), None);
        assert_eq!(fake.count_calls(|c| matches!(c, Call::Delete(_))), 0);
        assert!(!fake.is_deleted(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_finds_job_under_custom_name() {
        let fake = Arc::new(FakeScheduler::new());
        let mut zk = module(&fake, ModuleKind::Zookeeper);
        let id = zk
            .setup(&BTreeMap::new(), 1, Some("custom"), None)
            .await
            .unwrap();

        let ids = zk.teardown(None, false).await.unwrap();

        assert_eq!(ids, vec![id.clone()]);
        assert_eq!(fake.count_calls(|c| matches!(c, Call::Stop(s) if s == &id)), 1);
        assert_eq!(zk.job_id(), None);

        // The original job is stopped before a second setup is accepted.
        let status = fake.get_workload(&id).await.unwrap();
        assert_eq!(status.count(JobState::Running), 0);
        zk.setup(&BTreeMap::new(), 1, Some("custom"), None)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_remove_deletes_after_killing_drains() {
        let fake = Arc::new(FakeScheduler::new());
        fake.script_stop(
            "l1_zookeeper",
            vec![
                WorkloadStatus::new(JobState::Killing, [(JobState::Killing, 2)]),
                WorkloadStatus::new(
                    JobState::Killing,
                    [(JobState::Killing, 1), (JobState::Killed, 1)],
                ),
                WorkloadStatus::new(JobState::Killed, [(JobState::Killed, 2)]),
            ],
        );
        let mut zk = module(&fake, ModuleKind::Zookeeper);
        let id = zk.setup(&BTreeMap::new(), 2, None, None).await.unwrap();

        zk.teardown(None, true).await.unwrap();
        assert!(fake.is_deleted(&id));

        // The last observation before the delete has no KILLING instances.
        let calls = fake.calls();
        let delete_at = calls
            .iter()
            .position(|c| matches!(c, Call::Delete(d) if d == &id))
            .unwrap();
        let last_get = calls[..delete_at]
            .iter()
            .rev()
            .find_map(|c| match c {
                Call::Get { id: g, status } if g == &id => Some(status.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(last_get.count(JobState::Killing), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_port() {
        let fake = Arc::new(FakeScheduler::new());
        let mut zk = module(&fake, ModuleKind::Zookeeper);
        zk.setup(&BTreeMap::new(), 3, None, None).await.unwrap();

        let (host, port) = zk.host_port().await.unwrap();
        assert_eq!(host, "fake-host-0");
        assert_eq!(port, 31000);

        let agents = module(&fake, ModuleKind::MesosAgent);
        assert_eq!(agents.host_port().await.unwrap_err().kind(), ErrorKind::Config);
    }
}
