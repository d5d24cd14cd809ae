//! Virtual cluster orchestration.
//!
//! Bring-up order is ZooKeeper, Mesos master (then its leader election),
//! Mesos agents together with Cassandra, and finally the Peloton components
//! one by one. Teardown walks the same modules in reverse.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;
use vcluster_converge::PollConfig;
use vcluster_id::{JobId, Label};
use vcluster_scheduler::{SchedulerClient, WorkloadStatus};

use crate::config::ClusterSpec;
use crate::error::Result;
use crate::leader::LeaderLookup;
use crate::module::{Module, ModuleKind, PelotonComponent};
use crate::respool::ResourcePoolBinder;

/// Port name under which Cassandra tasks publish the CQL port.
pub const CASSANDRA_PORT: &str = "CQL_PORT";

/// Endpoints of a cluster after bring-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterInfo {
    pub label: Label,
    /// `host:port` of ZooKeeper.
    pub zookeeper: String,
    /// Elected Mesos master, when leader discovery is configured.
    pub mesos_leader: Option<(String, u16)>,
    /// `host:port` of Cassandra.
    pub cassandra: String,
    /// Job of each module, in bring-up order.
    pub jobs: Vec<(String, JobId)>,
}

/// State of one job of a module.
#[derive(Debug, Clone)]
pub struct ModuleStatus {
    pub module: String,
    pub job_id: JobId,
    pub status: WorkloadStatus,
}

/// A label-scoped virtual cluster.
pub struct VirtualCluster {
    label: Label,
    spec: ClusterSpec,
    client: Arc<dyn SchedulerClient>,
    binder: ResourcePoolBinder,
    leader: Option<LeaderLookup>,
    shutdown: Option<watch::Receiver<bool>>,
    poll: PollConfig,
    zookeeper: Module,
    mesos_master: Module,
    mesos_agent: Module,
    cassandra: Module,
    peloton: Vec<Module>,
}

impl VirtualCluster {
    pub fn new(label: Label, spec: ClusterSpec, client: Arc<dyn SchedulerClient>) -> Self {
        let binder = ResourcePoolBinder::new(Arc::clone(&client));
        let module = |kind: ModuleKind, template| {
            Module::new(kind, label.clone(), Arc::clone(&client), template)
        };

        let zookeeper = module(ModuleKind::Zookeeper, spec.zookeeper.task_config("zookeeper"));
        let mesos_master = module(
            ModuleKind::MesosMaster,
            spec.mesos_master.task_config("mesos-master"),
        );
        let mesos_agent = module(
            ModuleKind::MesosAgent,
            spec.mesos_agent.task_config("mesos-agent"),
        );
        let cassandra = module(ModuleKind::Cassandra, spec.cassandra.task_config("cassandra"));
        let peloton = PelotonComponent::ALL
            .iter()
            .map(|&component| {
                let kind = ModuleKind::Peloton(component);
                module(kind, spec.peloton.module.task_config(&kind.name()))
            })
            .collect();

        Self {
            label,
            spec,
            client,
            binder,
            leader: None,
            shutdown: None,
            poll: PollConfig::default(),
            zookeeper,
            mesos_master,
            mesos_agent,
            cassandra,
            peloton,
        }
    }

    /// Discover the Mesos leader after the master comes up.
    pub fn with_leader_lookup(mut self, lookup: LeaderLookup) -> Self {
        self.leader = Some(match &self.shutdown {
            Some(shutdown) => lookup.with_shutdown(shutdown.clone()),
            None => lookup,
        });
        self
    }

    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        for module in self.modules_mut() {
            module.set_poll_config(poll);
        }
        self
    }

    /// Cancel in-flight module and leader polls once `shutdown` flips to
    /// `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        for module in self.modules_mut() {
            module.set_shutdown(shutdown.clone());
        }
        self.leader = self
            .leader
            .take()
            .map(|lookup| lookup.with_shutdown(shutdown.clone()));
        self.shutdown = Some(shutdown);
        self
    }

    pub fn label(&self) -> &Label {
        &self.label
    }

    /// Modules in bring-up order.
    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        [
            &self.zookeeper,
            &self.mesos_master,
            &self.mesos_agent,
            &self.cassandra,
        ]
        .into_iter()
        .chain(self.peloton.iter())
    }

    /// Bring the whole cluster up.
    pub async fn setup(&mut self) -> Result<ClusterInfo> {
        info!(label = %self.label, "Setting up virtual cluster");

        let pool = self.binder.ensure(&self.spec.respool.pool_config()).await?;
        for module in self.modules_mut() {
            module.set_resource_pool(pool.clone());
        }

        let mut jobs = Vec::new();
        let no_env = BTreeMap::new();

        let id = self
            .zookeeper
            .setup(&no_env, self.spec.zookeeper.instances, None, None)
            .await?;
        jobs.push((self.zookeeper.name().to_string(), id));
        let (zk_host, zk_port) = self.zookeeper.host_port().await?;
        let zookeeper = format!("{zk_host}:{zk_port}");
        let mesos_zk = format!("zk://{zookeeper}/mesos");
        info!(zookeeper = %zookeeper, "ZooKeeper is up");

        let master_env = BTreeMap::from([
            ("MESOS_ZK".to_string(), mesos_zk.clone()),
            (
                "MESOS_QUORUM".to_string(),
                (self.spec.mesos_master.instances / 2 + 1).to_string(),
            ),
        ]);
        let id = self
            .mesos_master
            .setup(&master_env, self.spec.mesos_master.instances, None, None)
            .await?;
        jobs.push((self.mesos_master.name().to_string(), id));

        let mesos_leader = match &self.leader {
            Some(lookup) => Some(lookup.wait_for_leader(self.poll).await?),
            None => None,
        };

        let agent_env = BTreeMap::from([("MESOS_MASTER".to_string(), mesos_zk.clone())]);
        let agent_count = self.spec.mesos_agent.instances;
        let cassandra_count = self.spec.cassandra.instances;
        let (agent_id, cassandra_id) = tokio::try_join!(
            self.mesos_agent.setup(&agent_env, agent_count, None, None),
            self.cassandra.setup(&no_env, cassandra_count, None, None),
        )?;
        jobs.push((self.mesos_agent.name().to_string(), agent_id));
        jobs.push((self.cassandra.name().to_string(), cassandra_id));

        let (cassandra_host, cassandra_port) =
            self.cassandra.task_endpoint(CASSANDRA_PORT).await?;
        let cassandra = format!("{cassandra_host}:{cassandra_port}");

        let peloton_count = self.spec.peloton.module.instances;
        let version = self.spec.peloton.version.clone();
        for module in &mut self.peloton {
            let env = BTreeMap::from([
                ("APP".to_string(), module.name().to_string()),
                ("ELECTION_ZK_SERVERS".to_string(), zookeeper.clone()),
                ("MESOS_ZK_PATH".to_string(), mesos_zk.clone()),
                ("CASSANDRA_HOSTS".to_string(), cassandra_host.clone()),
                ("CASSANDRA_PORT".to_string(), cassandra_port.to_string()),
            ]);
            let id = module
                .setup(&env, peloton_count, None, version.as_deref())
                .await?;
            jobs.push((module.name().to_string(), id));
        }

        info!(label = %self.label, jobs = jobs.len(), "Virtual cluster is up");
        Ok(ClusterInfo {
            label: self.label.clone(),
            zookeeper,
            mesos_leader,
            cassandra,
            jobs,
        })
    }

    /// Tear every module down, last started first.
    pub async fn teardown(&mut self, remove: bool) -> Result<Vec<JobId>> {
        info!(label = %self.label, remove, "Tearing down virtual cluster");
        let mut ids = Vec::new();

        for module in self.peloton.iter_mut().rev() {
            ids.extend(module.teardown(None, remove).await?);
        }
        ids.extend(self.cassandra.teardown(None, remove).await?);
        ids.extend(self.mesos_agent.teardown(None, remove).await?);
        ids.extend(self.mesos_master.teardown(None, remove).await?);
        ids.extend(self.zookeeper.teardown(None, remove).await?);

        info!(label = %self.label, jobs = ids.len(), "Virtual cluster torn down");
        Ok(ids)
    }

    /// Current state of every job owned by the cluster's modules.
    pub async fn status(&self) -> Result<Vec<ModuleStatus>> {
        let mut statuses = Vec::new();
        for module in self.modules() {
            let ids = self
                .client
                .list_workloads_by_label(&self.label, &module.default_job_name(), &[])
                .await?;
            for job_id in ids {
                let status = self.client.get_workload(&job_id).await?;
                statuses.push(ModuleStatus {
                    module: module.name().to_string(),
                    job_id,
                    status,
                });
            }
        }
        Ok(statuses)
    }

    fn modules_mut(&mut self) -> impl Iterator<Item = &mut Module> {
        [
            &mut self.zookeeper,
            &mut self.mesos_master,
            &mut self.mesos_agent,
            &mut self.cassandra,
        ]
        .into_iter()
        .chain(self.peloton.iter_mut())
    }
}
