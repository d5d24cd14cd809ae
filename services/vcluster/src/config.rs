//! Driver and cluster configuration.
//!
//! Connection settings come from the environment ([`DriverConfig`]); the
//! shape of the cluster (images, commands, resources, instance counts) comes
//! from an optional TOML file ([`ClusterSpec`]) with built-in defaults.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use vcluster_converge::{PollConfig, DEFAULT_MAX_ATTEMPTS};
use vcluster_scheduler::{
    CommandConfig, ContainerConfig, PortConfig, ResourceConfig, ResourcePoolConfig, ResourceSpec,
    TaskConfig,
};

use crate::error::{Error, Result};

/// Driver configuration.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Job manager RPC endpoint.
    pub jobmgr_url: String,

    /// Resource manager RPC endpoint.
    pub resmgr_url: String,

    /// Per-call RPC timeout.
    pub rpc_timeout: Duration,

    /// Fetches per convergence.
    pub max_attempts: u32,

    /// Sleep between fetches.
    pub poll_interval: Duration,

    /// Docker daemon socket.
    pub docker_socket: String,

    /// ZooKeeper REST gateway.
    pub zk_rest_url: String,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON logs instead of human-readable ones.
    pub log_json: bool,
}

impl DriverConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jobmgr_url =
            var("VCLUSTER_JOBMGR_URL").unwrap_or_else(|| "http://127.0.0.1:5292".to_string());
        let resmgr_url =
            var("VCLUSTER_RESMGR_URL").unwrap_or_else(|| "http://127.0.0.1:5290".to_string());

        let rpc_timeout_secs: u64 = parse_or(&var, "VCLUSTER_RPC_TIMEOUT_SECS", 10)?;
        let max_attempts: u32 = parse_or(&var, "VCLUSTER_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?;
        let poll_interval_secs: u64 = parse_or(&var, "VCLUSTER_POLL_INTERVAL_SECS", 1)?;

        if max_attempts == 0 {
            return Err(Error::Config(
                "VCLUSTER_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        let docker_socket = var("VCLUSTER_DOCKER_SOCKET")
            .unwrap_or_else(|| vcluster_docker::DEFAULT_DOCKER_SOCKET.to_string());
        let zk_rest_url =
            var("VCLUSTER_ZK_REST_URL").unwrap_or_else(|| "http://127.0.0.1:9998".to_string());
        let log_level = var("VCLUSTER_LOG_LEVEL").unwrap_or_else(|| "info".to_string());
        let log_json = var("VCLUSTER_LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json"));

        Ok(Self {
            jobmgr_url,
            resmgr_url,
            rpc_timeout: Duration::from_secs(rpc_timeout_secs),
            max_attempts,
            poll_interval: Duration::from_secs(poll_interval_secs),
            docker_socket,
            zk_rest_url,
            log_level,
            log_json,
        })
    }

    /// Poll budget derived from the attempt and interval settings.
    pub fn poll_config(&self) -> PollConfig {
        PollConfig::new(self.max_attempts, self.poll_interval)
    }
}

fn parse_or<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T> {
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{key} has invalid value '{raw}'"))),
        None => Ok(default),
    }
}

// =============================================================================
// Cluster spec
// =============================================================================

/// Named port of a module's tasks. `value = 0` requests a dynamic port.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PortSpec {
    pub name: String,
    #[serde(default)]
    pub value: u32,
}

/// Task shape of one module.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleSpec {
    pub image: String,
    #[serde(default = "default_instances")]
    pub instances: u32,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default = "default_cpu")]
    pub cpu: f64,
    #[serde(default = "default_mem_mb")]
    pub mem_mb: f64,
    #[serde(default = "default_disk_mb")]
    pub disk_mb: f64,
    #[serde(default)]
    pub ports: Vec<PortSpec>,
    #[serde(default)]
    pub network_host: bool,
}

impl ModuleSpec {
    fn new(image: &str, instances: u32, ports: &[&str]) -> Self {
        Self {
            image: image.to_string(),
            instances,
            command: None,
            arguments: Vec::new(),
            environment: BTreeMap::new(),
            cpu: default_cpu(),
            mem_mb: default_mem_mb(),
            disk_mb: default_disk_mb(),
            ports: ports
                .iter()
                .map(|name| PortSpec {
                    name: name.to_string(),
                    value: 0,
                })
                .collect(),
            network_host: true,
        }
    }

    /// Task config template for this module.
    pub fn task_config(&self, name: &str) -> TaskConfig {
        TaskConfig {
            name: name.to_string(),
            container: ContainerConfig {
                image: self.image.clone(),
                network_host: self.network_host,
            },
            command: CommandConfig {
                value: self.command.clone(),
                arguments: self.arguments.clone(),
                environment: self.environment.clone(),
                shell: self.command.is_some(),
            },
            resource: ResourceConfig {
                cpu_limit: self.cpu,
                mem_limit_mb: self.mem_mb,
                disk_limit_mb: self.disk_mb,
            },
            ports: self
                .ports
                .iter()
                .map(|p| PortConfig {
                    name: p.name.clone(),
                    value: p.value,
                    env_name: Some(p.name.clone()),
                })
                .collect(),
        }
    }
}

/// Resource pool the cluster's jobs are submitted into.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PoolSpec {
    pub name: String,
    #[serde(default = "default_pool_cpu")]
    pub cpu: f64,
    #[serde(default = "default_pool_mem_mb")]
    pub mem_mb: f64,
    #[serde(default = "default_pool_disk_mb")]
    pub disk_mb: f64,
}

impl Default for PoolSpec {
    fn default() -> Self {
        Self {
            name: "vcluster".to_string(),
            cpu: default_pool_cpu(),
            mem_mb: default_pool_mem_mb(),
            disk_mb: default_pool_disk_mb(),
        }
    }
}

impl PoolSpec {
    pub fn pool_config(&self) -> ResourcePoolConfig {
        let dim = |kind: &str, amount: f64| ResourceSpec {
            kind: kind.to_string(),
            reservation: amount,
            limit: amount,
            share: 1.0,
        };
        ResourcePoolConfig {
            name: self.name.clone(),
            resources: vec![
                dim("cpu", self.cpu),
                dim("memory", self.mem_mb),
                dim("disk", self.disk_mb),
            ],
            policy: "PriorityFIFO".to_string(),
        }
    }
}

/// Peloton control plane: one image shared by all components.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PelotonSpec {
    #[serde(flatten)]
    pub module: ModuleSpec,
    /// Image tag; overrides the tag in `image`.
    #[serde(default)]
    pub version: Option<String>,
}

/// Shape of a virtual cluster.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClusterSpec {
    pub respool: PoolSpec,
    pub zookeeper: ModuleSpec,
    pub mesos_master: ModuleSpec,
    pub mesos_agent: ModuleSpec,
    pub cassandra: ModuleSpec,
    pub peloton: PelotonSpec,
}

impl Default for ClusterSpec {
    fn default() -> Self {
        Self {
            respool: PoolSpec::default(),
            zookeeper: ModuleSpec::new("zookeeper:3.4.10", 1, &["ZOO_PORT"]),
            mesos_master: ModuleSpec::new("mesosphere/mesos-master:1.7.1", 1, &["MESOS_PORT"]),
            mesos_agent: ModuleSpec::new("mesosphere/mesos-slave:1.7.1", 3, &["MESOS_PORT"]),
            cassandra: ModuleSpec::new("cassandra:3.0.14", 1, &["CQL_PORT"]),
            peloton: PelotonSpec {
                module: ModuleSpec::new("uber/peloton:latest", 1, &["HTTP_PORT", "GRPC_PORT"]),
                version: None,
            },
        }
    }
}

impl ClusterSpec {
    /// Parse a spec from TOML; omitted sections keep their defaults.
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::Config(format!("invalid cluster spec: {e}")))
    }

    /// Load a spec from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml(&raw)
    }
}

fn default_instances() -> u32 {
    1
}

fn default_cpu() -> f64 {
    1.0
}

fn default_mem_mb() -> f64 {
    1024.0
}

fn default_disk_mb() -> f64 {
    1024.0
}

fn default_pool_cpu() -> f64 {
    32.0
}

fn default_pool_mem_mb() -> f64 {
    32768.0
}

fn default_pool_disk_mb() -> f64 {
    65536.0
}
