//! Mesos master leader discovery.

use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, info};
use vcluster_converge::{Observation, PollConfig, Poller, StatusPredicate};
use vcluster_coordination::CoordinationStore;

use crate::error::{Error, Result};

/// Key under which the elected Mesos master publishes itself.
pub const MESOS_LEADER_KEY: &str = "/mesos/json.info_0000000001";

const ELECTED: &str = "ELECTED";
const NO_LEADER: &str = "NO_LEADER";

#[derive(Debug, Deserialize)]
struct MasterInfo {
    hostname: Option<String>,
    port: Option<u16>,
    address: Option<MasterAddress>,
}

#[derive(Debug, Deserialize)]
struct MasterAddress {
    hostname: Option<String>,
    ip: Option<String>,
    port: Option<u16>,
}

/// Reads the current Mesos leader from the coordination store.
#[derive(Clone)]
pub struct LeaderLookup {
    store: Arc<dyn CoordinationStore>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl LeaderLookup {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            store,
            shutdown: None,
        }
    }

    /// Cancel [`wait_for_leader`](Self::wait_for_leader) once `shutdown`
    /// flips to `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Host and port of the current leader. A single read, not retried.
    pub async fn leader(&self) -> Result<(String, u16)> {
        let data = self.store.read_key(MESOS_LEADER_KEY).await?;
        let (host, port) = parse_leader(&data)?;
        debug!(host = %host, port, "Read Mesos leader");
        Ok((host, port))
    }

    /// `http://host:port` of the current leader.
    pub async fn leader_url(&self) -> Result<String> {
        let (host, port) = self.leader().await?;
        Ok(format!("http://{host}:{port}"))
    }

    /// Poll until a leader is published, then return it.
    pub async fn wait_for_leader(&self, poll: PollConfig) -> Result<(String, u16)> {
        let poller = match &self.shutdown {
            Some(shutdown) => Poller::new("mesos leader", poll).with_shutdown(shutdown.clone()),
            None => Poller::new("mesos leader", poll),
        };
        let predicate = StatusPredicate::exact(ELECTED);

        poller
            .converge(&predicate, || {
                let lookup = self.clone();
                async move {
                    match lookup.leader().await {
                        Ok(_) => Ok::<_, Error>(Observation::new(ELECTED)),
                        Err(Error::Coordination(e)) => {
                            debug!(error = %e, "No leader published yet");
                            Ok(Observation::new(NO_LEADER))
                        }
                        Err(e) => Err(e),
                    }
                }
            })
            .await?;

        let leader = self.leader().await?;
        info!(host = %leader.0, port = leader.1, "Mesos leader elected");
        Ok(leader)
    }
}

fn parse_leader(data: &[u8]) -> Result<(String, u16)> {
    let info: MasterInfo = serde_json::from_slice(data)
        .map_err(|e| Error::Config(format!("invalid leader record: {e}")))?;

    let address = info.address.as_ref();
    let host = info
        .hostname
        .or_else(|| address.and_then(|a| a.hostname.clone()))
        .or_else(|| address.and_then(|a| a.ip.clone()))
        .filter(|h| !h.is_empty())
        .ok_or_else(|| Error::Config("leader record has no hostname".to_string()))?;
    let port = info
        .port
        .or_else(|| address.and_then(|a| a.port))
        .ok_or_else(|| Error::Config("leader record has no port".to_string()))?;

    Ok((host, port))
}
