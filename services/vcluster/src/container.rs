//! Named container groups of the integration harness.

use std::sync::Arc;

use tokio_stream::StreamExt;
use tracing::{info, warn};
use vcluster_converge::PollConfig;
use vcluster_docker::ContainerEngine;

use crate::error::Result;
use crate::leader::LeaderLookup;

/// A set of containers started, stopped and restarted together.
///
/// A group that hosts Mesos masters carries a [`LeaderLookup`]; after a start
/// or restart it blocks until a leader is elected again.
pub struct ContainerGroup {
    engine: Arc<dyn ContainerEngine>,
    names: Vec<String>,
    leader: Option<(LeaderLookup, PollConfig)>,
}

impl ContainerGroup {
    pub fn new(engine: Arc<dyn ContainerEngine>, names: Vec<String>) -> Self {
        Self {
            engine,
            names,
            leader: None,
        }
    }

    /// Wait for leader election after every start and restart.
    pub fn with_leader_wait(mut self, lookup: LeaderLookup, poll: PollConfig) -> Self {
        self.leader = Some((lookup, poll));
        self
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub async fn start(&self) -> Result<()> {
        for name in &self.names {
            self.engine.start(name).await?;
        }
        self.wait_for_leader().await
    }

    pub async fn stop(&self) -> Result<()> {
        for name in &self.names {
            self.engine.stop(name).await?;
        }
        Ok(())
    }

    pub async fn restart(&self) -> Result<()> {
        for name in &self.names {
            self.engine.restart(name).await?;
        }
        self.wait_for_leader().await
    }

    async fn wait_for_leader(&self) -> Result<()> {
        if let Some((lookup, poll)) = &self.leader {
            lookup.wait_for_leader(*poll).await?;
        }
        Ok(())
    }
}

/// Copy the output of `names` into the log, one event per line.
///
/// Intended for containers that already exited: the streams follow their
/// container and only end once it stops. Returns the number of lines read.
pub async fn dump_logs(engine: &dyn ContainerEngine, names: &[String]) -> usize {
    let mut total = 0;
    for name in names {
        let mut lines = match engine.logs(name).await {
            Ok(lines) => lines,
            Err(e) => {
                warn!(container = %name, error = %e, "Cannot read container logs");
                continue;
            }
        };

        info!(container = %name, "Container logs begin");
        while let Some(line) = lines.next().await {
            match line {
                Ok(line) => {
                    info!(container = %name, "{line}");
                    total += 1;
                }
                Err(e) => {
                    warn!(container = %name, error = %e, "Container log stream failed");
                    break;
                }
            }
        }
        info!(container = %name, "Container logs end");
    }
    total
}
