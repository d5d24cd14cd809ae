//! vcluster: virtual test cluster driver.
//!
//! Brings up a ZooKeeper, Mesos, Cassandra and Peloton cluster as
//! label-scoped jobs on a scheduler, watches it converge, and tears it down.
//! The same machinery drives individual test workloads end to end.
//!
//! ## Architecture
//!
//! - **Workload**: one scheduled job; create, stop, fetch, and wait for a state
//! - **ResourcePoolBinder**: idempotent resource pool creation and resolution
//! - **Module**: one cluster service; label-scoped setup and ordered teardown
//! - **VirtualCluster**: composes the modules in dependency order
//! - **Harness**: container groups, readiness waits, cleanup and run metrics
//!   for end-to-end suites
//!
//! All waiting goes through the bounded poller in `vcluster-converge`.

pub mod cluster;
pub mod config;
pub mod container;
pub mod error;
pub mod harness;
pub mod leader;
pub mod module;
pub mod respool;
pub mod workload;

pub use cluster::{ClusterInfo, ModuleStatus, VirtualCluster};
pub use config::{ClusterSpec, DriverConfig};
pub use error::{Error, ErrorKind, Result};
pub use leader::LeaderLookup;
pub use module::{Module, ModuleKind, ModuleState, PelotonComponent};
pub use respool::ResourcePoolBinder;
pub use workload::Workload;
