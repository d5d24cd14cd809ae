//! Scheduler control-plane client.
//!
//! This library provides the typed surface vcluster uses to drive the cluster
//! scheduler: submitting, stopping, deleting and inspecting jobs, listing
//! their tasks, and managing resource pools.
//!
//! - [`SchedulerClient`] is the capability trait. Orchestration code depends
//!   on it only, so tests substitute an in-memory fake.
//! - [`YarpcSchedulerClient`] implements it over JSON-encoded RPC.
//!
//! # Invariants
//!
//! - Job state names are decoded leniently: unknown names map to `UNKNOWN`
//! - Label queries match the job name exactly; an empty name matches every
//!   job carrying the label

pub mod client;
pub mod types;
pub mod yarpc;

pub use client::{ClientError, SchedulerClient};
pub use types::{
    format_stats, CommandConfig, ContainerConfig, JobLabel, JobState, JobType, PortConfig,
    ResourceConfig, ResourcePoolConfig, ResourceSpec, TaskConfig, TaskInfo, Value, WorkloadSpec,
    WorkloadStatus, OWNER_LABEL_KEY, RESPOOL_ROOT,
};
pub use yarpc::{RpcConfig, YarpcSchedulerClient};
