//! In-memory fakes for vcluster's external capabilities.
//!
//! - [`FakeScheduler`] simulates job lifecycles, with optional scripted state
//!   sequences, and keeps a log of every call.
//! - [`FakeCoordinationStore`] serves fixed keys.
//! - [`FakeContainerEngine`] records lifecycle actions and serves canned logs.

mod coordination;
mod engine;
mod scheduler;

pub use coordination::FakeCoordinationStore;
pub use engine::{ContainerAction, FakeContainerEngine};
pub use scheduler::{Call, FakeScheduler};
