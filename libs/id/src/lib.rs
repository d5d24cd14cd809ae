//! # vcluster-id
//!
//! Identifier and label types shared by the vcluster crates.
//!
//! ## Design Principles
//!
//! - Job and resource pool IDs are assigned by the scheduler and treated as
//!   opaque strings; the only local validation is "non-empty, no whitespace"
//! - Labels are chosen by the caller and scope everything a test cluster owns
//! - IDs are typed to prevent mixing a job ID with a pool ID

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for the `define_id!` macro.
pub use ulid::Ulid;
