//! Container engine capability.
//!
//! The integration harness starts, stops and restarts long-lived containers
//! (cluster masters, the coordination service) and collects their output when
//! a test module fails. [`ContainerEngine`] is the seam; [`DockerEngine`]
//! talks to the Docker Engine API over its Unix socket.
//!
//! # Invariants
//!
//! - A log stream is lazy and follows the container; it never replays output
//!   already yielded
//! - Starting a running container and stopping a stopped one are no-ops

use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;
use thiserror::Error;

mod demux;
mod engine;

pub use demux::LogDecoder;
pub use engine::{DockerEngine, DEFAULT_DOCKER_SOCKET};

/// Errors from the container engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("invalid request: {0}")]
    Request(#[from] hyper::http::Error),

    #[error("container not found: {0}")]
    NotFound(String),

    #[error("engine error {status}: {message}")]
    Api { status: u16, message: String },
}

/// Lines of container output, stdout and stderr interleaved.
pub type LogStream = Pin<Box<dyn Stream<Item = Result<String, EngineError>> + Send>>;

/// Lifecycle operations on named containers.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Start a container.
    async fn start(&self, name: &str) -> Result<(), EngineError>;

    /// Stop a container, killing it after the engine's grace period.
    async fn stop(&self, name: &str) -> Result<(), EngineError>;

    /// Restart a container.
    async fn restart(&self, name: &str) -> Result<(), EngineError>;

    /// Follow the container's output. The stream ends when the container exits.
    async fn logs(&self, name: &str) -> Result<LogStream, EngineError>;
}
