//! Fake container engine.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;
use vcluster_docker::{ContainerEngine, EngineError, LogStream};

/// Lifecycle action recorded by [`FakeContainerEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerAction {
    Start,
    Stop,
    Restart,
}

#[derive(Default)]
struct State {
    logs: HashMap<String, Vec<String>>,
    actions: Vec<(ContainerAction, String)>,
}

/// Container engine that knows a fixed set of containers.
#[derive(Default)]
pub struct FakeContainerEngine {
    state: Mutex<State>,
}

impl FakeContainerEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register a container and the output it will have produced.
    pub fn add_container(&self, name: impl Into<String>, lines: Vec<String>) {
        self.lock().logs.insert(name.into(), lines);
    }

    /// Recorded lifecycle actions, in call order.
    pub fn actions(&self) -> Vec<(ContainerAction, String)> {
        self.lock().actions.clone()
    }

    fn record(&self, action: ContainerAction, name: &str) -> Result<(), EngineError> {
        let mut state = self.lock();
        if !state.logs.contains_key(name) {
            return Err(EngineError::NotFound(name.to_string()));
        }
        debug!(container = name, action = ?action, "[FAKE] Container action");
        state.actions.push((action, name.to_string()));
        Ok(())
    }
}

#[async_trait]
impl ContainerEngine for FakeContainerEngine {
    async fn start(&self, name: &str) -> Result<(), EngineError> {
        self.record(ContainerAction::Start, name)
    }

    async fn stop(&self, name: &str) -> Result<(), EngineError> {
        self.record(ContainerAction::Stop, name)
    }

    async fn restart(&self, name: &str) -> Result<(), EngineError> {
        self.record(ContainerAction::Restart, name)
    }

    async fn logs(&self, name: &str) -> Result<LogStream, EngineError> {
        let lines = self
            .lock()
            .logs
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(name.to_string()))?;
        Ok(Box::pin(futures_util::stream::iter(
            lines.into_iter().map(Ok),
        )))
    }
}
