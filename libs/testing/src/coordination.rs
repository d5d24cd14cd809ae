//! Fake coordination store.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use vcluster_coordination::{CoordinationError, CoordinationStore};

/// Coordination store serving keys inserted by the test.
#[derive(Default)]
pub struct FakeCoordinationStore {
    keys: Mutex<HashMap<String, Vec<u8>>>,
}

impl FakeCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `data` under `path`, replacing any previous value.
    pub fn insert(&self, path: impl Into<String>, data: impl Into<Vec<u8>>) {
        let mut keys = match self.keys.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        keys.insert(path.into(), data.into());
    }
}

#[async_trait]
impl CoordinationStore for FakeCoordinationStore {
    async fn read_key(&self, path: &str) -> Result<Vec<u8>, CoordinationError> {
        let keys = match self.keys.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        keys.get(path)
            .cloned()
            .ok_or_else(|| CoordinationError::NotFound(path.to_string()))
    }
}
