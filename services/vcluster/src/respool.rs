//! Resource pool binding.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};
use vcluster_id::ResourcePoolId;
use vcluster_scheduler::{ClientError, ResourcePoolConfig, SchedulerClient};

use crate::error::{Error, Result};
use crate::workload::Workload;

/// Ensures resource pools exist and resolves their IDs.
///
/// Resolved IDs are memoized per path. The cache lock is held across the
/// create and lookup calls, so concurrent `ensure` calls for one pool issue
/// at most one create.
pub struct ResourcePoolBinder {
    client: Arc<dyn SchedulerClient>,
    resolved: Mutex<HashMap<String, ResourcePoolId>>,
}

impl ResourcePoolBinder {
    pub fn new(client: Arc<dyn SchedulerClient>) -> Self {
        Self {
            client,
            resolved: Mutex::new(HashMap::new()),
        }
    }

    /// Create the pool unless it exists, then resolve its ID.
    pub async fn ensure(&self, config: &ResourcePoolConfig) -> Result<ResourcePoolId> {
        let path = config.path();
        let mut resolved = self.resolved.lock().await;
        if let Some(id) = resolved.get(&path) {
            debug!(path = %path, pool_id = %id, "Resource pool already resolved");
            return Ok(id.clone());
        }

        match self.client.create_resource_pool(config).await {
            Ok(()) => info!(path = %path, "Created resource pool"),
            Err(ClientError::AlreadyExists(_)) => {
                debug!(path = %path, "Resource pool already exists")
            }
            Err(e) => {
                return Err(Error::Config(format!(
                    "failed to create resource pool {path}: {e}"
                )))
            }
        }

        let id = match self.client.lookup_resource_pool(&path).await {
            Ok(id) => id,
            Err(e @ (ClientError::NotFound(_) | ClientError::InvalidPath(_))) => {
                return Err(Error::Config(format!(
                    "failed to resolve resource pool {path}: {e}"
                )))
            }
            Err(e) => return Err(e.into()),
        };
        if id.as_str().is_empty() {
            return Err(Error::Config(format!(
                "resource pool {path} resolved to an empty id"
            )));
        }

        info!(path = %path, pool_id = %id, "Resolved resource pool");
        resolved.insert(path, id.clone());
        Ok(id)
    }

    /// Ensure the pool and place `workload` in it.
    pub async fn bind(&self, workload: &mut Workload, config: &ResourcePoolConfig) -> Result<()> {
        let id = self.ensure(config).await?;
        workload.bind_pool(id)
    }
}

#[cfg(test)]
mod tests {
    use vcluster_scheduler::{TaskConfig, WorkloadSpec};
    use vcluster_testing::{Call, FakeScheduler};

    use super::*;
    use crate::error::ErrorKind;

    fn pool(name: &str) -> ResourcePoolConfig {
        ResourcePoolConfig {
            name: name.to_string(),
            resources: vec![],
            policy: "PriorityFIFO".to_string(),
        }
    }

    fn binder(fake: &Arc<FakeScheduler>) -> ResourcePoolBinder {
        let client: Arc<dyn SchedulerClient> = fake.clone();
        ResourcePoolBinder::new(client)
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let fake = Arc::new(FakeScheduler::new());
        let binder = binder(&fake);

        let first = binder.ensure(&pool("vcluster")).await.unwrap();
        let second = binder.ensure(&pool("vcluster")).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(fake.count_calls(|c| matches!(c, Call::CreatePool(_))), 1);
    }

    #[tokio::test]
    async fn test_concurrent_ensure_creates_once() {
        let fake = Arc::new(FakeScheduler::new());
        let binder = binder(&fake);
        let config = pool("vcluster");

        let (a, b) = tokio::join!(binder.ensure(&config), binder.ensure(&config));
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(fake.count_calls(|c| matches!(c, Call::CreatePool(_))), 1);
    }

    #[tokio::test]
    async fn test_existing_pool_is_success() {
        let fake = Arc::new(FakeScheduler::new());
        let existing = ResourcePoolId::generate();
        fake.add_pool("/vcluster", existing.clone());

        let id = binder(&fake).ensure(&pool("vcluster")).await.unwrap();
        assert_eq!(id, existing);
    }

    #[tokio::test]
    async fn test_bind_sets_pool_on_spec() {
        let fake = Arc::new(FakeScheduler::new());
        let client: Arc<dyn SchedulerClient> = fake.clone();
        let mut workload = Workload::new(
            Arc::clone(&client),
            WorkloadSpec::new("job", 1, TaskConfig::default()),
        );

        let binder = ResourcePoolBinder::new(client);
        binder.bind(&mut workload, &pool("vcluster")).await.unwrap();

        let bound = workload.spec().respool_id.as_ref().unwrap();
        assert_eq!(bound.value, binder.ensure(&pool("vcluster")).await.unwrap());
    }

    #[tokio::test]
    async fn test_lookup_failures_are_config_errors() {
        let errors: [fn(String) -> ClientError; 2] =
            [ClientError::InvalidPath, ClientError::NotFound];
        for make in errors {
            let fake = Arc::new(FakeScheduler::new());
            fake.set_pool_lookup_error(make);

            let err = binder(&fake).ensure(&pool("vcluster")).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Config);
        }
    }

    #[tokio::test]
    async fn test_rejected_create_is_config_error() {
        let fake = Arc::new(FakeScheduler::new());
        fake.reject_creates();

        let err = binder(&fake).ensure(&pool("vcluster")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert_eq!(fake.count_calls(|c| matches!(c, Call::LookupPool(_))), 0);
    }
}
