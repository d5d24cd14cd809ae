//! Scheduler client speaking JSON-encoded RPC over HTTP.
//!
//! Every call is a `POST /` against the job manager or resource manager with
//! the procedure named in headers:
//!
//! ```text
//! Rpc-Caller:    vcluster
//! Rpc-Service:   peloton-jobmgr
//! Rpc-Procedure: peloton.api.job.JobManager::Get
//! Rpc-Encoding:  json
//! ```
//!
//! Application-level failures come back as `200 OK` with an `error` object in
//! the body; transport-level failures as non-2xx statuses.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, error};
use vcluster_id::{JobId, Label, ResourcePoolId};

use crate::client::{ClientError, SchedulerClient};
use crate::types::{
    JobLabel, JobState, ResourcePoolConfig, TaskInfo, Value, WorkloadSpec, WorkloadStatus,
};

const JOB_CREATE: &str = "peloton.api.job.JobManager::Create";
const JOB_GET: &str = "peloton.api.job.JobManager::Get";
const JOB_DELETE: &str = "peloton.api.job.JobManager::Delete";
const JOB_QUERY: &str = "peloton.api.job.JobManager::Query";
const TASK_STOP: &str = "peloton.api.task.TaskManager::Stop";
const TASK_LIST: &str = "peloton.api.task.TaskManager::List";
const RESPOOL_CREATE: &str = "peloton.api.respool.ResourceManager::CreateResourcePool";
const RESPOOL_LOOKUP: &str = "peloton.api.respool.ResourceManager::LookupResourcePoolID";

/// Page size used when listing jobs by label.
const QUERY_LIMIT: u32 = 1000;

/// Connection settings for the RPC client.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Job manager base URL, e.g. `http://127.0.0.1:5292`.
    pub jobmgr_url: String,

    /// Resource manager base URL, e.g. `http://127.0.0.1:5290`.
    pub resmgr_url: String,

    /// Per-call timeout, also propagated as `Context-TTL-MS`.
    pub timeout: Duration,

    /// Value of the `Rpc-Caller` header.
    pub caller: String,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            jobmgr_url: "http://127.0.0.1:5292".to_string(),
            resmgr_url: "http://127.0.0.1:5290".to_string(),
            timeout: Duration::from_secs(10),
            caller: "vcluster".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Endpoint {
    JobManager,
    ResourceManager,
}

impl Endpoint {
    fn service(self) -> &'static str {
        match self {
            Endpoint::JobManager => "peloton-jobmgr",
            Endpoint::ResourceManager => "peloton-resmgr",
        }
    }
}

/// JSON-over-HTTP scheduler client.
#[derive(Debug, Clone)]
pub struct YarpcSchedulerClient {
    client: reqwest::Client,
    config: RpcConfig,
}

impl YarpcSchedulerClient {
    /// Create a new client.
    pub fn new(config: RpcConfig) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClientError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    fn base_url(&self, endpoint: Endpoint) -> &str {
        match endpoint {
            Endpoint::JobManager => self.config.jobmgr_url.trim_end_matches('/'),
            Endpoint::ResourceManager => self.config.resmgr_url.trim_end_matches('/'),
        }
    }

    /// Perform one RPC.
    async fn call<Req, Resp>(
        &self,
        endpoint: Endpoint,
        procedure: &str,
        request: &Req,
    ) -> Result<Resp, ClientError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("{}/", self.base_url(endpoint));
        debug!(url = %url, procedure, "Scheduler RPC");

        let response = self
            .client
            .post(&url)
            .header("Rpc-Caller", &self.config.caller)
            .header("Rpc-Service", endpoint.service())
            .header("Rpc-Procedure", procedure)
            .header("Rpc-Encoding", "json")
            .header(
                "Context-TTL-MS",
                self.config.timeout.as_millis().to_string(),
            )
            .json(request)
            .send()
            .await
            .map_err(|e| ClientError::Unavailable(format!("{procedure}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, procedure, "Scheduler RPC failed");
            if status.is_server_error()
                || status == reqwest::StatusCode::REQUEST_TIMEOUT
                || status == reqwest::StatusCode::TOO_MANY_REQUESTS
            {
                return Err(ClientError::Unavailable(format!(
                    "{procedure}: {status} - {body}"
                )));
            }
            return Err(ClientError::Rpc {
                procedure: procedure.to_string(),
                status: status.as_u16(),
                message: body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::Decode(format!("{procedure}: {e}")))
    }
}

// =============================================================================
// Wire messages
// =============================================================================

/// `{ "message": ... }` error detail.
#[derive(Debug, Default, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
}

#[derive(Serialize)]
struct CreateJobRequest<'a> {
    config: &'a WorkloadSpec,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateJobError {
    already_exists: Option<ErrorDetail>,
    invalid_config: Option<ErrorDetail>,
    invalid_job_id: Option<ErrorDetail>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateJobResponse {
    job_id: Option<Value<String>>,
    #[serde(default)]
    error: Option<CreateJobError>,
}

#[derive(Serialize)]
struct JobIdRequest<'a> {
    id: Value<&'a str>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetJobError {
    not_found: Option<ErrorDetail>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobInfo {
    runtime: WorkloadStatus,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetJobResponse {
    job_info: Option<JobInfo>,
    #[serde(default)]
    error: Option<GetJobError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteJobError {
    not_found: Option<ErrorDetail>,
}

#[derive(Deserialize)]
struct DeleteJobResponse {
    #[serde(default)]
    error: Option<DeleteJobError>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Pagination {
    offset: u32,
    limit: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JobQuerySpec<'a> {
    labels: Vec<JobLabel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    job_states: Vec<JobState>,
    pagination: Pagination,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryJobsRequest<'a> {
    spec: JobQuerySpec<'a>,
    summary_only: bool,
}

#[derive(Deserialize)]
struct JobSummary {
    id: Value<String>,
    #[serde(default)]
    name: String,
}

#[derive(Deserialize)]
struct QueryJobsResponse {
    #[serde(default)]
    results: Vec<JobSummary>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskJobRequest<'a> {
    job_id: Value<&'a str>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StopTasksError {
    not_found: Option<ErrorDetail>,
    out_of_range: Option<ErrorDetail>,
}

#[derive(Deserialize)]
struct StopTasksResponse {
    #[serde(default)]
    error: Option<StopTasksError>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskRuntime {
    state: JobState,
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    ports: BTreeMap<String, u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskEntry {
    instance_id: u32,
    runtime: TaskRuntime,
}

#[derive(Deserialize)]
struct TaskMap {
    #[serde(default)]
    value: BTreeMap<u32, TaskEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListTasksResponse {
    result: Option<TaskMap>,
    #[serde(default)]
    not_found: Option<ErrorDetail>,
}

#[derive(Serialize)]
struct CreatePoolRequest<'a> {
    config: CreatePoolConfig<'a>,
}

#[derive(Serialize)]
struct CreatePoolConfig<'a> {
    #[serde(flatten)]
    config: &'a ResourcePoolConfig,
    parent: Value<&'static str>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePoolError {
    already_exists: Option<ErrorDetail>,
    invalid_resource_pool_config: Option<ErrorDetail>,
}

#[derive(Deserialize)]
struct CreatePoolResponse {
    #[serde(default)]
    error: Option<CreatePoolError>,
}

#[derive(Serialize)]
struct LookupPoolRequest<'a> {
    path: Value<&'a str>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupPoolError {
    not_found: Option<ErrorDetail>,
    invalid_path: Option<ErrorDetail>,
}

#[derive(Deserialize)]
struct LookupPoolResponse {
    id: Option<Value<String>>,
    #[serde(default)]
    error: Option<LookupPoolError>,
}

/// ID of the root resource pool.
const ROOT_POOL_ID: &str = "root";

fn parse_job_id(raw: &str) -> Result<JobId, ClientError> {
    JobId::parse(raw).map_err(|e| ClientError::Decode(e.to_string()))
}

#[async_trait]
impl SchedulerClient for YarpcSchedulerClient {
    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<JobId, ClientError> {
        let response: CreateJobResponse = self
            .call(
                Endpoint::JobManager,
                JOB_CREATE,
                &CreateJobRequest { config: spec },
            )
            .await?;

        if let Some(err) = response.error {
            if let Some(detail) = err.invalid_config.or(err.invalid_job_id) {
                return Err(ClientError::InvalidConfig(detail.message));
            }
            if let Some(detail) = err.already_exists {
                return Err(ClientError::AlreadyExists(detail.message));
            }
        }

        let id = response
            .job_id
            .ok_or_else(|| ClientError::Decode("create response carries no job id".to_string()))?;
        parse_job_id(&id.value)
    }

    async fn stop_workload(&self, id: &JobId) -> Result<(), ClientError> {
        let response: StopTasksResponse = self
            .call(
                Endpoint::JobManager,
                TASK_STOP,
                &TaskJobRequest {
                    job_id: Value::new(id.as_str()),
                },
            )
            .await?;

        match response.error {
            Some(StopTasksError {
                not_found: Some(detail),
                ..
            }) => Err(ClientError::NotFound(format!("{id}: {}", detail.message))),
            Some(StopTasksError {
                out_of_range: Some(detail),
                ..
            }) => Err(ClientError::InvalidConfig(detail.message)),
            _ => Ok(()),
        }
    }

    async fn delete_workload(&self, id: &JobId) -> Result<(), ClientError> {
        let result: Result<DeleteJobResponse, ClientError> = self
            .call(
                Endpoint::JobManager,
                JOB_DELETE,
                &JobIdRequest {
                    id: Value::new(id.as_str()),
                },
            )
            .await;

        match result {
            Ok(DeleteJobResponse {
                error:
                    Some(DeleteJobError {
                        not_found: Some(detail),
                    }),
            }) => Err(ClientError::NotFound(format!("{id}: {}", detail.message))),
            Ok(_) => Ok(()),
            // The job manager refuses to delete non-terminal jobs with a
            // plain RPC error.
            Err(ClientError::Rpc { message, .. }) if message.contains("not in terminal state") => {
                Err(ClientError::InvalidState {
                    id: id.to_string(),
                    state: message,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn get_workload(&self, id: &JobId) -> Result<WorkloadStatus, ClientError> {
        let response: GetJobResponse = self
            .call(
                Endpoint::JobManager,
                JOB_GET,
                &JobIdRequest {
                    id: Value::new(id.as_str()),
                },
            )
            .await?;

        if let Some(GetJobError {
            not_found: Some(detail),
        }) = response.error
        {
            return Err(ClientError::NotFound(format!("{id}: {}", detail.message)));
        }

        response
            .job_info
            .map(|info| info.runtime)
            .ok_or_else(|| ClientError::Decode(format!("get response for {id} carries no runtime")))
    }

    async fn list_workloads_by_label(
        &self,
        label: &Label,
        name: &str,
        states: &[JobState],
    ) -> Result<Vec<JobId>, ClientError> {
        let request = QueryJobsRequest {
            spec: JobQuerySpec {
                labels: vec![JobLabel::owner(label)],
                name: (!name.is_empty()).then_some(name),
                job_states: states.to_vec(),
                pagination: Pagination {
                    offset: 0,
                    limit: QUERY_LIMIT,
                },
            },
            summary_only: true,
        };

        let response: QueryJobsResponse = self
            .call(Endpoint::JobManager, JOB_QUERY, &request)
            .await?;

        if let Some(err) = response.error {
            return Err(ClientError::Rpc {
                procedure: JOB_QUERY.to_string(),
                status: 200,
                message: err.to_string(),
            });
        }

        // Name matching on the server is by substring; keep exact matches only.
        response
            .results
            .into_iter()
            .filter(|summary| name.is_empty() || summary.name == name)
            .map(|summary| parse_job_id(&summary.id.value))
            .collect()
    }

    async fn list_tasks(&self, id: &JobId) -> Result<Vec<TaskInfo>, ClientError> {
        let response: ListTasksResponse = self
            .call(
                Endpoint::JobManager,
                TASK_LIST,
                &TaskJobRequest {
                    job_id: Value::new(id.as_str()),
                },
            )
            .await?;

        if let Some(detail) = response.not_found {
            return Err(ClientError::NotFound(format!("{id}: {}", detail.message)));
        }

        let tasks = response
            .result
            .map(|map| map.value)
            .unwrap_or_default()
            .into_values()
            .map(|entry| TaskInfo {
                instance_id: entry.instance_id,
                state: entry.runtime.state,
                host: entry.runtime.host,
                ports: entry.runtime.ports,
            })
            .collect();

        Ok(tasks)
    }

    async fn create_resource_pool(&self, config: &ResourcePoolConfig) -> Result<(), ClientError> {
        let request = CreatePoolRequest {
            config: CreatePoolConfig {
                config,
                parent: Value::new(ROOT_POOL_ID),
            },
        };

        let response: CreatePoolResponse = self
            .call(Endpoint::ResourceManager, RESPOOL_CREATE, &request)
            .await?;

        match response.error {
            Some(CreatePoolError {
                already_exists: Some(detail),
                ..
            }) => Err(ClientError::AlreadyExists(detail.message)),
            Some(CreatePoolError {
                invalid_resource_pool_config: Some(detail),
                ..
            }) => Err(ClientError::InvalidConfig(detail.message)),
            _ => Ok(()),
        }
    }

    async fn lookup_resource_pool(&self, path: &str) -> Result<ResourcePoolId, ClientError> {
        let response: LookupPoolResponse = self
            .call(
                Endpoint::ResourceManager,
                RESPOOL_LOOKUP,
                &LookupPoolRequest {
                    path: Value::new(path),
                },
            )
            .await?;

        if let Some(err) = response.error {
            if let Some(detail) = err.not_found {
                return Err(ClientError::NotFound(format!("{path}: {}", detail.message)));
            }
            if let Some(detail) = err.invalid_path {
                return Err(ClientError::InvalidPath(format!("{path}: {}", detail.message)));
            }
        }

        let id = response
            .id
            .ok_or_else(|| ClientError::NotFound(format!("{path}: lookup returned no id")))?;
        ResourcePoolId::parse(&id.value).map_err(|e| ClientError::NotFound(format!("{path}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::types::TaskConfig;

    async fn client_for(server: &MockServer) -> YarpcSchedulerClient {
        YarpcSchedulerClient::new(RpcConfig {
            jobmgr_url: server.uri(),
            resmgr_url: server.uri(),
            timeout: Duration::from_secs(2),
            caller: "vcluster-test".to_string(),
        })
        .unwrap()
    }

    fn procedure(name: &'static str) -> wiremock::matchers::HeaderExactMatcher {
        header("Rpc-Procedure", name)
    }

    #[tokio::test]
    async fn test_create_workload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(procedure(JOB_CREATE))
            .and(header("Rpc-Service", "peloton-jobmgr"))
            .and(header("Rpc-Encoding", "json"))
            .and(body_partial_json(json!({"config": {"name": "l1_zookeeper", "instanceCount": 1}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jobId": {"value": "0d2c3b1a-job"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let spec = WorkloadSpec::new("l1_zookeeper", 1, TaskConfig::default());
        let id = client.create_workload(&spec).await.unwrap();
        assert_eq!(id.as_str(), "0d2c3b1a-job");
    }

    #[tokio::test]
    async fn test_create_workload_invalid_config() {
        let server = MockServer::start().await;
        Mock::given(procedure(JOB_CREATE))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": {"invalidConfig": {"message": "instanceCount must be positive"}}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let spec = WorkloadSpec::new("bad", 0, TaskConfig::default());
        let err = client.create_workload(&spec).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidConfig(msg) if msg.contains("instanceCount")));
    }

    #[tokio::test]
    async fn test_get_workload() {
        let server = MockServer::start().await;
        Mock::given(procedure(JOB_GET))
            .and(body_partial_json(json!({"id": {"value": "job-1"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jobInfo": {
                    "runtime": {
                        "state": "RUNNING",
                        "taskStats": {"RUNNING": 3, "PENDING": 2}
                    }
                }
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let status = client
            .get_workload(&JobId::parse("job-1").unwrap())
            .await
            .unwrap();
        assert_eq!(status.state, JobState::Running);
        assert_eq!(status.count(JobState::Pending), 2);
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(procedure(JOB_GET))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client
            .get_workload(&JobId::parse("job-1").unwrap())
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_list_by_label_filters_exact_name() {
        let server = MockServer::start().await;
        Mock::given(procedure(JOB_QUERY))
            .and(body_partial_json(json!({
                "spec": {
                    "labels": [{"key": "vcluster", "value": "l1"}],
                    "jobStates": ["RUNNING"]
                },
                "summaryOnly": true
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    {"id": {"value": "job-a"}, "name": "l1_mesos-slave"},
                    {"id": {"value": "job-b"}, "name": "l1_mesos-slave-extra"}
                ]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let ids = client
            .list_workloads_by_label(
                &Label::parse("l1").unwrap(),
                "l1_mesos-slave",
                &[JobState::Running],
            )
            .await
            .unwrap();
        assert_eq!(ids, vec![JobId::parse("job-a").unwrap()]);

        // An empty name matches every job of the label.
        let all = client
            .list_workloads_by_label(&Label::parse("l1").unwrap(), "", &[JobState::Running])
            .await
            .unwrap();
        assert_eq!(
            all,
            vec![JobId::parse("job-a").unwrap(), JobId::parse("job-b").unwrap()]
        );
    }

    #[tokio::test]
    async fn test_list_tasks() {
        let server = MockServer::start().await;
        Mock::given(procedure(TASK_LIST))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": {"value": {
                    "1": {"instanceId": 1, "runtime": {"state": "PENDING"}},
                    "0": {"instanceId": 0, "runtime": {
                        "state": "RUNNING",
                        "host": "agent-0",
                        "ports": {"ZOO_PORT": 31002}
                    }}
                }}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let tasks = client
            .list_tasks(&JobId::parse("job-1").unwrap())
            .await
            .unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].instance_id, 0);
        assert_eq!(tasks[0].host.as_deref(), Some("agent-0"));
        assert_eq!(tasks[0].ports["ZOO_PORT"], 31002);
    }

    #[tokio::test]
    async fn test_create_pool_already_exists() {
        let server = MockServer::start().await;
        Mock::given(procedure(RESPOOL_CREATE))
            .and(header("Rpc-Service", "peloton-resmgr"))
            .and(body_partial_json(json!({"config": {"name": "vcluster", "parent": {"value": "root"}}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": {"alreadyExists": {"message": "resource pool vcluster already exists"}}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let config = ResourcePoolConfig {
            name: "vcluster".to_string(),
            resources: vec![],
            policy: "PriorityFIFO".to_string(),
        };
        let err = client.create_resource_pool(&config).await.unwrap_err();
        assert!(matches!(err, ClientError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_lookup_pool_invalid_path() {
        let server = MockServer::start().await;
        Mock::given(procedure(RESPOOL_LOOKUP))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": {"invalidPath": {"message": "path must start with /"}}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.lookup_resource_pool("vcluster").await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn test_delete_non_terminal_job() {
        let server = MockServer::start().await;
        Mock::given(procedure(JOB_DELETE))
            .respond_with(
                ResponseTemplate::new(400).set_body_string("Job is not in terminal state: KILLING"),
            )
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client
            .delete_workload(&JobId::parse("job-1").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidState { .. }));
    }
}
