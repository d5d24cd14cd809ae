//! Coordination store capability.
//!
//! vcluster reads a handful of well-known keys (the Mesos master leader
//! record) from the cluster's coordination service. [`CoordinationStore`] is
//! a point-read seam; [`ZkRestStore`] reads through the ZooKeeper REST
//! gateway.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error};

/// Errors from the coordination store.
#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("coordination store unavailable: {0}")]
    Unavailable(String),

    #[error("key not found: {0}")]
    NotFound(String),

    #[error("key {path} has no data")]
    Empty { path: String },

    #[error("failed to decode {path}: {message}")]
    Decode { path: String, message: String },
}

/// Point reads of coordination keys.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Raw bytes stored under `path`.
    async fn read_key(&self, path: &str) -> Result<Vec<u8>, CoordinationError>;
}

/// ZooKeeper REST gateway client.
///
/// Reads `GET {base}/znodes/v1{path}?dataformat=base64` and decodes the
/// `data64` field of the response.
#[derive(Debug, Clone)]
pub struct ZkRestStore {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct Znode {
    #[serde(rename = "data64")]
    data: Option<String>,
}

impl ZkRestStore {
    /// Create a client for the gateway at `base_url`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, CoordinationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoordinationError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl CoordinationStore for ZkRestStore {
    async fn read_key(&self, path: &str) -> Result<Vec<u8>, CoordinationError> {
        let url = format!("{}/znodes/v1{path}", self.base_url);
        debug!(url = %url, "Reading coordination key");

        let response = self
            .client
            .get(&url)
            .query(&[("dataformat", "base64")])
            .send()
            .await
            .map_err(|e| CoordinationError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(CoordinationError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, path, "Coordination read failed");
            return Err(CoordinationError::Unavailable(format!("{status} - {body}")));
        }

        let znode: Znode = response.json().await.map_err(|e| CoordinationError::Decode {
            path: path.to_string(),
            message: e.to_string(),
        })?;

        let data = znode.data.ok_or_else(|| CoordinationError::Empty {
            path: path.to_string(),
        })?;

        base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| CoordinationError::Decode {
                path: path.to_string(),
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const LEADER_KEY: &str = "/mesos/json.info_0000000001";

    fn store(server: &MockServer) -> ZkRestStore {
        ZkRestStore::new(server.uri(), Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn test_read_key_decodes_base64() {
        let server = MockServer::start().await;
        let payload = r#"{"hostname":"10.0.0.5","port":5050}"#;
        let encoded = base64::engine::general_purpose::STANDARD.encode(payload);

        Mock::given(method("GET"))
            .and(path(format!("/znodes/v1{LEADER_KEY}")))
            .and(query_param("dataformat", "base64"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "path": LEADER_KEY,
                "data64": encoded,
            })))
            .mount(&server)
            .await;

        let data = store(&server).read_key(LEADER_KEY).await.unwrap();
        assert_eq!(data, payload.as_bytes());
    }

    #[tokio::test]
    async fn test_missing_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = store(&server).read_key(LEADER_KEY).await.unwrap_err();
        assert!(matches!(err, CoordinationError::NotFound(p) if p == LEADER_KEY));
    }

    #[tokio::test]
    async fn test_key_without_data() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"path": LEADER_KEY})))
            .mount(&server)
            .await;

        let err = store(&server).read_key(LEADER_KEY).await.unwrap_err();
        assert!(matches!(err, CoordinationError::Empty { .. }));
    }
}
