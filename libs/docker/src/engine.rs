//! Docker Engine API client over the Unix socket.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use hyper::{body::Buf, Body, Client, Method, Request, StatusCode};
use hyperlocal::{UnixClientExt, UnixConnector, Uri};
use tracing::{debug, error, info};

use crate::{ContainerEngine, EngineError, LogDecoder, LogStream};

/// Default location of the Docker daemon socket.
pub const DEFAULT_DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Grace period before a stopped container is killed.
const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Docker Engine client.
pub struct DockerEngine {
    socket_path: String,
    client: Client<UnixConnector>,
    stop_timeout: Duration,
}

impl DockerEngine {
    /// Create a client for the daemon listening on `socket_path`.
    pub fn new<P: AsRef<Path>>(socket_path: P) -> Self {
        let socket_path = socket_path.as_ref().to_string_lossy().to_string();
        Self {
            socket_path,
            client: Client::unix(),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    /// Override the stop grace period.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Check if the socket exists.
    pub fn socket_exists(&self) -> bool {
        Path::new(&self.socket_path).exists()
    }

    /// POST a lifecycle action. `304 Not Modified` means the container is
    /// already in the requested state.
    async fn action(&self, name: &str, path: &str) -> Result<(), EngineError> {
        let uri = Uri::new(&self.socket_path, path);
        debug!(container = name, path, "POST request to Docker API");

        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .body(Body::empty())?;

        let response = self.client.request(request).await?;
        let status = response.status();

        if status.is_success() || status == StatusCode::NOT_MODIFIED {
            return Ok(());
        }

        let body = hyper::body::aggregate(response.into_body()).await?;
        let message = String::from_utf8_lossy(body.chunk()).to_string();
        error!(container = name, status = %status, message = %message, "Docker API error");
        Err(api_error(name, status, message))
    }
}

fn api_error(name: &str, status: StatusCode, message: String) -> EngineError {
    if status == StatusCode::NOT_FOUND {
        EngineError::NotFound(name.to_string())
    } else {
        EngineError::Api {
            status: status.as_u16(),
            message,
        }
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn start(&self, name: &str) -> Result<(), EngineError> {
        self.action(name, &format!("/containers/{name}/start")).await?;
        info!(container = name, "Container started");
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<(), EngineError> {
        let path = format!("/containers/{name}/stop?t={}", self.stop_timeout.as_secs());
        self.action(name, &path).await?;
        info!(container = name, "Container stopped");
        Ok(())
    }

    async fn restart(&self, name: &str) -> Result<(), EngineError> {
        let path = format!(
            "/containers/{name}/restart?t={}",
            self.stop_timeout.as_secs()
        );
        self.action(name, &path).await?;
        info!(container = name, "Container restarted");
        Ok(())
    }

    async fn logs(&self, name: &str) -> Result<LogStream, EngineError> {
        let path = format!("/containers/{name}/logs?follow=1&stdout=1&stderr=1");
        let uri = Uri::new(&self.socket_path, &path);
        debug!(container = name, "Following container logs");

        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())?;

        let response = self.client.request(request).await?;
        let status = response.status();
        if !status.is_success() {
            let body = hyper::body::aggregate(response.into_body()).await?;
            let message = String::from_utf8_lossy(body.chunk()).to_string();
            return Err(api_error(name, status, message));
        }

        Ok(lines(response.into_body()))
    }
}

/// Turn a raw log body into a stream of lines.
fn lines(body: Body) -> LogStream {
    let stream = futures_util::stream::unfold(
        (body, LogDecoder::new(), false),
        |(mut body, mut decoder, mut eof)| async move {
            loop {
                if let Some(line) = decoder.next_line() {
                    return Some((Ok(line), (body, decoder, eof)));
                }
                if eof {
                    return decoder
                        .finish()
                        .map(|line| (Ok(line), (body, decoder, true)));
                }
                match body.next().await {
                    Some(Ok(chunk)) => decoder.push(&chunk),
                    Some(Err(e)) => return Some((Err(EngineError::Http(e)), (body, decoder, true))),
                    None => eof = true,
                }
            }
        },
    );
    Box::pin(stream)
}
