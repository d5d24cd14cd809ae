//! Error types for cluster and workload orchestration.

use std::time::Duration;

use thiserror::Error;
use vcluster_converge::ConvergeError;
use vcluster_coordination::CoordinationError;
use vcluster_docker::EngineError;
use vcluster_scheduler::ClientError;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad input or setup misuse. Never retried.
    Config,
    /// Poll budget exhausted.
    Timeout,
    /// Failure state observed.
    Abort,
    /// Goal state reached with the wrong number of instances in it.
    StructuralMismatch,
    /// Every fetch of a poll failed.
    FetchExhausted,
    /// Shutdown requested mid-poll.
    Cancelled,
    /// A module did not come up.
    Launch,
    /// Hard failure of an external call outside polling.
    Client,
}

/// Orchestration errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("timeout after {elapsed:?} waiting for {resource}, last state {last_state}")]
    Timeout {
        resource: String,
        last_state: String,
        elapsed: Duration,
    },

    #[error("{resource} reached failure state {state}")]
    Abort { resource: String, state: String },

    #[error("{resource} reached its goal state with {actual} of {expected} instances")]
    StructuralMismatch {
        resource: String,
        expected: u32,
        actual: u32,
    },

    #[error("could not fetch state of {resource}: {last_error}")]
    FetchExhausted { resource: String, last_error: String },

    #[error("cancelled while waiting for {resource}")]
    Cancelled { resource: String },

    #[error("module {module} failed to launch: {source}")]
    Launch {
        module: String,
        #[source]
        source: Box<Error>,
    },

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Coordination(#[from] CoordinationError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) => ErrorKind::Config,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Abort { .. } => ErrorKind::Abort,
            Error::StructuralMismatch { .. } => ErrorKind::StructuralMismatch,
            Error::FetchExhausted { .. } => ErrorKind::FetchExhausted,
            Error::Cancelled { .. } => ErrorKind::Cancelled,
            Error::Launch { .. } => ErrorKind::Launch,
            Error::Client(_) | Error::Coordination(_) | Error::Engine(_) => ErrorKind::Client,
        }
    }

    /// Wrap a bring-up failure of `module`.
    pub fn launch(module: impl Into<String>, source: Error) -> Self {
        Error::Launch {
            module: module.into(),
            source: Box::new(source),
        }
    }
}

impl From<ConvergeError> for Error {
    fn from(err: ConvergeError) -> Self {
        match err {
            ConvergeError::InvalidConfig(message) => Error::Config(message),
            ConvergeError::Timeout {
                resource,
                last_state,
                elapsed,
                ..
            } => Error::Timeout {
                resource,
                last_state,
                elapsed,
            },
            ConvergeError::Abort {
                resource, state, ..
            } => Error::Abort { resource, state },
            ConvergeError::FetchExhausted {
                resource,
                last_error,
                ..
            } => Error::FetchExhausted {
                resource,
                last_error,
            },
            ConvergeError::Cancelled { resource, .. } => Error::Cancelled { resource },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_converge_errors_keep_their_kind() {
        let timeout: Error = ConvergeError::Timeout {
            resource: "job".to_string(),
            last_state: "PENDING".to_string(),
            elapsed: Duration::from_secs(2),
            attempts: 3,
        }
        .into();
        assert_eq!(timeout.kind(), ErrorKind::Timeout);

        let exhausted: Error = ConvergeError::FetchExhausted {
            resource: "job".to_string(),
            attempts: 3,
            last_error: "connection refused".to_string(),
        }
        .into();
        assert_eq!(exhausted.kind(), ErrorKind::FetchExhausted);

        let invalid: Error = ConvergeError::InvalidConfig("zero attempts".to_string()).into();
        assert_eq!(invalid.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_launch_wraps_source() {
        let err = Error::launch(
            "zookeeper",
            Error::Abort {
                resource: "l1_zookeeper".to_string(),
                state: "FAILED".to_string(),
            },
        );
        assert_eq!(err.kind(), ErrorKind::Launch);
        assert!(err.to_string().contains("zookeeper"));
        assert!(matches!(err, Error::Launch { source, .. } if source.kind() == ErrorKind::Abort));
    }

    #[test]
    fn test_client_errors() {
        let err: Error = ClientError::NotFound("job-1".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Client);

        // Outside a poll, a transient failure is still a client error.
        let unavailable = ClientError::Unavailable("jobmgr down".to_string());
        assert!(unavailable.is_transient());
        assert_eq!(Error::from(unavailable).kind(), ErrorKind::Client);
    }
}
