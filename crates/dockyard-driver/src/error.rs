//! Container driver error types.

use std::time::Duration;

use thiserror::Error;

pub type DriverResult<T> = Result<T, DriverError>;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("container or object not found: {0}")]
    NotFound(String),

    #[error("container runtime unreachable: {0}")]
    Unreachable(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("command exited with status {code}")]
    NonZeroExit { code: i64, output: String },

    #[error("container runtime error: {0}")]
    Api(String),
}

impl DriverError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DriverError::NotFound(_))
    }

    /// The runtime could not be reached or did not answer in time.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, DriverError::Unreachable(_) | DriverError::Timeout { .. })
    }
}

impl From<bollard::errors::Error> for DriverError {
    fn from(err: bollard::errors::Error) -> Self {
        use bollard::errors::Error;
        match err {
            Error::DockerResponseServerError {
                status_code: 404,
                message,
            } => DriverError::NotFound(message),
            Error::IOError { .. } | Error::HyperResponseError { .. } => {
                DriverError::Unreachable(err.to_string())
            }
            other => DriverError::Api(other.to_string()),
        }
    }
}
