//! Provisioning and cleanup errors.

use std::fmt;
use std::path::PathBuf;

use dockyard_core::{InstanceKind, RequestError};
use dockyard_driver::DriverError;
use dockyard_registry::RegistryError;
use dockyard_state::StateError;
use serde::Serialize;
use thiserror::Error;

use crate::cleanup::CleanupStep;

pub type ProvisionResult<T> = Result<T, ProvisionError>;
pub type CleanupResult<T> = Result<T, CleanupError>;

/// Pipeline stage a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionStage {
    Validating,
    LocatingOrCreating,
    Configuring,
    StateRegistering,
    RegistryRegistering,
}

impl fmt::Display for ProvisionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProvisionStage::Validating => "validating",
            ProvisionStage::LocatingOrCreating => "locating-or-creating",
            ProvisionStage::Configuring => "configuring",
            ProvisionStage::StateRegistering => "state-registering",
            ProvisionStage::RegistryRegistering => "registry-registering",
        })
    }
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] RequestError),

    #[error("{stage}: container runtime: {source}")]
    Runtime {
        stage: ProvisionStage,
        #[source]
        source: DriverError,
    },

    #[error("container {container} failed inspection again after being recreated: {source}")]
    RecreateFailed {
        container: String,
        #[source]
        source: DriverError,
    },

    #[error("failed to prepare storage directory {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no free host port on {ip}: {source}")]
    PortAllocation {
        ip: std::net::IpAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("{stage}: state store: {source}")]
    State {
        stage: ProvisionStage,
        #[source]
        source: StateError,
    },

    #[error("registry-registering: {0}")]
    Registry(#[source] RegistryError),

    #[error("{kind} instance `{name}` not found")]
    NotFound { name: String, kind: InstanceKind },
}

impl ProvisionError {
    pub(crate) fn runtime(stage: ProvisionStage) -> impl FnOnce(DriverError) -> Self {
        move |source| ProvisionError::Runtime { stage, source }
    }

    pub(crate) fn state(stage: ProvisionStage) -> impl FnOnce(StateError) -> Self {
        move |source| ProvisionError::State { stage, source }
    }

    /// The stage the pipeline was in, when the failure came from one.
    pub fn stage(&self) -> Option<ProvisionStage> {
        match self {
            ProvisionError::InvalidRequest(_) => Some(ProvisionStage::Validating),
            ProvisionError::Runtime { stage, .. } | ProvisionError::State { stage, .. } => {
                Some(*stage)
            }
            ProvisionError::RecreateFailed { .. }
            | ProvisionError::Storage { .. }
            | ProvisionError::PortAllocation { .. } => Some(ProvisionStage::LocatingOrCreating),
            ProvisionError::Registry(_) => Some(ProvisionStage::RegistryRegistering),
            ProvisionError::NotFound { .. } => None,
        }
    }

    /// HTTP-style status for the request layer.
    pub fn status_code(&self) -> u16 {
        match self {
            ProvisionError::InvalidRequest(_) => 400,
            ProvisionError::NotFound { .. } => 404,
            ProvisionError::Runtime { source, .. } | ProvisionError::RecreateFailed { source, .. }
                if source.is_unreachable() =>
            {
                502
            }
            _ => 500,
        }
    }
}

/// Client-facing error payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub status: u16,
    pub message: String,
}

impl From<&ProvisionError> for ErrorBody {
    fn from(err: &ProvisionError) -> Self {
        Self {
            status: err.status_code(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("failed to look up {kind} instance `{name}`: {source}")]
    Lookup {
        name: String,
        kind: InstanceKind,
        #[source]
        source: StateError,
    },

    #[error("teardown of {kind} instance `{name}` incomplete; failed steps: {failed:?}")]
    Incomplete {
        name: String,
        kind: InstanceKind,
        failed: Vec<CleanupStep>,
    },
}
