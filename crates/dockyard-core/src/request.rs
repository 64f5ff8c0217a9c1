//! Provisioning requests.
//!
//! The request layer hands the pipeline a [`ProvisionRequest`], a tagged
//! union of the two instance kinds. Validation happens here, before any
//! side effect: a request that fails [`ProvisionRequest::validate`] never
//! touches the container runtime or the stores.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::PlatformConfig;
use crate::engine::DatabaseEngine;
use crate::types::InstanceKind;

/// Reasons a request is rejected at the boundary.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("invalid name `{name}`: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("field `{0}` is required but was not provided")]
    MissingField(&'static str),

    #[error("runtime `{0}` is not offered on this host")]
    UnknownRuntime(String),

    #[error("database engine `{0}` is not offered on this host")]
    UnknownEngine(DatabaseEngine),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProvisionRequest {
    Application(ApplicationRequest),
    Database(DatabaseRequest),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApplicationRequest {
    pub name: String,
    /// Runtime name, one of the configured `applications.*` entries.
    pub runtime: String,
    pub owner: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Run the runtime's install command after the container starts.
    #[serde(default)]
    pub install_dependencies: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseRequest {
    pub name: String,
    pub engine: DatabaseEngine,
    /// Database user; defaults to the database name.
    pub user: Option<String>,
    pub password: String,
    pub owner: String,
}

impl DatabaseRequest {
    pub fn user(&self) -> &str {
        self.user.as_deref().unwrap_or(&self.name)
    }
}

impl ProvisionRequest {
    pub fn name(&self) -> &str {
        match self {
            ProvisionRequest::Application(app) => &app.name,
            ProvisionRequest::Database(db) => &db.name,
        }
    }

    pub fn kind(&self) -> InstanceKind {
        match self {
            ProvisionRequest::Application(_) => InstanceKind::Application,
            ProvisionRequest::Database(_) => InstanceKind::Database,
        }
    }

    pub fn owner(&self) -> &str {
        match self {
            ProvisionRequest::Application(app) => &app.owner,
            ProvisionRequest::Database(db) => &db.owner,
        }
    }

    /// Check the request against the platform's offering.
    pub fn validate(&self, config: &PlatformConfig) -> Result<(), RequestError> {
        if self.owner().trim().is_empty() {
            return Err(RequestError::MissingField("owner"));
        }
        match self {
            ProvisionRequest::Application(app) => {
                validate_name(&app.name, true)?;
                if !config.applications.contains_key(&app.runtime) {
                    return Err(RequestError::UnknownRuntime(app.runtime.clone()));
                }
            }
            ProvisionRequest::Database(db) => {
                validate_name(&db.name, false)?;
                if let Some(user) = &db.user {
                    validate_name(user, false)?;
                }
                if db.password.is_empty() {
                    return Err(RequestError::MissingField("password"));
                }
                if !config.databases.contains_key(&db.engine) {
                    return Err(RequestError::UnknownEngine(db.engine));
                }
            }
        }
        Ok(())
    }
}

/// Names become container names, storage paths and registry keys, so
/// they are restricted to lowercase ASCII alphanumerics. Applications may
/// also use `-`; database names double as SQL identifiers and may not.
fn validate_name(name: &str, allow_dash: bool) -> Result<(), RequestError> {
    let fail = |reason| {
        Err(RequestError::InvalidName {
            name: name.to_string(),
            reason,
        })
    };
    if name.is_empty() {
        return fail("must not be empty");
    }
    if name.len() > 63 {
        return fail("must be at most 63 characters");
    }
    if name.starts_with('-') || name.ends_with('-') {
        return fail("must not start or end with `-`");
    }
    let ok = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || (allow_dash && c == '-'));
    if !ok {
        return fail("must contain only lowercase alphanumeric characters");
    }
    Ok(())
}
