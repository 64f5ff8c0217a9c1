//! Documents persisted by the state store.

use dockyard_core::InstanceKind;
use serde::{Deserialize, Serialize};

use crate::error::{StateError, StateResult};

/// A managed application or database bound to one container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub name: String,
    pub kind: InstanceKind,
    /// Runtime (`php`, `node`, ...) or database engine name.
    pub language: String,
    pub image: String,
    /// Empty until provisioning binds a container.
    pub container_id: String,
    pub container_name: String,
    pub host_ip: String,
    /// Host port the container is published on.
    pub container_port: u16,
    pub work_dir: String,
    /// Host-side directory mounted into the container.
    pub store_dir: String,
    pub owner: String,
    /// Unix epoch seconds.
    pub created_at: u64,
    /// Discovery key in the service registry.
    pub registry_key: String,
    /// Service whose load counter this instance contributes to.
    pub service: String,
    #[serde(default)]
    pub install_exec_id: Option<String>,
    #[serde(default)]
    pub restart_count: u32,
    #[serde(default)]
    pub last_restart_at: Option<u64>,
}

impl Instance {
    /// Build the composite key for the instances table.
    pub fn table_key(&self) -> String {
        instance_key(self.kind, &self.name)
    }
}

pub fn instance_key(kind: InstanceKind, name: &str) -> String {
    format!("{kind}/{name}")
}

/// Selects instances by any combination of name, kind and owner.
///
/// An empty filter matches every instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceFilter {
    pub name: Option<String>,
    pub kind: Option<InstanceKind>,
    pub owner: Option<String>,
}

impl InstanceFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn named(name: &str, kind: InstanceKind) -> Self {
        Self {
            name: Some(name.to_string()),
            kind: Some(kind),
            owner: None,
        }
    }

    pub fn kind(kind: InstanceKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    pub fn owner(owner: &str) -> Self {
        Self {
            owner: Some(owner.to_string()),
            ..Self::default()
        }
    }

    pub fn matches(&self, instance: &Instance) -> bool {
        self.name.as_ref().is_none_or(|n| *n == instance.name)
            && self.kind.is_none_or(|k| k == instance.kind)
            && self.owner.as_ref().is_none_or(|o| *o == instance.owner)
    }

    /// Exact table key when both name and kind are set.
    pub(crate) fn exact_key(&self) -> Option<String> {
        match (&self.name, self.kind) {
            (Some(name), Some(kind)) => Some(instance_key(kind, name)),
            _ => None,
        }
    }
}

/// Partial update applied by [`update_instances`](crate::InstanceStore::update_instances).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstancePatch {
    pub container_id: Option<String>,
    pub host_ip: Option<String>,
    pub container_port: Option<u16>,
    pub owner: Option<String>,
    pub install_exec_id: Option<String>,
    /// Record a restart at this epoch: bumps `restart_count` and sets
    /// `last_restart_at`.
    pub restarted_at: Option<u64>,
}

impl InstancePatch {
    pub fn restarted(at: u64) -> Self {
        Self {
            restarted_at: Some(at),
            ..Self::default()
        }
    }

    pub fn apply(&self, instance: &mut Instance) {
        if let Some(id) = &self.container_id {
            instance.container_id = id.clone();
        }
        if let Some(ip) = &self.host_ip {
            instance.host_ip = ip.clone();
        }
        if let Some(port) = self.container_port {
            instance.container_port = port;
        }
        if let Some(owner) = &self.owner {
            instance.owner = owner.clone();
        }
        if let Some(exec_id) = &self.install_exec_id {
            instance.install_exec_id = Some(exec_id.clone());
        }
        if let Some(at) = self.restarted_at {
            instance.restart_count += 1;
            instance.last_restart_at = Some(at);
        }
    }
}

/// A point-in-time resource observation for one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub name: String,
    pub kind: InstanceKind,
    pub alive: bool,
    /// Unix epoch seconds.
    pub read_time: u64,
    /// Current memory usage over limit (0.0-1.0).
    pub memory_usage_fraction: f64,
    /// Peak memory usage over limit (0.0-1.0).
    pub max_memory_usage_fraction: f64,
    pub memory_limit_gib: f64,
    pub online_cpus: u64,
    /// Core-seconds per second, normalized by online CPUs.
    pub cpu_usage_fraction: f64,
    pub host_ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
}

impl MetricsSnapshot {
    /// Key of the latest-document table.
    pub fn latest_key(&self) -> String {
        instance_key(self.kind, &self.name)
    }

    /// Key of the history table.
    pub fn table_key(&self) -> String {
        format!("{}:{:020}", self.latest_key(), self.read_time)
    }

    /// Reject documents that would be stored under a bad key or hold
    /// values JSON cannot represent.
    pub fn validate(&self) -> StateResult<()> {
        if self.name.is_empty() {
            return Err(StateError::InvalidDocument("metrics name is empty".into()));
        }
        let fields = [
            ("memory_usage_fraction", self.memory_usage_fraction),
            ("max_memory_usage_fraction", self.max_memory_usage_fraction),
            ("memory_limit_gib", self.memory_limit_gib),
            ("cpu_usage_fraction", self.cpu_usage_fraction),
        ];
        for (field, value) in fields {
            if !value.is_finite() {
                return Err(StateError::InvalidDocument(format!(
                    "{field} of {} is not finite",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// One operation in a metrics bulk write.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricsWrite {
    /// Append to the history table.
    Insert(MetricsSnapshot),
    /// Replace the latest document for the name.
    Upsert(MetricsSnapshot),
}

impl MetricsWrite {
    pub fn snapshot(&self) -> &MetricsSnapshot {
        match self {
            MetricsWrite::Insert(s) | MetricsWrite::Upsert(s) => s,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkWriteOptions {
    /// Stop at the first failing operation.
    pub ordered: bool,
}

impl BulkWriteOptions {
    pub fn unordered() -> Self {
        Self { ordered: false }
    }

    pub fn ordered() -> Self {
        Self { ordered: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkWriteFailure {
    /// Position of the failed operation in the submitted batch.
    pub index: usize,
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkWriteResult {
    pub applied: usize,
    pub failures: Vec<BulkWriteFailure>,
}
