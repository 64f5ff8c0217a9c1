//! Values exchanged with the container runtime.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Everything needed to create a container. Creation never starts it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: Vec<(String, String)>,
    pub ports: Vec<PortMapping>,
    pub volumes: Vec<VolumeMount>,
    pub command: Option<Vec<String>>,
    pub working_dir: Option<String>,
    pub healthcheck: Option<HealthCheck>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    pub container_port: u16,
    pub host_ip: std::net::IpAddr,
    pub host_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub host_path: String,
    pub container_path: String,
}

/// Runtime-side health check command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    /// Docker `HEALTHCHECK` test, e.g. `["CMD", "pg_isready"]`.
    pub test: Vec<String>,
    pub interval: Duration,
    pub timeout: Duration,
    pub retries: u32,
}

impl HealthCheck {
    pub fn command(test: &[impl AsRef<str>]) -> Self {
        Self {
            test: test.iter().map(|s| s.as_ref().to_string()).collect(),
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(5),
            retries: 3,
        }
    }
}

/// Health reported by the runtime's own health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerHealth {
    Healthy,
    Unhealthy,
    Starting,
    /// No health check configured.
    None,
}

/// Result of inspecting a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerState {
    pub id: String,
    pub running: bool,
    pub health: ContainerHealth,
    /// Working directory from the container config, if any.
    pub working_dir: Option<String>,
    /// First host port the container publishes.
    pub published_port: Option<u16>,
}

/// Raw resource-usage counters for one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceStats {
    pub memory_usage: u64,
    pub max_memory_usage: u64,
    /// Zero when the container is stopped.
    pub memory_limit: u64,
    /// Cumulative CPU time in nanoseconds.
    pub cpu_total_usage: u64,
    pub online_cpus: u64,
}

/// How a command runs inside a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Attach a TTY and wait for the command to finish.
    Blocking,
    /// Start the command and return its execution id immediately.
    Detached,
    /// Wait for the command and return what it printed.
    CaptureOutput,
}

/// What an exec call produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    /// Execution id of a blocking or detached command.
    Started { exec_id: String },
    /// Output of a capture-output command that exited zero.
    Output { exec_id: String, output: String },
}

impl ExecOutcome {
    pub fn exec_id(&self) -> &str {
        match self {
            ExecOutcome::Started { exec_id } | ExecOutcome::Output { exec_id, .. } => exec_id,
        }
    }

    pub fn output(&self) -> Option<&str> {
        match self {
            ExecOutcome::Output { output, .. } => Some(output),
            ExecOutcome::Started { .. } => None,
        }
    }
}

/// Status of an execution started earlier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecStatus {
    pub running: bool,
    pub exit_code: Option<i64>,
}
