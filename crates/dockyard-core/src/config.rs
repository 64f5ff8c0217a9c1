//! dockyard.toml configuration.
//!
//! The file is parsed into [`DockyardConfig`], a loose mirror of the TOML
//! document, and then validated once into [`PlatformConfig`]. Everything
//! downstream only ever sees the validated form: durations are parsed,
//! database engines are typed, ports are non-zero.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration::parse_duration;
use crate::engine::DatabaseEngine;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: String, reason: String },
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── Raw TOML document ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockyardConfig {
    pub host: HostSection,
    pub state: StoreSection,
    pub registry: StoreSection,
    #[serde(default)]
    pub docker: DockerSection,
    #[serde(default)]
    pub reconcile: ReconcileSection,
    #[serde(default)]
    pub cleanup: CleanupSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub applications: BTreeMap<String, ApplicationSection>,
    #[serde(default)]
    pub databases: BTreeMap<String, DatabaseSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSection {
    pub ip: String,
    /// Endpoint other services use to reach this host's workers.
    pub advertise: Option<String>,
    pub storage_root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSection {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DockerSection {
    /// Unix socket path; the local default is used when absent.
    pub socket: Option<String>,
    pub short_timeout: Option<String>,
    pub long_timeout: Option<String>,
    pub pull_timeout: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileSection {
    pub metrics_interval: Option<String>,
    pub health_interval: Option<String>,
    pub log_tail_lines: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanupSection {
    pub max_attempts: Option<u32>,
    pub initial_backoff: Option<String>,
    pub max_backoff: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSection {
    pub filter: Option<String>,
    pub json: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationSection {
    pub image: String,
    pub port: u16,
    pub work_dir: Option<String>,
    pub install_command: Option<Vec<String>>,
    pub healthcheck: Option<Vec<String>>,
    pub env: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub image: String,
    pub port: Option<u16>,
    pub env: Option<BTreeMap<String, String>>,
    pub config_file: Option<String>,
    pub log_file: Option<String>,
}

// ── Validated configuration ───────────────────────────────────────

/// Validated platform configuration shared by every component.
#[derive(Debug, Clone, PartialEq)]
pub struct PlatformConfig {
    pub host_ip: IpAddr,
    /// Endpoint recorded against service load counters.
    pub advertise_addr: String,
    /// Root of the host-side instance volumes.
    pub storage_root: PathBuf,
    pub state_path: PathBuf,
    pub registry_path: PathBuf,
    pub docker: DockerSettings,
    pub reconcile: ReconcileSettings,
    pub cleanup: CleanupSettings,
    pub logging: LoggingSettings,
    /// Application runtimes keyed by runtime name ("nodejs", "php", ...).
    pub applications: BTreeMap<String, ApplicationService>,
    pub databases: BTreeMap<DatabaseEngine, DatabaseService>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DockerSettings {
    pub socket: Option<String>,
    pub short_timeout: Duration,
    pub long_timeout: Duration,
    pub pull_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileSettings {
    pub metrics_interval: Duration,
    pub health_interval: Duration,
    pub log_tail_lines: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CleanupSettings {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    pub filter: String,
    pub json: bool,
}

/// An application runtime the platform can host.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationService {
    pub runtime: String,
    pub image: String,
    /// Port the application listens on inside the container.
    pub port: u16,
    pub work_dir: String,
    pub install_command: Option<Vec<String>>,
    pub healthcheck: Option<Vec<String>>,
    pub env: BTreeMap<String, String>,
}

/// A database engine the platform can host.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseService {
    pub engine: DatabaseEngine,
    pub image: String,
    /// Port the engine listens on inside the container.
    pub port: u16,
    pub env: BTreeMap<String, String>,
    pub config_file: String,
    pub log_file: String,
}

impl DockyardConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Validate the raw document into a [`PlatformConfig`].
    pub fn validate(self) -> Result<PlatformConfig, ConfigError> {
        let host_ip: IpAddr = self
            .host
            .ip
            .parse()
            .map_err(|_| invalid("host.ip", format!("`{}` is not an IP address", self.host.ip)))?;
        let advertise_addr = self.host.advertise.unwrap_or_else(|| host_ip.to_string());

        let docker = DockerSettings {
            socket: self.docker.socket,
            short_timeout: duration_or("docker.short_timeout", self.docker.short_timeout, 10)?,
            long_timeout: duration_or("docker.long_timeout", self.docker.long_timeout, 30)?,
            pull_timeout: duration_or("docker.pull_timeout", self.docker.pull_timeout, 300)?,
        };

        let reconcile = ReconcileSettings {
            metrics_interval: duration_or(
                "reconcile.metrics_interval",
                self.reconcile.metrics_interval,
                60,
            )?,
            health_interval: duration_or(
                "reconcile.health_interval",
                self.reconcile.health_interval,
                30,
            )?,
            log_tail_lines: self.reconcile.log_tail_lines.unwrap_or(10),
        };

        let cleanup = CleanupSettings {
            max_attempts: self.cleanup.max_attempts.unwrap_or(5),
            initial_backoff: duration_or("cleanup.initial_backoff", self.cleanup.initial_backoff, 1)?,
            max_backoff: duration_or("cleanup.max_backoff", self.cleanup.max_backoff, 30)?,
        };
        if cleanup.max_attempts == 0 {
            return Err(invalid("cleanup.max_attempts", "must be at least 1"));
        }

        let logging = LoggingSettings {
            filter: self
                .logging
                .filter
                .unwrap_or_else(|| "info,dockyard=debug".to_string()),
            json: self.logging.json.unwrap_or(false),
        };

        let mut applications = BTreeMap::new();
        for (runtime, section) in self.applications {
            let field = format!("applications.{runtime}");
            if section.image.trim().is_empty() {
                return Err(invalid(format!("{field}.image"), "must not be empty"));
            }
            if section.port == 0 {
                return Err(invalid(format!("{field}.port"), "must be non-zero"));
            }
            if matches!(&section.install_command, Some(cmd) if cmd.is_empty()) {
                return Err(invalid(format!("{field}.install_command"), "must not be empty"));
            }
            applications.insert(
                runtime.clone(),
                ApplicationService {
                    runtime,
                    image: section.image,
                    port: section.port,
                    work_dir: section.work_dir.unwrap_or_else(|| "/app".to_string()),
                    install_command: section.install_command,
                    healthcheck: section.healthcheck,
                    env: section.env.unwrap_or_default(),
                },
            );
        }

        let mut databases = BTreeMap::new();
        for (name, section) in self.databases {
            let field = format!("databases.{name}");
            let engine: DatabaseEngine = name.parse().map_err(|e: String| invalid(&field, e))?;
            if section.image.trim().is_empty() {
                return Err(invalid(format!("{field}.image"), "must not be empty"));
            }
            let profile = engine.profile();
            let port = section.port.unwrap_or(profile.internal_port);
            if port == 0 {
                return Err(invalid(format!("{field}.port"), "must be non-zero"));
            }
            databases.insert(
                engine,
                DatabaseService {
                    engine,
                    image: section.image,
                    port,
                    env: section.env.unwrap_or_default(),
                    config_file: section
                        .config_file
                        .unwrap_or_else(|| profile.config_file.to_string()),
                    log_file: section
                        .log_file
                        .unwrap_or_else(|| profile.log_file.to_string()),
                },
            );
        }

        Ok(PlatformConfig {
            host_ip,
            advertise_addr,
            storage_root: self.host.storage_root,
            state_path: self.state.path,
            registry_path: self.registry.path,
            docker,
            reconcile,
            cleanup,
            logging,
            applications,
            databases,
        })
    }
}

impl PlatformConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        DockyardConfig::from_file(path)?.validate()
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let raw: DockyardConfig = toml::from_str(content)?;
        raw.validate()
    }

    /// Every image the platform may need, deduplicated.
    pub fn required_images(&self) -> Vec<String> {
        let mut images: Vec<String> = self
            .applications
            .values()
            .map(|a| a.image.clone())
            .chain(self.databases.values().map(|d| d.image.clone()))
            .collect();
        images.sort();
        images.dedup();
        images
    }
}

fn duration_or(field: &str, value: Option<String>, default_secs: u64) -> Result<Duration, ConfigError> {
    let Some(raw) = value else {
        return Ok(Duration::from_secs(default_secs));
    };
    match parse_duration(&raw) {
        Some(d) if !d.is_zero() => Ok(d),
        Some(_) => Err(invalid(field, "must be greater than zero")),
        None => Err(invalid(field, format!("`{raw}` is not a duration"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[host]
ip = "10.0.0.5"
storage_root = "/srv/dockyard"

[state]
path = "/var/lib/dockyard/state.redb"

[registry]
path = "/var/lib/dockyard/registry.redb"
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = PlatformConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.advertise_addr, "10.0.0.5");
        assert_eq!(config.reconcile.metrics_interval, Duration::from_secs(60));
        assert_eq!(config.reconcile.health_interval, Duration::from_secs(30));
        assert_eq!(config.reconcile.log_tail_lines, 10);
        assert_eq!(config.docker.short_timeout, Duration::from_secs(10));
        assert_eq!(config.docker.long_timeout, Duration::from_secs(30));
        assert_eq!(config.cleanup.max_attempts, 5);
        assert!(config.applications.is_empty());
    }

    #[test]
    fn services_are_typed() {
        let toml_str = format!(
            r#"{MINIMAL}
[reconcile]
metrics_interval = "15s"
health_interval = "500ms"

[applications.nodejs]
image = "node:20"
port = 3000
install_command = ["npm", "install"]

[databases.postgresql]
image = "postgres:16"
env = {{ PGDATA = "/var/lib/postgresql/data" }}
"#
        );
        let config = PlatformConfig::from_toml_str(&toml_str).unwrap();

        assert_eq!(config.reconcile.metrics_interval, Duration::from_secs(15));
        assert_eq!(config.reconcile.health_interval, Duration::from_millis(500));

        let node = &config.applications["nodejs"];
        assert_eq!(node.work_dir, "/app");
        assert_eq!(node.install_command.as_deref(), Some(&["npm".to_string(), "install".to_string()][..]));

        let pg = &config.databases[&DatabaseEngine::Postgresql];
        assert_eq!(pg.port, 5432);
        assert_eq!(pg.log_file, DatabaseEngine::Postgresql.profile().log_file);
        assert_eq!(config.required_images(), vec!["node:20", "postgres:16"]);
    }

    #[test]
    fn unknown_engine_is_rejected() {
        let toml_str = format!("{MINIMAL}\n[databases.oracle]\nimage = \"oracle:latest\"\n");
        let err = PlatformConfig::from_toml_str(&toml_str).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "databases.oracle"));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let toml_str = format!("{MINIMAL}\n[reconcile]\nhealth_interval = \"0s\"\n");
        let err = PlatformConfig::from_toml_str(&toml_str).unwrap_err();
        assert!(err.to_string().contains("reconcile.health_interval"));
    }

    #[test]
    fn bad_host_ip_is_rejected() {
        let toml_str = MINIMAL.replace("10.0.0.5", "not-an-ip");
        assert!(PlatformConfig::from_toml_str(&toml_str).is_err());
    }

    #[test]
    fn zero_application_port_is_rejected() {
        let toml_str = format!("{MINIMAL}\n[applications.php]\nimage = \"php:8\"\nport = 0\n");
        let err = PlatformConfig::from_toml_str(&toml_str).unwrap_err();
        assert!(err.to_string().contains("applications.php.port"));
    }
}
