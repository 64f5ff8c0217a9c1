//! The immutable description of one instance being provisioned.

use std::net::IpAddr;
use std::path::PathBuf;

use dockyard_core::engine::LOGGING_MARKER;
use dockyard_core::{InstanceKind, PlatformConfig, ProvisionRequest, RequestError};
use dockyard_driver::{ContainerSpec, HealthCheck, PortMapping, VolumeMount};
use dockyard_state::Instance;

use crate::cleanup::CleanupScope;

/// Kind-specific work done once the container runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigureStep {
    /// Append `block` to `config_file` unless it already carries the
    /// logging marker, then restart the container.
    EnableQueryLogging {
        config_file: String,
        log_file: String,
        block: String,
    },
    /// Start the dependency install detached and keep its exec id.
    InstallDependencies { command: Vec<String> },
    Nothing,
}

/// Everything the pipeline needs to know about one instance.
///
/// Derived once from a validated request. Stages never mutate a plan in
/// place; they consume it and return the next one.
#[derive(Debug, Clone, PartialEq)]
pub struct InstancePlan {
    pub name: String,
    pub kind: InstanceKind,
    pub owner: String,
    /// Runtime or engine name.
    pub language: String,
    pub image: String,
    pub container_name: String,
    pub env: Vec<(String, String)>,
    /// Port the workload listens on inside the container.
    pub internal_port: u16,
    pub host_ip: IpAddr,
    /// Host-side storage, bind-mounted at `mount_path`.
    pub store_dir: PathBuf,
    pub mount_path: String,
    /// Container working directory; empty for databases.
    pub work_dir: String,
    pub healthcheck: Option<HealthCheck>,
    /// Overrides the image's default command.
    pub command: Option<Vec<String>>,
    pub registry_key: String,
    pub service: String,
    pub configure: ConfigureStep,
    /// Set once a container is bound.
    pub container_id: Option<String>,
    pub host_port: Option<u16>,
    pub install_exec_id: Option<String>,
    /// Whether this run created the bound container.
    pub created_container: bool,
    /// Whether this run created `store_dir`.
    pub created_store_dir: bool,
}

impl InstancePlan {
    /// Validate `request` and derive its plan. No side effects.
    pub fn from_request(
        request: &ProvisionRequest,
        config: &PlatformConfig,
    ) -> Result<Self, RequestError> {
        request.validate(config)?;
        let kind = request.kind();
        let name = request.name().to_string();
        let store_dir = config.storage_root.join(kind.prefix()).join(&name);

        let plan = match request {
            ProvisionRequest::Application(app) => {
                let service = config
                    .applications
                    .get(&app.runtime)
                    .ok_or_else(|| RequestError::UnknownRuntime(app.runtime.clone()))?;
                let env = service
                    .env
                    .iter()
                    .chain(app.env.iter())
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                let configure = match (&service.install_command, app.install_dependencies) {
                    (Some(command), true) => ConfigureStep::InstallDependencies {
                        command: command.clone(),
                    },
                    _ => ConfigureStep::Nothing,
                };
                InstancePlan {
                    name: name.clone(),
                    kind,
                    owner: app.owner.clone(),
                    language: service.runtime.clone(),
                    image: service.image.clone(),
                    container_name: kind.container_name(&name),
                    env,
                    internal_port: service.port,
                    host_ip: config.host_ip,
                    store_dir,
                    mount_path: service.work_dir.clone(),
                    work_dir: service.work_dir.clone(),
                    healthcheck: service
                        .healthcheck
                        .as_ref()
                        .map(|test| HealthCheck::command(test.as_slice())),
                    command: None,
                    registry_key: name.clone(),
                    service: service.runtime.clone(),
                    configure,
                    container_id: None,
                    host_port: None,
                    install_exec_id: None,
                    created_container: false,
                    created_store_dir: false,
                }
            }
            ProvisionRequest::Database(db) => {
                let service = config
                    .databases
                    .get(&db.engine)
                    .ok_or(RequestError::UnknownEngine(db.engine))?;
                let profile = db.engine.profile();
                let env = service
                    .env
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .chain(db.engine.credential_env(&db.name, db.user(), &db.password))
                    .collect();
                InstancePlan {
                    name: name.clone(),
                    kind,
                    owner: db.owner.clone(),
                    language: db.engine.as_str().to_string(),
                    image: service.image.clone(),
                    container_name: kind.container_name(&name),
                    env,
                    internal_port: service.port,
                    host_ip: config.host_ip,
                    store_dir,
                    mount_path: profile.data_dir.to_string(),
                    work_dir: String::new(),
                    healthcheck: Some(HealthCheck::command(profile.healthcheck)),
                    command: db.engine.start_command(&service.config_file, &service.log_file),
                    registry_key: format!("{}:{}", db.user(), db.name),
                    service: db.engine.as_str().to_string(),
                    configure: ConfigureStep::EnableQueryLogging {
                        config_file: service.config_file.clone(),
                        log_file: service.log_file.clone(),
                        block: format!("{LOGGING_MARKER}\n{}", profile.logging_block),
                    },
                    container_id: None,
                    host_port: None,
                    install_exec_id: None,
                    created_container: false,
                    created_store_dir: false,
                }
            }
        };
        Ok(plan)
    }

    /// Container spec for a fresh container published on `host_port`.
    pub fn container_spec(&self, host_port: u16) -> ContainerSpec {
        ContainerSpec {
            name: self.container_name.clone(),
            image: self.image.clone(),
            env: self.env.clone(),
            ports: vec![PortMapping {
                container_port: self.internal_port,
                host_ip: self.host_ip,
                host_port,
            }],
            volumes: vec![VolumeMount {
                host_path: self.store_dir.display().to_string(),
                container_path: self.mount_path.clone(),
            }],
            command: self.command.clone(),
            working_dir: (!self.work_dir.is_empty()).then(|| self.work_dir.clone()),
            healthcheck: self.healthcheck.clone(),
        }
    }

    /// Plan bound to a container that existed before this run.
    pub fn bound(self, container_id: String, host_port: u16) -> Self {
        Self {
            container_id: Some(container_id),
            host_port: Some(host_port),
            ..self
        }
    }

    /// Plan bound to a container this run created.
    pub fn created(self, container_id: String, host_port: u16, created_store_dir: bool) -> Self {
        Self {
            created_container: true,
            created_store_dir,
            ..self.bound(container_id, host_port)
        }
    }

    /// What a failure from here on may tear down. A run that created the
    /// container owns the whole instance except storage it found in place.
    pub fn rollback_scope(&self) -> CleanupScope {
        if self.created_container {
            CleanupScope {
                storage: self.created_store_dir,
                ..CleanupScope::ALL
            }
        } else {
            CleanupScope::NONE
        }
    }

    pub fn with_install_exec(self, exec_id: String) -> Self {
        Self {
            install_exec_id: Some(exec_id),
            ..self
        }
    }

    /// `host:port` the instance is reachable on, once bound.
    pub fn endpoint(&self) -> Option<String> {
        self.host_port.map(|port| format!("{}:{port}", self.host_ip))
    }

    /// The state document for this plan.
    pub fn to_instance(&self, created_at: u64) -> Instance {
        Instance {
            name: self.name.clone(),
            kind: self.kind,
            language: self.language.clone(),
            image: self.image.clone(),
            container_id: self.container_id.clone().unwrap_or_default(),
            container_name: self.container_name.clone(),
            host_ip: self.host_ip.to_string(),
            container_port: self.host_port.unwrap_or(0),
            work_dir: self.work_dir.clone(),
            store_dir: self.store_dir.display().to_string(),
            owner: self.owner.clone(),
            created_at,
            registry_key: self.registry_key.clone(),
            service: self.service.clone(),
            install_exec_id: self.install_exec_id.clone(),
            restart_count: 0,
            last_restart_at: None,
        }
    }
}
