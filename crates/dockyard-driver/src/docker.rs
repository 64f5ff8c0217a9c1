//! Docker Engine backend over bollard.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
    RemoveContainerOptions, RestartContainerOptions, StartContainerOptions, StatsOptions,
    StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::{CreateImageOptions, ListImagesOptions};
use bollard::models::{HealthConfig, HealthStatusEnum, HostConfig, PortBinding};
use dockyard_core::config::DockerSettings;
use futures_util::{StreamExt, TryStreamExt};
use tracing::{debug, info, warn};

use crate::error::{DriverError, DriverResult};
use crate::runtime::ContainerRuntime;
use crate::types::*;

/// Seconds Docker waits for a graceful stop before killing.
const STOP_GRACE_SECS: i64 = 10;

/// Container runtime backed by the local Docker daemon.
#[derive(Clone)]
pub struct DockerDriver {
    docker: Docker,
    short_timeout: Duration,
    long_timeout: Duration,
    pull_timeout: Duration,
}

impl DockerDriver {
    /// Connect to the daemon at the configured socket, or the platform default.
    pub fn connect(settings: &DockerSettings) -> DriverResult<Self> {
        let docker = match &settings.socket {
            Some(socket) => Docker::connect_with_socket(
                socket,
                settings.long_timeout.as_secs().max(1),
                bollard::API_DEFAULT_VERSION,
            )?,
            None => Docker::connect_with_local_defaults()?,
        };
        info!(socket = ?settings.socket, "docker driver connected");
        Ok(Self {
            docker,
            short_timeout: settings.short_timeout,
            long_timeout: settings.long_timeout,
            pull_timeout: settings.pull_timeout,
        })
    }

    /// Round-trip check against the daemon.
    pub async fn ping(&self) -> DriverResult<()> {
        self.timed("ping", self.short_timeout, self.docker.ping())
            .await
            .map(|_| ())
    }

    async fn timed<T, F>(&self, operation: &'static str, after: Duration, fut: F) -> DriverResult<T>
    where
        F: Future<Output = Result<T, bollard::errors::Error>>,
    {
        match tokio::time::timeout(after, fut).await {
            Ok(result) => result.map_err(DriverError::from),
            Err(_) => Err(DriverError::Timeout { operation, after }),
        }
    }

    async fn run_exec(
        &self,
        container: &str,
        cmd: &[String],
        mode: ExecMode,
        privileged: bool,
    ) -> DriverResult<ExecOutcome> {
        let tty = mode == ExecMode::Blocking;
        let created = self
            .timed(
                "exec_create",
                self.short_timeout,
                self.docker.create_exec(
                    container,
                    CreateExecOptions {
                        cmd: Some(cmd.to_vec()),
                        attach_stdout: Some(mode != ExecMode::Detached),
                        attach_stderr: Some(mode != ExecMode::Detached),
                        tty: Some(tty),
                        privileged: Some(privileged),
                        ..Default::default()
                    },
                ),
            )
            .await?;
        let exec_id = created.id;
        debug!(container, exec_id = %exec_id, ?mode, "exec created");

        let detach = mode == ExecMode::Detached;
        let started = self
            .timed(
                "exec_start",
                self.short_timeout,
                self.docker.start_exec(
                    &exec_id,
                    Some(StartExecOptions {
                        detach,
                        tty,
                        output_capacity: None,
                    }),
                ),
            )
            .await?;

        let output = match started {
            StartExecResults::Detached => return Ok(ExecOutcome::Started { exec_id }),
            StartExecResults::Attached { output, .. } => {
                let drain = output
                    .map_ok(|chunk| chunk.to_string())
                    .try_collect::<Vec<String>>();
                self.timed("exec_wait", self.long_timeout, drain).await?.concat()
            }
        };

        let status = self.exec_status(&exec_id).await?;
        match status.exit_code {
            Some(0) | None => {}
            Some(code) => return Err(DriverError::NonZeroExit { code, output }),
        }

        Ok(match mode {
            ExecMode::CaptureOutput => ExecOutcome::Output { exec_id, output },
            _ => ExecOutcome::Started { exec_id },
        })
    }
}

fn to_health_config(check: &HealthCheck) -> HealthConfig {
    HealthConfig {
        test: Some(check.test.clone()),
        interval: Some(check.interval.as_nanos() as i64),
        timeout: Some(check.timeout.as_nanos() as i64),
        retries: Some(check.retries as i64),
        ..Default::default()
    }
}

fn to_health(status: Option<HealthStatusEnum>) -> ContainerHealth {
    match status {
        Some(HealthStatusEnum::HEALTHY) => ContainerHealth::Healthy,
        Some(HealthStatusEnum::UNHEALTHY) => ContainerHealth::Unhealthy,
        Some(HealthStatusEnum::STARTING) => ContainerHealth::Starting,
        _ => ContainerHealth::None,
    }
}

#[async_trait]
impl ContainerRuntime for DockerDriver {
    async fn create(&self, spec: &ContainerSpec) -> DriverResult<String> {
        let mut exposed_ports = HashMap::new();
        let mut port_bindings = HashMap::new();
        for mapping in &spec.ports {
            let key = format!("{}/tcp", mapping.container_port);
            exposed_ports.insert(key.clone(), HashMap::new());
            port_bindings.insert(
                key,
                Some(vec![PortBinding {
                    host_ip: Some(mapping.host_ip.to_string()),
                    host_port: Some(mapping.host_port.to_string()),
                }]),
            );
        }
        let binds = spec
            .volumes
            .iter()
            .map(|v| format!("{}:{}", v.host_path, v.container_path))
            .collect::<Vec<_>>();

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect()),
            cmd: spec.command.clone(),
            working_dir: spec.working_dir.clone(),
            exposed_ports: Some(exposed_ports),
            healthcheck: spec.healthcheck.as_ref().map(to_health_config),
            host_config: Some(HostConfig {
                port_bindings: Some(port_bindings),
                binds: Some(binds),
                ..Default::default()
            }),
            ..Default::default()
        };

        let response = self
            .timed(
                "create",
                self.short_timeout,
                self.docker.create_container(
                    Some(CreateContainerOptions {
                        name: spec.name.clone(),
                        platform: None,
                    }),
                    config,
                ),
            )
            .await?;
        for warning in &response.warnings {
            warn!(container = %spec.name, warning = %warning, "docker create warning");
        }
        info!(container = %spec.name, id = %response.id, image = %spec.image, "container created");
        Ok(response.id)
    }

    async fn start(&self, container: &str) -> DriverResult<()> {
        self.timed(
            "start",
            self.short_timeout,
            self.docker
                .start_container(container, None::<StartContainerOptions<String>>),
        )
        .await?;
        debug!(container, "container started");
        Ok(())
    }

    async fn stop(&self, container: &str) -> DriverResult<()> {
        self.timed(
            "stop",
            self.long_timeout,
            self.docker.stop_container(
                container,
                Some(StopContainerOptions { t: STOP_GRACE_SECS }),
            ),
        )
        .await?;
        debug!(container, "container stopped");
        Ok(())
    }

    async fn restart(&self, container: &str) -> DriverResult<()> {
        self.timed(
            "restart",
            self.long_timeout,
            self.docker.restart_container(
                container,
                Some(RestartContainerOptions {
                    t: STOP_GRACE_SECS as isize,
                }),
            ),
        )
        .await?;
        debug!(container, "container restarted");
        Ok(())
    }

    async fn remove(&self, container: &str, force: bool) -> DriverResult<()> {
        self.timed(
            "remove",
            self.long_timeout,
            self.docker.remove_container(
                container,
                Some(RemoveContainerOptions {
                    force,
                    ..Default::default()
                }),
            ),
        )
        .await?;
        debug!(container, force, "container removed");
        Ok(())
    }

    async fn container_exists(&self, name: &str) -> DriverResult<bool> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![name.to_string()]);
        let summaries = self
            .timed(
                "list_containers",
                self.short_timeout,
                self.docker.list_containers(Some(ListContainersOptions {
                    all: true,
                    filters,
                    ..Default::default()
                })),
            )
            .await?;

        // The name filter is a substring match; names carry a leading '/'.
        let wanted = format!("/{name}");
        Ok(summaries.iter().any(|summary| {
            summary
                .names
                .as_ref()
                .is_some_and(|names| names.iter().any(|n| *n == wanted))
        }))
    }

    async fn inspect(&self, container: &str) -> DriverResult<ContainerState> {
        let response = self
            .timed(
                "inspect",
                self.short_timeout,
                self.docker
                    .inspect_container(container, None::<InspectContainerOptions>),
            )
            .await?;

        let state = response.state.unwrap_or_default();
        let published_port = response
            .network_settings
            .and_then(|settings| settings.ports)
            .and_then(|ports| {
                ports
                    .into_values()
                    .flatten()
                    .flatten()
                    .find_map(|binding| binding.host_port.and_then(|p| p.parse().ok()))
            });

        Ok(ContainerState {
            id: response.id.unwrap_or_else(|| container.to_string()),
            running: state.running.unwrap_or(false),
            health: to_health(state.health.and_then(|h| h.status)),
            working_dir: response
                .config
                .and_then(|c| c.working_dir)
                .filter(|wd| !wd.is_empty()),
            published_port,
        })
    }

    async fn stats(&self, container: &str) -> DriverResult<ResourceStats> {
        let mut stream = Box::pin(self.docker.stats(
            container,
            Some(StatsOptions {
                stream: false,
                one_shot: true,
            }),
        ));
        let stats = match self.timed("stats", self.short_timeout, async {
            stream.next().await.transpose()
        })
        .await?
        {
            Some(stats) => stats,
            None => return Err(DriverError::Api(format!("no stats returned for {container}"))),
        };

        Ok(ResourceStats {
            memory_usage: stats.memory_stats.usage.unwrap_or(0),
            max_memory_usage: stats.memory_stats.max_usage.unwrap_or(0),
            memory_limit: stats.memory_stats.limit.unwrap_or(0),
            cpu_total_usage: stats.cpu_stats.cpu_usage.total_usage,
            online_cpus: stats.cpu_stats.online_cpus.unwrap_or(0),
        })
    }

    async fn exec(
        &self,
        container: &str,
        cmd: &[String],
        mode: ExecMode,
    ) -> DriverResult<ExecOutcome> {
        self.run_exec(container, cmd, mode, false).await
    }

    async fn exec_privileged(&self, container: &str, cmd: &[String]) -> DriverResult<ExecOutcome> {
        self.run_exec(container, cmd, ExecMode::Blocking, true).await
    }

    async fn exec_status(&self, exec_id: &str) -> DriverResult<ExecStatus> {
        let response = self
            .timed(
                "exec_inspect",
                self.short_timeout,
                self.docker.inspect_exec(exec_id),
            )
            .await?;
        Ok(ExecStatus {
            running: response.running.unwrap_or(false),
            exit_code: response.exit_code,
        })
    }

    async fn list_images(&self) -> DriverResult<Vec<String>> {
        let images = self
            .timed(
                "list_images",
                self.short_timeout,
                self.docker.list_images(Some(ListImagesOptions::<String> {
                    all: false,
                    ..Default::default()
                })),
            )
            .await?;
        Ok(images.into_iter().flat_map(|image| image.repo_tags).collect())
    }

    async fn pull_image(&self, image: &str) -> DriverResult<()> {
        let pull = self
            .docker
            .create_image(
                Some(CreateImageOptions {
                    from_image: image.to_string(),
                    ..Default::default()
                }),
                None,
                None,
            )
            .try_for_each(|progress| async move {
                if let Some(status) = progress.status {
                    debug!(status = %status, "pull progress");
                }
                Ok(())
            });
        self.timed("pull", self.pull_timeout, pull).await?;
        info!(image, "image pulled");
        Ok(())
    }
}
