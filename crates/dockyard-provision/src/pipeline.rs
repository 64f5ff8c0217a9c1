//! The provisioning state machine.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dockyard_core::engine::LOGGING_MARKER;
use dockyard_core::net::allocate_port;
use dockyard_core::{InstanceKind, NameLocks, PlatformConfig, ProvisionRequest, epoch_secs};
use dockyard_driver::{
    ContainerHealth, ContainerRuntime, DriverError, ExecMode, ExecStatus, commands,
};
use dockyard_registry::ServiceRegistry;
use dockyard_state::{Instance, InstanceStore};
use tracing::{debug, info, warn};

use crate::cleanup::{CleanupScope, CleanupTarget};
use crate::error::{ProvisionError, ProvisionResult, ProvisionStage};
use crate::plan::{ConfigureStep, InstancePlan};
use crate::queue::{CleanupQueue, CleanupRequest};

/// How often the engine's health is polled before configuring it.
const HEALTH_POLL: Duration = Duration::from_millis(500);

/// A stage failure and what this run may tear down because of it.
struct StageError {
    error: ProvisionError,
    rollback: CleanupScope,
}

impl StageError {
    /// Nothing this run made needs undoing.
    fn keep(error: ProvisionError) -> Self {
        Self {
            error,
            rollback: CleanupScope::NONE,
        }
    }

    fn rollback(scope: CleanupScope) -> impl Fn(ProvisionError) -> Self {
        move |error| Self {
            error,
            rollback: scope,
        }
    }
}

/// Turns validated requests into running, registered instances.
pub struct Pipeline {
    runtime: Arc<dyn ContainerRuntime>,
    store: Arc<dyn InstanceStore>,
    registry: Arc<dyn ServiceRegistry>,
    config: Arc<PlatformConfig>,
    locks: NameLocks,
    cleanup: CleanupQueue,
}

impl Pipeline {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        store: Arc<dyn InstanceStore>,
        registry: Arc<dyn ServiceRegistry>,
        config: Arc<PlatformConfig>,
        locks: NameLocks,
        cleanup: CleanupQueue,
    ) -> Self {
        Self {
            runtime,
            store,
            registry,
            config,
            locks,
            cleanup,
        }
    }

    pub fn cleanup_queue(&self) -> &CleanupQueue {
        &self.cleanup
    }

    /// Provision one instance.
    ///
    /// Invalid requests fail before any side effect. Any other failure
    /// enqueues a cleanup of what this run created and returns the original
    /// error without waiting for it. A container found in place, and storage
    /// that already existed, are never part of that cleanup.
    pub async fn provision(&self, request: ProvisionRequest) -> ProvisionResult<Instance> {
        let plan = InstancePlan::from_request(&request, &self.config)?;
        let _guard = self.locks.lock(&plan.container_name).await;
        let target = CleanupTarget::from_plan(&plan, CleanupScope::NONE);
        info!(
            name = %plan.name,
            kind = %plan.kind,
            container = %plan.container_name,
            owner = %plan.owner,
            "provisioning instance"
        );

        match self.run_stages(plan).await {
            Ok(instance) => {
                info!(
                    name = %instance.name,
                    kind = %instance.kind,
                    container_id = %instance.container_id,
                    port = instance.container_port,
                    "instance ready"
                );
                Ok(instance)
            }
            Err(StageError { error, rollback }) => {
                warn!(
                    name = %target.name,
                    kind = %target.kind,
                    stage = ?error.stage(),
                    error = %error,
                    ?rollback,
                    "provisioning failed"
                );
                if !rollback.is_empty() {
                    self.cleanup.enqueue(CleanupRequest {
                        target: CleanupTarget {
                            scope: rollback,
                            ..target
                        },
                        reason: error.to_string(),
                    });
                }
                Err(error)
            }
        }
    }

    async fn run_stages(&self, plan: InstancePlan) -> Result<Instance, StageError> {
        let plan = self.locate_or_create(plan).await?;
        let rollback = plan.rollback_scope();
        let plan = self
            .configure(plan)
            .await
            .map_err(StageError::rollback(rollback))?;
        let (instance, rollback) = self.register_state(&plan, rollback)?;
        self.register_discovery(&plan, rollback)?;
        Ok(instance)
    }

    /// Reuse the named container if it is usable, otherwise build one.
    async fn locate_or_create(&self, plan: InstancePlan) -> Result<InstancePlan, StageError> {
        let stage = ProvisionStage::LocatingOrCreating;
        let name = plan.container_name.clone();

        let exists = self
            .runtime
            .container_exists(&name)
            .await
            .map_err(|e| StageError::keep(ProvisionError::runtime(stage)(e)))?;
        if !exists {
            debug!(container = %name, "container absent, creating");
            return self.create_fresh(plan).await;
        }

        let located = match self.runtime.inspect(&name).await {
            Ok(state) if state.published_port.is_some() => Ok(state),
            Ok(_) => Err(DriverError::Api(format!("container {name} publishes no port"))),
            Err(e) => Err(e),
        };

        match located {
            Ok(state) => {
                if !state.running {
                    info!(container = %name, "starting stopped container");
                    self.runtime
                        .start(&name)
                        .await
                        .map_err(|e| StageError::keep(ProvisionError::runtime(stage)(e)))?;
                }
                let port = state.published_port.unwrap_or_default();
                debug!(container = %name, port, "reusing existing container");
                Ok(plan.bound(state.id, port))
            }
            Err(e) => {
                warn!(container = %name, error = %e, "existing container unusable, recreating once");
                match self.runtime.remove(&name, true).await {
                    Ok(()) => {}
                    Err(err) if err.is_not_found() => {}
                    Err(err) => {
                        return Err(StageError::keep(ProvisionError::runtime(stage)(err)));
                    }
                }
                self.create_fresh(plan)
                    .await
                    .map_err(|StageError { error, rollback }| StageError {
                        error: match error {
                            ProvisionError::Runtime { source, .. } => {
                                ProvisionError::RecreateFailed {
                                    container: name.clone(),
                                    source,
                                }
                            }
                            other => other,
                        },
                        rollback,
                    })
            }
        }
    }

    /// Create, start and inspect a brand-new container.
    async fn create_fresh(&self, plan: InstancePlan) -> Result<InstancePlan, StageError> {
        let stage = ProvisionStage::LocatingOrCreating;
        // Storage found in place belongs to an earlier instance.
        let created_store_dir = !tokio::fs::try_exists(&plan.store_dir)
            .await
            .unwrap_or(true);
        let unwind = StageError::rollback(CleanupScope {
            storage: created_store_dir,
            ..CleanupScope::ALL
        });

        tokio::fs::create_dir_all(&plan.store_dir)
            .await
            .map_err(|source| ProvisionError::Storage {
                path: plan.store_dir.clone(),
                source,
            })
            .map_err(&unwind)?;
        let host_port = allocate_port(plan.host_ip)
            .map_err(|source| ProvisionError::PortAllocation {
                ip: plan.host_ip,
                source,
            })
            .map_err(&unwind)?;

        let spec = plan.container_spec(host_port);
        let id = self
            .runtime
            .create(&spec)
            .await
            .map_err(ProvisionError::runtime(stage))
            .map_err(&unwind)?;
        self.runtime
            .start(&id)
            .await
            .map_err(ProvisionError::runtime(stage))
            .map_err(&unwind)?;
        let state = self
            .runtime
            .inspect(&id)
            .await
            .map_err(ProvisionError::runtime(stage))
            .map_err(&unwind)?;
        if !state.running {
            return Err(unwind(ProvisionError::Runtime {
                stage,
                source: DriverError::Api(format!(
                    "container {} exited right after start",
                    plan.container_name
                )),
            }));
        }

        info!(
            container = %plan.container_name,
            id = %state.id,
            image = %plan.image,
            host_port,
            created_store_dir,
            "container created"
        );
        let port = state.published_port.unwrap_or(host_port);
        Ok(plan.created(state.id, port, created_store_dir))
    }

    async fn configure(&self, plan: InstancePlan) -> ProvisionResult<InstancePlan> {
        let stage = ProvisionStage::Configuring;
        let container = plan.container_name.as_str();

        let install_exec = match &plan.configure {
            ConfigureStep::Nothing => None,
            ConfigureStep::InstallDependencies { command } => {
                let outcome = self
                    .runtime
                    .exec(container, command, ExecMode::Detached)
                    .await
                    .map_err(ProvisionError::runtime(stage))?;
                info!(
                    container,
                    exec_id = outcome.exec_id(),
                    command = ?command,
                    "dependency install started"
                );
                Some(outcome.exec_id().to_string())
            }
            ConfigureStep::EnableQueryLogging {
                config_file,
                log_file,
                block,
            } => {
                self.wait_healthy(container)
                    .await
                    .map_err(ProvisionError::runtime(stage))?;
                self.enable_query_logging(container, config_file, log_file, block)
                    .await
                    .map_err(ProvisionError::runtime(stage))?;
                None
            }
        };

        Ok(match install_exec {
            Some(exec_id) => plan.with_install_exec(exec_id),
            None => plan,
        })
    }

    /// Wait for the engine to finish its first-start initialisation, as
    /// reported by the container's health check, within `long_timeout`.
    async fn wait_healthy(&self, container: &str) -> Result<(), DriverError> {
        let limit = self.config.docker.long_timeout;
        match tokio::time::timeout(limit, self.poll_health(container)).await {
            Ok(result) => result,
            Err(_) => Err(DriverError::Timeout {
                operation: "waiting for engine health",
                after: limit,
            }),
        }
    }

    async fn poll_health(&self, container: &str) -> Result<(), DriverError> {
        loop {
            match self.runtime.inspect_health(container).await? {
                ContainerHealth::Healthy | ContainerHealth::None => return Ok(()),
                ContainerHealth::Unhealthy => {
                    return Err(DriverError::Api(format!(
                        "container {container} reported unhealthy before configuration"
                    )));
                }
                ContainerHealth::Starting => {
                    debug!(container, "engine still starting");
                    tokio::time::sleep(HEALTH_POLL).await;
                }
            }
        }
    }

    /// Append the logging block once, then restart so the engine reads it.
    async fn enable_query_logging(
        &self,
        container: &str,
        config_file: &str,
        log_file: &str,
        block: &str,
    ) -> Result<(), DriverError> {
        let current = match self
            .runtime
            .exec(container, &commands::cat_file(config_file), ExecMode::CaptureOutput)
            .await
        {
            Ok(outcome) => outcome.output().unwrap_or_default().to_string(),
            // Missing config file: the block becomes its first content.
            Err(DriverError::NonZeroExit { .. }) => String::new(),
            Err(e) => return Err(e),
        };
        if current.contains(LOGGING_MARKER) {
            debug!(container, config_file, "query logging already enabled");
            return Ok(());
        }

        if let Some(dir) = Path::new(log_file).parent() {
            let mkdir = vec![
                "mkdir".to_string(),
                "-p".to_string(),
                dir.display().to_string(),
            ];
            self.runtime
                .exec(container, &mkdir, ExecMode::Blocking)
                .await?;
        }
        self.runtime
            .exec(
                container,
                &commands::append_file(config_file, block),
                ExecMode::Blocking,
            )
            .await?;
        self.runtime.restart(container).await?;
        info!(container, config_file, log_file, "query logging enabled");
        Ok(())
    }

    /// Upsert the instance record. The record joins the rollback if this
    /// run is the one creating it.
    fn register_state(
        &self,
        plan: &InstancePlan,
        rollback: CleanupScope,
    ) -> Result<(Instance, CleanupScope), StageError> {
        let stage = ProvisionStage::StateRegistering;
        let existing = self
            .store
            .get_instance(&plan.name, plan.kind)
            .map_err(ProvisionError::state(stage))
            .map_err(StageError::rollback(rollback))?;
        let rollback = CleanupScope {
            state_record: rollback.state_record || existing.is_none(),
            ..rollback
        };
        let unwind = StageError::rollback(rollback);

        let instance = plan.to_instance(epoch_secs());
        self.store
            .upsert_instance(&instance)
            .map_err(ProvisionError::state(stage))
            .map_err(&unwind)?;
        // Re-read so preserved fields (creation time, restarts) are reported.
        let stored = self
            .store
            .get_instance(&plan.name, plan.kind)
            .map_err(ProvisionError::state(stage))
            .map_err(&unwind)?;
        Ok((stored.unwrap_or(instance), rollback))
    }

    /// Bind the discovery key and bump the service's load counter. The key
    /// joins the rollback if this run is the one binding it.
    fn register_discovery(
        &self,
        plan: &InstancePlan,
        rollback: CleanupScope,
    ) -> Result<(), StageError> {
        let known = self
            .registry
            .resolve(&plan.registry_key)
            .map_err(ProvisionError::Registry)
            .map_err(StageError::rollback(rollback))?
            .is_some();
        let unwind = StageError::rollback(CleanupScope {
            registry_entry: rollback.registry_entry || !known,
            ..rollback
        });

        let endpoint = plan.endpoint().unwrap_or_default();
        self.registry
            .register(&plan.registry_key, &endpoint)
            .map_err(ProvisionError::Registry)
            .map_err(&unwind)?;
        let load = self
            .registry
            .increment_load(&plan.service, &self.config.advertise_addr)
            .map_err(ProvisionError::Registry)
            .map_err(&unwind)?;
        debug!(
            key = %plan.registry_key,
            endpoint = %endpoint,
            service = %plan.service,
            load,
            "registered for discovery"
        );
        Ok(())
    }

    /// Status of an application's dependency install, if one was started.
    pub async fn dependency_status(&self, name: &str) -> ProvisionResult<Option<ExecStatus>> {
        let kind = InstanceKind::Application;
        let instance = self
            .store
            .get_instance(name, kind)
            .map_err(ProvisionError::state(ProvisionStage::StateRegistering))?
            .ok_or_else(|| ProvisionError::NotFound {
                name: name.to_string(),
                kind,
            })?;
        let Some(exec_id) = instance.install_exec_id else {
            return Ok(None);
        };
        let status = self.runtime.exec_status(&exec_id).await.map_err(|source| {
            if source.is_not_found() {
                ProvisionError::NotFound {
                    name: name.to_string(),
                    kind,
                }
            } else {
                ProvisionError::Runtime {
                    stage: ProvisionStage::Configuring,
                    source,
                }
            }
        })?;
        Ok(Some(status))
    }
}
