//! Health checker: restarts containers the runtime reports unhealthy.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use dockyard_core::{NameLocks, epoch_secs};
use dockyard_driver::{ContainerHealth, ContainerRuntime};
use dockyard_state::{Instance, InstanceFilter, InstancePatch, InstanceStore};
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval_at};
use tracing::{debug, error, info, warn};

/// What happened to one instance during a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Healthy,
    /// Health not yet known, or the container defines no check.
    Indeterminate(ContainerHealth),
    Restarted,
    /// Another component holds the instance's lock.
    Busy,
    Failed(String),
}

pub struct HealthChecker {
    runtime: Arc<dyn ContainerRuntime>,
    store: Arc<dyn InstanceStore>,
    locks: NameLocks,
    interval: Duration,
}

impl HealthChecker {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        store: Arc<dyn InstanceStore>,
        locks: NameLocks,
        interval: Duration,
    ) -> Self {
        Self {
            runtime,
            store,
            locks,
            interval,
        }
    }

    /// Run ticks until `shutdown` flips. A tick in progress always completes.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval_at(tokio::time::Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval = ?self.interval, "health checker started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.check_once().await {
                        Ok(restarted) if !restarted.is_empty() => {
                            info!(count = restarted.len(), ?restarted, "health tick restarted instances");
                        }
                        Ok(_) => debug!("health tick clean"),
                        Err(e) => error!(error = %e, "health tick failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("health checker shutting down");
                    break;
                }
            }
        }
    }

    /// Check every known instance once and return the names restarted.
    pub async fn check_once(&self) -> anyhow::Result<Vec<String>> {
        let instances = self
            .store
            .fetch_instances(&InstanceFilter::all())
            .context("listing instances for health check")?;

        let mut restarted = Vec::new();
        for instance in &instances {
            if self.check_instance(instance).await == CheckOutcome::Restarted {
                restarted.push(instance.name.clone());
            }
        }
        Ok(restarted)
    }

    /// Inspect one instance and restart it if unhealthy.
    pub async fn check_instance(&self, instance: &Instance) -> CheckOutcome {
        let container = instance.container_name.as_str();
        let Some(_guard) = self.locks.try_lock(container) else {
            debug!(name = %instance.name, container, "instance busy, skipping health check");
            return CheckOutcome::Busy;
        };

        let health = match self.runtime.inspect_health(container).await {
            Ok(health) => health,
            Err(e) => {
                warn!(name = %instance.name, container, error = %e, "health inspection failed");
                return CheckOutcome::Failed(e.to_string());
            }
        };

        match health {
            ContainerHealth::Healthy => CheckOutcome::Healthy,
            ContainerHealth::Starting | ContainerHealth::None => {
                CheckOutcome::Indeterminate(health)
            }
            ContainerHealth::Unhealthy => {
                if let Err(e) = self.runtime.restart(container).await {
                    warn!(name = %instance.name, container, error = %e, "restart of unhealthy container failed");
                    return CheckOutcome::Failed(e.to_string());
                }
                warn!(
                    name = %instance.name,
                    kind = %instance.kind,
                    container,
                    restarts = instance.restart_count + 1,
                    "restarted unhealthy container"
                );
                let patch = InstancePatch::restarted(epoch_secs());
                if let Err(e) = self
                    .store
                    .update_instances(&InstanceFilter::named(&instance.name, instance.kind), &patch)
                {
                    warn!(name = %instance.name, error = %e, "recording restart failed");
                }
                CheckOutcome::Restarted
            }
        }
    }
}
