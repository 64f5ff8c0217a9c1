//! Best-effort multi-resource teardown.
//!
//! Every step gets an attempt no matter how earlier steps went. Resources
//! that are already gone count as removed, so tearing down twice is safe.

use std::path::PathBuf;
use std::sync::Arc;

use dockyard_core::{InstanceKind, NameLocks, PlatformConfig};
use dockyard_driver::{ContainerRuntime, DriverError, commands};
use dockyard_registry::ServiceRegistry;
use dockyard_state::{Instance, InstanceFilter, InstanceStore};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{CleanupError, CleanupResult};
use crate::plan::InstancePlan;

/// Which of an instance's resources a teardown may remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CleanupScope {
    pub container: bool,
    pub storage: bool,
    /// The instance record and its metrics documents.
    pub state_record: bool,
    pub registry_entry: bool,
}

impl CleanupScope {
    pub const ALL: Self = Self {
        container: true,
        storage: true,
        state_record: true,
        registry_entry: true,
    };

    pub const NONE: Self = Self {
        container: false,
        storage: false,
        state_record: false,
        registry_entry: false,
    };

    pub fn is_empty(&self) -> bool {
        *self == Self::NONE
    }
}

/// What to tear down for one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupTarget {
    pub name: String,
    pub kind: InstanceKind,
    pub container: String,
    pub store_dir: PathBuf,
    /// Unknown when a database record is gone and the user cannot be derived.
    pub registry_key: Option<String>,
    pub scope: CleanupScope,
}

impl CleanupTarget {
    /// Rollback of a failed provisioning run, limited to `scope`.
    pub fn from_plan(plan: &InstancePlan, scope: CleanupScope) -> Self {
        Self {
            name: plan.name.clone(),
            kind: plan.kind,
            container: plan.container_name.clone(),
            store_dir: plan.store_dir.clone(),
            registry_key: Some(plan.registry_key.clone()),
            scope,
        }
    }

    pub fn from_instance(instance: &Instance) -> Self {
        Self {
            name: instance.name.clone(),
            kind: instance.kind,
            container: instance.container_name.clone(),
            store_dir: PathBuf::from(&instance.store_dir),
            registry_key: Some(instance.registry_key.clone()).filter(|k| !k.is_empty()),
            scope: CleanupScope::ALL,
        }
    }

    /// Target derived from naming conventions alone.
    pub fn by_convention(name: &str, kind: InstanceKind, config: &PlatformConfig) -> Self {
        Self {
            name: name.to_string(),
            kind,
            container: kind.container_name(name),
            store_dir: config.storage_root.join(kind.prefix()).join(name),
            registry_key: match kind {
                InstanceKind::Application => Some(name.to_string()),
                InstanceKind::Database => None,
            },
            scope: CleanupScope::ALL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupStep {
    ClearWorkDir,
    StopContainer,
    RemoveContainer,
    RemoveStorage,
    RemoveStateRecord,
    RemoveRegistryEntry,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "detail")]
pub enum StepOutcome {
    Done,
    /// The resource did not exist.
    Absent,
    /// The step did not apply.
    Skipped,
    Failed(String),
}

impl StepOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, StepOutcome::Failed(_))
    }
}

/// Outcome of every step of one teardown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub name: String,
    pub kind: InstanceKind,
    pub steps: Vec<(CleanupStep, StepOutcome)>,
}

impl CleanupReport {
    pub fn is_complete(&self) -> bool {
        !self.steps.iter().any(|(_, outcome)| outcome.is_failed())
    }

    pub fn failed_steps(&self) -> Vec<CleanupStep> {
        self.steps
            .iter()
            .filter(|(_, outcome)| outcome.is_failed())
            .map(|(step, _)| *step)
            .collect()
    }

    pub fn outcome(&self, step: CleanupStep) -> Option<&StepOutcome> {
        self.steps.iter().find(|(s, _)| *s == step).map(|(_, o)| o)
    }

    fn record(&mut self, step: CleanupStep, outcome: StepOutcome) {
        if let StepOutcome::Failed(reason) = &outcome {
            warn!(name = %self.name, kind = %self.kind, ?step, %reason, "cleanup step failed");
        } else {
            debug!(name = %self.name, kind = %self.kind, ?step, ?outcome, "cleanup step");
        }
        self.steps.push((step, outcome));
    }
}

fn driver_outcome(result: Result<(), DriverError>) -> StepOutcome {
    match result {
        Ok(()) => StepOutcome::Done,
        Err(e) if e.is_not_found() => StepOutcome::Absent,
        Err(e) => StepOutcome::Failed(e.to_string()),
    }
}

/// The sole deleter across the container runtime and both stores.
pub struct CleanupCoordinator {
    runtime: Arc<dyn ContainerRuntime>,
    store: Arc<dyn InstanceStore>,
    registry: Arc<dyn ServiceRegistry>,
    config: Arc<PlatformConfig>,
    locks: NameLocks,
}

impl CleanupCoordinator {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        store: Arc<dyn InstanceStore>,
        registry: Arc<dyn ServiceRegistry>,
        config: Arc<PlatformConfig>,
        locks: NameLocks,
    ) -> Self {
        Self {
            runtime,
            store,
            registry,
            config,
            locks,
        }
    }

    pub fn locks(&self) -> &NameLocks {
        &self.locks
    }

    /// Resolve what to tear down, preferring the stored record.
    pub fn resolve_target(&self, name: &str, kind: InstanceKind) -> CleanupResult<CleanupTarget> {
        let record = self
            .store
            .get_instance(name, kind)
            .map_err(|source| CleanupError::Lookup {
                name: name.to_string(),
                kind,
                source,
            })?;
        Ok(match record {
            Some(instance) => CleanupTarget::from_instance(&instance),
            None => {
                debug!(name, %kind, "no stored record, using naming conventions");
                CleanupTarget::by_convention(name, kind, &self.config)
            }
        })
    }

    /// Explicit deletion of an instance.
    pub async fn teardown(&self, name: &str, kind: InstanceKind) -> CleanupResult<CleanupReport> {
        let _guard = self.locks.lock(&kind.container_name(name)).await;
        let target = self.resolve_target(name, kind)?;
        let report = self.teardown_target(&target).await;
        if report.is_complete() {
            info!(name, %kind, "instance torn down");
            Ok(report)
        } else {
            Err(CleanupError::Incomplete {
                name: name.to_string(),
                kind,
                failed: report.failed_steps(),
            })
        }
    }

    /// Run every teardown step in scope for `target`. The caller holds the
    /// name lock. Steps outside the scope are recorded as skipped.
    pub async fn teardown_target(&self, target: &CleanupTarget) -> CleanupReport {
        let scope = target.scope;
        let mut report = CleanupReport {
            name: target.name.clone(),
            kind: target.kind,
            steps: Vec::with_capacity(6),
        };

        if scope.container {
            self.remove_container(target, &mut report).await;
        } else {
            for step in [
                CleanupStep::ClearWorkDir,
                CleanupStep::StopContainer,
                CleanupStep::RemoveContainer,
            ] {
                report.record(step, StepOutcome::Skipped);
            }
        }

        let storage = if scope.storage {
            match tokio::fs::remove_dir_all(&target.store_dir).await {
                Ok(()) => StepOutcome::Done,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => StepOutcome::Absent,
                Err(e) => StepOutcome::Failed(format!("{}: {e}", target.store_dir.display())),
            }
        } else {
            StepOutcome::Skipped
        };
        report.record(CleanupStep::RemoveStorage, storage);

        let state = if scope.state_record {
            self.remove_state(target)
        } else {
            StepOutcome::Skipped
        };
        report.record(CleanupStep::RemoveStateRecord, state);

        let registry = match &target.registry_key {
            Some(key) if scope.registry_entry => match self.registry.remove(key) {
                Ok(true) => StepOutcome::Done,
                Ok(false) => StepOutcome::Absent,
                Err(e) => StepOutcome::Failed(e.to_string()),
            },
            _ => StepOutcome::Skipped,
        };
        report.record(CleanupStep::RemoveRegistryEntry, registry);

        report
    }

    /// Delete the instance record, then its metrics documents.
    fn remove_state(&self, target: &CleanupTarget) -> StepOutcome {
        let record = match self
            .store
            .delete_instance(&InstanceFilter::named(&target.name, target.kind))
        {
            Ok(existed) => existed,
            Err(e) => return StepOutcome::Failed(e.to_string()),
        };
        match self.store.delete_metrics(&target.name, target.kind) {
            Ok(metrics) if record || metrics > 0 => StepOutcome::Done,
            Ok(_) => StepOutcome::Absent,
            Err(e) => StepOutcome::Failed(format!("metrics: {e}")),
        }
    }

    /// Clear the working directory, stop, then force-remove.
    async fn remove_container(&self, target: &CleanupTarget, report: &mut CleanupReport) {
        let container = target.container.as_str();
        let state = match self.runtime.inspect(container).await {
            Ok(state) => Some(state),
            Err(e) if e.is_not_found() => {
                for step in [
                    CleanupStep::ClearWorkDir,
                    CleanupStep::StopContainer,
                    CleanupStep::RemoveContainer,
                ] {
                    report.record(step, StepOutcome::Absent);
                }
                return;
            }
            Err(e) => {
                warn!(container, error = %e, "inspect before removal failed");
                None
            }
        };

        let clear = match &state {
            Some(s) if s.running => match &s.working_dir {
                Some(wd) if wd != "/" => driver_outcome(
                    self.runtime
                        .exec_privileged(container, &commands::clear_dir(wd))
                        .await
                        .map(|_| ()),
                ),
                _ => StepOutcome::Skipped,
            },
            _ => StepOutcome::Skipped,
        };
        report.record(CleanupStep::ClearWorkDir, clear);

        let stop = match &state {
            Some(s) if !s.running => StepOutcome::Skipped,
            _ => driver_outcome(self.runtime.stop(container).await),
        };
        report.record(CleanupStep::StopContainer, stop);

        let remove = driver_outcome(self.runtime.remove(container, true).await);
        report.record(CleanupStep::RemoveContainer, remove);
    }
}
