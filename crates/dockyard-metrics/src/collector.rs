//! Metrics collector: samples every instance on a fixed interval.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::Context;
use dockyard_core::{InstanceKind, PlatformConfig, epoch_secs};
use dockyard_driver::{ContainerRuntime, ExecMode, commands};
use dockyard_state::{
    BulkWriteOptions, Instance, InstanceFilter, InstanceStore, MetricsSnapshot, MetricsWrite,
    instance_key,
};
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval_at};
use tracing::{debug, error, info, warn};

use crate::usage::{CpuBaselines, Usage};

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Snapshots produced.
    pub sampled: usize,
    /// Instances with no memory limit or no CPUs.
    pub skipped: usize,
    /// Instances that could not be sampled or written.
    pub failed: usize,
    /// Application snapshots written by the bulk flush.
    pub flushed: usize,
}

enum Sample {
    Snapshot(MetricsSnapshot),
    Skipped,
}

pub struct MetricsCollector {
    runtime: Arc<dyn ContainerRuntime>,
    store: Arc<dyn InstanceStore>,
    config: Arc<PlatformConfig>,
    baselines: Mutex<CpuBaselines>,
}

impl MetricsCollector {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        store: Arc<dyn InstanceStore>,
        config: Arc<PlatformConfig>,
    ) -> Self {
        Self {
            runtime,
            store,
            config,
            baselines: Mutex::new(CpuBaselines::new()),
        }
    }

    /// Run ticks until `shutdown` flips. A tick in progress always completes.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let period = self.config.reconcile.metrics_interval;
        let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval = ?period, "metrics collector started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.collect_once().await {
                        Ok(report) => debug!(
                            sampled = report.sampled,
                            skipped = report.skipped,
                            failed = report.failed,
                            flushed = report.flushed,
                            "metrics tick"
                        ),
                        Err(e) => error!(error = %e, "metrics tick failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("metrics collector shutting down");
                    break;
                }
            }
        }
    }

    /// Sample every known instance once.
    ///
    /// Fails only when the instance list cannot be read; per-instance
    /// failures are logged and counted.
    pub async fn collect_once(&self) -> anyhow::Result<TickReport> {
        let instances = self
            .store
            .fetch_instances(&InstanceFilter::all())
            .context("listing instances for metrics")?;
        self.forget_departed(&instances);

        let mut report = TickReport::default();
        let mut app_batch = Vec::new();

        for instance in &instances {
            let snapshot = match self.sample(instance).await {
                Ok(Sample::Snapshot(snapshot)) => snapshot,
                Ok(Sample::Skipped) => {
                    debug!(
                        name = %instance.name,
                        kind = %instance.kind,
                        "no memory limit or cpus, skipping"
                    );
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!(name = %instance.name, kind = %instance.kind, error = %e, "sampling failed");
                    report.failed += 1;
                    continue;
                }
            };
            report.sampled += 1;

            match instance.kind {
                InstanceKind::Database => {
                    if let Err(e) = self.store.upsert_metrics(&snapshot) {
                        warn!(name = %instance.name, error = %e, "writing database metrics failed");
                        report.failed += 1;
                    }
                }
                InstanceKind::Application => app_batch.push(MetricsWrite::Insert(snapshot)),
            }
        }

        if !app_batch.is_empty() {
            match self
                .store
                .bulk_write_metrics(&app_batch, BulkWriteOptions::unordered())
            {
                Ok(result) => {
                    for failure in &result.failures {
                        warn!(
                            name = %failure.name,
                            index = failure.index,
                            error = %failure.error,
                            "metrics write failed"
                        );
                    }
                    report.failed += result.failures.len();
                    report.flushed = result.applied;
                }
                Err(e) => {
                    error!(batch = app_batch.len(), error = %e, "metrics bulk write failed");
                    report.failed += app_batch.len();
                }
            }
        }

        Ok(report)
    }

    async fn sample(&self, instance: &Instance) -> anyhow::Result<Sample> {
        let container = instance.container_name.as_str();
        let state = self
            .runtime
            .inspect(container)
            .await
            .with_context(|| format!("inspecting {container}"))?;
        let stats = self
            .runtime
            .stats(container)
            .await
            .with_context(|| format!("reading stats of {container}"))?;
        let sampled_at = Instant::now();

        let Some(usage) = Usage::from_stats(&stats) else {
            return Ok(Sample::Skipped);
        };
        let cpu_usage_fraction = self.baselines().observe(
            &instance_key(instance.kind, &instance.name),
            stats.cpu_total_usage,
            sampled_at,
            usage.online_cpus,
        );

        let logs = match instance.kind {
            InstanceKind::Database => self.log_tail(instance).await,
            InstanceKind::Application => None,
        };

        let snapshot = MetricsSnapshot {
            name: instance.name.clone(),
            kind: instance.kind,
            alive: state.running,
            read_time: epoch_secs(),
            memory_usage_fraction: usage.memory_usage_fraction,
            max_memory_usage_fraction: usage.max_memory_usage_fraction,
            memory_limit_gib: usage.memory_limit_gib,
            online_cpus: usage.online_cpus,
            cpu_usage_fraction,
            host_ip: instance.host_ip.clone(),
            logs,
        };
        Ok(Sample::Snapshot(snapshot))
    }

    /// Last lines of the engine log. A failed read leaves the snapshot
    /// without logs.
    async fn log_tail(&self, instance: &Instance) -> Option<String> {
        let service = self
            .config
            .databases
            .values()
            .find(|db| db.engine.as_str() == instance.service)?;
        let cmd = commands::tail_file(&service.log_file, self.config.reconcile.log_tail_lines);
        match self
            .runtime
            .exec(&instance.container_name, &cmd, ExecMode::CaptureOutput)
            .await
        {
            Ok(outcome) => outcome.output().map(str::to_string),
            Err(e) => {
                debug!(name = %instance.name, log_file = %service.log_file, error = %e, "log tail unavailable");
                None
            }
        }
    }

    fn forget_departed(&self, instances: &[Instance]) {
        let live: Vec<String> = instances
            .iter()
            .map(|i| instance_key(i.kind, &i.name))
            .collect();
        self.baselines().retain(live.iter().map(String::as_str));
    }

    fn baselines(&self) -> std::sync::MutexGuard<'_, CpuBaselines> {
        self.baselines
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
