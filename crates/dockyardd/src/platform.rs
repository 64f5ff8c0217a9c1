//! Process wiring: shared clients are created once here and handed to
//! every component.
//!
//! Each command opens the runtime client and both stores, then:
//! 1. `serve` checks images, runs the metrics and health loops, and drains
//!    the cleanup queue on Ctrl-C
//! 2. `provision` runs one request through the pipeline
//! 3. `teardown` runs the cleanup coordinator for one instance
//! 4. `pull-images` runs the image check alone
//!
//! Both stores are redb files that one process holds exclusively, so
//! `provision` and `teardown` refuse to run while `serve` holds them, and
//! name locks only serialise work inside one process.
// TODO: accept provision and teardown requests over a local socket while
// serving, so foreground requests can run beside the reconciliation loops.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use dockyard_core::{InstanceKind, NameLocks, PlatformConfig, ProvisionRequest};
use dockyard_driver::{ContainerRuntime, DockerDriver, ensure_images};
use dockyard_health::HealthChecker;
use dockyard_metrics::MetricsCollector;
use dockyard_provision::{CleanupCoordinator, CleanupFailure, CleanupQueue, ErrorBody, Pipeline};
use dockyard_registry::RedbRegistry;
use dockyard_state::StateStore;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

/// Open both stores, naming a running daemon as the cause when either
/// file is locked.
fn open_stores(config: &PlatformConfig) -> anyhow::Result<(Arc<StateStore>, Arc<RedbRegistry>)> {
    let store = match StateStore::open(&config.state_path) {
        Ok(store) => Arc::new(store),
        Err(e) if e.is_locked() => bail!(daemon_running(&config.state_path)),
        Err(e) => return Err(e).context("opening state store"),
    };
    info!(path = ?config.state_path, "state store opened");

    let registry = match RedbRegistry::open(&config.registry_path) {
        Ok(registry) => Arc::new(registry),
        Err(e) if e.is_locked() => bail!(daemon_running(&config.registry_path)),
        Err(e) => return Err(e).context("opening service registry"),
    };
    info!(path = ?config.registry_path, "service registry opened");

    Ok((store, registry))
}

fn daemon_running(path: &Path) -> String {
    format!(
        "{} is held by another process, most likely a running `dockyardd serve`; \
         stop it before running provision or teardown",
        path.display()
    )
}

/// The long-lived clients and the components built on them.
struct Platform {
    config: Arc<PlatformConfig>,
    runtime: Arc<DockerDriver>,
    store: Arc<StateStore>,
    locks: NameLocks,
    pipeline: Pipeline,
}

impl Platform {
    async fn open(config: PlatformConfig) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let (store, registry) = open_stores(&config)?;

        let runtime = Arc::new(DockerDriver::connect(&config.docker)?);
        runtime
            .ping()
            .await
            .context("container runtime is not reachable")?;
        info!(socket = ?config.docker.socket, "container runtime connected");

        let locks = NameLocks::new();
        let coordinator = Arc::new(CleanupCoordinator::new(
            runtime.clone(),
            store.clone(),
            registry.clone(),
            config.clone(),
            locks.clone(),
        ));
        let queue = CleanupQueue::new(coordinator, config.cleanup.clone());
        let pipeline = Pipeline::new(
            runtime.clone(),
            store.clone(),
            registry,
            config.clone(),
            locks.clone(),
            queue,
        );

        Ok(Self {
            config,
            runtime,
            store,
            locks,
            pipeline,
        })
    }

    async fn check_images(&self) -> anyhow::Result<()> {
        let images = self.config.required_images();
        let report = ensure_images(self.runtime.as_ref(), &images).await?;
        info!(
            present = report.present.len(),
            pulled = report.pulled.len(),
            failed = report.failed.len(),
            "image check finished"
        );
        for (image, reason) in &report.failed {
            warn!(%image, %reason, "image unavailable");
        }
        Ok(())
    }
}

pub async fn serve(config: PlatformConfig) -> anyhow::Result<()> {
    info!("dockyard daemon starting");
    let platform = Platform::open(config).await?;
    platform.check_images().await?;

    let runtime: Arc<dyn ContainerRuntime> = platform.runtime.clone();
    let metrics = MetricsCollector::new(
        runtime.clone(),
        platform.store.clone(),
        platform.config.clone(),
    );
    let health = HealthChecker::new(
        runtime,
        platform.store.clone(),
        platform.locks.clone(),
        platform.config.reconcile.health_interval,
    );

    // ── Background tasks ───────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics_shutdown = shutdown_rx.clone();
    let metrics_handle = tokio::spawn(async move {
        metrics.run(metrics_shutdown).await;
    });

    let health_shutdown = shutdown_rx;
    let health_handle = tokio::spawn(async move {
        health.run(health_shutdown).await;
    });

    let failures = platform.pipeline.cleanup_queue().subscribe_failures();
    let failures_handle = tokio::spawn(report_cleanup_failures(failures));

    // ── Wait for Ctrl-C ────────────────────────────────────────

    tokio::signal::ctrl_c()
        .await
        .context("installing Ctrl-C handler")?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = metrics_handle.await;
    let _ = health_handle.await;

    let pending = platform.pipeline.cleanup_queue().pending();
    if pending > 0 {
        info!(pending, "waiting for queued cleanups");
    }
    platform.pipeline.cleanup_queue().flush().await;
    failures_handle.abort();

    info!("dockyard daemon stopped");
    Ok(())
}

/// Surface cleanups that gave up to the operator log.
async fn report_cleanup_failures(mut failures: broadcast::Receiver<CleanupFailure>) {
    loop {
        match failures.recv().await {
            Ok(failure) => {
                let detail = serde_json::to_string(&failure).unwrap_or_default();
                error!(
                    name = %failure.target.name,
                    kind = %failure.target.kind,
                    attempts = failure.attempts,
                    %detail,
                    "cleanup needs operator attention"
                );
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "cleanup failure reports dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

pub async fn provision(config: PlatformConfig, request_path: &Path) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(request_path)
        .with_context(|| format!("reading {}", request_path.display()))?;
    let request: ProvisionRequest =
        serde_json::from_str(&content).context("parsing provision request")?;

    let platform = Platform::open(config).await?;
    let result = platform.pipeline.provision(request).await;
    // Queued cleanups must finish before the process exits.
    platform.pipeline.cleanup_queue().flush().await;

    match result {
        Ok(instance) => {
            println!("{}", serde_json::to_string_pretty(&instance)?);
            Ok(())
        }
        Err(e) => {
            let body = ErrorBody::from(&e);
            println!("{}", serde_json::to_string_pretty(&body)?);
            bail!("provisioning failed with status {}", body.status)
        }
    }
}

pub async fn teardown(
    config: PlatformConfig,
    kind: InstanceKind,
    name: &str,
) -> anyhow::Result<()> {
    let platform = Platform::open(config).await?;
    let report = platform
        .pipeline
        .cleanup_queue()
        .coordinator()
        .teardown(name, kind)
        .await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub async fn pull_images(config: PlatformConfig) -> anyhow::Result<()> {
    let runtime = DockerDriver::connect(&config.docker)?;
    let report = ensure_images(&runtime, &config.required_images()).await?;
    println!(
        "{} present, {} pulled, {} failed",
        report.present.len(),
        report.pulled.len(),
        report.failed.len()
    );
    for (image, reason) in &report.failed {
        println!("  {image}: {reason}");
    }
    if !report.all_available() {
        bail!("{} image(s) unavailable", report.failed.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &Path) -> PlatformConfig {
        PlatformConfig::from_toml_str(&format!(
            r#"
[host]
ip = "127.0.0.1"
storage_root = "{root}"

[state]
path = "{root}/state.redb"

[registry]
path = "{root}/registry.redb"
"#,
            root = dir.display()
        ))
        .unwrap()
    }

    #[test]
    fn second_process_is_told_a_daemon_is_running() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let _serving = open_stores(&config).unwrap();

        let err = open_stores(&config).err().unwrap();
        let message = err.to_string();
        assert!(message.contains("dockyardd serve"), "{message}");
        assert!(message.contains("state.redb"), "{message}");
    }

    #[test]
    fn stores_open_when_free() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        drop(open_stores(&config).unwrap());
        assert!(open_stores(&config).is_ok());
    }
}
