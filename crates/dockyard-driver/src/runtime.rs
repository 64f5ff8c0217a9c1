//! The container runtime seam.

use async_trait::async_trait;

use crate::error::DriverResult;
use crate::types::*;

/// Operations the control plane needs from a container runtime.
///
/// Containers are addressed by name or id interchangeably.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create a container; returns its id. Does not start it.
    async fn create(&self, spec: &ContainerSpec) -> DriverResult<String>;

    async fn start(&self, container: &str) -> DriverResult<()>;

    async fn stop(&self, container: &str) -> DriverResult<()>;

    async fn restart(&self, container: &str) -> DriverResult<()>;

    async fn remove(&self, container: &str, force: bool) -> DriverResult<()>;

    /// Whether a container with exactly this name exists.
    async fn container_exists(&self, name: &str) -> DriverResult<bool>;

    async fn inspect(&self, container: &str) -> DriverResult<ContainerState>;

    /// Health reported by the runtime's health check.
    async fn inspect_health(&self, container: &str) -> DriverResult<ContainerHealth> {
        Ok(self.inspect(container).await?.health)
    }

    /// One-shot resource usage snapshot.
    async fn stats(&self, container: &str) -> DriverResult<ResourceStats>;

    /// Run `cmd` inside the container.
    ///
    /// Blocking and capture modes fail with `NonZeroExit` when the command
    /// exits non-zero; capture mode carries the output in the error.
    async fn exec(&self, container: &str, cmd: &[String], mode: ExecMode)
    -> DriverResult<ExecOutcome>;

    /// Like [`exec`](Self::exec) but runs as a privileged process.
    async fn exec_privileged(&self, container: &str, cmd: &[String]) -> DriverResult<ExecOutcome>;

    async fn exec_status(&self, exec_id: &str) -> DriverResult<ExecStatus>;

    /// Repo tags of locally available images.
    async fn list_images(&self) -> DriverResult<Vec<String>>;

    async fn pull_image(&self, image: &str) -> DriverResult<()>;
}
