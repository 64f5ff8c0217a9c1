//! Eager image availability check.

use std::collections::HashSet;

use tracing::{info, warn};

use crate::error::DriverResult;
use crate::runtime::ContainerRuntime;

/// Outcome of [`ensure_images`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageReport {
    pub present: Vec<String>,
    pub pulled: Vec<String>,
    /// Images whose pull failed, with the error text.
    pub failed: Vec<(String, String)>,
}

impl ImageReport {
    pub fn all_available(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Canonical form used to compare image references.
///
/// `docker.io/library/mysql` and `mysql:latest` name the same image.
pub fn normalize_image(image: &str) -> String {
    let name = image.strip_prefix("docker.io/").unwrap_or(image);
    let name = name.strip_prefix("library/").unwrap_or(name);
    let last_segment = name.rsplit('/').next().unwrap_or(name);
    if last_segment.contains(':') || last_segment.contains('@') {
        name.to_string()
    } else {
        format!("{name}:latest")
    }
}

/// Pull every image in `required` that the runtime does not already have.
///
/// Failing to list local images is an error. Individual pull failures
/// are logged and reported but do not abort the remaining pulls.
pub async fn ensure_images(
    runtime: &dyn ContainerRuntime,
    required: &[String],
) -> DriverResult<ImageReport> {
    let local: HashSet<String> = runtime
        .list_images()
        .await?
        .iter()
        .map(|tag| normalize_image(tag))
        .collect();

    let mut report = ImageReport::default();
    for image in required {
        if local.contains(&normalize_image(image)) {
            report.present.push(image.clone());
            continue;
        }
        info!(image = %image, "pulling missing image");
        match runtime.pull_image(image).await {
            Ok(()) => report.pulled.push(image.clone()),
            Err(e) => {
                warn!(image = %image, error = %e, "image pull failed");
                report.failed.push((image.clone(), e.to_string()));
            }
        }
    }

    info!(
        present = report.present.len(),
        pulled = report.pulled.len(),
        failed = report.failed.len(),
        "image check complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeRuntime;

    #[test]
    fn normalization() {
        assert_eq!(normalize_image("mysql"), "mysql:latest");
        assert_eq!(normalize_image("docker.io/library/mysql:8"), "mysql:8");
        assert_eq!(normalize_image("docker.io/bitnami/php-fpm"), "bitnami/php-fpm:latest");
        assert_eq!(normalize_image("localhost:5000/app"), "localhost:5000/app:latest");
        assert_eq!(normalize_image("postgres@sha256:abc"), "postgres@sha256:abc");
    }

    #[tokio::test]
    async fn pulls_only_missing_images() {
        let runtime = FakeRuntime::new();
        runtime.add_image("mysql:8");

        let required = vec!["docker.io/library/mysql:8".to_string(), "postgres:16".to_string()];
        let report = ensure_images(&runtime, &required).await.unwrap();

        assert_eq!(report.present, vec!["docker.io/library/mysql:8".to_string()]);
        assert_eq!(report.pulled, vec!["postgres:16".to_string()]);
        assert!(report.all_available());
        assert_eq!(runtime.pulled_images(), vec!["postgres:16".to_string()]);
    }

    #[tokio::test]
    async fn pull_failure_is_reported_not_fatal() {
        let runtime = FakeRuntime::new();
        runtime.fail_pull("mongo:7");

        let required = vec!["mongo:7".to_string(), "redis:7".to_string()];
        let report = ensure_images(&runtime, &required).await.unwrap();

        assert_eq!(report.pulled, vec!["redis:7".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "mongo:7");
        assert!(!report.all_available());
    }

    #[tokio::test]
    async fn list_failure_is_fatal() {
        let runtime = FakeRuntime::new();
        runtime.set_unreachable(true);

        let err = ensure_images(&runtime, &["mysql:8".to_string()])
            .await
            .unwrap_err();
        assert!(err.is_unreachable());
    }
}
