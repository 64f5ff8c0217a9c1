//! Metrics tick behaviour against the in-memory runtime and store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use dockyard_core::{InstanceKind, PlatformConfig};
use dockyard_driver::{ContainerSpec, FakeRuntime, ResourceStats};
use dockyard_metrics::MetricsCollector;
use dockyard_state::{
    BulkWriteFailure, BulkWriteOptions, BulkWriteResult, Instance, InstanceFilter, InstancePatch,
    InstanceStore, MetricsSnapshot, MetricsWrite, StateResult, StateStore,
};

const GIB: u64 = 1 << 30;

/// Delegates to a real store, counting bulk calls and optionally
/// rejecting one name inside each batch.
struct RecordingStore {
    inner: StateStore,
    bulk_calls: AtomicUsize,
    bulk_sizes: Mutex<Vec<usize>>,
    reject_name: Mutex<Option<String>>,
}

impl InstanceStore for RecordingStore {
    fn upsert_instance(&self, instance: &Instance) -> StateResult<()> {
        self.inner.upsert_instance(instance)
    }

    fn get_instance(&self, name: &str, kind: InstanceKind) -> StateResult<Option<Instance>> {
        self.inner.get_instance(name, kind)
    }

    fn fetch_instances(&self, filter: &InstanceFilter) -> StateResult<Vec<Instance>> {
        self.inner.fetch_instances(filter)
    }

    fn update_instances(
        &self,
        filter: &InstanceFilter,
        patch: &InstancePatch,
    ) -> StateResult<usize> {
        self.inner.update_instances(filter, patch)
    }

    fn delete_instance(&self, filter: &InstanceFilter) -> StateResult<bool> {
        self.inner.delete_instance(filter)
    }

    fn delete_metrics(&self, name: &str, kind: InstanceKind) -> StateResult<usize> {
        self.inner.delete_metrics(name, kind)
    }

    fn upsert_metrics(&self, snapshot: &MetricsSnapshot) -> StateResult<()> {
        self.inner.upsert_metrics(snapshot)
    }

    fn bulk_write_metrics(
        &self,
        ops: &[MetricsWrite],
        options: BulkWriteOptions,
    ) -> StateResult<BulkWriteResult> {
        self.bulk_calls.fetch_add(1, Ordering::SeqCst);
        self.bulk_sizes.lock().unwrap().push(ops.len());
        assert!(!options.ordered, "metrics flush must be unordered");

        let reject = self.reject_name.lock().unwrap().clone();
        let (rejected, kept): (Vec<_>, Vec<_>) = ops
            .iter()
            .enumerate()
            .partition(|(_, op)| Some(&op.snapshot().name) == reject.as_ref());
        let kept: Vec<MetricsWrite> = kept.into_iter().map(|(_, op)| op.clone()).collect();

        let mut result = self.inner.bulk_write_metrics(&kept, options)?;
        result
            .failures
            .extend(rejected.into_iter().map(|(index, op)| BulkWriteFailure {
                index,
                name: op.snapshot().name.clone(),
                error: "injected: write conflict".into(),
            }));
        Ok(result)
    }

    fn list_metrics(
        &self,
        name: &str,
        kind: InstanceKind,
        limit: usize,
    ) -> StateResult<Vec<MetricsSnapshot>> {
        self.inner.list_metrics(name, kind, limit)
    }

    fn latest_metrics(
        &self,
        name: &str,
        kind: InstanceKind,
    ) -> StateResult<Option<MetricsSnapshot>> {
        self.inner.latest_metrics(name, kind)
    }
}

struct Harness {
    runtime: Arc<FakeRuntime>,
    store: Arc<RecordingStore>,
    collector: MetricsCollector,
}

fn harness() -> Harness {
    let config = PlatformConfig::from_toml_str(
        r#"
[host]
ip = "127.0.0.1"
storage_root = "/srv/dockyard"

[state]
path = "unused"

[registry]
path = "unused"

[reconcile]
log_tail_lines = 2

[applications.php]
image = "php:8.3-apache"
port = 80
work_dir = "/var/www/html"

[databases.mysql]
image = "mysql:8"
"#,
    )
    .unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let store = Arc::new(RecordingStore {
        inner: StateStore::open_in_memory().unwrap(),
        bulk_calls: AtomicUsize::new(0),
        bulk_sizes: Mutex::new(Vec::new()),
        reject_name: Mutex::new(None),
    });
    let collector = MetricsCollector::new(runtime.clone(), store.clone(), Arc::new(config));
    Harness {
        runtime,
        store,
        collector,
    }
}

impl Harness {
    fn add(&self, name: &str, kind: InstanceKind, stats: ResourceStats) {
        let container = kind.container_name(name);
        self.runtime.seed_container(
            ContainerSpec {
                name: container.clone(),
                image: "img".into(),
                ..Default::default()
            },
            true,
        );
        self.runtime.set_stats(&container, stats);
        self.store
            .upsert_instance(&Instance {
                name: name.into(),
                kind,
                language: "php".into(),
                image: "img".into(),
                container_id: "cid".into(),
                container_name: container,
                host_ip: "127.0.0.1".into(),
                container_port: 40001,
                work_dir: String::new(),
                store_dir: String::new(),
                owner: "alice@example.com".into(),
                created_at: 1,
                registry_key: name.into(),
                service: match kind {
                    InstanceKind::Application => "php".into(),
                    InstanceKind::Database => "mysql".into(),
                },
                install_exec_id: None,
                restart_count: 0,
                last_restart_at: None,
            })
            .unwrap();
    }
}

fn stats(usage: u64, limit: u64, cpus: u64) -> ResourceStats {
    ResourceStats {
        memory_usage: usage,
        max_memory_usage: usage,
        memory_limit: limit,
        cpu_total_usage: 1_000,
        online_cpus: cpus,
    }
}

#[tokio::test]
async fn application_snapshot_is_normalized() {
    let h = harness();
    h.add("blog", InstanceKind::Application, stats(50 * GIB, 100 * GIB, 2));

    let report = h.collector.collect_once().await.unwrap();
    assert_eq!(report.sampled, 1);
    assert_eq!(report.flushed, 1);

    let history = h
        .store
        .list_metrics("blog", InstanceKind::Application, 10)
        .unwrap();
    assert_eq!(history.len(), 1);
    let snapshot = &history[0];
    assert!(snapshot.alive);
    assert_eq!(snapshot.memory_usage_fraction, 0.5);
    assert_eq!(snapshot.memory_limit_gib, 100.0);
    assert_eq!(snapshot.online_cpus, 2);
    assert_eq!(snapshot.cpu_usage_fraction, 0.0);
    assert_eq!(snapshot.logs, None);
}

#[tokio::test]
async fn limit_in_gib() {
    let h = harness();
    h.add("blog", InstanceKind::Application, stats(GIB, 3 * 1024 * 1024 * 1024, 1));
    h.collector.collect_once().await.unwrap();

    let latest = h
        .store
        .latest_metrics("blog", InstanceKind::Application)
        .unwrap()
        .unwrap();
    assert_eq!(latest.memory_limit_gib, 3.0);
}

#[tokio::test]
async fn zero_limit_or_cpus_writes_nothing() {
    let h = harness();
    h.add("nolimit", InstanceKind::Application, stats(GIB, 0, 2));
    h.add("nocpus", InstanceKind::Application, stats(GIB, 2 * GIB, 0));
    h.add("ok", InstanceKind::Application, stats(GIB, 2 * GIB, 1));

    let report = h.collector.collect_once().await.unwrap();
    assert_eq!(report.skipped, 2);
    assert_eq!(report.sampled, 1);

    for name in ["nolimit", "nocpus"] {
        assert!(
            h.store
                .list_metrics(name, InstanceKind::Application, 10)
                .unwrap()
                .is_empty(),
            "{name} should have no metrics"
        );
    }
    assert_eq!(
        h.store
            .list_metrics("ok", InstanceKind::Application, 10)
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn stopped_container_is_skipped() {
    let h = harness();
    h.add("blog", InstanceKind::Application, stats(GIB, 2 * GIB, 1));
    h.runtime.set_running("app-blog", false);

    let report = h.collector.collect_once().await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(h.store.bulk_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn applications_flush_in_one_bulk_write() {
    let h = harness();
    for name in ["a", "b", "c"] {
        h.add(name, InstanceKind::Application, stats(GIB, 2 * GIB, 1));
    }
    h.add("orders", InstanceKind::Database, stats(GIB, 4 * GIB, 1));

    let report = h.collector.collect_once().await.unwrap();
    assert_eq!(report.sampled, 4);
    assert_eq!(report.flushed, 3);
    assert_eq!(h.store.bulk_calls.load(Ordering::SeqCst), 1);
    assert_eq!(*h.store.bulk_sizes.lock().unwrap(), vec![3]);
}

#[tokio::test]
async fn one_rejected_document_does_not_block_the_batch() {
    let h = harness();
    for name in ["a", "b", "c"] {
        h.add(name, InstanceKind::Application, stats(GIB, 2 * GIB, 1));
    }
    *h.store.reject_name.lock().unwrap() = Some("b".into());

    let report = h.collector.collect_once().await.unwrap();
    assert_eq!(report.flushed, 2);
    assert_eq!(report.failed, 1);
    for name in ["a", "c"] {
        assert!(
            h.store
                .latest_metrics(name, InstanceKind::Application)
                .unwrap()
                .is_some()
        );
    }
}

#[tokio::test]
async fn database_gets_latest_document_with_log_tail() {
    let h = harness();
    h.add("orders", InstanceKind::Database, stats(GIB, 4 * GIB, 2));
    h.runtime.write_file(
        "db-orders",
        "/var/log/mysql/general.log",
        "line 1\nline 2\nline 3\n",
    );

    h.collector.collect_once().await.unwrap();
    let latest = h
        .store
        .latest_metrics("orders", InstanceKind::Database)
        .unwrap()
        .unwrap();
    assert_eq!(latest.memory_usage_fraction, 0.25);
    let logs = latest.logs.unwrap();
    assert!(logs.contains("line 3"));
    assert!(!logs.contains("line 1"));
    assert_eq!(h.store.bulk_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn sampling_failure_is_isolated() {
    let h = harness();
    h.add("broken", InstanceKind::Application, stats(GIB, 2 * GIB, 1));
    h.add("fine", InstanceKind::Application, stats(GIB, 2 * GIB, 1));
    h.runtime.fail_inspect("app-broken", 1);

    let report = h.collector.collect_once().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.sampled, 1);
    assert!(
        h.store
            .latest_metrics("fine", InstanceKind::Application)
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn run_stops_on_shutdown() {
    let h = harness();
    let (tx, rx) = tokio::sync::watch::channel(false);
    let collector = Arc::new(h.collector);
    let task = {
        let collector = collector.clone();
        tokio::spawn(async move { collector.run(rx).await })
    };
    tx.send(true).unwrap();
    task.await.unwrap();
}
