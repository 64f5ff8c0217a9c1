//! StateStore: redb-backed persistence for instances and metrics.
//!
//! All values are JSON-serialized into redb's `&[u8]` value columns. The
//! store supports both on-disk and in-memory backends (the latter for
//! testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, WriteTransaction};
use tracing::{debug, warn};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Instance and metrics persistence used by the pipeline, the cleanup
/// coordinator and the reconciliation loops.
pub trait InstanceStore: Send + Sync {
    /// Update-or-create keyed by `(name, kind)`.
    ///
    /// An existing record keeps its `created_at` and restart history.
    fn upsert_instance(&self, instance: &Instance) -> StateResult<()>;

    fn get_instance(&self, name: &str, kind: dockyard_core::InstanceKind)
    -> StateResult<Option<Instance>>;

    fn fetch_instances(&self, filter: &InstanceFilter) -> StateResult<Vec<Instance>>;

    /// Apply `patch` to every match; returns how many matched.
    fn update_instances(&self, filter: &InstanceFilter, patch: &InstancePatch)
    -> StateResult<usize>;

    /// Delete the first match. Returns true if something was deleted.
    fn delete_instance(&self, filter: &InstanceFilter) -> StateResult<bool>;

    /// Remove the latest document and the whole history of one instance.
    /// Returns how many documents were removed.
    fn delete_metrics(&self, name: &str, kind: dockyard_core::InstanceKind) -> StateResult<usize>;

    /// Replace the latest metrics document for the snapshot's instance.
    fn upsert_metrics(&self, snapshot: &MetricsSnapshot) -> StateResult<()>;

    fn bulk_write_metrics(
        &self,
        ops: &[MetricsWrite],
        options: BulkWriteOptions,
    ) -> StateResult<BulkWriteResult>;

    /// Most recent history entries for an instance, newest first.
    fn list_metrics(
        &self,
        name: &str,
        kind: dockyard_core::InstanceKind,
        limit: usize,
    ) -> StateResult<Vec<MetricsSnapshot>>;

    /// The upserted document, or the newest history entry.
    fn latest_metrics(
        &self,
        name: &str,
        kind: dockyard_core::InstanceKind,
    ) -> StateResult<Option<MetricsSnapshot>>;
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(map_err!(Open))?;
        }
        let db = Database::create(path).map_err(|e| match e {
            redb::DatabaseError::DatabaseAlreadyOpen => StateError::Locked(path.display().to_string()),
            other => StateError::Open(other.to_string()),
        })?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        txn.open_table(METRICS).map_err(map_err!(Table))?;
        txn.open_table(METRICS_LATEST).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn scan_instances(&self, filter: &InstanceFilter) -> StateResult<Vec<Instance>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        collect_matches(&table, filter)
    }

    fn write_metrics_op(txn: &WriteTransaction, op: &MetricsWrite) -> StateResult<()> {
        let snapshot = op.snapshot();
        snapshot.validate()?;
        let value = serde_json::to_vec(snapshot).map_err(map_err!(Serialize))?;
        let (table_def, key) = match op {
            MetricsWrite::Insert(s) => (METRICS, s.table_key()),
            MetricsWrite::Upsert(s) => (METRICS_LATEST, s.latest_key()),
        };
        let mut table = txn.open_table(table_def).map_err(map_err!(Table))?;
        table
            .insert(key.as_str(), value.as_slice())
            .map_err(map_err!(Write))?;
        Ok(())
    }
}

/// Instances in `table` matching `filter`. Usable from read and write
/// transactions alike.
fn collect_matches(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    filter: &InstanceFilter,
) -> StateResult<Vec<Instance>> {
    if let Some(key) = filter.exact_key() {
        return match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let instance: Instance =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(vec![instance])
            }
            None => Ok(Vec::new()),
        };
    }

    let mut results = Vec::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (_, value) = entry.map_err(map_err!(Read))?;
        let instance: Instance =
            serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
        if filter.matches(&instance) {
            results.push(instance);
        }
    }
    Ok(results)
}

/// Keys of `table` in `[start, end)`.
fn keys_in_range(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    start: &str,
    end: &str,
) -> StateResult<Vec<String>> {
    let mut keys = Vec::new();
    for entry in table.range(start..end).map_err(map_err!(Read))? {
        let (key, _) = entry.map_err(map_err!(Read))?;
        keys.push(key.value().to_string());
    }
    Ok(keys)
}

impl InstanceStore for StateStore {
    fn upsert_instance(&self, instance: &Instance) -> StateResult<()> {
        let key = instance.table_key();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            let existing: Option<Instance> = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => Some(
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
                ),
                None => None,
            };

            let mut doc = instance.clone();
            if let Some(existing) = &existing {
                doc.created_at = existing.created_at;
                doc.restart_count = existing.restart_count;
                doc.last_restart_at = existing.last_restart_at;
            }
            let value = serde_json::to_vec(&doc).map_err(map_err!(Serialize))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            debug!(%key, updated = existing.is_some(), "instance stored");
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_instance(
        &self,
        name: &str,
        kind: dockyard_core::InstanceKind,
    ) -> StateResult<Option<Instance>> {
        Ok(self
            .scan_instances(&InstanceFilter::named(name, kind))?
            .into_iter()
            .next())
    }

    fn fetch_instances(&self, filter: &InstanceFilter) -> StateResult<Vec<Instance>> {
        self.scan_instances(filter)
    }

    fn update_instances(
        &self,
        filter: &InstanceFilter,
        patch: &InstancePatch,
    ) -> StateResult<usize> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let matched;
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            let matches = collect_matches(&table, filter)?;
            matched = matches.len();
            for mut instance in matches {
                patch.apply(&mut instance);
                let value = serde_json::to_vec(&instance).map_err(map_err!(Serialize))?;
                table
                    .insert(instance.table_key().as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(matched, "instances updated");
        Ok(matched)
    }

    fn delete_instance(&self, filter: &InstanceFilter) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let deleted;
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            deleted = match collect_matches(&table, filter)?.into_iter().next() {
                Some(target) => {
                    let key = target.table_key();
                    table.remove(key.as_str()).map_err(map_err!(Write))?;
                    Some(key)
                }
                None => None,
            };
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(key = ?deleted, "instance delete");
        Ok(deleted.is_some())
    }

    fn delete_metrics(&self, name: &str, kind: dockyard_core::InstanceKind) -> StateResult<usize> {
        let key = instance_key(kind, name);
        let start = format!("{key}:");
        let end = format!("{key};");
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut removed = 0;
        {
            let mut history = txn.open_table(METRICS).map_err(map_err!(Table))?;
            for entry in keys_in_range(&history, &start, &end)? {
                history.remove(entry.as_str()).map_err(map_err!(Write))?;
                removed += 1;
            }
            let mut latest = txn.open_table(METRICS_LATEST).map_err(map_err!(Table))?;
            if latest.remove(key.as_str()).map_err(map_err!(Write))?.is_some() {
                removed += 1;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, removed, "metrics deleted");
        Ok(removed)
    }

    fn upsert_metrics(&self, snapshot: &MetricsSnapshot) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        Self::write_metrics_op(&txn, &MetricsWrite::Upsert(snapshot.clone()))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn bulk_write_metrics(
        &self,
        ops: &[MetricsWrite],
        options: BulkWriteOptions,
    ) -> StateResult<BulkWriteResult> {
        let mut result = BulkWriteResult::default();
        if ops.is_empty() {
            return Ok(result);
        }

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        for (index, op) in ops.iter().enumerate() {
            match Self::write_metrics_op(&txn, op) {
                Ok(()) => result.applied += 1,
                Err(e) => {
                    warn!(index, name = %op.snapshot().name, error = %e, "bulk metrics write failed");
                    result.failures.push(BulkWriteFailure {
                        index,
                        name: op.snapshot().name.clone(),
                        error: e.to_string(),
                    });
                    if options.ordered {
                        break;
                    }
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            applied = result.applied,
            failed = result.failures.len(),
            ordered = options.ordered,
            "bulk metrics write committed"
        );
        Ok(result)
    }

    fn list_metrics(
        &self,
        name: &str,
        kind: dockyard_core::InstanceKind,
        limit: usize,
    ) -> StateResult<Vec<MetricsSnapshot>> {
        let start = format!("{}:", instance_key(kind, name));
        // ';' follows ':' so this bounds exactly the instance's history keys.
        let end = format!("{};", instance_key(kind, name));
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(METRICS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        let range = table
            .range(start.as_str()..end.as_str())
            .map_err(map_err!(Read))?
            .rev();
        for entry in range {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let snapshot: MetricsSnapshot =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(snapshot);
            if results.len() >= limit {
                break;
            }
        }
        Ok(results)
    }

    fn latest_metrics(
        &self,
        name: &str,
        kind: dockyard_core::InstanceKind,
    ) -> StateResult<Option<MetricsSnapshot>> {
        let key = instance_key(kind, name);
        {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(METRICS_LATEST).map_err(map_err!(Table))?;
            if let Some(guard) = table.get(key.as_str()).map_err(map_err!(Read))? {
                let snapshot: MetricsSnapshot =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                return Ok(Some(snapshot));
            }
        }
        Ok(self.list_metrics(name, kind, 1)?.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockyard_core::InstanceKind;

    fn test_instance(name: &str, kind: InstanceKind) -> Instance {
        Instance {
            name: name.to_string(),
            kind,
            language: "php".to_string(),
            image: "php:8.3-apache".to_string(),
            container_id: format!("cid-{name}"),
            container_name: kind.container_name(name),
            host_ip: "10.0.0.5".to_string(),
            container_port: 40001,
            work_dir: "/app".to_string(),
            store_dir: format!("/srv/dockyard/{}/{name}", kind.prefix()),
            owner: "alice@example.com".to_string(),
            created_at: 1000,
            registry_key: name.to_string(),
            service: "php".to_string(),
            install_exec_id: None,
            restart_count: 0,
            last_restart_at: None,
        }
    }

    fn snapshot(name: &str, read_time: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            name: name.to_string(),
            kind: InstanceKind::Application,
            alive: true,
            read_time,
            memory_usage_fraction: 0.5,
            max_memory_usage_fraction: 0.75,
            memory_limit_gib: 3.0,
            online_cpus: 2,
            cpu_usage_fraction: 0.1,
            host_ip: "10.0.0.5".to_string(),
            logs: None,
        }
    }

    // ── Instances ──────────────────────────────────────────────────

    #[test]
    fn instance_upsert_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let inst = test_instance("blog", InstanceKind::Application);
        store.upsert_instance(&inst).unwrap();

        let got = store
            .get_instance("blog", InstanceKind::Application)
            .unwrap()
            .unwrap();
        assert_eq!(got, inst);
        assert!(
            store
                .get_instance("blog", InstanceKind::Database)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn upsert_keeps_creation_and_restart_history() {
        let store = StateStore::open_in_memory().unwrap();
        let inst = test_instance("blog", InstanceKind::Application);
        store.upsert_instance(&inst).unwrap();
        store
            .update_instances(
                &InstanceFilter::named("blog", InstanceKind::Application),
                &InstancePatch::restarted(1500),
            )
            .unwrap();

        let mut again = inst.clone();
        again.created_at = 2000;
        again.container_id = "cid-new".to_string();
        store.upsert_instance(&again).unwrap();

        let got = store
            .get_instance("blog", InstanceKind::Application)
            .unwrap()
            .unwrap();
        assert_eq!(got.created_at, 1000);
        assert_eq!(got.container_id, "cid-new");
        assert_eq!(got.restart_count, 1);
        assert_eq!(got.last_restart_at, Some(1500));
    }

    #[test]
    fn same_name_different_kinds_coexist() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .upsert_instance(&test_instance("shop", InstanceKind::Application))
            .unwrap();
        store
            .upsert_instance(&test_instance("shop", InstanceKind::Database))
            .unwrap();

        assert_eq!(store.fetch_instances(&InstanceFilter::all()).unwrap().len(), 2);
        assert_eq!(
            store
                .fetch_instances(&InstanceFilter::kind(InstanceKind::Database))
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn fetch_by_owner() {
        let store = StateStore::open_in_memory().unwrap();
        let mut other = test_instance("wiki", InstanceKind::Application);
        other.owner = "bob@example.com".to_string();
        store
            .upsert_instance(&test_instance("blog", InstanceKind::Application))
            .unwrap();
        store.upsert_instance(&other).unwrap();

        let bobs = store
            .fetch_instances(&InstanceFilter::owner("bob@example.com"))
            .unwrap();
        assert_eq!(bobs.len(), 1);
        assert_eq!(bobs[0].name, "wiki");
    }

    #[test]
    fn update_many_returns_match_count() {
        let store = StateStore::open_in_memory().unwrap();
        for name in ["a", "b", "c"] {
            store
                .upsert_instance(&test_instance(name, InstanceKind::Application))
                .unwrap();
        }
        let patch = InstancePatch {
            host_ip: Some("10.0.0.9".to_string()),
            ..Default::default()
        };
        let n = store
            .update_instances(&InstanceFilter::kind(InstanceKind::Application), &patch)
            .unwrap();
        assert_eq!(n, 3);
        assert!(
            store
                .fetch_instances(&InstanceFilter::all())
                .unwrap()
                .iter()
                .all(|i| i.host_ip == "10.0.0.9")
        );

        let none = store
            .update_instances(&InstanceFilter::kind(InstanceKind::Database), &patch)
            .unwrap();
        assert_eq!(none, 0);
    }

    #[test]
    fn concurrent_restart_patches_are_not_lost() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .upsert_instance(&test_instance("blog", InstanceKind::Application))
            .unwrap();
        let filter = InstanceFilter::named("blog", InstanceKind::Application);

        std::thread::scope(|scope| {
            for worker in 0..4u64 {
                let store = store.clone();
                let filter = filter.clone();
                scope.spawn(move || {
                    for i in 0..25 {
                        store
                            .update_instances(&filter, &InstancePatch::restarted(worker * 100 + i))
                            .unwrap();
                    }
                });
            }
        });

        let stored = store
            .get_instance("blog", InstanceKind::Application)
            .unwrap()
            .unwrap();
        assert_eq!(stored.restart_count, 100);
    }

    #[test]
    fn delete_by_filter() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .upsert_instance(&test_instance("blog", InstanceKind::Application))
            .unwrap();

        let filter = InstanceFilter::named("blog", InstanceKind::Application);
        assert!(store.delete_instance(&filter).unwrap());
        assert!(!store.delete_instance(&filter).unwrap());
        assert!(store.fetch_instances(&InstanceFilter::all()).unwrap().is_empty());
    }

    // ── Metrics ────────────────────────────────────────────────────

    #[test]
    fn metrics_history_newest_first() {
        let store = StateStore::open_in_memory().unwrap();
        let ops: Vec<_> = [1000u64, 1060, 1120]
            .into_iter()
            .map(|t| MetricsWrite::Insert(snapshot("blog", t)))
            .collect();
        store
            .bulk_write_metrics(&ops, BulkWriteOptions::unordered())
            .unwrap();
        store
            .bulk_write_metrics(
                &[MetricsWrite::Insert(snapshot("blog-two", 5000))],
                BulkWriteOptions::unordered(),
            )
            .unwrap();

        let all = store
            .list_metrics("blog", InstanceKind::Application, 10)
            .unwrap();
        assert_eq!(
            all.iter().map(|s| s.read_time).collect::<Vec<_>>(),
            vec![1120, 1060, 1000]
        );

        let limited = store
            .list_metrics("blog", InstanceKind::Application, 2)
            .unwrap();
        assert_eq!(limited.len(), 2);

        let latest = store
            .latest_metrics("blog", InstanceKind::Application)
            .unwrap()
            .unwrap();
        assert_eq!(latest.read_time, 1120);
    }

    #[test]
    fn upsert_metrics_keeps_one_document() {
        let store = StateStore::open_in_memory().unwrap();
        let mut snap = snapshot("orders", 100);
        snap.kind = InstanceKind::Database;
        store.upsert_metrics(&snap).unwrap();
        snap.read_time = 200;
        snap.logs = Some("SELECT 1".to_string());
        store.upsert_metrics(&snap).unwrap();

        let latest = store
            .latest_metrics("orders", InstanceKind::Database)
            .unwrap()
            .unwrap();
        assert_eq!(latest.read_time, 200);
        assert_eq!(latest.logs.as_deref(), Some("SELECT 1"));
        assert!(
            store
                .list_metrics("orders", InstanceKind::Database, 10)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn delete_metrics_removes_only_that_instance() {
        let store = StateStore::open_in_memory().unwrap();
        let ops: Vec<_> = [("blog", 1u64), ("blog", 2), ("blog-two", 3)]
            .into_iter()
            .map(|(name, t)| MetricsWrite::Insert(snapshot(name, t)))
            .chain([MetricsWrite::Upsert(snapshot("blog", 4))])
            .collect();
        store
            .bulk_write_metrics(&ops, BulkWriteOptions::unordered())
            .unwrap();

        assert_eq!(
            store
                .delete_metrics("blog", InstanceKind::Application)
                .unwrap(),
            3
        );
        assert!(
            store
                .latest_metrics("blog", InstanceKind::Application)
                .unwrap()
                .is_none()
        );
        assert_eq!(
            store
                .list_metrics("blog-two", InstanceKind::Application, 10)
                .unwrap()
                .len(),
            1
        );
        assert_eq!(
            store
                .delete_metrics("blog", InstanceKind::Application)
                .unwrap(),
            0
        );
    }

    #[test]
    fn unordered_bulk_write_continues_past_failures() {
        let store = StateStore::open_in_memory().unwrap();
        let ops = vec![
            MetricsWrite::Insert(snapshot("a", 1)),
            MetricsWrite::Insert(snapshot("", 1)),
            MetricsWrite::Insert(snapshot("c", 1)),
        ];
        let result = store
            .bulk_write_metrics(&ops, BulkWriteOptions::unordered())
            .unwrap();
        assert_eq!(result.applied, 2);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].index, 1);
        assert!(
            store
                .latest_metrics("c", InstanceKind::Application)
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn ordered_bulk_write_stops_at_first_failure() {
        let store = StateStore::open_in_memory().unwrap();
        let mut bad = snapshot("b", 1);
        bad.cpu_usage_fraction = f64::NAN;
        let ops = vec![
            MetricsWrite::Insert(snapshot("a", 1)),
            MetricsWrite::Insert(bad),
            MetricsWrite::Insert(snapshot("c", 1)),
        ];
        let result = store
            .bulk_write_metrics(&ops, BulkWriteOptions::ordered())
            .unwrap();
        assert_eq!(result.applied, 1);
        assert_eq!(result.failures.len(), 1);
        assert!(
            store
                .latest_metrics("c", InstanceKind::Application)
                .unwrap()
                .is_none()
        );
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("state").join("instances.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store
                .upsert_instance(&test_instance("blog", InstanceKind::Application))
                .unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        let got = store
            .get_instance("blog", InstanceKind::Application)
            .unwrap();
        assert_eq!(got.unwrap().name, "blog");
    }

    #[test]
    fn second_open_reports_lock() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("instances.redb");
        let _held = StateStore::open(&db_path).unwrap();
        let err = StateStore::open(&db_path).err().unwrap();
        assert!(err.is_locked(), "{err}");
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.fetch_instances(&InstanceFilter::all()).unwrap().is_empty());
        assert!(
            store
                .list_metrics("any", InstanceKind::Application, 10)
                .unwrap()
                .is_empty()
        );
        assert!(
            !store
                .delete_instance(&InstanceFilter::named("nope", InstanceKind::Database))
                .unwrap()
        );
        let result = store
            .bulk_write_metrics(&[], BulkWriteOptions::unordered())
            .unwrap();
        assert_eq!(result, BulkWriteResult::default());
    }
}
