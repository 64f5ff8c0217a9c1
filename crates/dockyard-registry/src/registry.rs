//! redb-backed service registry.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{RegistryError, RegistryResult};

/// Registry entries keyed by discovery key.
const ENDPOINTS: TableDefinition<&str, &[u8]> = TableDefinition::new("endpoints");

/// Load counters keyed by `{service}/{endpoint}`.
const LOADS: TableDefinition<&str, u64> = TableDefinition::new("loads");

macro_rules! map_err {
    ($variant:ident) => {
        |e| RegistryError::$variant(e.to_string())
    };
}

/// A discovery key bound to an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub key: String,
    /// `host:port`.
    pub endpoint: String,
}

/// Discovery and load bookkeeping consumed by the pipeline and cleanup.
pub trait ServiceRegistry: Send + Sync {
    /// Bind `key` to `endpoint`, replacing any previous binding.
    fn register(&self, key: &str, endpoint: &str) -> RegistryResult<()>;

    /// Bump the counter for `(service, endpoint)`; returns the new value.
    fn increment_load(&self, service: &str, endpoint: &str) -> RegistryResult<u64>;

    /// Remove a discovery key. Returns true if it existed.
    fn remove(&self, key: &str) -> RegistryResult<bool>;

    fn resolve(&self, key: &str) -> RegistryResult<Option<String>>;

    /// Counter per endpoint for one service, sorted by endpoint.
    fn service_load(&self, service: &str) -> RegistryResult<Vec<(String, u64)>>;

    /// Endpoint with the lowest counter for `service`.
    fn least_loaded(&self, service: &str) -> RegistryResult<Option<String>> {
        Ok(self
            .service_load(service)?
            .into_iter()
            .min_by_key(|(_, load)| *load)
            .map(|(endpoint, _)| endpoint))
    }
}

/// Service registry stored in an embedded redb database.
#[derive(Clone)]
pub struct RedbRegistry {
    db: Arc<Database>,
}

impl RedbRegistry {
    pub fn open(path: &Path) -> RegistryResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(map_err!(Open))?;
        }
        let db = Database::create(path).map_err(|e| match e {
            redb::DatabaseError::DatabaseAlreadyOpen => RegistryError::Locked(path.display().to_string()),
            other => RegistryError::Open(other.to_string()),
        })?;
        let registry = Self { db: Arc::new(db) };
        registry.ensure_tables()?;
        debug!(?path, "service registry opened");
        Ok(registry)
    }

    pub fn open_in_memory() -> RegistryResult<Self> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(map_err!(Open))?;
        let registry = Self { db: Arc::new(db) };
        registry.ensure_tables()?;
        Ok(registry)
    }

    fn ensure_tables(&self) -> RegistryResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(ENDPOINTS).map_err(map_err!(Table))?;
        txn.open_table(LOADS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// All registered entries, sorted by key.
    pub fn entries(&self) -> RegistryResult<Vec<RegistryEntry>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ENDPOINTS).map_err(map_err!(Table))?;
        let mut entries = Vec::new();
        for row in table.iter().map_err(map_err!(Storage))? {
            let (_, value) = row.map_err(map_err!(Storage))?;
            entries.push(serde_json::from_slice(value.value()).map_err(map_err!(Serialize))?);
        }
        Ok(entries)
    }
}

fn load_key(service: &str, endpoint: &str) -> String {
    format!("{service}/{endpoint}")
}

impl ServiceRegistry for RedbRegistry {
    fn register(&self, key: &str, endpoint: &str) -> RegistryResult<()> {
        if key.is_empty() {
            return Err(RegistryError::InvalidKey("empty discovery key".into()));
        }
        let entry = RegistryEntry {
            key: key.to_string(),
            endpoint: endpoint.to_string(),
        };
        let value = serde_json::to_vec(&entry).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ENDPOINTS).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Storage))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(key, endpoint, "registry entry stored");
        Ok(())
    }

    fn increment_load(&self, service: &str, endpoint: &str) -> RegistryResult<u64> {
        let key = load_key(service, endpoint);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let load;
        {
            let mut table = txn.open_table(LOADS).map_err(map_err!(Table))?;
            let current = table
                .get(key.as_str())
                .map_err(map_err!(Storage))?
                .map(|guard| guard.value())
                .unwrap_or(0);
            load = current + 1;
            table.insert(key.as_str(), load).map_err(map_err!(Storage))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(service, endpoint, load, "service load incremented");
        Ok(load)
    }

    fn remove(&self, key: &str) -> RegistryResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(ENDPOINTS).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Storage))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(key, existed, "registry entry removed");
        Ok(existed)
    }

    fn resolve(&self, key: &str) -> RegistryResult<Option<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ENDPOINTS).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Storage))? {
            Some(guard) => {
                let entry: RegistryEntry =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Serialize))?;
                Ok(Some(entry.endpoint))
            }
            None => Ok(None),
        }
    }

    fn service_load(&self, service: &str) -> RegistryResult<Vec<(String, u64)>> {
        let prefix = format!("{service}/");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(LOADS).map_err(map_err!(Table))?;
        let mut loads = Vec::new();
        for row in table.iter().map_err(map_err!(Storage))? {
            let (key, value) = row.map_err(map_err!(Storage))?;
            if let Some(endpoint) = key.value().strip_prefix(&prefix) {
                loads.push((endpoint.to_string(), value.value()));
            }
        }
        Ok(loads)
    }
}
