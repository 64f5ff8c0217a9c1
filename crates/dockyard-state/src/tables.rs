//! redb table definitions for the instance state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized documents).

use redb::TableDefinition;

/// Instance documents keyed by `{kind}/{name}`.
pub const INSTANCES: TableDefinition<&str, &[u8]> = TableDefinition::new("instances");

/// Metrics history keyed by `{kind}/{name}:{read_time:020}`.
pub const METRICS: TableDefinition<&str, &[u8]> = TableDefinition::new("metrics");

/// Latest upserted metrics document keyed by `{kind}/{name}`.
pub const METRICS_LATEST: TableDefinition<&str, &[u8]> = TableDefinition::new("metrics_latest");
