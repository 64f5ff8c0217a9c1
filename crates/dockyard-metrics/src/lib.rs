//! dockyard-metrics: resource sampling for every managed instance.
//!
//! # Architecture
//!
//! ```text
//! MetricsCollector
//!   ├── run() → fixed-interval loop until shutdown
//!   └── collect_once()
//!       ├── fetch_instances() ← InstanceStore
//!       ├── inspect() + stats() ← ContainerRuntime, per instance
//!       ├── databases: tail log, upsert_metrics() one by one
//!       └── applications: one unordered bulk_write_metrics()
//! ```
//!
//! Instances whose container reports no memory limit or no online CPUs are
//! skipped for the tick. A failure on one instance never stops the others.

pub mod collector;
pub mod usage;

pub use collector::{MetricsCollector, TickReport};
pub use usage::{CpuBaselines, Usage};
