//! dockyard-health: self-healing for managed containers.
//!
//! A fixed-interval loop inspects the runtime-reported health of every
//! known instance and restarts (never deletes) those reporting unhealthy.
//!
//! # Architecture
//!
//! ```text
//! HealthChecker
//!   ├── run() → fixed-interval loop until shutdown
//!   └── check_once()
//!       ├── fetch_instances() ← InstanceStore
//!       ├── try_lock(container) ← NameLocks, skip when busy
//!       ├── inspect_health() ← ContainerRuntime
//!       └── Unhealthy → restart() + restart_count bump
//! ```

pub mod checker;

pub use checker::{CheckOutcome, HealthChecker};
