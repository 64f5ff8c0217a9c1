//! dockyard-registry: service discovery for Dockyard instances.
//!
//! Maps discovery keys (`<name>` for applications, `<user>:<db>` for
//! databases) to `host:port` endpoints, and keeps one load counter per
//! `(service, endpoint)` pair for naive load distribution.
//!
//! An instance without a registry entry is undiscoverable even when its
//! container is running.

pub mod error;
pub mod registry;

pub use error::{RegistryError, RegistryResult};
pub use registry::{RedbRegistry, RegistryEntry, ServiceRegistry};
