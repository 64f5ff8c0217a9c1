//! dockyard-state: instance state store for Dockyard.
//!
//! Backed by [redb](https://docs.rs/redb), holds one document per managed
//! instance plus the metrics written by the reconciliation loop.
//!
//! # Architecture
//!
//! Documents are JSON-serialized into redb's `&[u8]` value columns.
//! Instances are keyed `{kind}/{name}`; metrics history is keyed
//! `{kind}/{name}:{read_time}` so a range scan returns one instance's
//! samples in time order. The latest upserted snapshot per instance lives
//! in its own table.
//!
//! Callers depend on the [`InstanceStore`] trait; [`StateStore`] is the
//! redb implementation and is `Clone` + `Send` + `Sync`.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{InstanceStore, StateStore};
pub use types::*;
