//! dockyard-provision: turns a request into a running, registered instance.
//!
//! # Architecture
//!
//! ```text
//! ProvisionRequest
//!   │ validate + derive InstancePlan (no side effects)
//!   ▼
//! Pipeline::provision          holds the per-name lock for the whole run
//!   ├── locate_or_create      exists? inspect : create+start+inspect
//!   │                         inspect failure ⇒ remove + recreate once
//!   ├── configure             db: query logging (idempotent) + restart
//!   │                         app: detached dependency install
//!   ├── register state        upsert Instance keyed by (name, kind)
//!   └── register discovery    registry key + service load counter
//!         │
//!         └─ failure ⇒ CleanupQueue::enqueue, scoped to what this run
//!            created (a reused container and its storage are kept)
//!
//! CleanupCoordinator           container ▸ storage ▸ state ▸ registry
//! CleanupQueue                 retries incomplete teardowns with backoff,
//!                              publishes terminal failures on a broadcast
//! ```
//!
//! Stages run strictly in sequence. Each takes the [`InstancePlan`] by
//! value and returns the next one.

pub mod cleanup;
pub mod error;
pub mod plan;
pub mod pipeline;
pub mod queue;

pub use cleanup::{
    CleanupCoordinator, CleanupReport, CleanupScope, CleanupStep, CleanupTarget, StepOutcome,
};
pub use error::{
    CleanupError, CleanupResult, ErrorBody, ProvisionError, ProvisionResult, ProvisionStage,
};
pub use pipeline::Pipeline;
pub use plan::{ConfigureStep, InstancePlan};
pub use queue::{CleanupFailure, CleanupQueue, CleanupRequest};
