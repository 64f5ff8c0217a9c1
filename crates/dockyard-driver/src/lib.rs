//! dockyard-driver: thin facade over the container runtime.
//!
//! Every operation is a single round trip to the runtime bounded by a
//! timeout. Errors distinguish "not found" from "runtime unreachable"
//! from "command exited non-zero" so callers can react to each.
//!
//! # Architecture
//!
//! ```text
//! ContainerRuntime (trait, shared as Arc<dyn ContainerRuntime>)
//!   ├── DockerDriver  : bollard client, per-call timeouts
//!   └── FakeRuntime   : in-memory containers with fault injection
//!
//! ensure_images()     : eager check-and-pull of required images
//! commands            : argv shapes for in-container file operations
//! ```
//!
//! The driver holds no per-container state; the Docker client is cloned
//! cheaply and safe to call from many tasks at once.

pub mod commands;
pub mod docker;
pub mod error;
pub mod fake;
pub mod images;
pub mod runtime;
pub mod types;

pub use docker::DockerDriver;
pub use error::{DriverError, DriverResult};
pub use fake::{ExecCall, FakeRuntime};
pub use images::{ensure_images, ImageReport};
pub use runtime::ContainerRuntime;
pub use types::*;
