pub mod config;
pub mod duration;
pub mod engine;
pub mod locks;
pub mod net;
pub mod request;
pub mod types;

pub use config::{ConfigError, PlatformConfig};
pub use engine::{DatabaseEngine, EngineProfile};
pub use locks::NameLocks;
pub use request::{ApplicationRequest, DatabaseRequest, ProvisionRequest, RequestError};
pub use types::*;
