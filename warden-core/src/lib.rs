//! Warden core library: configuration, service registry types, errors.
//!
//! Public API surface:
//! - [`config`]: `warden.yaml` loading, defaults and validation
//! - [`types`]: service descriptors, ids and change priorities
//! - [`duration`]: human-readable duration parsing for config values
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod duration;
pub mod error;
pub mod types;

pub use config::{
    RateLimitConfig, SupervisorConfig, SyncConfig, WardenConfig, WatchConfig, CONFIG_FILE_NAME,
};
pub use error::ConfigError;
pub use types::{Priority, ServiceDescriptor, ServiceId};
