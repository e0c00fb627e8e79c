//! # gatekeeper-config
//!
//! Configuration system for the gatekeeper. Reads from `gatekeeper.toml`,
//! environment variables, and CLI overrides, in that precedence order.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::GatekeeperConfig;
pub use schema::{
    ActionConfig, ConfigWarning, DefaultsConfig, EngineConfig, LoggingConfig, ServerConfig,
    StorageBackend, StorageConfig, WarningSeverity,
};
