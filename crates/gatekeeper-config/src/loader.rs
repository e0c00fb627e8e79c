use gatekeeper_core::GateError;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::schema::{GatekeeperConfig, StorageBackend};

/// Loads and reloads the gatekeeper configuration.
pub struct ConfigLoader {
    config: RwLock<GatekeeperConfig>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > GATEKEEPER_CONFIG env > ~/.gatekeeper/gatekeeper.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("GATEKEEPER_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".gatekeeper")
            .join("gatekeeper.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> gatekeeper_core::Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            Self::read(&config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            GatekeeperConfig::default()
        };

        let config = Self::apply_env_overrides(config);

        // Validate config: log warnings, fail on errors
        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
            }
            Err(e) => {
                return Err(GateError::Config(e));
            }
        }

        Ok(Self {
            config: RwLock::new(config),
            config_path,
        })
    }

    /// Get a read snapshot of the current config.
    pub fn get(&self) -> GatekeeperConfig {
        self.config.read().clone()
    }

    /// Path the config was (or would have been) loaded from.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    fn read(path: &Path) -> gatekeeper_core::Result<GatekeeperConfig> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str::<GatekeeperConfig>(&raw).map_err(|e| {
            GateError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Apply env var overrides (GATEKEEPER_LISTEN, GATEKEEPER_LOG_LEVEL, etc.)
    pub fn apply_env_overrides(mut config: GatekeeperConfig) -> GatekeeperConfig {
        if let Ok(v) = std::env::var("GATEKEEPER_LISTEN") {
            config.server.listen = v;
        }
        if let Ok(v) = std::env::var("GATEKEEPER_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Ok(v) = std::env::var("GATEKEEPER_DB_PATH") {
            config.storage.path = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("GATEKEEPER_STORAGE") {
            match v.to_ascii_lowercase().as_str() {
                "memory" => config.storage.backend = StorageBackend::Memory,
                "sqlite" => config.storage.backend = StorageBackend::Sqlite,
                other => warn!(value = other, "ignoring unknown GATEKEEPER_STORAGE"),
            }
        }
        // Env fills in the API key only when the config file doesn't set one.
        if config.server.api_key.is_none() {
            if let Ok(v) = std::env::var("GATEKEEPER_API_KEY") {
                config.server.api_key = Some(v);
            }
        }
        config
    }

    /// Reload the config from disk.
    pub fn reload(&self) -> gatekeeper_core::Result<()> {
        if !self.config_path.exists() {
            return Err(GateError::Config(format!(
                "config file not found: {}",
                self.config_path.display()
            )));
        }
        let new_config = Self::apply_env_overrides(Self::read(&self.config_path)?);
        new_config.validate().map_err(GateError::Config)?;
        *self.config.write() = new_config;
        info!("configuration reloaded");
        Ok(())
    }
}
