use gatekeeper_core::{ActionCatalog, ActionSpec, AutonomyTier};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration, mapped to `gatekeeper.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatekeeperConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
    pub engine: EngineConfig,
    pub defaults: DefaultsConfig,
    /// Extra or overriding entries for the action catalog.
    pub actions: Vec<ActionConfig>,
}

// ── Server ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP listen address.
    pub listen: String,
    /// Optional API key the upstream gateway must present as a bearer token.
    pub api_key: Option<String>,
    /// Enable CORS (for UI development).
    pub cors: bool,
    /// How often expired rate-limit counters are swept, in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:3710".into(),
            api_key: None,
            cors: false,
            sweep_interval_secs: 300,
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Storage ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local maps. Counters and the audit trail vanish on restart.
    Memory,
    /// A SQLite database file.
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Database path for the sqlite backend. Defaults to `~/.gatekeeper/gatekeeper.db`.
    pub path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            path: None,
        }
    }
}

impl StorageConfig {
    /// The database path, falling back to the home directory default.
    pub fn resolved_path(&self) -> PathBuf {
        match &self.path {
            Some(p) => p.clone(),
            None => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".gatekeeper")
                .join("gatekeeper.db"),
        }
    }
}

// ── Engine ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound for each profile/policy/counter lookup during evaluation.
    pub lookup_timeout_ms: u64,
    /// Extra attempts after a failed or timed-out lookup.
    pub lookup_retries: u32,
    /// How far back `pending-actions` looks for unresolved suggestions.
    pub pending_window_days: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lookup_timeout_ms: 250,
            lookup_retries: 1,
            pending_window_days: 7,
        }
    }
}

// ── Defaults ───────────────────────────────────────────────────

/// Values used for users and companies that have not configured anything yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub profile_autonomy: AutonomyTier,
    pub policy_max_autonomy: AutonomyTier,
    pub ai_calls_per_user_per_day: u32,
    pub ai_calls_per_company_per_day: u32,
    pub automations_per_hour: u32,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            profile_autonomy: AutonomyTier::None,
            policy_max_autonomy: AutonomyTier::None,
            ai_calls_per_user_per_day: 100,
            ai_calls_per_company_per_day: 1000,
            automations_per_hour: 50,
        }
    }
}

// ── Actions ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionConfig {
    pub name: String,
    pub required: AutonomyTier,
    #[serde(default)]
    pub automation: bool,
    #[serde(default)]
    pub suggest_floor: Option<AutonomyTier>,
}

impl ActionConfig {
    pub fn to_spec(&self) -> ActionSpec {
        let mut spec = ActionSpec::new(self.name.clone(), self.required);
        spec.automation = self.automation;
        if let Some(floor) = self.suggest_floor {
            spec.suggest_floor = floor;
        }
        spec
    }
}

// ── Default for root ───────────────────────────────────────────

impl Default for GatekeeperConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            storage: StorageConfig::default(),
            engine: EngineConfig::default(),
            defaults: DefaultsConfig::default(),
            actions: Vec::new(),
        }
    }
}

impl GatekeeperConfig {
    /// The built-in action catalog with configured entries layered on top.
    pub fn catalog(&self) -> ActionCatalog {
        let mut catalog = ActionCatalog::builtin();
        for action in &self.actions {
            catalog.insert(action.to_spec());
        }
        catalog
    }
}

// ── Validation ─────────────────────────────────────────────────

/// A single config validation issue.
#[derive(Debug)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self.severity {
            WarningSeverity::Error => "error",
            WarningSeverity::Warning => "warning",
            WarningSeverity::Info => "info",
        };
        write!(f, "[{}] {}: {}", tag, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, "\n   ↳ {}", h)?;
        }
        Ok(())
    }
}

impl GatekeeperConfig {
    /// Validate the config and return a list of warnings/errors.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        // ── Server listen address ───
        if self.server.listen.is_empty() {
            warnings.push(ConfigWarning {
                field: "server.listen".into(),
                message: "listen address is empty".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. '127.0.0.1:3710'".into()),
            });
        } else if self.server.listen.starts_with("0.0.0.0") && self.server.api_key.is_none() {
            warnings.push(ConfigWarning {
                field: "server.api_key".into(),
                message: "no API key set while server is network-accessible".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Set server.api_key so only the auth gateway can reach the API".into()),
            });
        }

        if self.server.sweep_interval_secs == 0 {
            warnings.push(ConfigWarning {
                field: "server.sweep_interval_secs".into(),
                message: "sweep interval is 0".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 300".into()),
            });
        }

        // ── Logging ───
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_formats.join(", "))),
            });
        }
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.level".into(),
                message: format!("unknown log level '{}'", self.logging.level),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_levels.join(", "))),
            });
        }

        // ── Storage ───
        if self.storage.backend == StorageBackend::Memory {
            warnings.push(ConfigWarning {
                field: "storage.backend".into(),
                message: "memory backend: the decision log is lost on restart".into(),
                severity: WarningSeverity::Info,
                hint: Some("Use backend = \"sqlite\" for a durable audit trail".into()),
            });
        }

        // ── Engine ───
        if self.engine.lookup_timeout_ms == 0 {
            warnings.push(ConfigWarning {
                field: "engine.lookup_timeout_ms".into(),
                message: "lookup timeout is 0: every evaluation would fail closed".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 250".into()),
            });
        } else if self.engine.lookup_timeout_ms > 5_000 {
            warnings.push(ConfigWarning {
                field: "engine.lookup_timeout_ms".into(),
                message: format!(
                    "lookup timeout is {}ms: callers wait this long on a stalled store",
                    self.engine.lookup_timeout_ms
                ),
                severity: WarningSeverity::Warning,
                hint: None,
            });
        }
        if self.engine.pending_window_days == 0 {
            warnings.push(ConfigWarning {
                field: "engine.pending_window_days".into(),
                message: "pending window is 0 days: no suggestion would ever be pending".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 7".into()),
            });
        }

        // ── Defaults ───
        let limits = [
            ("defaults.ai_calls_per_user_per_day", self.defaults.ai_calls_per_user_per_day),
            (
                "defaults.ai_calls_per_company_per_day",
                self.defaults.ai_calls_per_company_per_day,
            ),
            ("defaults.automations_per_hour", self.defaults.automations_per_hour),
        ];
        for (field, value) in limits {
            if value == 0 {
                warnings.push(ConfigWarning {
                    field: field.into(),
                    message: "rate limit must be a positive integer".into(),
                    severity: WarningSeverity::Error,
                    hint: None,
                });
            }
        }
        if self.defaults.profile_autonomy > self.defaults.policy_max_autonomy {
            warnings.push(ConfigWarning {
                field: "defaults.profile_autonomy".into(),
                message: format!(
                    "default profile autonomy {} exceeds default company maximum {}; it will be clamped",
                    self.defaults.profile_autonomy, self.defaults.policy_max_autonomy
                ),
                severity: WarningSeverity::Info,
                hint: None,
            });
        }

        // ── Actions ───
        for (i, action) in self.actions.iter().enumerate() {
            if action.name.trim().is_empty() {
                warnings.push(ConfigWarning {
                    field: format!("actions[{}].name", i),
                    message: "action name is empty".into(),
                    severity: WarningSeverity::Error,
                    hint: None,
                });
            }
            if let Some(floor) = action.suggest_floor {
                if floor > action.required {
                    warnings.push(ConfigWarning {
                        field: format!("actions[{}].suggest_floor", i),
                        message: format!(
                            "suggest_floor {} is above required {} for '{}'",
                            floor, action.required, action.name
                        ),
                        severity: WarningSeverity::Warning,
                        hint: None,
                    });
                }
            }
        }

        let errors: Vec<_> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| w.to_string())
            .collect();
        if !errors.is_empty() {
            return Err(errors.join("\n"));
        }
        Ok(warnings)
    }
}
