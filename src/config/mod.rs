//! Configuration types for the embedded broker.

mod modules;
mod timing;

pub use modules::{ModuleConfig, ReplicationMode};
pub use timing::{ForwarderConfig, QueriesConfig, StreamsConfig};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "embedded-broker.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "EMBEDDED_BROKER_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "EMBEDDED_BROKER";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "EMBEDDED_BROKER_LOG";

use serde::Deserialize;

use crate::message::SharedEventTypes;

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Module '{0}' is configured more than once")]
    DuplicateModule(String),

    #[error("Module name must not be empty")]
    UnnamedModule,
}

/// Main broker configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Stream wait configuration.
    pub streams: StreamsConfig,
    /// Query routing configuration.
    pub queries: QueriesConfig,
    /// Replication forwarder configuration.
    pub forwarder: ForwarderConfig,
    /// Event types replicated to the global store.
    pub shared_event_types: Vec<String>,
    /// Modules connected at startup.
    pub modules: Vec<ModuleConfig>,
}

impl BrokerConfig {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `embedded-broker.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: BrokerConfig = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects module lists the broker cannot connect.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for module in &self.modules {
            if module.name.is_empty() {
                return Err(ConfigError::UnnamedModule);
            }
            if !seen.insert(module.name.as_str()) {
                return Err(ConfigError::DuplicateModule(module.name.clone()));
            }
        }
        Ok(())
    }

    /// The configured shared event types as a lookup table.
    pub fn shared_event_types(&self) -> SharedEventTypes {
        self.shared_event_types.iter().cloned().collect()
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self {
            forwarder: ForwarderConfig::for_test(),
            ..Self::default()
        }
    }
}
