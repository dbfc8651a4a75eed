//! Application configuration.
//!
//! Aggregates node configuration loaded from YAML files or environment
//! variables. Workflow definitions live in their own document, loaded
//! once at start.

mod workflow;

pub use workflow::{Every, Schedule, Workflow, WorkflowSet};

use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "WEFT_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "WEFT";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "WEFT_LOG";

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("failed to read definition file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse definitions: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Messaging configuration; absent means no bridge, local-only bus.
    pub messaging: Option<MessagingConfig>,
    /// Dispatch tuning.
    pub dispatch: DispatchConfig,
    /// Path to the workflow definition document.
    pub workflow_file: Option<String>,
}

/// Dispatch tuning knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Deadline for one remote round trip, in seconds.
    pub deadline_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { deadline_secs: 30 }
    }
}

impl DispatchConfig {
    pub fn deadline(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.deadline_secs)
    }
}

/// Messaging type discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagingType {
    /// NATS broker bridging.
    #[default]
    Nats,
}

/// Messaging configuration (discriminated union).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Messaging type discriminator.
    #[serde(rename = "type")]
    pub messaging_type: MessagingType,
    /// NATS-specific configuration.
    pub nats: NatsConfig,
    /// Topics mirrored to the broker at start-up.
    pub bridge_topics: Vec<String>,
}

/// NATS-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    /// NATS connection URL.
    pub url: String,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (later overrides earlier):
    /// 1. `config.yaml` in the current directory (if present)
    /// 2. File specified by the `path` argument (if provided)
    /// 3. File specified by `WEFT_CONFIG` (if set)
    /// 4. Environment variables with the `WEFT` prefix
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

        Ok(config.try_deserialize()?)
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();

        assert!(config.messaging.is_none());
        assert_eq!(config.dispatch.deadline_secs, 30);
        assert!(config.workflow_file.is_none());
    }

    #[test]
    fn test_nats_defaults() {
        let messaging = MessagingConfig::default();

        assert_eq!(messaging.messaging_type, MessagingType::Nats);
        assert_eq!(messaging.nats.url, "nats://localhost:4222");
        assert!(messaging.bridge_topics.is_empty());
    }

    #[test]
    fn test_config_loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
dispatch:
  deadline_secs: 5
messaging:
  type: nats
  nats:
    url: nats://broker:4222
  bridge_topics:
    - exec.result
    - exec.err
"#
        )
        .unwrap();

        let config = Config::load(file.path().to_str()).unwrap();

        assert_eq!(config.dispatch.deadline_secs, 5);
        let messaging = config.messaging.unwrap();
        assert_eq!(messaging.nats.url, "nats://broker:4222");
        assert_eq!(messaging.bridge_topics.len(), 2);
    }
}
