//! Provisioner configuration file.
//!
//! ```toml
//! service_name = "mysql"
//! node_timeout_secs = 2
//! node_ttl_secs = 300
//! sweep_interval_secs = 60
//! orphan_cycle_window_secs = 30
//! allow_over_provisioning = false
//! score_field = "available_memory"
//! log_level = "info"
//! ```
//!
//! Every field is optional; missing fields take the defaults shown.

use fleet_provisioner::{FieldScorer, ProvisionerConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// On-disk configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub service_name: String,
    pub node_timeout_secs: u64,
    pub node_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub orphan_cycle_window_secs: u64,
    pub allow_over_provisioning: bool,
    /// Capacity field nodes are ranked by.
    pub score_field: String,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Seed for binding ids; random when unset.
    pub id_seed: Option<u64>,
}

impl Default for FileConfig {
    fn default() -> Self {
        let defaults = ProvisionerConfig::default();
        Self {
            service_name: defaults.service_name,
            node_timeout_secs: defaults.node_timeout.as_secs(),
            node_ttl_secs: defaults.node_ttl.as_secs(),
            sweep_interval_secs: defaults.sweep_interval.as_secs(),
            orphan_cycle_window_secs: defaults.orphan_cycle_window.as_secs(),
            allow_over_provisioning: defaults.allow_over_provisioning,
            score_field: "available_memory".to_string(),
            log_level: "info".to_string(),
            id_seed: None,
        }
    }
}

impl FileConfig {
    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: FileConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() || self.service_name.contains('.') {
            return Err(ConfigError::Invalid(format!(
                "service_name must be non-empty and contain no '.': {:?}",
                self.service_name
            )));
        }
        if self.node_timeout_secs == 0 {
            return Err(ConfigError::Invalid("node_timeout_secs must be positive".into()));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid("sweep_interval_secs must be positive".into()));
        }
        if self.node_ttl_secs == 0 {
            return Err(ConfigError::Invalid("node_ttl_secs must be positive".into()));
        }
        if self.orphan_cycle_window_secs == 0 {
            return Err(ConfigError::Invalid(
                "orphan_cycle_window_secs must be positive".into(),
            ));
        }
        if self.score_field.is_empty() {
            return Err(ConfigError::Invalid("score_field must be set".into()));
        }
        Ok(())
    }

    pub fn provisioner_config(&self) -> ProvisionerConfig {
        ProvisionerConfig::new(self.service_name.clone())
            .with_node_timeout(Duration::from_secs(self.node_timeout_secs))
            .with_node_ttl(Duration::from_secs(self.node_ttl_secs))
            .with_sweep_interval(Duration::from_secs(self.sweep_interval_secs))
            .with_orphan_cycle_window(Duration::from_secs(self.orphan_cycle_window_secs))
            .with_over_provisioning(self.allow_over_provisioning)
            .with_id_seed(self.id_seed.unwrap_or_else(rand::random))
    }

    pub fn scorer(&self) -> FieldScorer {
        FieldScorer::new(self.score_field.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_from_empty_file() {
        let config = FileConfig::from_toml("").unwrap();
        assert_eq!(config, FileConfig::default());
        let provisioner = config.provisioner_config();
        assert_eq!(provisioner.node_timeout, Duration::from_secs(2));
        assert_eq!(provisioner.node_ttl, Duration::from_secs(300));
        assert!(!provisioner.allow_over_provisioning);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
service_name = "mysql"
node_timeout_secs = 5
allow_over_provisioning = true
score_field = "available_storage"
id_seed = 42
"#
        )
        .unwrap();

        let config = FileConfig::load(file.path()).unwrap();
        assert_eq!(config.service_name, "mysql");
        assert_eq!(config.scorer().field(), "available_storage");
        let provisioner = config.provisioner_config();
        assert_eq!(provisioner.node_timeout, Duration::from_secs(5));
        assert!(provisioner.allow_over_provisioning);
        assert_eq!(provisioner.id_seed, 42);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            FileConfig::from_toml("service_name = \"a.b\""),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            FileConfig::from_toml("node_timeout_secs = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            FileConfig::from_toml("node_ttl_secs = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            FileConfig::from_toml("orphan_cycle_window_secs = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            FileConfig::from_toml("unknown_key = 1"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileConfig::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
