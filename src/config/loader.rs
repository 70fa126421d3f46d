//! Configuration Loader
//!
//! Environment-aware loading: a base file, an environment-specific file and
//! `SQLBUS__`-prefixed environment variables, layered in that order.

use config::{Config, Environment, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::TransportConfig;
use crate::constants::env;
use crate::error::TransportResult;

/// Base name of the configuration files (`sqlbus.toml`, `sqlbus.test.yaml`, ...)
const CONFIG_FILE_STEM: &str = "sqlbus";

/// Loads [`TransportConfig`] from files and the environment
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load from `./config` with environment auto-detection
    pub fn load() -> TransportResult<TransportConfig> {
        Self::load_from_directory(Path::new("config"), &Self::detect_environment())
    }

    /// Load from a specific directory with an explicit environment
    pub fn load_from_directory(
        config_dir: &Path,
        environment: &str,
    ) -> TransportResult<TransportConfig> {
        debug!(
            environment = %environment,
            directory = %config_dir.display(),
            "Loading transport configuration"
        );

        let base = Self::file_base(config_dir, CONFIG_FILE_STEM);
        let env_specific = Self::file_base(config_dir, &format!("{CONFIG_FILE_STEM}.{environment}"));

        let settings = Config::builder()
            .add_source(File::with_name(&base).required(false))
            .add_source(File::with_name(&env_specific).required(false))
            .add_source(
                Environment::with_prefix(env::CONFIG_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let config: TransportConfig = settings.try_deserialize()?;
        config.validate()?;

        info!(
            environment = %environment,
            endpoint = %config.endpoint.name,
            default_schema = %config.addressing.default_schema,
            "Transport configuration loaded"
        );

        Ok(config)
    }

    /// Detect the running environment from environment variables
    pub fn detect_environment() -> String {
        std::env::var(env::ENVIRONMENT)
            .or_else(|_| std::env::var(env::APP_ENVIRONMENT))
            .unwrap_or_else(|_| "development".to_string())
    }

    fn file_base(dir: &Path, stem: &str) -> String {
        let path: PathBuf = dir.join(stem);
        path.to_string_lossy().into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_load_defaults_when_no_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = ConfigLoader::load_from_directory(dir.path(), "test").expect("load");
        assert_eq!(config.addressing.default_schema, "public");
        assert_eq!(config.endpoint.error_queue, "error");
    }

    #[test]
    fn test_environment_file_overrides_base() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join("sqlbus.toml"),
            r#"
[endpoint]
name = "orders"

[delayed_delivery]
batch_size = 50
"#,
        )
        .expect("write base");
        fs::write(
            dir.path().join("sqlbus.test.toml"),
            r#"
[delayed_delivery]
batch_size = 5

[addressing.schema_overrides]
billing = "finance"
"#,
        )
        .expect("write env file");

        let config = ConfigLoader::load_from_directory(dir.path(), "test").expect("load");
        assert_eq!(config.endpoint.name, "orders");
        assert_eq!(config.delayed_delivery.batch_size, 5);
        assert_eq!(
            config.addressing.schema_overrides.get("billing").map(String::as_str),
            Some("finance")
        );
    }

    #[test]
    fn test_invalid_file_values_fail_validation() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join("sqlbus.toml"),
            "[delayed_delivery]\nbatch_size = 0\n",
        )
        .expect("write base");

        let result = ConfigLoader::load_from_directory(dir.path(), "production");
        assert!(result.is_err());
    }
}
