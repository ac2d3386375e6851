//! Configuration Loader
//!
//! Environment-aware configuration loading. A single YAML file carries the base
//! values plus optional `development`/`test`/`production` sections; the section
//! for the detected environment is merged over the base, then `DEPLOYCTL_*`
//! environment variables are layered on top through the `config` crate.

use super::error::{ConfigResult, ConfigurationError};
use super::DeployConfig;
use serde_yaml::Value as YamlValue;
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const ENV_PREFIX: &str = "DEPLOYCTL";
const ENVIRONMENT_SECTIONS: [&str; 3] = ["development", "test", "production"];

/// Loaded configuration plus where it came from
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: DeployConfig,
    environment: String,
    config_file: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load(config_file: Option<&Path>) -> ConfigResult<ConfigManager> {
        let environment = Self::detect_environment();
        Self::load_with_env(config_file, &environment)
    }

    /// Load configuration with an explicit environment.
    /// Useful for testing without modifying global environment variables.
    pub fn load_with_env(config_file: Option<&Path>, environment: &str) -> ConfigResult<ConfigManager> {
        let config_file = config_file
            .map(Path::to_path_buf)
            .or_else(Self::default_config_file);

        debug!(
            environment = %environment,
            config_file = ?config_file,
            "Loading deployment configuration"
        );

        let merged = Self::load_and_merge_yaml(config_file.as_deref(), environment)?;
        let config = Self::layer_environment_variables(&merged)?;
        config.validate()?;

        info!(
            environment = %environment,
            namespace = %config.deploy.namespace,
            installer = %config.deploy.installer,
            platform = %config.deploy.platform,
            "Configuration loaded successfully"
        );

        Ok(ConfigManager {
            config,
            environment: environment.to_string(),
            config_file,
        })
    }

    /// Wrap an already-built configuration, validating it first
    pub fn from_config(config: DeployConfig, environment: &str) -> ConfigResult<ConfigManager> {
        config.validate()?;
        Ok(ConfigManager {
            config,
            environment: environment.to_string(),
            config_file: None,
        })
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    pub fn into_config(self) -> DeployConfig {
        self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_file(&self) -> Option<&Path> {
        self.config_file.as_deref()
    }

    /// Detect current environment from environment variables
    pub fn detect_environment() -> String {
        env::var("DEPLOYCTL_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    fn default_config_file() -> Option<PathBuf> {
        ["deployctl.yaml", "deployctl.yml", "config/deployctl.yaml"]
            .iter()
            .map(PathBuf::from)
            .find(|path| path.is_file())
    }

    /// Safely read a configuration file with a size limit
    fn read_config_file_safely(path: &Path) -> ConfigResult<String> {
        const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

        let metadata = std::fs::metadata(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))?;

        if !metadata.is_file() {
            return Err(ConfigurationError::invalid_value(
                "config_file",
                path.display().to_string(),
                "Configuration path must point to a regular file",
            ));
        }

        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigurationError::invalid_value(
                "file_size",
                metadata.len().to_string(),
                format!(
                    "Configuration file too large ({} bytes > {MAX_CONFIG_FILE_SIZE} bytes limit)",
                    metadata.len()
                ),
            ));
        }

        std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))
    }

    /// Defaults, then the file, then the environment section of the file
    fn load_and_merge_yaml(config_file: Option<&Path>, environment: &str) -> ConfigResult<YamlValue> {
        let mut merged = serde_yaml::to_value(DeployConfig::default())
            .map_err(|e| ConfigurationError::invalid_yaml("<defaults>", e))?;

        let Some(path) = config_file else {
            debug!("No configuration file found, using defaults");
            return Ok(merged);
        };

        let content = Self::read_config_file_safely(path)?;
        let mut file_value: YamlValue = serde_yaml::from_str(&content)
            .map_err(|e| ConfigurationError::invalid_yaml(path.display().to_string(), e))?;

        let env_overrides = file_value
            .get(YamlValue::String(environment.to_string()))
            .cloned();

        if let YamlValue::Mapping(ref mut map) = file_value {
            for section in ENVIRONMENT_SECTIONS {
                map.remove(YamlValue::String(section.to_string()));
            }
        }

        Self::merge_yaml_values(&mut merged, file_value)?;

        if let Some(overrides) = env_overrides {
            debug!(environment = %environment, "Applying environment-specific overrides");
            Self::merge_yaml_values(&mut merged, overrides).map_err(|e| {
                ConfigurationError::environment_config_error(environment, e)
            })?;
        }

        Ok(merged)
    }

    /// Recursively merge YAML values (overrides into base)
    fn merge_yaml_values(base: &mut YamlValue, override_value: YamlValue) -> ConfigResult<()> {
        match (&mut *base, override_value) {
            (YamlValue::Mapping(base_map), YamlValue::Mapping(override_map)) => {
                for (key, value) in override_map {
                    if let Some(existing_value) = base_map.get_mut(&key) {
                        Self::merge_yaml_values(existing_value, value)?;
                    } else {
                        base_map.insert(key, value);
                    }
                }
            }
            (YamlValue::Mapping(_), other) if !other.is_mapping() && !other.is_null() => {
                return Err(ConfigurationError::merge_error(format!(
                    "cannot replace a section with a scalar value: {other:?}"
                )));
            }
            (_, YamlValue::Null) => {}
            (base_ref, override_val) => {
                *base_ref = override_val;
            }
        }
        Ok(())
    }

    /// Layer `DEPLOYCTL_SECTION__FIELD` variables over the merged document
    fn layer_environment_variables(merged: &YamlValue) -> ConfigResult<DeployConfig> {
        let yaml = serde_yaml::to_string(merged)
            .map_err(|e| ConfigurationError::invalid_yaml("<merged>", e))?;

        let layered = config::Config::builder()
            .add_source(config::File::from_str(&yaml, config::FileFormat::Yaml))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigurationError::environment_override_error(ENV_PREFIX, e))?;

        layered
            .try_deserialize::<DeployConfig>()
            .map_err(|e| ConfigurationError::environment_override_error(ENV_PREFIX, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InstallerKind, Platform};
    use std::fs;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("deployctl.yaml");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let manager = ConfigManager::load_with_env(None, "test").unwrap();
        assert_eq!(manager.config().deploy.namespace, "eclipse-che");
        assert_eq!(manager.config().timeouts.pod_ready_timeout_ms, 120_000);
        assert_eq!(manager.environment(), "test");
    }

    #[test]
    fn test_file_values_and_environment_section() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
deploy:
  namespace: che-dev
  platform: minikube
  installer: operator
timeouts:
  pod_ready_timeout_ms: 300000
production:
  timeouts:
    pod_ready_timeout_ms: 900000
test:
  deploy:
    namespace: che-test
"#,
        );

        let test_env = ConfigManager::load_with_env(Some(&path), "test").unwrap();
        assert_eq!(test_env.config().deploy.namespace, "che-test");
        assert_eq!(test_env.config().deploy.platform, Platform::Minikube);
        assert_eq!(test_env.config().deploy.installer, InstallerKind::Operator);
        assert_eq!(test_env.config().timeouts.pod_ready_timeout_ms, 300_000);
        // untouched fields keep their defaults
        assert_eq!(test_env.config().timeouts.pod_wait_timeout_ms, 120_000);

        let prod_env = ConfigManager::load_with_env(Some(&path), "production").unwrap();
        assert_eq!(prod_env.config().deploy.namespace, "che-dev");
        assert_eq!(prod_env.config().timeouts.pod_ready_timeout_ms, 900_000);
    }

    #[test]
    fn test_invalid_yaml_is_reported_with_path() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "deploy: [unterminated");

        let err = ConfigManager::load_with_env(Some(&path), "test").unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidYaml { .. }));
        assert!(err.to_string().contains("deployctl.yaml"));
    }

    #[test]
    fn test_validation_runs_after_merge() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "deploy:\n  namespace: Not-Valid\n");

        let err = ConfigManager::load_with_env(Some(&path), "test").unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidValue { .. }));
    }

    #[test]
    fn test_environment_variable_layering() {
        std::env::set_var("DEPLOYCTL_OLM__CHANNEL", "next");
        let manager = ConfigManager::load_with_env(None, "test").unwrap();
        std::env::remove_var("DEPLOYCTL_OLM__CHANNEL");

        assert_eq!(manager.config().olm.channel, "next");
    }

    #[test]
    fn test_directory_is_not_a_config_file() {
        let dir = TempDir::new().unwrap();
        let err = ConfigManager::load_with_env(Some(dir.path()), "test").unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidValue { .. }));
    }
}
