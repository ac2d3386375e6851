//! # Deployment Configuration
//!
//! Typed configuration for a deploy/update/delete run. Values come from a YAML
//! file with optional per-environment sections, are layered with `DEPLOYCTL_*`
//! environment variables, and are finally overridden by command-line flags.
//!
//! ## Architecture
//!
//! - **Typed sections**: `deploy`, `timeouts`, `olm`, `custom_resource`, `logging`
//! - **Environment awareness**: `development`/`test`/`production` overrides in one file
//! - **Explicit validation**: [`DeployConfig::validate`] runs after every load
//!
//! ## Usage
//!
//! ```rust,no_run
//! use deployctl::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load(None)?;
//! let ready = manager.config().timeouts.pod_ready();
//! println!("pods must be ready within {ready:?}");
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;
pub mod settings;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;
pub use settings::{DeploySettings, SettingsOverrides};

use crate::constants;

/// Root configuration document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    pub deploy: DeploySection,
    pub timeouts: TimeoutConfig,
    pub olm: OlmConfig,
    pub custom_resource: CustomResourceConfig,
    pub logging: LoggingConfig,
}

impl DeployConfig {
    /// Validate cross-field constraints after loading
    pub fn validate(&self) -> ConfigResult<()> {
        self.deploy.validate()?;
        self.timeouts.validate()?;
        self.olm.validate()?;
        Ok(())
    }
}

/// Target cluster flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Platform {
    Openshift,
    Kubernetes,
    Minikube,
    Microk8s,
    DockerDesktop,
}

impl Platform {
    pub fn is_openshift(&self) -> bool {
        matches!(self, Self::Openshift)
    }

    /// Single-node developer clusters
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Minikube | Self::Microk8s | Self::DockerDesktop)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Openshift => "openshift",
            Self::Kubernetes => "k8s",
            Self::Minikube => "minikube",
            Self::Microk8s => "microk8s",
            Self::DockerDesktop => "docker-desktop",
        };
        write!(f, "{name}")
    }
}

impl FromStr for Platform {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openshift" | "crc" => Ok(Self::Openshift),
            "k8s" | "kubernetes" => Ok(Self::Kubernetes),
            "minikube" => Ok(Self::Minikube),
            "microk8s" => Ok(Self::Microk8s),
            "docker-desktop" => Ok(Self::DockerDesktop),
            other => Err(ConfigurationError::invalid_value(
                "platform",
                other,
                "expected one of openshift, k8s, minikube, microk8s, docker-desktop",
            )),
        }
    }
}

/// How the operator gets onto the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallerKind {
    /// Apply operator manifests directly
    Operator,
    /// Subscribe through the Operator Lifecycle Manager
    Olm,
}

impl fmt::Display for InstallerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Operator => write!(f, "operator"),
            Self::Olm => write!(f, "olm"),
        }
    }
}

impl FromStr for InstallerKind {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "operator" => Ok(Self::Operator),
            "olm" => Ok(Self::Olm),
            other => Err(ConfigurationError::invalid_value(
                "installer",
                other,
                "expected 'operator' or 'olm'",
            )),
        }
    }
}

/// InstallPlan approval mode of an OLM subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApprovalStrategy {
    Manual,
    Automatic,
}

impl fmt::Display for ApprovalStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => write!(f, "Manual"),
            Self::Automatic => write!(f, "Automatic"),
        }
    }
}

impl FromStr for ApprovalStrategy {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Manual" | "manual" => Ok(Self::Manual),
            "Automatic" | "automatic" => Ok(Self::Automatic),
            other => Err(ConfigurationError::invalid_value(
                "approval_strategy",
                other,
                "expected 'Manual' or 'Automatic'",
            )),
        }
    }
}

/// Where and how to deploy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploySection {
    pub namespace: String,
    pub platform: Platform,
    pub installer: InstallerKind,
    /// Directory holding the operator manifests and the default custom resource
    pub templates_dir: PathBuf,
    pub operator_image: Option<String>,
    pub skip_cert_manager: bool,
    pub cluster_monitoring: bool,
    /// Also remove the auxiliary operator and cluster-scoped leftovers on delete
    pub delete_all: bool,
}

impl Default for DeploySection {
    fn default() -> Self {
        Self {
            namespace: constants::DEFAULT_NAMESPACE.to_string(),
            platform: Platform::Openshift,
            installer: InstallerKind::Olm,
            templates_dir: PathBuf::from("templates"),
            operator_image: None,
            skip_cert_manager: false,
            cluster_monitoring: false,
            delete_all: false,
        }
    }
}

impl DeploySection {
    fn validate(&self) -> ConfigResult<()> {
        if self.namespace.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "namespace",
                "deploy",
            ));
        }
        let valid_label = self.namespace.len() <= 63
            && self
                .namespace
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            && !self.namespace.starts_with('-')
            && !self.namespace.ends_with('-');
        if !valid_label {
            return Err(ConfigurationError::invalid_value(
                "deploy.namespace",
                self.namespace.clone(),
                "must be a lowercase RFC 1123 label",
            ));
        }
        if self.installer == InstallerKind::Olm && !self.platform.is_openshift() {
            tracing::warn!(
                platform = %self.platform,
                "OLM installer selected for a non-OpenShift platform; OLM must be installed on the cluster"
            );
        }
        Ok(())
    }
}

/// Polling and waiting budgets. Pod budgets are milliseconds, OLM waits are seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub poll_interval_ms: u64,
    pub pod_wait_timeout_ms: u64,
    pub pod_download_image_timeout_ms: u64,
    pub pod_ready_timeout_ms: u64,
    pub pod_ready_timeout_embedded_plugin_registry_ms: u64,
    pub pod_error_recheck_timeout_ms: u64,
    pub namespace_active_timeout_ms: u64,
    pub subscription_ready_timeout_secs: u64,
    pub install_plan_timeout_secs: u64,
    pub install_plan_update_timeout_secs: u64,
    pub csv_timeout_secs: u64,
    pub catalog_source_timeout_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            pod_wait_timeout_ms: 120_000,
            pod_download_image_timeout_ms: 1_200_000,
            pod_ready_timeout_ms: 120_000,
            pod_ready_timeout_embedded_plugin_registry_ms: 600_000,
            pod_error_recheck_timeout_ms: 60_000,
            namespace_active_timeout_ms: 60_000,
            subscription_ready_timeout_secs: 600,
            install_plan_timeout_secs: 240,
            install_plan_update_timeout_secs: 60,
            csv_timeout_secs: 30,
            catalog_source_timeout_secs: 60,
        }
    }
}

impl TimeoutConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn pod_wait(&self) -> Duration {
        Duration::from_millis(self.pod_wait_timeout_ms)
    }

    pub fn pod_download_image(&self) -> Duration {
        Duration::from_millis(self.pod_download_image_timeout_ms)
    }

    pub fn pod_ready(&self) -> Duration {
        Duration::from_millis(self.pod_ready_timeout_ms)
    }

    pub fn pod_ready_embedded_plugin_registry(&self) -> Duration {
        Duration::from_millis(self.pod_ready_timeout_embedded_plugin_registry_ms)
    }

    pub fn pod_error_recheck(&self) -> Duration {
        Duration::from_millis(self.pod_error_recheck_timeout_ms)
    }

    pub fn namespace_active(&self) -> Duration {
        Duration::from_millis(self.namespace_active_timeout_ms)
    }

    pub fn subscription_ready(&self) -> Duration {
        Duration::from_secs(self.subscription_ready_timeout_secs)
    }

    pub fn install_plan(&self) -> Duration {
        Duration::from_secs(self.install_plan_timeout_secs)
    }

    pub fn install_plan_update(&self) -> Duration {
        Duration::from_secs(self.install_plan_update_timeout_secs)
    }

    pub fn csv(&self) -> Duration {
        Duration::from_secs(self.csv_timeout_secs)
    }

    pub fn catalog_source(&self) -> Duration {
        Duration::from_secs(self.catalog_source_timeout_secs)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "timeouts.poll_interval_ms",
                "0",
                "polling interval must be positive",
            ));
        }
        let pod_budgets = [
            ("timeouts.pod_wait_timeout_ms", self.pod_wait_timeout_ms),
            (
                "timeouts.pod_download_image_timeout_ms",
                self.pod_download_image_timeout_ms,
            ),
            ("timeouts.pod_ready_timeout_ms", self.pod_ready_timeout_ms),
            (
                "timeouts.pod_ready_timeout_embedded_plugin_registry_ms",
                self.pod_ready_timeout_embedded_plugin_registry_ms,
            ),
        ];
        for (field, value) in pod_budgets {
            if value < self.poll_interval_ms {
                return Err(ConfigurationError::invalid_value(
                    field,
                    value.to_string(),
                    format!(
                        "budget must be at least one polling interval ({}ms)",
                        self.poll_interval_ms
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// Operator Lifecycle Manager subscription parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OlmConfig {
    pub subscription_name: String,
    pub package_name: String,
    pub channel: String,
    pub catalog_source_name: String,
    pub catalog_source_namespace: String,
    /// Catalog image; when set a dedicated CatalogSource is created first
    pub catalog_source_image: Option<String>,
    pub approval_strategy: ApprovalStrategy,
    pub starting_csv: Option<String>,
    pub operator_namespace: String,
}

impl Default for OlmConfig {
    fn default() -> Self {
        Self {
            subscription_name: constants::olm::SUBSCRIPTION.to_string(),
            package_name: constants::olm::PACKAGE.to_string(),
            channel: constants::olm::STABLE_CHANNEL.to_string(),
            catalog_source_name: constants::olm::STABLE_CHANNEL_CATALOG_SOURCE.to_string(),
            catalog_source_namespace: constants::olm::MARKETPLACE_NAMESPACE.to_string(),
            catalog_source_image: None,
            approval_strategy: ApprovalStrategy::Manual,
            starting_csv: None,
            operator_namespace: constants::OPENSHIFT_OPERATORS_NAMESPACE.to_string(),
        }
    }
}

impl OlmConfig {
    fn validate(&self) -> ConfigResult<()> {
        for (field, value) in [
            ("olm.subscription_name", &self.subscription_name),
            ("olm.package_name", &self.package_name),
            ("olm.channel", &self.channel),
            ("olm.catalog_source_name", &self.catalog_source_name),
            ("olm.operator_namespace", &self.operator_namespace),
        ] {
            if value.is_empty() {
                return Err(ConfigurationError::missing_required_field(field, "olm"));
            }
        }
        Ok(())
    }
}

/// Built-in overrides merged into the application custom resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomResourceConfig {
    pub debug: bool,
    pub server_image: Option<String>,
    pub domain: Option<String>,
    pub postgres_storage_class: Option<String>,
    pub workspace_storage_class: Option<String>,
    pub plugin_registry_url: Option<String>,
    pub devfile_registry_url: Option<String>,
    /// YAML document merged over the custom resource last
    pub patch_file: Option<PathBuf>,
    /// Complete custom resource replacing the default template
    pub custom_resource_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Explicit filter directive; `RUST_LOG` still wins when set
    pub level: Option<String>,
    pub format: LogFormat,
}
