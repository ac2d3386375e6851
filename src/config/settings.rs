//! Run settings: the loaded configuration with command-line overrides applied
//! and the custom-resource documents read from disk. Built once per command and
//! shared read-only by every task.

use super::error::{ConfigResult, ConfigurationError};
use super::{ApprovalStrategy, DeployConfig, InstallerKind, Platform};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Flag values that take precedence over configuration. `None` keeps the configured value.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub namespace: Option<String>,
    pub platform: Option<Platform>,
    pub installer: Option<InstallerKind>,
    pub templates_dir: Option<PathBuf>,
    pub operator_image: Option<String>,
    pub skip_cert_manager: Option<bool>,
    pub cluster_monitoring: Option<bool>,
    pub delete_all: Option<bool>,

    pub pod_wait_timeout_ms: Option<u64>,
    pub pod_ready_timeout_ms: Option<u64>,
    pub pod_download_image_timeout_ms: Option<u64>,
    pub pod_error_recheck_timeout_ms: Option<u64>,

    pub olm_channel: Option<String>,
    pub olm_starting_csv: Option<String>,
    pub olm_approval_strategy: Option<ApprovalStrategy>,
    pub olm_catalog_source_name: Option<String>,
    pub olm_catalog_source_namespace: Option<String>,
    pub olm_catalog_source_image: Option<String>,

    pub debug: Option<bool>,
    pub server_image: Option<String>,
    pub domain: Option<String>,
    pub postgres_storage_class: Option<String>,
    pub workspace_storage_class: Option<String>,
    pub plugin_registry_url: Option<String>,
    pub devfile_registry_url: Option<String>,
    pub cr_patch_file: Option<PathBuf>,
    pub custom_resource_file: Option<PathBuf>,
}

/// Immutable per-run settings snapshot
#[derive(Debug, Clone)]
pub struct DeploySettings {
    pub config: DeployConfig,
    /// Parsed patch document merged over the custom resource last
    pub cr_patch: Option<Value>,
    /// Parsed custom resource replacing the default template
    pub custom_resource: Option<Value>,
}

impl DeploySettings {
    /// Apply overrides, validate, and load the referenced YAML documents
    pub fn resolve(mut config: DeployConfig, overrides: SettingsOverrides) -> ConfigResult<Self> {
        apply(&mut config.deploy.namespace, overrides.namespace);
        apply(&mut config.deploy.platform, overrides.platform);
        apply(&mut config.deploy.installer, overrides.installer);
        apply(&mut config.deploy.templates_dir, overrides.templates_dir);
        apply_opt(&mut config.deploy.operator_image, overrides.operator_image);
        apply(&mut config.deploy.skip_cert_manager, overrides.skip_cert_manager);
        apply(&mut config.deploy.cluster_monitoring, overrides.cluster_monitoring);
        apply(&mut config.deploy.delete_all, overrides.delete_all);

        let timeouts = &mut config.timeouts;
        apply(&mut timeouts.pod_wait_timeout_ms, overrides.pod_wait_timeout_ms);
        apply(&mut timeouts.pod_ready_timeout_ms, overrides.pod_ready_timeout_ms);
        apply(
            &mut timeouts.pod_download_image_timeout_ms,
            overrides.pod_download_image_timeout_ms,
        );
        apply(
            &mut timeouts.pod_error_recheck_timeout_ms,
            overrides.pod_error_recheck_timeout_ms,
        );

        let olm = &mut config.olm;
        apply(&mut olm.channel, overrides.olm_channel);
        apply_opt(&mut olm.starting_csv, overrides.olm_starting_csv);
        apply(&mut olm.approval_strategy, overrides.olm_approval_strategy);
        apply(&mut olm.catalog_source_name, overrides.olm_catalog_source_name);
        apply(
            &mut olm.catalog_source_namespace,
            overrides.olm_catalog_source_namespace,
        );
        apply_opt(&mut olm.catalog_source_image, overrides.olm_catalog_source_image);

        let cr = &mut config.custom_resource;
        apply(&mut cr.debug, overrides.debug);
        apply_opt(&mut cr.server_image, overrides.server_image);
        apply_opt(&mut cr.domain, overrides.domain);
        apply_opt(&mut cr.postgres_storage_class, overrides.postgres_storage_class);
        apply_opt(&mut cr.workspace_storage_class, overrides.workspace_storage_class);
        apply_opt(&mut cr.plugin_registry_url, overrides.plugin_registry_url);
        apply_opt(&mut cr.devfile_registry_url, overrides.devfile_registry_url);
        apply_opt(&mut cr.patch_file, overrides.cr_patch_file);
        apply_opt(&mut cr.custom_resource_file, overrides.custom_resource_file);

        config.validate()?;

        let cr_patch = config
            .custom_resource
            .patch_file
            .as_deref()
            .map(read_yaml_document)
            .transpose()?;
        let custom_resource = config
            .custom_resource
            .custom_resource_file
            .as_deref()
            .map(read_yaml_document)
            .transpose()?;

        Ok(Self {
            config,
            cr_patch,
            custom_resource,
        })
    }

    /// Settings straight from a configuration, with no overrides or documents
    pub fn from_config(config: DeployConfig) -> ConfigResult<Self> {
        Self::resolve(config, SettingsOverrides::default())
    }

    pub fn namespace(&self) -> &str {
        &self.config.deploy.namespace
    }

    pub fn platform(&self) -> Platform {
        self.config.deploy.platform
    }

    pub fn is_openshift(&self) -> bool {
        self.config.deploy.platform.is_openshift()
    }

    /// Namespace OLM objects live in
    pub fn operator_namespace(&self) -> &str {
        match self.config.deploy.installer {
            InstallerKind::Olm => &self.config.olm.operator_namespace,
            InstallerKind::Operator => &self.config.deploy.namespace,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.config.timeouts.poll_interval()
    }

    /// True when the patch document is present and non-empty
    pub fn has_cr_patch(&self) -> bool {
        match &self.cr_patch {
            Some(Value::Object(map)) => !map.is_empty(),
            Some(Value::Null) | None => false,
            Some(_) => true,
        }
    }
}

fn apply<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

fn apply_opt<T>(target: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *target = value;
    }
}

fn read_yaml_document(path: &Path) -> ConfigResult<Value> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))?;
    serde_yaml::from_str(&content)
        .map_err(|e| ConfigurationError::invalid_yaml(path.display().to_string(), e))
}
