//! Manifest templates read from the templates directory.
//!
//! Layout, relative to the configured root:
//!
//! ```text
//! kubernetes/                 operator manifests, RBAC documents by kind
//! kubernetes/crds/            custom resource definition and default custom resource
//! resources/                  monitoring RBAC
//! ```

use crate::error::{DeployError, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

const MAX_TEMPLATE_SIZE: u64 = 8 * 1024 * 1024;

pub const SERVICE_ACCOUNT: &str = "kubernetes/service_account.yaml";
pub const OPERATOR_DEPLOYMENT: &str = "kubernetes/operator.yaml";
pub const SERVING_CERT: &str = "kubernetes/serving-cert.yaml";
pub const SELFSIGNED_ISSUER: &str = "kubernetes/selfsigned-issuer.yaml";
pub const WEBHOOK_SERVICE: &str = "kubernetes/webhook-service.yaml";
pub const VALIDATING_WEBHOOK: &str = "kubernetes/org.eclipse.che.ValidatingWebhookConfiguration.yaml";
pub const MUTATING_WEBHOOK: &str = "kubernetes/org.eclipse.che.MutatingWebhookConfiguration.yaml";
pub const CRD: &str = "kubernetes/crds/org.eclipse.che_checlusters.yaml";
pub const DEFAULT_CUSTOM_RESOURCE: &str = "kubernetes/crds/org_checluster_cr.yaml";
pub const PROMETHEUS_ROLE: &str = "resources/prometheus-role.yaml";
pub const PROMETHEUS_ROLE_BINDING: &str = "resources/prometheus-role-binding.yaml";

const RBAC_DIR: &str = "kubernetes";

/// RBAC documents found in the templates directory, grouped by kind
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RbacTemplates {
    pub roles: Vec<Value>,
    pub role_bindings: Vec<Value>,
    pub cluster_roles: Vec<Value>,
    pub cluster_role_bindings: Vec<Value>,
}

impl RbacTemplates {
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
            && self.role_bindings.is_empty()
            && self.cluster_roles.is_empty()
            && self.cluster_role_bindings.is_empty()
    }
}

/// Read-only view of a templates directory
#[derive(Debug, Clone)]
pub struct Templates {
    root: PathBuf,
}

impl Templates {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Parse a template; a missing file reads as `None`
    pub fn load(&self, relative: &str) -> Result<Option<Value>> {
        let path = self.root.join(relative);
        if !path.exists() {
            debug!(template = %path.display(), "Template not present");
            return Ok(None);
        }
        parse_file(&path).map(Some)
    }

    /// Parse a template that must exist
    pub fn require(&self, relative: &str) -> Result<Value> {
        self.load(relative)?.ok_or_else(|| {
            DeployError::template(self.root.join(relative).display().to_string(), "file not found")
        })
    }

    /// Every Role, RoleBinding, ClusterRole and ClusterRoleBinding document
    /// directly under `kubernetes/`, in file name order
    pub fn rbac(&self) -> Result<RbacTemplates> {
        let dir = self.root.join(RBAC_DIR);
        let mut resources = RbacTemplates::default();
        if !dir.is_dir() {
            return Ok(resources);
        }

        let entries = std::fs::read_dir(&dir)
            .map_err(|e| DeployError::template(dir.display().to_string(), e.to_string()))?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "yaml"))
            .collect();
        files.sort();

        for path in files {
            let document = parse_file(&path)?;
            match document.get("kind").and_then(Value::as_str) {
                Some("Role") => resources.roles.push(document),
                Some("RoleBinding") => resources.role_bindings.push(document),
                Some("ClusterRole") => resources.cluster_roles.push(document),
                Some("ClusterRoleBinding") => resources.cluster_role_bindings.push(document),
                _ => {}
            }
        }

        if resources.roles.len() != resources.role_bindings.len() {
            tracing::warn!("Number of Roles and Role Bindings is different");
        }
        if resources.cluster_roles.len() != resources.cluster_role_bindings.len() {
            tracing::warn!("Number of Cluster Roles and Cluster Role Bindings is different");
        }
        Ok(resources)
    }
}

fn parse_file(path: &Path) -> Result<Value> {
    let display = path.display().to_string();
    let metadata =
        std::fs::metadata(path).map_err(|e| DeployError::template(display.clone(), e.to_string()))?;
    if !metadata.is_file() {
        return Err(DeployError::template(display, "not a regular file"));
    }
    if metadata.len() > MAX_TEMPLATE_SIZE {
        return Err(DeployError::template(
            display,
            format!("template too large ({} bytes > {MAX_TEMPLATE_SIZE} bytes limit)", metadata.len()),
        ));
    }
    let content =
        std::fs::read_to_string(path).map_err(|e| DeployError::template(display.clone(), e.to_string()))?;
    serde_yaml::from_str(&content).map_err(|e| DeployError::template(display, e.to_string()))
}
