//! # Commands
//!
//! Top-level task graphs for `deploy`, `update` and `delete`. Each graph is
//! a flat sequence; installer steps expand beneath their own group task.

use crate::config::DeploySettings;
use crate::installers::common::{
    create_namespace_task, delete_namespace_task, post_install_output_task, verify_kubernetes_api_task,
    wait_application_ready_task, wait_pods_deleted_task,
};
use crate::installers::{installer_for, Templates};
use crate::task::TaskGraph;
use tracing::debug;

/// Verify the API, create the namespace, install, wait for readiness and
/// prepare the summary.
pub fn deploy_graph(settings: &DeploySettings, templates: &Templates) -> TaskGraph {
    let installer = installer_for(settings.config.deploy.installer, templates.clone());
    debug!(installer = %settings.config.deploy.installer, namespace = settings.namespace(), "Building deploy graph");
    TaskGraph::sequential(vec![
        verify_kubernetes_api_task(),
        create_namespace_task(settings.namespace()),
        installer.deploy_tasks(),
        wait_application_ready_task(),
        post_install_output_task(),
    ])
}

/// Pre-update checks, the installer update, then readiness
pub fn update_graph(settings: &DeploySettings, templates: &Templates) -> TaskGraph {
    let installer = installer_for(settings.config.deploy.installer, templates.clone());
    debug!(installer = %settings.config.deploy.installer, namespace = settings.namespace(), "Building update graph");
    TaskGraph::sequential(vec![
        verify_kubernetes_api_task(),
        installer.pre_update_tasks(),
        installer.update_tasks(),
        wait_application_ready_task(),
    ])
}

/// Installer removal, pod drain, then the namespace itself
pub fn delete_graph(settings: &DeploySettings, templates: &Templates) -> TaskGraph {
    let installer = installer_for(settings.config.deploy.installer, templates.clone());
    debug!(installer = %settings.config.deploy.installer, namespace = settings.namespace(), "Building delete graph");
    TaskGraph::sequential(vec![
        verify_kubernetes_api_task(),
        installer.delete_tasks(),
        wait_pods_deleted_task(),
        delete_namespace_task(settings.namespace()),
    ])
}
