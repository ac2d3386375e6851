//! Operator Lifecycle Manager installer.

use super::cleanup::{delete_cluster_scope_objects_task, delete_custom_resources_task, delete_rbac_task};
use super::templates::{Templates, DEFAULT_CUSTOM_RESOURCE};
use super::Installer;
use crate::constants::PRODUCT_NAME;
use crate::olm::{
    approve_install_plan_task, catalog_source_task, check_approval_strategy_task, create_subscription_task,
    delete_operators_task, delete_subscription_task, fetch_custom_resource_sample_task, prometheus_rbac_task,
    set_custom_operator_image_task,
};
use crate::reconciler::custom_resource::{create_custom_resource_task, patch_custom_resource_task};
use crate::task::{Task, TaskGraph};

/// Installer subscribing to the operator package
#[derive(Debug, Clone)]
pub struct OlmInstaller {
    templates: Templates,
}

impl OlmInstaller {
    pub fn new(templates: Templates) -> Self {
        Self { templates }
    }
}

impl Installer for OlmInstaller {
    fn deploy_tasks(&self) -> Task {
        let templates = self.templates.clone();
        Task::group(format!("Deploy {PRODUCT_NAME} operator"), move |ctx| {
            let olm = &ctx.settings.config.olm;
            // The CSV sample wins over the bundled default custom resource
            let fallback = templates.load(DEFAULT_CUSTOM_RESOURCE)?;
            Ok(TaskGraph::sequential(vec![
                catalog_source_task(&olm.catalog_source_name, &olm.catalog_source_namespace),
                create_subscription_task(&olm.subscription_name),
                prometheus_rbac_task(templates.clone()),
                set_custom_operator_image_task(),
                fetch_custom_resource_sample_task(&olm.subscription_name),
                create_custom_resource_task(fallback),
            ]))
        })
    }

    fn pre_update_tasks(&self) -> Task {
        Task::group(format!("{PRODUCT_NAME} operator pre-update check"), |ctx| {
            Ok(TaskGraph::sequential(vec![check_approval_strategy_task(
                &ctx.settings.config.olm.subscription_name,
            )]))
        })
    }

    fn update_tasks(&self) -> Task {
        Task::group(format!("Update {PRODUCT_NAME} operator"), |ctx| {
            Ok(TaskGraph::sequential(vec![
                approve_install_plan_task(&ctx.settings.config.olm.subscription_name),
                patch_custom_resource_task(),
            ]))
        })
    }

    fn delete_tasks(&self) -> Task {
        Task::group(format!("Uninstall {PRODUCT_NAME} operator"), |ctx| {
            let mut graph = TaskGraph::default();
            if ctx.settings.config.deploy.delete_all {
                graph.push(delete_operators_task());
            }
            graph.extend([
                delete_cluster_scope_objects_task(),
                delete_custom_resources_task(),
                delete_rbac_task(),
                delete_subscription_task(&ctx.settings.config.olm.package_name),
            ]);
            Ok(graph)
        })
    }
}
