//! Tasks shared by both installers and by the command graphs.

use crate::client::{str_at, ResourceClient, ResourceKind};
use crate::constants::components::{
    DASHBOARD, DASHBOARD_DEPLOYMENT, DASHBOARD_SELECTOR, GATEWAY, GATEWAY_DEPLOYMENT, GATEWAY_SELECTOR,
    PLUGIN_REGISTRY, PLUGIN_REGISTRY_DEPLOYMENT, PLUGIN_REGISTRY_SELECTOR, SERVER, SERVER_DEPLOYMENT,
    SERVER_SELECTOR,
};
use crate::constants::{cert_manager, OPENSHIFT_OPERATORS_NAMESPACE, PART_OF_LABEL, PART_OF_VALUE, PRODUCT_NAME};
use crate::context::RunContext;
use crate::error::{DeployError, Result};
use crate::readiness::{
    pod_deleted_task, pod_start_tasks, scale_deployment_task, wait_custom_resource_active_task,
};
use crate::reconciler::custom_resource::find_custom_resource;
use crate::task::{tags, Task, TaskGraph, TaskOutcome};
use futures::FutureExt;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

const CUSTOM_RESOURCE_NOT_FOUND: &str = "custom resource not found";
const OUTPUT_SEPARATOR: &str =
    "-------------------------------------------------------------------------------";

/// `Verify Kubernetes API`, tagged with the server version
pub fn verify_kubernetes_api_task() -> Task {
    Task::from_fn("Verify Kubernetes API", |ctx, _| {
        async move {
            let version = ctx.client.server_version().await.map_err(|e| {
                DeployError::validation(format!("Failed to connect to Kubernetes API. {e}"))
            })?;
            ctx.state.infrastructure.kubernetes_version = Some(version.clone());
            if ctx.state.infrastructure.is_openshift.is_none() {
                ctx.state.infrastructure.is_openshift = Some(ctx.settings.is_openshift());
            }
            Ok(TaskOutcome::tagged(version))
        }
        .boxed()
    })
}

/// Poll until the namespace reports phase `Active`
pub async fn wait_namespace_active(ctx: &RunContext, namespace: &str) -> Result<()> {
    let interval = ctx.settings.poll_interval();
    let iterations = ctx.settings.config.timeouts.namespace_active().as_millis() / interval.as_millis();
    for _ in 0..iterations {
        let object = ctx.client.get(&ResourceKind::NAMESPACE, None, namespace).await?;
        if object.as_ref().and_then(|ns| str_at(ns, "/status/phase")) == Some("Active") {
            return Ok(());
        }
        ctx.shutdown.sleep(interval).await?;
    }
    Err(DeployError::poll_timeout(format!(
        "Namespace '{namespace}' is not in 'Active' phase."
    )))
}

/// `Create Namespace NS`: `Exists` or `Created`, then wait for `Active`
pub fn create_namespace_task(namespace: &str) -> Task {
    let namespace = namespace.to_string();
    Task::from_fn(format!("Create Namespace {namespace}"), move |ctx, _| {
        let namespace = namespace.clone();
        async move {
            let exists = ctx.client.exists(&ResourceKind::NAMESPACE, None, &namespace).await?;
            if !exists {
                let manifest = json!({
                    "apiVersion": "v1",
                    "kind": "Namespace",
                    "metadata": {
                        "name": namespace,
                        "labels": {PART_OF_LABEL: PART_OF_VALUE},
                    },
                });
                ctx.client.create(&ResourceKind::NAMESPACE, None, &manifest).await?;
            }
            wait_namespace_active(ctx, &namespace).await?;
            Ok(TaskOutcome::tagged(if exists { tags::EXISTS } else { tags::CREATED }))
        }
        .boxed()
    })
}

/// `Delete Namespace NS`; the shared operators namespace is never deleted
pub fn delete_namespace_task(namespace: &str) -> Task {
    let protected = namespace == OPENSHIFT_OPERATORS_NAMESPACE;
    let namespace = namespace.to_string();
    Task::from_fn(format!("Delete Namespace {namespace}"), move |ctx, _| {
        let namespace = namespace.clone();
        async move {
            ctx.client.delete(&ResourceKind::NAMESPACE, None, &namespace).await?;
            Ok(TaskOutcome::tagged(tags::DELETED))
        }
        .boxed()
    })
    .skip_if(move |_| {
        protected.then(|| format!("{OPENSHIFT_OPERATORS_NAMESPACE} namespace is protected and can not be deleted."))
    })
}

/// One object to remove
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteTarget {
    pub kind: ResourceKind,
    pub namespace: Option<String>,
    pub name: String,
}

impl DeleteTarget {
    pub fn new(kind: ResourceKind, namespace: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            namespace: kind.scope(namespace).map(str::to_string),
            kind,
            name: name.into(),
        }
    }

    /// Target addressed by a listed document
    pub fn of_object(kind: ResourceKind, object: &Value) -> Self {
        Self::new(
            kind,
            crate::client::object_namespace(object),
            crate::client::object_name(object),
        )
    }
}

/// Delete every target, recording failures instead of stopping at the first.
///
/// Tagged `Deleted` when all succeed, otherwise `Failed: MSG` per failure.
pub async fn delete_targets(client: &dyn ResourceClient, targets: &[DeleteTarget]) -> TaskOutcome {
    let mut failures = Vec::new();
    for target in targets {
        if let Err(e) = client
            .delete(&target.kind, target.namespace.as_deref(), &target.name)
            .await
        {
            warn!(kind = target.kind.kind, name = %target.name, error = %e, "Deletion failed");
            failures.push(format!("Failed: {e}"));
        } else {
            debug!(kind = target.kind.kind, name = %target.name, "Deleted");
        }
    }
    if failures.is_empty() {
        TaskOutcome::tagged(tags::DELETED)
    } else {
        TaskOutcome::tagged(failures.join("] ["))
    }
}

/// Deletion task over a fixed target list
pub fn delete_resources_task(title: impl Into<String>, targets: Vec<DeleteTarget>) -> Task {
    Task::from_fn(title, move |ctx, _| {
        let targets = targets.clone();
        async move { Ok(delete_targets(ctx.client.as_ref(), &targets).await) }.boxed()
    })
}

/// `Waiting`: a fixed, cancellable pause
pub fn wait_task(duration: Duration) -> Task {
    Task::from_fn("Waiting", move |ctx, _| {
        async move {
            ctx.shutdown.sleep(duration).await?;
            Ok(TaskOutcome::tagged(tags::DONE))
        }
        .boxed()
    })
}

/// `Wait for cert-manager`: controller, webhook and cainjector start in parallel
pub fn cert_manager_wait_task() -> Task {
    Task::group("Wait for cert-manager", |_| {
        Ok(TaskGraph::parallel(vec![
            pod_start_tasks("cert-manager", cert_manager::CONTROLLER_SELECTOR, cert_manager::NAMESPACE),
            pod_start_tasks("cert-manager webhook", cert_manager::WEBHOOK_SELECTOR, cert_manager::NAMESPACE),
            pod_start_tasks(
                "cert-manager cainjector",
                cert_manager::CAINJECTOR_SELECTOR,
                cert_manager::NAMESPACE,
            ),
        ]))
    })
}

fn plugin_registry_enabled(resource: Option<&Value>) -> bool {
    let disabled = resource
        .and_then(|cr| cr.pointer("/spec/components/pluginRegistry/disableInternalRegistry"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    !disabled
}

/// `Wait for Eclipse Che ready`: component pods, then the custom resource
pub fn wait_application_ready_task() -> Task {
    Task::from_fn(format!("Wait for {PRODUCT_NAME} ready"), |ctx, _| {
        async move {
            let namespace = ctx.namespace().to_string();
            let Some(resource) = find_custom_resource(ctx.client.as_ref(), &namespace).await? else {
                return Ok(TaskOutcome::skip(CUSTOM_RESOURCE_NOT_FOUND));
            };
            let mut graph = TaskGraph::default();
            if plugin_registry_enabled(Some(&resource)) {
                graph.push(pod_start_tasks(PLUGIN_REGISTRY, PLUGIN_REGISTRY_SELECTOR, &namespace));
            }
            graph.extend([
                pod_start_tasks(DASHBOARD, DASHBOARD_SELECTOR, &namespace),
                pod_start_tasks(GATEWAY, GATEWAY_SELECTOR, &namespace),
                pod_start_tasks(SERVER, SERVER_SELECTOR, &namespace),
                wait_custom_resource_active_task(),
            ]);
            Ok(TaskOutcome::Continue(graph))
        }
        .boxed()
    })
}

/// `Wait all pods deleted`
pub fn wait_pods_deleted_task() -> Task {
    Task::from_fn("Wait all pods deleted", |ctx, _| {
        async move {
            let namespace = ctx.namespace().to_string();
            let resource = find_custom_resource(ctx.client.as_ref(), &namespace).await?;
            let mut graph = TaskGraph::sequential(vec![
                pod_deleted_task(GATEWAY, GATEWAY_SELECTOR, &namespace),
                pod_deleted_task(DASHBOARD, DASHBOARD_SELECTOR, &namespace),
                pod_deleted_task(SERVER, SERVER_SELECTOR, &namespace),
            ]);
            if plugin_registry_enabled(resource.as_ref()) {
                graph.push(pod_deleted_task(PLUGIN_REGISTRY, PLUGIN_REGISTRY_SELECTOR, &namespace));
            }
            Ok(TaskOutcome::Continue(graph))
        }
        .boxed()
    })
}

/// `Scale Eclipse Che down`
pub fn scale_down_task() -> Task {
    Task::from_fn(format!("Scale {PRODUCT_NAME} down"), |ctx, _| {
        async move {
            let namespace = ctx.namespace().to_string();
            let resource = find_custom_resource(ctx.client.as_ref(), &namespace).await?;
            let mut graph = TaskGraph::sequential(vec![
                scale_deployment_task(GATEWAY, GATEWAY_DEPLOYMENT, 0, &namespace),
                scale_deployment_task(DASHBOARD, DASHBOARD_DEPLOYMENT, 0, &namespace),
                scale_deployment_task(SERVER, SERVER_DEPLOYMENT, 0, &namespace),
            ]);
            if plugin_registry_enabled(resource.as_ref()) {
                graph.push(scale_deployment_task(
                    PLUGIN_REGISTRY,
                    PLUGIN_REGISTRY_DEPLOYMENT,
                    0,
                    &namespace,
                ));
            }
            Ok(TaskOutcome::Continue(graph))
        }
        .boxed()
    })
}

/// `Scale Eclipse Che up`: each component is scaled and then waited for
pub fn scale_up_task() -> Task {
    Task::from_fn(format!("Scale {PRODUCT_NAME} up"), |ctx, _| {
        async move {
            let namespace = ctx.namespace().to_string();
            let Some(resource) = find_custom_resource(ctx.client.as_ref(), &namespace).await? else {
                return Ok(TaskOutcome::skip(CUSTOM_RESOURCE_NOT_FOUND));
            };
            let mut components = Vec::new();
            if plugin_registry_enabled(Some(&resource)) {
                components.push((PLUGIN_REGISTRY, PLUGIN_REGISTRY_DEPLOYMENT, PLUGIN_REGISTRY_SELECTOR));
            }
            components.extend([
                (DASHBOARD, DASHBOARD_DEPLOYMENT, DASHBOARD_SELECTOR),
                (GATEWAY, GATEWAY_DEPLOYMENT, GATEWAY_SELECTOR),
                (SERVER, SERVER_DEPLOYMENT, SERVER_SELECTOR),
            ]);
            let mut graph = TaskGraph::default();
            for (component, deployment, selector) in components {
                graph.push(scale_deployment_task(component, deployment, 1, &namespace));
                graph.push(pod_start_tasks(component, selector, &namespace));
            }
            Ok(TaskOutcome::Continue(graph))
        }
        .boxed()
    })
}

/// `Prepare post installation output`: version and dashboard URL go first
pub fn post_install_output_task() -> Task {
    Task::from_fn("Prepare post installation output", |ctx, _| {
        async move {
            let namespace = ctx.namespace().to_string();
            let resource = find_custom_resource(ctx.client.as_ref(), &namespace).await?;
            let mut messages = Vec::new();
            if let Some(resource) = &resource {
                let version = str_at(resource, "/status/cheVersion").unwrap_or("unknown");
                messages.push(format!("{PRODUCT_NAME} {} has been successfully deployed.", version.trim()));
                messages.push(OUTPUT_SEPARATOR.to_string());
                if let Some(url) = str_at(resource, "/status/cheURL") {
                    messages.push(format!(
                        "Users Dashboard           : {}/dashboard/",
                        url.trim_end_matches('/')
                    ));
                    messages.push(OUTPUT_SEPARATOR.to_string());
                }
            }
            messages.append(&mut ctx.state.post_output_messages);
            ctx.state.post_output_messages = messages;
            Ok(TaskOutcome::tagged(tags::DONE))
        }
        .boxed()
    })
}
