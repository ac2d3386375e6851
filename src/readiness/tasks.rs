//! Task factories over the readiness primitives.

use super::poller::{PodReadinessPoller, ReadinessBudgets, ReadinessPhase};
use super::probe::CustomResourceFailState;
use crate::client::{str_at, ResourceKind, ResourcePatch};
use crate::constants::components::PLUGIN_REGISTRY;
use crate::constants::PRODUCT_NAME;
use crate::context::RunContext;
use crate::error::{ClientError, DeployError, Result};
use crate::reconciler::custom_resource::find_custom_resource;
use crate::task::{tags, Task, TaskGraph, TaskOutcome};
use futures::FutureExt;
use k8s_openapi::api::apps::v1::Deployment;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const ACTIVE_CHECKS: u32 = 300;
const ACTIVE_CHECK_INTERVAL: Duration = Duration::from_secs(1);

fn poller(ctx: &RunContext, namespace: &str, selector: &str, component: &str) -> PodReadinessPoller {
    let timeouts = &ctx.settings.config.timeouts;
    let mut budgets = ReadinessBudgets::from_timeouts(timeouts);
    if component == PLUGIN_REGISTRY {
        budgets = budgets.with_starting(timeouts.pod_ready_embedded_plugin_registry());
    }
    let owner = CustomResourceFailState::new(Arc::clone(&ctx.client), namespace);
    PodReadinessPoller::new(
        Arc::clone(&ctx.client),
        ctx.shutdown.clone(),
        namespace,
        selector,
        budgets,
    )
    .with_interval(ctx.settings.poll_interval())
    .with_owner(Arc::new(owner))
}

fn phase_task(phase: ReadinessPhase, component: &str, namespace: &str, selector: &str) -> Task {
    let component = component.to_string();
    let namespace = namespace.to_string();
    let selector = selector.to_string();
    Task::from_fn(phase.to_string(), move |ctx, _| {
        let readiness = poller(ctx, &namespace, &selector, &component);
        async move {
            match phase {
                ReadinessPhase::Scheduling => readiness.wait_scheduled().await?,
                ReadinessPhase::Downloading => readiness.wait_images_pulled().await?,
                _ => readiness.wait_started().await?,
            }
            Ok(TaskOutcome::tagged(tags::DONE))
        }
        .boxed()
    })
}

/// `{component} pod bootstrap`: Scheduling, Downloading images, Starting
pub fn pod_start_tasks(component: &str, selector: &str, namespace: &str) -> Task {
    let phases = [
        ReadinessPhase::Scheduling,
        ReadinessPhase::Downloading,
        ReadinessPhase::Starting,
    ];
    let component = component.to_string();
    let selector = selector.to_string();
    let namespace = namespace.to_string();
    Task::from_fn(format!("{component} pod bootstrap"), move |_, _| {
        let graph = TaskGraph::sequential(
            phases
                .iter()
                .map(|phase| phase_task(*phase, &component, &namespace, &selector))
                .collect(),
        );
        async move { Ok(TaskOutcome::Continue(graph)) }.boxed()
    })
}

/// `Checking if deployment NAME exists`
pub fn deployment_existence_task(deployment: &str, namespace: &str) -> Task {
    let deployment = deployment.to_string();
    let namespace = namespace.to_string();
    Task::from_fn(format!("Checking if deployment {deployment} exists"), move |ctx, _| {
        let deployment = deployment.clone();
        let namespace = namespace.clone();
        async move {
            let exists = ctx
                .client
                .exists(&ResourceKind::DEPLOYMENT, Some(&namespace), &deployment)
                .await?;
            if !exists {
                return Err(DeployError::validation(format!("Deployment {deployment} not found.")));
            }
            Ok(TaskOutcome::tagged("Found"))
        }
        .boxed()
    })
}

/// Poll until the deployment reports no unavailable replicas
pub async fn wait_latest_replica(ctx: &RunContext, deployment: &str, namespace: &str) -> Result<()> {
    let budget = ctx.settings.config.timeouts.pod_wait();
    let interval = ctx.settings.poll_interval();
    let iterations = budget.as_millis() / interval.as_millis();
    for _ in 0..iterations {
        let Some(object) = ctx
            .client
            .get(&ResourceKind::DEPLOYMENT, Some(namespace), deployment)
            .await?
        else {
            return Err(DeployError::validation(format!(
                "Deployment {namespace}/{deployment} is not found."
            )));
        };
        let typed: Deployment = serde_json::from_value(object).map_err(ClientError::from)?;
        let Some(status) = typed.status else {
            return Err(DeployError::validation(format!(
                "Deployment {namespace}/{deployment} does not have any status"
            )));
        };
        if status.unavailable_replicas.unwrap_or_default() <= 0 {
            return Ok(());
        }
        debug!(
            deployment = %deployment,
            unavailable = status.unavailable_replicas,
            "Waiting for latest replica"
        );
        ctx.shutdown.sleep(interval).await?;
    }
    Err(DeployError::poll_timeout(format!(
        "ERR_TIMEOUT: Timeout set to pod wait timeout {}",
        budget.as_millis()
    )))
}

/// `Wait for NAME latest replica`
pub fn wait_latest_replica_task(deployment: &str, namespace: &str) -> Task {
    let deployment = deployment.to_string();
    let namespace = namespace.to_string();
    Task::from_fn(format!("Wait for {deployment} latest replica"), move |ctx, _| {
        let deployment = deployment.clone();
        let namespace = namespace.clone();
        async move {
            // Give the controller a moment to observe the new template
            ctx.shutdown.sleep(Duration::from_secs(1)).await?;
            wait_latest_replica(ctx, &deployment, &namespace).await?;
            Ok(TaskOutcome::tagged(tags::DONE))
        }
        .boxed()
    })
}

/// `Scale NAME Up|Down`
pub fn scale_deployment_task(component: &str, deployment: &str, replicas: i32, namespace: &str) -> Task {
    let direction = if replicas > 0 { "Up" } else { "Down" };
    let deployment = deployment.to_string();
    let namespace = namespace.to_string();
    Task::from_fn(format!("Scale {component} {direction}"), move |ctx, _| {
        let deployment = deployment.clone();
        let namespace = namespace.clone();
        async move {
            ctx.client
                .patch(
                    &ResourceKind::DEPLOYMENT,
                    Some(&namespace),
                    &deployment,
                    &ResourcePatch::Merge(json!({"spec": {"replicas": replicas}})),
                )
                .await?;
            Ok(TaskOutcome::tagged(tags::DONE))
        }
        .boxed()
    })
}

/// Poll until no pod matches `selector`
pub async fn wait_pods_deleted(ctx: &RunContext, selector: &str, namespace: &str) -> Result<()> {
    let interval = ctx.settings.poll_interval();
    let iterations = ctx.settings.config.timeouts.pod_ready().as_millis() / interval.as_millis();
    for _ in 0..iterations {
        let pods = ctx
            .client
            .list(&ResourceKind::POD, Some(namespace), Some(selector))
            .await?;
        if pods.is_empty() {
            return Ok(());
        }
        ctx.shutdown.sleep(interval).await?;
    }
    Err(DeployError::poll_timeout(
        "ERR_TIMEOUT: Waiting until pod is deleted took too long.",
    ))
}

/// `NAME pod`, tagged `Deleted` once no pod matches
pub fn pod_deleted_task(component: &str, selector: &str, namespace: &str) -> Task {
    let selector = selector.to_string();
    let namespace = namespace.to_string();
    Task::from_fn(format!("{component} pod"), move |ctx, _| {
        let selector = selector.clone();
        let namespace = namespace.clone();
        async move {
            wait_pods_deleted(ctx, &selector, &namespace).await?;
            Ok(TaskOutcome::tagged(tags::DELETED))
        }
        .boxed()
    })
}

/// `Wait Eclipse Che active`: the custom resource reports phase `Active` and a version
pub fn wait_custom_resource_active_task() -> Task {
    Task::from_fn(format!("Wait {PRODUCT_NAME} active"), |ctx, _| {
        async move {
            let namespace = ctx.namespace().to_string();
            for _ in 0..ACTIVE_CHECKS {
                let resource = find_custom_resource(ctx.client.as_ref(), &namespace).await?;
                let active = resource.as_ref().is_some_and(|resource| {
                    str_at(resource, "/status/chePhase") == Some("Active")
                        && str_at(resource, "/status/cheVersion").is_some()
                });
                if active {
                    return Ok(TaskOutcome::tagged(tags::DONE));
                }
                ctx.shutdown.sleep(ACTIVE_CHECK_INTERVAL).await?;
            }
            Err(DeployError::poll_timeout(format!("{PRODUCT_NAME} is not Active.")))
        }
        .boxed()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InMemoryResourceClient;
    use crate::config::{DeployConfig, DeploySettings};
    use crate::shutdown::ShutdownSignal;

    fn context(client: Arc<InMemoryResourceClient>) -> RunContext {
        let settings = DeploySettings::from_config(DeployConfig::default()).unwrap();
        RunContext::new(Arc::new(settings), client, ShutdownSignal::never())
    }

    #[tokio::test(start_paused = true)]
    async fn test_latest_replica_waits_for_unavailable_to_clear() {
        let client = Arc::new(InMemoryResourceClient::new());
        client.upsert(
            &ResourceKind::DEPLOYMENT,
            Some("che"),
            json!({"metadata": {"name": "che-operator"}, "status": {"unavailableReplicas": 1}}),
        );
        let ctx = context(client.clone());

        let writer = client.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            writer.set_status(
                &ResourceKind::DEPLOYMENT,
                Some("che"),
                "che-operator",
                json!({"replicas": 1, "availableReplicas": 1}),
            );
        });

        wait_latest_replica(&ctx, "che-operator", "che").await.unwrap();
    }

    #[tokio::test]
    async fn test_latest_replica_requires_status() {
        let client = Arc::new(InMemoryResourceClient::new());
        client.upsert(
            &ResourceKind::DEPLOYMENT,
            Some("che"),
            json!({"metadata": {"name": "che-operator"}}),
        );
        let ctx = context(client);

        let err = wait_latest_replica(&ctx, "che-operator", "che").await.unwrap_err();
        assert_eq!(err.to_string(), "Deployment che/che-operator does not have any status");
        let err = wait_latest_replica(&ctx, "missing", "che").await.unwrap_err();
        assert_eq!(err.to_string(), "Deployment che/missing is not found.");
    }

    #[tokio::test(start_paused = true)]
    async fn test_pod_deleted_wait_times_out() {
        let client = Arc::new(InMemoryResourceClient::new());
        client.upsert(
            &ResourceKind::POD,
            Some("che"),
            json!({"metadata": {"name": "che-1", "labels": {"app": "che"}}}),
        );
        let ctx = context(client);
        let err = wait_pods_deleted(&ctx, "app=che", "che").await.unwrap_err();
        assert_eq!(err.to_string(), "ERR_TIMEOUT: Waiting until pod is deleted took too long.");
    }
}
