//! Task factories over [`InstallWorkflow`] and the package-manager objects.

use super::types::{from_document, ClusterServiceVersion, Subscription};
use super::workflow::{InstallWorkflow, SubscriptionAction, WorkflowTimeouts};
use crate::client::{object_name, wait_for_object, ResourceKind, WaitDecision};
use crate::constants::olm::{ALM_EXAMPLES_ANNOTATION, AUXILIARY_PACKAGE, CATALOG_SOURCE_POLL_INTERVAL, CSV_PREFIX};
use crate::constants::resources::{CUSTOM_RESOURCE_KIND, PROMETHEUS};
use crate::constants::{PART_OF_LABEL, PART_OF_SELECTOR, PART_OF_VALUE, PRODUCT_NAME};
use crate::context::RunContext;
use crate::error::{DeployError, Result};
use crate::installers::common::{delete_resources_task, DeleteTarget};
use crate::installers::templates::{Templates, PROMETHEUS_ROLE, PROMETHEUS_ROLE_BINDING};
use crate::reconciler::{reconcile, ManifestOps};
use crate::task::{tags, Task, TaskGraph, TaskOutcome};
use futures::FutureExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

const OPERATOR_IMAGE_POINTER: &str = "/spec/install/spec/deployments/0/spec/template/spec/containers/0/image";

fn workflow(ctx: &RunContext) -> InstallWorkflow {
    InstallWorkflow::new(
        Arc::clone(&ctx.client),
        ctx.shutdown.clone(),
        ctx.settings.operator_namespace(),
        WorkflowTimeouts::from_timeouts(&ctx.settings.config.timeouts),
    )
}

/// `Create CatalogSource NAME`, only when a catalog image is configured
pub fn catalog_source_task(name: &str, namespace: &str) -> Task {
    let name = name.to_string();
    let namespace = namespace.to_string();
    Task::from_fn(format!("Create CatalogSource {name}"), move |ctx, _| {
        let name = name.clone();
        let namespace = namespace.clone();
        async move {
            let kind = ResourceKind::CATALOG_SOURCE;
            if ctx.client.exists(&kind, Some(&namespace), &name).await? {
                return Ok(TaskOutcome::tagged(tags::EXISTS));
            }
            let image = ctx
                .settings
                .config
                .olm
                .catalog_source_image
                .clone()
                .ok_or_else(|| DeployError::validation("Catalog source image is not set."))?;
            let catalog_source = json!({
                "apiVersion": kind.api_version(),
                "kind": kind.kind,
                "metadata": {
                    "name": name,
                    "labels": {PART_OF_LABEL: PART_OF_VALUE},
                },
                "spec": {
                    "image": image,
                    "sourceType": "grpc",
                    "updateStrategy": {"registryPoll": {"interval": CATALOG_SOURCE_POLL_INTERVAL}},
                },
            });
            ctx.client.create(&kind, Some(&namespace), &catalog_source).await?;
            wait_for_object(
                ctx.client.as_ref(),
                &kind,
                Some(&namespace),
                &name,
                ctx.settings.config.timeouts.catalog_source(),
                &ctx.shutdown,
                format!("Timeout reached while waiting for \"{name}\" catalog source is created."),
                |_| WaitDecision::Resolve(()),
            )
            .await?;
            Ok(TaskOutcome::tagged(tags::CREATED))
        }
        .boxed()
    })
    .enabled_if(|ctx| ctx.settings.config.olm.catalog_source_image.is_some())
}

/// `Create Subscription NAME`: subscribe, approve the first install plan,
/// wait for the CSV to settle
pub fn create_subscription_task(name: &str) -> Task {
    let name = name.to_string();
    Task::from_fn(format!("Create Subscription {name}"), move |ctx, _| {
        let name = name.clone();
        async move {
            let olm = ctx.settings.config.olm.clone();
            let action = workflow(ctx).install(&name, &olm).await?;
            Ok(TaskOutcome::tagged(match action {
                SubscriptionAction::Existing => tags::EXISTS,
                SubscriptionAction::Created => tags::CREATED,
            }))
        }
        .boxed()
    })
}

/// `Create prometheus-k8s RBAC`, enabled by cluster monitoring
pub fn prometheus_rbac_task(templates: Templates) -> Task {
    Task::group(format!("Create {PROMETHEUS} RBAC"), move |ctx| {
        let namespace = ctx.namespace();
        let role = templates.require(PROMETHEUS_ROLE)?;
        let binding = templates.require(PROMETHEUS_ROLE_BINDING)?;
        Ok(TaskGraph::sequential(vec![
            reconcile(true, "Role", PROMETHEUS, ManifestOps::new(ResourceKind::ROLE, namespace, role)),
            reconcile(
                true,
                "RoleBinding",
                PROMETHEUS,
                ManifestOps::new(ResourceKind::ROLE_BINDING, namespace, binding),
            ),
        ]))
    })
    .enabled_if(|ctx| ctx.settings.config.deploy.cluster_monitoring)
}

async fn product_csvs(ctx: &RunContext) -> Result<Vec<Value>> {
    let csvs = ctx
        .client
        .list(
            &ResourceKind::CLUSTER_SERVICE_VERSION,
            Some(ctx.settings.operator_namespace()),
            None,
        )
        .await?;
    Ok(csvs
        .into_iter()
        .filter(|csv| object_name(csv).starts_with(CSV_PREFIX))
        .collect())
}

/// `Set custom operator image`: rewrite the operator container image in the CSV
pub fn set_custom_operator_image_task() -> Task {
    Task::from_fn("Set custom operator image", |ctx, _| {
        async move {
            let Some(image) = ctx.settings.config.deploy.operator_image.clone() else {
                return Ok(TaskOutcome::skip("No custom operator image"));
            };
            let csvs = product_csvs(ctx).await?;
            let [csv] = csvs.as_slice() else {
                return Err(DeployError::workflow(format!("{PRODUCT_NAME} operator CSV not found.")));
            };
            let name = object_name(csv).to_string();
            let namespace = ctx.settings.operator_namespace().to_string();
            let kind = ResourceKind::CLUSTER_SERVICE_VERSION;

            let Some(mut live) = ctx.client.get(&kind, Some(&namespace), &name).await? else {
                return Err(DeployError::workflow(format!("{PRODUCT_NAME} operator CSV not found.")));
            };
            let Some(target) = live.pointer_mut(OPERATOR_IMAGE_POINTER) else {
                return Err(DeployError::workflow(format!(
                    "Cluster service version '{name}' does not declare an operator container."
                )));
            };
            *target = Value::String(image.clone());
            ctx.client.replace(&kind, Some(&namespace), &name, &live).await?;
            info!(csv = %name, image = %image, "Operator image replaced");
            Ok(TaskOutcome::tagged(tags::DONE))
        }
        .boxed()
    })
    .enabled_if(|ctx| ctx.settings.config.deploy.operator_image.is_some())
}

/// Pick the custom resource example out of a CSV's `alm-examples` annotation
pub fn custom_resource_sample(csv: &ClusterServiceVersion) -> Option<Value> {
    let raw = csv.annotation(ALM_EXAMPLES_ANNOTATION)?;
    let examples: Vec<Value> = serde_yaml::from_str(raw).ok()?;
    let api_version = ResourceKind::CHE_CLUSTER.api_version();
    examples.into_iter().find(|example| {
        example.get("kind").and_then(Value::as_str) == Some(CUSTOM_RESOURCE_KIND)
            && example.get("apiVersion").and_then(Value::as_str) == Some(api_version.as_str())
    })
}

/// `Fetch CheCluster sample from a CSV`, unless a custom resource file was given
pub fn fetch_custom_resource_sample_task(subscription: &str) -> Task {
    let subscription = subscription.to_string();
    Task::from_fn(format!("Fetch {CUSTOM_RESOURCE_KIND} sample from a CSV"), move |ctx, _| {
        let subscription = subscription.clone();
        async move {
            let workflow = workflow(ctx);
            let Some(found) = workflow.subscription(&subscription).await? else {
                return Err(DeployError::workflow(format!("Subscription {subscription} not found.")));
            };
            let installed = found
                .status
                .as_ref()
                .and_then(|status| status.installed_csv())
                .map(str::to_string);
            let csv = match installed {
                Some(name) => workflow.cluster_service_version(&name).await?,
                None => None,
            };
            let Some(sample) = csv.as_ref().and_then(custom_resource_sample) else {
                return Err(DeployError::workflow(format!(
                    "Unable to fetch {CUSTOM_RESOURCE_KIND} CR sample"
                )));
            };
            ctx.state.custom_resource_sample = Some(sample);
            Ok(TaskOutcome::tagged(tags::DONE))
        }
        .boxed()
    })
    .enabled_if(|ctx| ctx.settings.custom_resource.is_none())
}

/// `Approve InstallPlan for NAME`
pub fn approve_install_plan_task(subscription: &str) -> Task {
    let subscription = subscription.to_string();
    Task::from_fn(format!("Approve InstallPlan for {subscription}"), move |ctx, _| {
        let subscription = subscription.clone();
        async move {
            let outcome = workflow(ctx).approve_upgrade(&subscription).await?;
            if let Some(message) = outcome.post_output_message() {
                ctx.state.push_message(message);
            }
            Ok(TaskOutcome::tagged(outcome.tag()))
        }
        .boxed()
    })
}

/// `Check InstallPlan approval strategy`
pub fn check_approval_strategy_task(subscription: &str) -> Task {
    let subscription = subscription.to_string();
    Task::from_fn("Check InstallPlan approval strategy", move |ctx, _| {
        let subscription = subscription.clone();
        async move {
            let strategy = workflow(ctx).check_manual_approval(&subscription).await?;
            Ok(TaskOutcome::tagged(strategy.to_string()))
        }
        .boxed()
    })
}

/// `Delete Subscription ...`: the subscription of `package`, its catalog
/// source when it belongs to the product, product catalog sources and CSVs
pub fn delete_subscription_task(package: &str) -> Task {
    let package = package.to_string();
    Task::from_fn("Delete Subscription", move |ctx, _| {
        let package = package.clone();
        async move {
            let namespace = ctx.settings.operator_namespace().to_string();
            let mut title = "Delete Subscription".to_string();
            let mut targets = Vec::new();

            let subscriptions = ctx
                .client
                .list(&ResourceKind::SUBSCRIPTION, Some(&namespace), None)
                .await?;
            let subscription = subscriptions
                .into_iter()
                .filter_map(|document| from_document::<Subscription>(document).ok())
                .find(|subscription| subscription.spec.name == package);

            if let Some(subscription) = subscription {
                title = format!("{title} {}", subscription.name());
                targets.push(DeleteTarget::new(
                    ResourceKind::SUBSCRIPTION,
                    Some(&namespace),
                    subscription.name(),
                ));
                let source = ctx
                    .client
                    .get(
                        &ResourceKind::CATALOG_SOURCE,
                        Some(&subscription.spec.source_namespace),
                        &subscription.spec.source,
                    )
                    .await?;
                let part_of_product = source
                    .as_ref()
                    .and_then(|source| source.pointer("/metadata/labels"))
                    .and_then(|labels| labels.get(PART_OF_LABEL))
                    .and_then(Value::as_str)
                    == Some(PART_OF_VALUE);
                if part_of_product {
                    title = format!("{title} and CatalogSource {}", subscription.spec.source);
                    targets.push(DeleteTarget::new(
                        ResourceKind::CATALOG_SOURCE,
                        Some(&subscription.spec.source_namespace),
                        subscription.spec.source.clone(),
                    ));
                }
            }

            let catalog_sources = ctx
                .client
                .list(&ResourceKind::CATALOG_SOURCE, Some(&namespace), Some(PART_OF_SELECTOR))
                .await?;
            targets.extend(
                catalog_sources
                    .iter()
                    .map(|source| DeleteTarget::of_object(ResourceKind::CATALOG_SOURCE, source)),
            );
            targets.extend(
                product_csvs(ctx)
                    .await?
                    .iter()
                    .map(|csv| DeleteTarget::of_object(ResourceKind::CLUSTER_SERVICE_VERSION, csv)),
            );
            targets.dedup();

            Ok(TaskOutcome::Continue(TaskGraph::sequential(vec![
                delete_resources_task(title, targets),
            ])))
        }
        .boxed()
    })
}

/// `Delete Operators`: the cluster-scoped Operator objects
pub fn delete_operators_task() -> Task {
    Task::group("Delete Operators", |ctx| {
        let namespace = ctx.settings.operator_namespace();
        let mut targets = vec![DeleteTarget::new(
            ResourceKind::OPERATOR,
            None,
            format!("{}.{namespace}", ctx.settings.config.olm.package_name),
        )];
        if ctx.settings.config.deploy.delete_all {
            targets.push(DeleteTarget::new(
                ResourceKind::OPERATOR,
                None,
                format!("{AUXILIARY_PACKAGE}.{namespace}"),
            ));
        }
        Ok(TaskGraph::sequential(vec![delete_resources_task(
            "Delete Operator objects",
            targets,
        )]))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InMemoryResourceClient;
    use crate::config::{DeployConfig, DeploySettings};
    use crate::shutdown::ShutdownSignal;
    use crate::task::TaskRunner;

    const OPERATORS: &str = "openshift-operators";

    fn context(client: Arc<InMemoryResourceClient>, config: DeployConfig) -> RunContext {
        let settings = DeploySettings::from_config(config).unwrap();
        RunContext::new(Arc::new(settings), client, ShutdownSignal::never())
    }

    fn csv_with_examples(examples: &str) -> Value {
        json!({
            "metadata": {
                "name": "eclipse-che.v7.90.0",
                "annotations": {"alm-examples": examples}
            },
            "spec": {"install": {"spec": {"deployments": [{"spec": {"template": {"spec": {
                "containers": [{"name": "che-operator", "image": "quay.io/eclipse/che-operator:7.90.0"}]
            }}}}]}}}
        })
    }

    #[test]
    fn test_sample_picks_current_api_version() {
        let csv: ClusterServiceVersion = from_document(csv_with_examples(
            r#"[{"apiVersion": "org.eclipse.che/v1", "kind": "CheCluster", "metadata": {"name": "old"}},
                {"apiVersion": "org.eclipse.che/v2", "kind": "CheCluster", "metadata": {"name": "eclipse-che"}}]"#,
        ))
        .unwrap();
        let sample = custom_resource_sample(&csv).unwrap();
        assert_eq!(sample["metadata"]["name"], "eclipse-che");
    }

    #[tokio::test]
    async fn test_fetch_sample_records_state() {
        let client = Arc::new(InMemoryResourceClient::new());
        client.upsert(
            &ResourceKind::SUBSCRIPTION,
            Some(OPERATORS),
            json!({
                "metadata": {"name": "eclipse-che"},
                "spec": {"name": "eclipse-che", "source": "community-operators", "sourceNamespace": "openshift-marketplace"},
                "status": {"installedCSV": "eclipse-che.v7.90.0"}
            }),
        );
        client.upsert(
            &ResourceKind::CLUSTER_SERVICE_VERSION,
            Some(OPERATORS),
            csv_with_examples(r#"[{"apiVersion": "org.eclipse.che/v2", "kind": "CheCluster", "metadata": {"name": "eclipse-che"}}]"#),
        );
        let mut ctx = context(client, DeployConfig::default());
        let graph = TaskGraph::sequential(vec![fetch_custom_resource_sample_task("eclipse-che")]);

        TaskRunner::new().run(&graph, &mut ctx).await.unwrap();
        assert_eq!(
            ctx.state.custom_resource_sample.as_ref().unwrap()["metadata"]["name"],
            "eclipse-che"
        );
    }

    #[tokio::test]
    async fn test_custom_operator_image_requires_single_csv() {
        let client = Arc::new(InMemoryResourceClient::new());
        let mut config = DeployConfig::default();
        config.deploy.operator_image = Some("quay.io/me/che-operator:dev".into());
        let mut ctx = context(client.clone(), config);
        let graph = TaskGraph::sequential(vec![set_custom_operator_image_task()]);

        let err = TaskRunner::new().run(&graph, &mut ctx).await.unwrap_err();
        assert_eq!(err.root().to_string(), "Eclipse Che operator CSV not found.");

        client.upsert(&ResourceKind::CLUSTER_SERVICE_VERSION, Some(OPERATORS), csv_with_examples("[]"));
        TaskRunner::new().run(&graph, &mut ctx).await.unwrap();
        let csv = client
            .object(&ResourceKind::CLUSTER_SERVICE_VERSION, Some(OPERATORS), "eclipse-che.v7.90.0")
            .unwrap();
        assert_eq!(
            csv.pointer(OPERATOR_IMAGE_POINTER).and_then(Value::as_str),
            Some("quay.io/me/che-operator:dev")
        );
    }

    #[tokio::test]
    async fn test_delete_subscription_includes_product_catalog_source() {
        let client = Arc::new(InMemoryResourceClient::new());
        client.upsert(
            &ResourceKind::SUBSCRIPTION,
            Some(OPERATORS),
            json!({
                "metadata": {"name": "eclipse-che"},
                "spec": {"name": "eclipse-che", "source": "eclipse-che-custom", "sourceNamespace": OPERATORS}
            }),
        );
        client.upsert(
            &ResourceKind::CATALOG_SOURCE,
            Some(OPERATORS),
            json!({"metadata": {"name": "eclipse-che-custom", "labels": {PART_OF_LABEL: PART_OF_VALUE}}}),
        );
        client.upsert(&ResourceKind::CLUSTER_SERVICE_VERSION, Some(OPERATORS), csv_with_examples("[]"));

        let mut ctx = context(client.clone(), DeployConfig::default());
        let graph = TaskGraph::sequential(vec![delete_subscription_task("eclipse-che")]);
        let report = TaskRunner::new().run(&graph, &mut ctx).await.unwrap();

        let title = "Delete Subscription eclipse-che and CatalogSource eclipse-che-custom";
        assert_eq!(report.find(title).and_then(|r| r.tag()), Some(tags::DELETED));
        assert!(client.object(&ResourceKind::SUBSCRIPTION, Some(OPERATORS), "eclipse-che").is_none());
        assert!(client
            .object(&ResourceKind::CATALOG_SOURCE, Some(OPERATORS), "eclipse-che-custom")
            .is_none());
        assert!(client
            .object(&ResourceKind::CLUSTER_SERVICE_VERSION, Some(OPERATORS), "eclipse-che.v7.90.0")
            .is_none());
    }

    #[tokio::test]
    async fn test_up_to_date_install_plan_tag() {
        let client = Arc::new(InMemoryResourceClient::new());
        client.upsert(
            &ResourceKind::SUBSCRIPTION,
            Some(OPERATORS),
            json!({
                "metadata": {"name": "eclipse-che"},
                "spec": {"name": "eclipse-che", "source": "s", "sourceNamespace": "n"},
                "status": {"state": "AtLatestKnown", "currentCSV": "eclipse-che.v7.91.0"}
            }),
        );
        let mut ctx = context(client, DeployConfig::default());
        let graph = TaskGraph::sequential(vec![approve_install_plan_task("eclipse-che")]);
        let report = TaskRunner::new().run(&graph, &mut ctx).await.unwrap();

        assert_eq!(
            report.tasks[0].tag(),
            Some("Everything is up to date. Installed the latest known '7.91.0' version")
        );
        assert!(ctx.state.post_output_messages.is_empty());
    }
}
