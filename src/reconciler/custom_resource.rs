//! Application custom resource: build from a base document plus overrides,
//! create once the operator's admission webhook answers, and patch in place.

use super::set_path;
use crate::client::{object_name, ResourceClient, ResourceKind, ResourcePatch};
use crate::config::DeploySettings;
use crate::constants::resources::{CUSTOM_RESOURCE_KIND, OPERATOR_SERVICE, TLS_SECRET_NAME};
use crate::constants::PRODUCT_NAME;
use crate::context::RunContext;
use crate::error::{DeployError, Result};
use crate::shutdown::ShutdownSignal;
use crate::task::{tags, Task, TaskOutcome};
use futures::FutureExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

pub const WEBHOOK_RETRY_ATTEMPTS: u32 = 30;
pub const WEBHOOK_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Recursive merge in the manner of lodash `merge`.
///
/// Objects merge key by key, arrays merge index by index (extra source
/// elements are appended), and every other source value, `null` included,
/// replaces the target.
pub fn deep_merge(target: &mut Value, source: &Value) {
    match (target, source) {
        (Value::Object(target), Value::Object(source)) => {
            for (key, value) in source {
                match target.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (Value::Array(target), Value::Array(source)) => {
            for (index, value) in source.iter().enumerate() {
                match target.get_mut(index) {
                    Some(existing) => deep_merge(existing, value),
                    None => target.push(value.clone()),
                }
            }
        }
        (target, source) => *target = source.clone(),
    }
}

/// Apply the built-in overrides to `base`, then the free-form patch.
///
/// The override order is fixed and the patch always wins.
pub fn build_custom_resource(base: Value, settings: &DeploySettings, is_openshift: bool) -> Value {
    let overrides = &settings.config.custom_resource;
    let mut resource = base;

    deep_merge(
        &mut resource,
        &json!({"spec": {"components": {"cheServer": {"debug": overrides.debug}}}}),
    );

    if let Some(image) = &overrides.server_image {
        deep_merge(
            &mut resource,
            &json!({"spec": {"components": {"cheServer": {"deployment": {"containers": [{"image": image}]}}}}}),
        );
    }

    if !is_openshift {
        let has_tls_secret = resource
            .pointer("/spec/networking/tlsSecretName")
            .and_then(Value::as_str)
            .is_some_and(|secret| !secret.is_empty());
        if !has_tls_secret {
            deep_merge(
                &mut resource,
                &json!({"spec": {"networking": {"tlsSecretName": TLS_SECRET_NAME}}}),
            );
        }
        if let Some(domain) = &overrides.domain {
            deep_merge(&mut resource, &json!({"spec": {"networking": {"domain": domain}}}));
        }
    }

    if let Some(class) = &overrides.postgres_storage_class {
        deep_merge(
            &mut resource,
            &json!({"spec": {"components": {"database": {"pvc": {"storageClass": class}}}}}),
        );
    }

    if let Some(class) = &overrides.workspace_storage_class {
        deep_merge(
            &mut resource,
            &json!({"spec": {"workspaces": {"storage": {"pvc": {"storageClass": class}}}}}),
        );
    }

    if let Some(url) = &overrides.plugin_registry_url {
        deep_merge(
            &mut resource,
            &json!({"spec": {"components": {"pluginRegistry": {
                "disableInternalRegistry": true,
                "externalPluginRegistries": [{"url": url}]
            }}}}),
        );
    }

    if let Some(url) = &overrides.devfile_registry_url {
        deep_merge(
            &mut resource,
            &json!({"spec": {"components": {"devfileRegistry": {
                "disableInternalRegistry": true,
                "externalDevfileRegistries": [{"url": url}]
            }}}}),
        );
    }

    if settings.platform().is_local() {
        deep_merge(
            &mut resource,
            &json!({"spec": {"devEnvironments": {"startTimeoutSeconds": 3000}}}),
        );
    }

    if let Some(patch) = &settings.cr_patch {
        deep_merge(&mut resource, patch);
    }

    resource
}

/// First custom resource in `namespace`, if any
pub async fn find_custom_resource(client: &dyn ResourceClient, namespace: &str) -> Result<Option<Value>> {
    Ok(client
        .list(&ResourceKind::CHE_CLUSTER, Some(namespace), None)
        .await?
        .into_iter()
        .next())
}

/// Create `resource`, retrying while the operator's admission webhook is unreachable
#[instrument(skip(client, resource, shutdown), fields(name = object_name(resource)))]
pub async fn create_with_webhook_retry(
    client: &dyn ResourceClient,
    namespace: &str,
    resource: &Value,
    shutdown: &ShutdownSignal,
) -> Result<Value> {
    let mut body = resource.clone();
    if let Some(metadata) = body.get_mut("metadata").and_then(Value::as_object_mut) {
        metadata.remove("namespace");
    }

    let mut attempt = 1;
    loop {
        match client
            .create(&ResourceKind::CHE_CLUSTER, Some(namespace), &body)
            .await
        {
            Ok(created) => return Ok(created),
            Err(error) if error.is_webhook_unavailable(OPERATOR_SERVICE) && attempt < WEBHOOK_RETRY_ATTEMPTS => {
                warn!(attempt, error = %error, "Admission webhook not available yet");
                shutdown.sleep(WEBHOOK_RETRY_DELAY).await?;
                attempt += 1;
            }
            Err(error) => return Err(error.into()),
        }
    }
}

/// `Create CheCluster Custom Resource`.
///
/// The base document is the custom resource file when given, else the sample
/// fetched from the installed CSV, else `default_resource`.
pub fn create_custom_resource_task(default_resource: Option<Value>) -> Task {
    let default_resource = Arc::new(default_resource);
    Task::from_fn(format!("Create {CUSTOM_RESOURCE_KIND} Custom Resource"), move |ctx, _| {
        let default_resource = Arc::clone(&default_resource);
        async move {
            let namespace = ctx.namespace().to_string();
            if find_custom_resource(ctx.client.as_ref(), &namespace).await?.is_some() {
                return Ok(TaskOutcome::tagged(tags::EXISTS));
            }

            let base = ctx
                .settings
                .custom_resource
                .clone()
                .or_else(|| ctx.state.custom_resource_sample.clone())
                .or_else(|| (*default_resource).clone())
                .ok_or_else(|| {
                    DeployError::validation(format!("{CUSTOM_RESOURCE_KIND} Custom Resource template not found"))
                })?;

            let resource = build_custom_resource(base, &ctx.settings, is_openshift(ctx));
            debug!(resource = %resource, "Creating custom resource");
            create_with_webhook_retry(ctx.client.as_ref(), &namespace, &resource, &ctx.shutdown).await?;
            Ok(TaskOutcome::tagged(tags::CREATED))
        }
        .boxed()
    })
}

/// `Patch CheCluster Custom Resource`, enabled when a non-empty patch was given
pub fn patch_custom_resource_task() -> Task {
    Task::from_fn(format!("Patch {CUSTOM_RESOURCE_KIND} Custom Resource"), |ctx, _| {
        async move {
            let namespace = ctx.namespace().to_string();
            let Some(resource) = find_custom_resource(ctx.client.as_ref(), &namespace).await? else {
                return Err(DeployError::validation(format!(
                    "{PRODUCT_NAME} cluster Custom Object not found in the namespace '{namespace}'"
                )));
            };
            let patch = ctx.settings.cr_patch.clone().unwrap_or(Value::Null);
            ctx.client
                .patch(
                    &ResourceKind::CHE_CLUSTER,
                    Some(&namespace),
                    object_name(&resource),
                    &ResourcePatch::Merge(patch),
                )
                .await?;
            Ok(TaskOutcome::tagged("Patched"))
        }
        .boxed()
    })
    .enabled_if(|ctx| ctx.settings.has_cr_patch())
}

/// Discovered platform fact, falling back to the configured platform
pub(crate) fn is_openshift(ctx: &RunContext) -> bool {
    ctx.state
        .infrastructure
        .is_openshift
        .unwrap_or_else(|| ctx.settings.is_openshift())
}

/// Set the image of the container named `container` in a Deployment manifest
pub(crate) fn set_container_image(deployment: &mut Value, container: &str, image: &str) -> bool {
    let Some(containers) = deployment
        .pointer_mut("/spec/template/spec/containers")
        .and_then(Value::as_array_mut)
    else {
        return false;
    };
    let mut replaced = false;
    for entry in containers
        .iter_mut()
        .filter(|entry| entry.get("name").and_then(Value::as_str) == Some(container))
    {
        set_path(entry, &["image"], Value::String(image.to_string()));
        replaced = true;
    }
    replaced
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::memory::Operation;
    use crate::client::InMemoryResourceClient;
    use crate::config::{DeployConfig, Platform};
    use crate::error::ClientError;
    use proptest::prelude::*;

    fn settings(configure: impl FnOnce(&mut DeployConfig)) -> DeploySettings {
        let mut config = DeployConfig::default();
        configure(&mut config);
        DeploySettings::from_config(config).unwrap()
    }

    #[test]
    fn test_deep_merge_arrays_by_index_and_null_assigns() {
        let mut target = json!({"a": [{"x": 1, "y": 2}], "b": 1, "c": {"d": 1}});
        deep_merge(
            &mut target,
            &json!({"a": [{"x": 3}, {"z": 4}], "b": null, "c": {"e": 2}}),
        );
        assert_eq!(
            target,
            json!({"a": [{"x": 3, "y": 2}, {"z": 4}], "b": null, "c": {"d": 1, "e": 2}})
        );
    }

    #[test]
    fn test_overrides_apply_in_order_and_patch_wins() {
        let mut settings = settings(|config| {
            config.deploy.platform = Platform::Minikube;
            config.custom_resource.server_image = Some("quay.io/che/server:next".into());
            config.custom_resource.domain = Some("192.168.49.2.nip.io".into());
            config.custom_resource.plugin_registry_url = Some("https://plugins.example.org".into());
        });
        settings.cr_patch = Some(json!({"spec": {"networking": {"domain": "patched.example.org"}}}));

        let base = json!({
            "apiVersion": "org.eclipse.che/v2",
            "kind": "CheCluster",
            "metadata": {"name": "eclipse-che"},
            "spec": {"components": {"cheServer": {"deployment": {"containers": [{"name": "che"}]}}}}
        });
        let resource = build_custom_resource(base, &settings, false);

        assert_eq!(resource["spec"]["components"]["cheServer"]["debug"], false);
        assert_eq!(
            resource["spec"]["components"]["cheServer"]["deployment"]["containers"][0],
            json!({"name": "che", "image": "quay.io/che/server:next"})
        );
        assert_eq!(resource["spec"]["networking"]["tlsSecretName"], "che-tls");
        assert_eq!(resource["spec"]["networking"]["domain"], "patched.example.org");
        assert_eq!(
            resource["spec"]["components"]["pluginRegistry"],
            json!({"disableInternalRegistry": true, "externalPluginRegistries": [{"url": "https://plugins.example.org"}]})
        );
        assert_eq!(resource["spec"]["devEnvironments"]["startTimeoutSeconds"], 3000);
    }

    #[test]
    fn test_openshift_skips_networking_overrides() {
        let settings = settings(|config| {
            config.deploy.platform = Platform::Openshift;
            config.custom_resource.domain = Some("apps.example.org".into());
        });
        let resource = build_custom_resource(json!({"spec": {}}), &settings, true);
        assert!(resource.pointer("/spec/networking").is_none());
        assert!(resource.pointer("/spec/devEnvironments").is_none());
    }

    #[test]
    fn test_existing_tls_secret_is_kept() {
        let settings = settings(|config| config.deploy.platform = Platform::Kubernetes);
        let resource = build_custom_resource(
            json!({"spec": {"networking": {"tlsSecretName": "custom-tls"}}}),
            &settings,
            false,
        );
        assert_eq!(resource["spec"]["networking"]["tlsSecretName"], "custom-tls");
    }

    #[test]
    fn test_set_container_image_targets_named_container() {
        let mut deployment = json!({"spec": {"template": {"spec": {"containers": [
            {"name": "sidecar", "image": "a"},
            {"name": "che-operator", "image": "b"}
        ]}}}});
        assert!(set_container_image(&mut deployment, "che-operator", "c"));
        assert_eq!(deployment["spec"]["template"]["spec"]["containers"][0]["image"], "a");
        assert_eq!(deployment["spec"]["template"]["spec"]["containers"][1]["image"], "c");
        assert!(!set_container_image(&mut deployment, "missing", "d"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_retries_while_webhook_is_unavailable() {
        let client = InMemoryResourceClient::new();
        for _ in 0..3 {
            client.fail_next(
                Operation::Create,
                ClientError::api(
                    500,
                    "InternalError",
                    "no endpoints available for service \"che-operator-service\"",
                ),
            );
        }
        let resource = json!({"metadata": {"name": "eclipse-che", "namespace": "elsewhere"}, "spec": {}});

        create_with_webhook_retry(&client, "che", &resource, &ShutdownSignal::never())
            .await
            .unwrap();

        assert!(client
            .object(&ResourceKind::CHE_CLUSTER, Some("che"), "eclipse-che")
            .is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_gives_up_after_retry_budget() {
        let client = InMemoryResourceClient::new();
        for _ in 0..WEBHOOK_RETRY_ATTEMPTS {
            client.fail_next(
                Operation::Create,
                ClientError::api(500, "InternalError", "failed calling webhook \"vchecluster.kb.io\""),
            );
        }
        let resource = json!({"metadata": {"name": "eclipse-che"}});
        let err = create_with_webhook_retry(&client, "che", &resource, &ShutdownSignal::never())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed calling webhook"));
    }

    #[tokio::test]
    async fn test_other_create_errors_are_not_retried() {
        let client = InMemoryResourceClient::new();
        client.fail_next(
            Operation::Create,
            ClientError::api(403, "Forbidden", "checlusters is forbidden"),
        );
        let resource = json!({"metadata": {"name": "eclipse-che"}});
        let err = create_with_webhook_retry(&client, "che", &resource, &ShutdownSignal::never())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("forbidden"));
        assert_eq!(client.write_count(), 0);
    }

    proptest! {
        #[test]
        fn prop_merged_keys_take_source_values(
            a in proptest::collection::btree_map("[a-e]", 0i64..100, 0..5),
            b in proptest::collection::btree_map("[a-e]", 0i64..100, 0..5),
        ) {
            let mut target = json!(a);
            deep_merge(&mut target, &json!(b));
            for (key, value) in &b {
                prop_assert_eq!(&target[key], &json!(value));
            }
            for (key, value) in &a {
                if !b.contains_key(key) {
                    prop_assert_eq!(&target[key], &json!(value));
                }
            }
        }
    }
}
