//! Direct operator installer: applies the operator manifests from the
//! templates directory into the target namespace.

use super::cleanup::{
    delete_certificates_task, delete_cluster_scope_objects_task, delete_custom_resources_task,
    delete_networks_task, delete_rbac_task, delete_workloads_task,
};
use super::common::{cert_manager_wait_task, wait_task};
use super::templates::{self, Templates};
use super::Installer;
use crate::client::{str_at, ResourceKind};
use crate::constants::components::{OPERATOR, OPERATOR_DEPLOYMENT, OPERATOR_SELECTOR};
use crate::constants::resources::{CERTIFICATE, CERT_MANAGER_INJECT_CA_ANNOTATION, OPERATOR_SERVICE};
use crate::constants::PRODUCT_NAME;
use crate::context::{ImageUpgrade, RunContext};
use crate::error::{DeployError, Result};
use crate::readiness::{deployment_existence_task, pod_start_tasks, wait_latest_replica_task};
use crate::reconciler::custom_resource::{
    create_custom_resource_task, patch_custom_resource_task, set_container_image,
};
use crate::reconciler::{reconcile, set_path, ManifestOps};
use crate::task::{Task, TaskGraph, TaskOutcome};
use futures::FutureExt;
use serde_json::Value;
use std::time::Duration;
use tracing::info;

const SETTLE_DELAY: Duration = Duration::from_secs(5);

fn inject_ca_from(namespace: &str) -> Value {
    Value::String(format!("{namespace}/{CERTIFICATE}"))
}

/// Point the CRD's conversion webhook at the target namespace
pub fn prepare_crd(mut crd: Value, namespace: &str) -> Value {
    if let Some(service) = crd.pointer_mut("/spec/conversion/webhook/clientConfig/service") {
        set_path(service, &["namespace"], Value::String(namespace.to_string()));
    }
    set_path(
        &mut crd,
        &["metadata", "annotations", CERT_MANAGER_INJECT_CA_ANNOTATION],
        inject_ca_from(namespace),
    );
    crd
}

/// Point an admission webhook configuration at the target namespace
pub fn prepare_webhook(mut webhook: Value, namespace: &str) -> Value {
    if let Some(service) = webhook.pointer_mut("/webhooks/0/clientConfig/service") {
        set_path(service, &["namespace"], Value::String(namespace.to_string()));
    }
    set_path(
        &mut webhook,
        &["metadata", "annotations", CERT_MANAGER_INJECT_CA_ANNOTATION],
        inject_ca_from(namespace),
    );
    webhook
}

/// Serving certificate for the operator service in `namespace`
pub fn prepare_certificate(mut certificate: Value, namespace: &str) -> Value {
    let dns_names = vec![
        Value::String(format!("{OPERATOR_SERVICE}.{namespace}.svc")),
        Value::String(format!("{OPERATOR_SERVICE}.{namespace}.svc.cluster.local")),
    ];
    set_path(&mut certificate, &["spec", "dnsNames"], Value::Array(dns_names));
    certificate
}

/// Cluster-scoped RBAC names are prefixed with the namespace so several
/// installations can share a cluster.
pub fn prepare_cluster_role(mut role: Value, namespace: &str) -> Value {
    if let Some(name) = str_at(&role, "/metadata/name").map(str::to_string) {
        set_path(&mut role, &["metadata", "name"], Value::String(format!("{namespace}-{name}")));
    }
    role
}

pub fn prepare_cluster_role_binding(mut binding: Value, namespace: &str) -> Value {
    binding = prepare_cluster_role(binding, namespace);
    if let Some(role) = str_at(&binding, "/roleRef/name").map(str::to_string) {
        set_path(&mut binding, &["roleRef", "name"], Value::String(format!("{namespace}-{role}")));
    }
    if let Some(subjects) = binding.get_mut("subjects").and_then(Value::as_array_mut) {
        for subject in subjects {
            set_path(subject, &["namespace"], Value::String(namespace.to_string()));
        }
    }
    binding
}

/// Namespaced bindings grant the operator service account of `namespace`
fn prepare_role_binding(mut binding: Value, namespace: &str) -> Value {
    if let Some(subjects) = binding.get_mut("subjects").and_then(Value::as_array_mut) {
        for subject in subjects {
            set_path(subject, &["namespace"], Value::String(namespace.to_string()));
        }
    }
    binding
}

/// Operator deployment with the custom image, when one is configured
pub fn prepare_deployment(mut deployment: Value, operator_image: Option<&str>) -> Value {
    if let Some(image) = operator_image {
        if !set_container_image(&mut deployment, OPERATOR_DEPLOYMENT, image) {
            tracing::warn!(image, "Operator container not found in the deployment template");
        }
    }
    deployment
}

fn operator_container_image(deployment: &Value) -> Option<&str> {
    deployment
        .pointer("/spec/template/spec/containers")?
        .as_array()?
        .iter()
        .find(|container| container.get("name").and_then(Value::as_str) == Some(OPERATOR_DEPLOYMENT))?
        .get("image")?
        .as_str()
}

fn manifest_task(create_only: bool, kind: ResourceKind, label: &str, namespace: &str, manifest: Value) -> Task {
    let ops = ManifestOps::new(kind, namespace, manifest);
    let name = ops.name().to_string();
    reconcile(create_only, label, &name, ops)
}

fn rbac_task(templates: Templates, create_only: bool) -> Task {
    let verb = if create_only { "Create" } else { "Update" };
    Task::group(format!("{verb} RBAC"), move |ctx| {
        let namespace = ctx.namespace();
        let rbac = templates.rbac()?;
        let mut graph = TaskGraph::default();
        for role in rbac.roles {
            graph.push(manifest_task(create_only, ResourceKind::ROLE, "Role", namespace, role));
        }
        for binding in rbac.role_bindings {
            graph.push(manifest_task(
                create_only,
                ResourceKind::ROLE_BINDING,
                "RoleBinding",
                namespace,
                prepare_role_binding(binding, namespace),
            ));
        }
        for role in rbac.cluster_roles {
            graph.push(manifest_task(
                create_only,
                ResourceKind::CLUSTER_ROLE,
                "ClusterRole",
                namespace,
                prepare_cluster_role(role, namespace),
            ));
        }
        for binding in rbac.cluster_role_bindings {
            graph.push(manifest_task(
                create_only,
                ResourceKind::CLUSTER_ROLE_BINDING,
                "ClusterRoleBinding",
                namespace,
                prepare_cluster_role_binding(binding, namespace),
            ));
        }
        Ok(graph)
    })
}

/// Sequence shared by deploy (`create_only`) and update
fn operator_graph(templates: &Templates, ctx: &RunContext, create_only: bool) -> Result<TaskGraph> {
    let namespace = ctx.namespace();
    let deploy = &ctx.settings.config.deploy;
    let mut graph = TaskGraph::default();

    graph.push(manifest_task(
        create_only,
        ResourceKind::SERVICE_ACCOUNT,
        "ServiceAccount",
        namespace,
        templates.require(templates::SERVICE_ACCOUNT)?,
    ));
    graph.push(rbac_task(templates.clone(), create_only));

    if create_only && !deploy.skip_cert_manager {
        graph.push(cert_manager_wait_task());
        graph.push(wait_task(SETTLE_DELAY));
    }

    graph.extend([
        manifest_task(
            create_only,
            ResourceKind::CERTIFICATE,
            "Certificate",
            namespace,
            prepare_certificate(templates.require(templates::SERVING_CERT)?, namespace),
        ),
        manifest_task(
            create_only,
            ResourceKind::ISSUER,
            "Issuer",
            namespace,
            templates.require(templates::SELFSIGNED_ISSUER)?,
        ),
        manifest_task(
            create_only,
            ResourceKind::SERVICE,
            "Service",
            namespace,
            templates.require(templates::WEBHOOK_SERVICE)?,
        ),
        manifest_task(
            create_only,
            ResourceKind::CUSTOM_RESOURCE_DEFINITION,
            "CRD",
            namespace,
            prepare_crd(templates.require(templates::CRD)?, namespace),
        ),
        wait_task(SETTLE_DELAY),
        manifest_task(
            create_only,
            ResourceKind::DEPLOYMENT,
            "Deployment",
            namespace,
            prepare_deployment(
                templates.require(templates::OPERATOR_DEPLOYMENT)?,
                deploy.operator_image.as_deref(),
            ),
        ),
    ]);

    if create_only {
        graph.push(pod_start_tasks(OPERATOR, OPERATOR_SELECTOR, namespace));
    } else {
        graph.push(wait_latest_replica_task(OPERATOR_DEPLOYMENT, namespace));
    }

    graph.extend([
        manifest_task(
            create_only,
            ResourceKind::VALIDATING_WEBHOOK,
            "ValidatingWebhookConfiguration",
            namespace,
            prepare_webhook(templates.require(templates::VALIDATING_WEBHOOK)?, namespace),
        ),
        manifest_task(
            create_only,
            ResourceKind::MUTATING_WEBHOOK,
            "MutatingWebhookConfiguration",
            namespace,
            prepare_webhook(templates.require(templates::MUTATING_WEBHOOK)?, namespace),
        ),
    ]);

    if create_only {
        graph.push(create_custom_resource_task(templates.load(templates::DEFAULT_CUSTOM_RESOURCE)?));
    } else {
        graph.push(patch_custom_resource_task());
    }
    Ok(graph)
}

/// `Discover Eclipse Che upgrade path`: deployed image against the new one
fn discover_upgrade_path_task(templates: Templates) -> Task {
    Task::from_fn(format!("Discover {PRODUCT_NAME} upgrade path"), move |ctx, _| {
        let templates = templates.clone();
        async move {
            let namespace = ctx.namespace().to_string();
            let deployment = ctx
                .client
                .get(&ResourceKind::DEPLOYMENT, Some(&namespace), OPERATOR_DEPLOYMENT)
                .await?
                .ok_or_else(|| {
                    DeployError::validation(format!(
                        "Deployment {OPERATOR_DEPLOYMENT} not found in namespace {namespace}"
                    ))
                })?;
            let deployed = operator_container_image(&deployment)
                .ok_or_else(|| {
                    DeployError::validation(format!("Container {OPERATOR_DEPLOYMENT} not found"))
                })?
                .to_string();

            let new = match ctx.settings.config.deploy.operator_image.clone() {
                Some(image) => image,
                None => {
                    let template = templates.require(templates::OPERATOR_DEPLOYMENT)?;
                    operator_container_image(&template)
                        .ok_or_else(|| {
                            DeployError::template(
                                templates.root().join(templates::OPERATOR_DEPLOYMENT).display().to_string(),
                                format!("container {OPERATOR_DEPLOYMENT} not found"),
                            )
                        })?
                        .to_string()
                }
            };

            let upgrade = ImageUpgrade::from_images(&deployed, &new);
            info!(from = %deployed, to = %new, "Operator upgrade path");
            let tag = format!("{} -> {}", upgrade.deployed_tag, upgrade.new_tag);
            ctx.state.operator_image_upgrade = Some(upgrade);
            Ok(TaskOutcome::tagged(tag))
        }
        .boxed()
    })
}

/// Installer applying the operator manifests directly
#[derive(Debug, Clone)]
pub struct OperatorInstaller {
    templates: Templates,
}

impl OperatorInstaller {
    pub fn new(templates: Templates) -> Self {
        Self { templates }
    }
}

impl Installer for OperatorInstaller {
    fn deploy_tasks(&self) -> Task {
        let templates = self.templates.clone();
        Task::group(format!("Deploy {PRODUCT_NAME} operator"), move |ctx| {
            operator_graph(&templates, ctx, true)
        })
    }

    fn pre_update_tasks(&self) -> Task {
        let templates = self.templates.clone();
        Task::group(format!("{PRODUCT_NAME} operator pre-update check"), move |ctx| {
            Ok(TaskGraph::sequential(vec![
                deployment_existence_task(OPERATOR_DEPLOYMENT, ctx.namespace()),
                discover_upgrade_path_task(templates.clone()),
            ]))
        })
    }

    fn update_tasks(&self) -> Task {
        let templates = self.templates.clone();
        Task::group(format!("Update {PRODUCT_NAME} operator"), move |ctx| {
            operator_graph(&templates, ctx, false)
        })
    }

    fn delete_tasks(&self) -> Task {
        Task::group(format!("Uninstall {PRODUCT_NAME} operator"), |ctx| {
            let namespace = ctx.namespace();
            Ok(TaskGraph::sequential(vec![
                delete_cluster_scope_objects_task(),
                delete_custom_resources_task(),
                delete_networks_task(namespace),
                delete_workloads_task(),
                delete_rbac_task(),
                delete_certificates_task(namespace),
            ]))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_crd_and_webhooks_point_at_namespace() {
        let crd = prepare_crd(
            json!({
                "metadata": {"name": "checlusters.org.eclipse.che"},
                "spec": {"conversion": {"webhook": {"clientConfig": {"service": {"name": "che-operator-service", "namespace": "eclipse-che"}}}}}
            }),
            "che",
        );
        assert_eq!(crd["spec"]["conversion"]["webhook"]["clientConfig"]["service"]["namespace"], "che");
        assert_eq!(
            crd["metadata"]["annotations"][CERT_MANAGER_INJECT_CA_ANNOTATION],
            "che/che-operator-serving-cert"
        );

        let webhook = prepare_webhook(
            json!({"metadata": {"name": "org.eclipse.che"}, "webhooks": [{"clientConfig": {"service": {"name": "x"}}}]}),
            "che",
        );
        assert_eq!(webhook["webhooks"][0]["clientConfig"]["service"]["namespace"], "che");
    }

    #[test]
    fn test_cluster_rbac_is_prefixed() {
        let binding = prepare_cluster_role_binding(
            json!({
                "metadata": {"name": "che-operator"},
                "roleRef": {"kind": "ClusterRole", "name": "che-operator"},
                "subjects": [{"kind": "ServiceAccount", "name": "che-operator", "namespace": "eclipse-che"}]
            }),
            "che",
        );
        assert_eq!(binding["metadata"]["name"], "che-che-operator");
        assert_eq!(binding["roleRef"]["name"], "che-che-operator");
        assert_eq!(binding["subjects"][0]["namespace"], "che");
    }

    #[test]
    fn test_certificate_dns_names() {
        let certificate = prepare_certificate(json!({"metadata": {"name": CERTIFICATE}}), "che");
        assert_eq!(
            certificate["spec"]["dnsNames"],
            json!(["che-operator-service.che.svc", "che-operator-service.che.svc.cluster.local"])
        );
    }

    #[test]
    fn test_custom_operator_image() {
        let template = json!({"spec": {"template": {"spec": {"containers": [
            {"name": "che-operator", "image": "quay.io/eclipse/che-operator:next"}
        ]}}}});
        let unchanged = prepare_deployment(template.clone(), None);
        assert_eq!(operator_container_image(&unchanged), Some("quay.io/eclipse/che-operator:next"));

        let custom = prepare_deployment(template, Some("example.org/operator:dev"));
        assert_eq!(operator_container_image(&custom), Some("example.org/operator:dev"));
    }
}
