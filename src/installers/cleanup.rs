//! Deletion tasks for the product's own resources.
//!
//! Targets that depend on cluster contents (listed config maps, custom
//! resources) are resolved when the task runs, so a re-run against a half
//! cleaned cluster only deletes what is left.

use super::common::{delete_resources_task, delete_targets, DeleteTarget};
use crate::constants::resources::{
    CERTIFICATE, CUSTOM_RESOURCE_CRD, ISSUER, MUTATING_WEBHOOK, OPERATOR_SERVICE, OPERATOR_SERVICE_ACCOUNT,
    OPERATOR_SERVICE_CERT_SECRET, PROMETHEUS, VALIDATING_WEBHOOK,
};
use crate::constants::components::OPERATOR_DEPLOYMENT;
use crate::constants::{FLAVOR, PART_OF_SELECTOR};
use crate::client::ResourceKind;
use crate::reconciler::custom_resource::is_openshift;
use crate::task::{Task, TaskGraph};
use futures::FutureExt;

const GATEWAY_CONFIG_SELECTOR: &str = "app.kubernetes.io/component=gateway-config";
const LEADER_ELECTION_SUFFIX: &str = "org.eclipse.che";
/// Cluster roles and bindings the operator creates, prefixed with the namespace
const CLUSTER_RBAC_SUFFIXES: [&str; 5] = [
    "che-gateway",
    "che-dashboard",
    "cheworkspaces-namespaces-clusterrole",
    "cheworkspaces-clusterrole",
    "cheworkspaces-devworkspace-clusterrole",
];

/// `Delete cluster scope objects`: the admission webhooks
pub fn delete_cluster_scope_objects_task() -> Task {
    delete_resources_task(
        "Delete cluster scope objects",
        vec![
            DeleteTarget::new(ResourceKind::VALIDATING_WEBHOOK, None, VALIDATING_WEBHOOK),
            DeleteTarget::new(ResourceKind::MUTATING_WEBHOOK, None, MUTATING_WEBHOOK),
        ],
    )
}

/// `Delete checlusters.org.eclipse.che resources`: every custom resource, then the CRD
pub fn delete_custom_resources_task() -> Task {
    let kind = ResourceKind::CHE_CLUSTER;
    Task::from_fn(format!("Delete {}.{} resources", kind.plural, kind.group), move |ctx, _| {
        async move {
            let resources = ctx.client.list(&kind, None, None).await?;
            let mut targets: Vec<DeleteTarget> = resources
                .iter()
                .map(|resource| DeleteTarget::of_object(kind, resource))
                .collect();
            targets.push(DeleteTarget::new(
                ResourceKind::CUSTOM_RESOURCE_DEFINITION,
                None,
                CUSTOM_RESOURCE_CRD,
            ));
            Ok(delete_targets(ctx.client.as_ref(), &targets).await)
        }
        .boxed()
    })
}

/// `Delete Networks`
pub fn delete_networks_task(namespace: &str) -> Task {
    delete_resources_task(
        "Delete Networks",
        vec![DeleteTarget::new(ResourceKind::SERVICE, Some(namespace), OPERATOR_SERVICE)],
    )
}

/// `Delete Workloads`: gateway config maps, the operator deployment and its
/// certificate secret off OpenShift, and leader election leftovers
pub fn delete_workloads_task() -> Task {
    Task::from_fn("Delete Workloads", |ctx, _| {
        async move {
            let namespace = ctx.namespace().to_string();
            let operator_namespace = ctx.settings.operator_namespace().to_string();
            let selector = format!("{PART_OF_SELECTOR},{GATEWAY_CONFIG_SELECTOR}");

            let mut targets: Vec<DeleteTarget> = ctx
                .client
                .list(&ResourceKind::CONFIG_MAP, Some(&namespace), Some(&selector))
                .await?
                .iter()
                .map(|config_map| DeleteTarget::of_object(ResourceKind::CONFIG_MAP, config_map))
                .collect();

            if !is_openshift(ctx) {
                targets.push(DeleteTarget::new(
                    ResourceKind::SECRET,
                    Some(&namespace),
                    OPERATOR_SERVICE_CERT_SECRET,
                ));
                targets.push(DeleteTarget::new(
                    ResourceKind::DEPLOYMENT,
                    Some(&namespace),
                    OPERATOR_DEPLOYMENT,
                ));
            }

            targets.extend(
                ctx.client
                    .list(&ResourceKind::CONFIG_MAP, Some(&operator_namespace), None)
                    .await?
                    .iter()
                    .filter(|config_map| crate::client::object_name(config_map).ends_with(LEADER_ELECTION_SUFFIX))
                    .map(|config_map| DeleteTarget::of_object(ResourceKind::CONFIG_MAP, config_map)),
            );

            Ok(delete_targets(ctx.client.as_ref(), &targets).await)
        }
        .boxed()
    })
}

/// Namespaced and cluster RBAC objects created for the product
pub fn rbac_targets(namespace: &str, openshift: bool) -> Vec<DeleteTarget> {
    let ns = Some(namespace);
    let mut targets = if openshift {
        vec![
            DeleteTarget::new(ResourceKind::ROLE, ns, PROMETHEUS),
            DeleteTarget::new(ResourceKind::ROLE_BINDING, ns, PROMETHEUS),
            DeleteTarget::new(ResourceKind::CLUSTER_ROLE, None, format!("{FLAVOR}-user-container-build")),
            DeleteTarget::new(ResourceKind::CLUSTER_ROLE, None, "dev-workspace-container-build"),
            DeleteTarget::new(ResourceKind::CLUSTER_ROLE_BINDING, None, "dev-workspace-container-build"),
            DeleteTarget::new(
                ResourceKind::ROLE_BINDING,
                Some("kube-system"),
                format!("{FLAVOR}-operator-service-auth-reader"),
            ),
        ]
    } else {
        vec![
            DeleteTarget::new(ResourceKind::ROLE, ns, "che-operator"),
            DeleteTarget::new(ResourceKind::ROLE, ns, "che-operator-leader-election"),
            DeleteTarget::new(ResourceKind::ROLE_BINDING, ns, "che-operator"),
            DeleteTarget::new(ResourceKind::ROLE_BINDING, ns, "che-operator-leader-election"),
            DeleteTarget::new(ResourceKind::CLUSTER_ROLE, None, format!("{namespace}-che-operator")),
            DeleteTarget::new(ResourceKind::CLUSTER_ROLE_BINDING, None, format!("{namespace}-che-operator")),
            DeleteTarget::new(ResourceKind::SERVICE_ACCOUNT, ns, OPERATOR_SERVICE_ACCOUNT),
        ]
    };

    for kind in [ResourceKind::CLUSTER_ROLE, ResourceKind::CLUSTER_ROLE_BINDING] {
        for suffix in CLUSTER_RBAC_SUFFIXES {
            targets.push(DeleteTarget::new(kind, None, format!("{namespace}-{suffix}")));
        }
    }
    targets
}

/// `Delete RBAC`
pub fn delete_rbac_task() -> Task {
    Task::group("Delete RBAC", |ctx| {
        let targets = rbac_targets(ctx.namespace(), is_openshift(ctx));
        Ok(TaskGraph::sequential(vec![delete_resources_task(
            "Delete roles and bindings",
            targets,
        )]))
    })
}

/// `Delete Certificates`
pub fn delete_certificates_task(namespace: &str) -> Task {
    delete_resources_task(
        "Delete Certificates",
        vec![
            DeleteTarget::new(ResourceKind::ISSUER, Some(namespace), ISSUER),
            DeleteTarget::new(ResourceKind::CERTIFICATE, Some(namespace), CERTIFICATE),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rbac_targets_follow_platform() {
        let kubernetes = rbac_targets("che", false);
        assert!(kubernetes.contains(&DeleteTarget::new(
            ResourceKind::SERVICE_ACCOUNT,
            Some("che"),
            OPERATOR_SERVICE_ACCOUNT
        )));
        assert!(kubernetes.contains(&DeleteTarget::new(
            ResourceKind::CLUSTER_ROLE,
            None,
            "che-che-operator"
        )));

        let openshift = rbac_targets("che", true);
        assert!(openshift.contains(&DeleteTarget::new(ResourceKind::ROLE, Some("che"), PROMETHEUS)));
        assert!(!openshift
            .iter()
            .any(|target| target.kind == ResourceKind::SERVICE_ACCOUNT));
        assert!(openshift.iter().all(|target| !target.kind.namespaced || target.namespace.is_some()));
    }
}
