//! # Product Constants
//!
//! Names, selectors and labels of the deployed application and its operators.
//! Everything cluster-facing that is not configurable lives here.

pub const PRODUCT_NAME: &str = "Eclipse Che";
pub const FLAVOR: &str = "che";

pub const DEFAULT_NAMESPACE: &str = "eclipse-che";
/// Shared operator namespace on OpenShift; never deleted
pub const OPENSHIFT_OPERATORS_NAMESPACE: &str = "openshift-operators";

pub const PART_OF_LABEL: &str = "app.kubernetes.io/part-of";
pub const PART_OF_VALUE: &str = "che.eclipse.org";
pub const PART_OF_SELECTOR: &str = "app.kubernetes.io/part-of=che.eclipse.org";

/// Operator-side resource names
pub mod resources {
    pub const OPERATOR_SERVICE: &str = "che-operator-service";
    pub const OPERATOR_SERVICE_ACCOUNT: &str = "che-operator";
    pub const OPERATOR_SERVICE_CERT_SECRET: &str = "che-operator-service-cert";
    pub const CERTIFICATE: &str = "che-operator-serving-cert";
    pub const ISSUER: &str = "che-operator-selfsigned-issuer";
    pub const VALIDATING_WEBHOOK: &str = "org.eclipse.che";
    pub const MUTATING_WEBHOOK: &str = "org.eclipse.che";
    pub const CUSTOM_RESOURCE_CRD: &str = "checlusters.org.eclipse.che";
    pub const CUSTOM_RESOURCE_KIND: &str = "CheCluster";
    pub const TLS_SECRET_NAME: &str = "che-tls";
    pub const PROMETHEUS: &str = "prometheus-k8s";
    pub const CERT_MANAGER_INJECT_CA_ANNOTATION: &str = "cert-manager.io/inject-ca-from";
    pub const RESTARTED_AT_ANNOTATION: &str = "kubectl.kubernetes.io/restartedAt";
}

/// Workload components, their deployments and pod selectors
pub mod components {
    pub const OPERATOR: &str = "Eclipse Che Operator";
    pub const SERVER: &str = "Eclipse Che Server";
    pub const DASHBOARD: &str = "Dashboard";
    pub const GATEWAY: &str = "Gateway";
    pub const PLUGIN_REGISTRY: &str = "Plugin Registry";

    pub const OPERATOR_DEPLOYMENT: &str = "che-operator";
    pub const SERVER_DEPLOYMENT: &str = "che";
    pub const DASHBOARD_DEPLOYMENT: &str = "che-dashboard";
    pub const GATEWAY_DEPLOYMENT: &str = "che-gateway";
    pub const PLUGIN_REGISTRY_DEPLOYMENT: &str = "plugin-registry";

    pub const OPERATOR_SELECTOR: &str =
        "app.kubernetes.io/name=che,app.kubernetes.io/component=che-operator";
    pub const SERVER_SELECTOR: &str = "app.kubernetes.io/name=che,app.kubernetes.io/component=che";
    pub const DASHBOARD_SELECTOR: &str =
        "app.kubernetes.io/name=che,app.kubernetes.io/component=che-dashboard";
    pub const GATEWAY_SELECTOR: &str =
        "app.kubernetes.io/name=che,app.kubernetes.io/component=che-gateway";
    pub const PLUGIN_REGISTRY_SELECTOR: &str =
        "app.kubernetes.io/name=che,app.kubernetes.io/component=plugin-registry";
}

/// Cert-manager, required by the operator's webhooks off OpenShift
pub mod cert_manager {
    pub const NAMESPACE: &str = "cert-manager";
    pub const CONTROLLER_SELECTOR: &str = "app.kubernetes.io/name=cert-manager";
    pub const WEBHOOK_SELECTOR: &str = "app.kubernetes.io/name=webhook";
    pub const CAINJECTOR_SELECTOR: &str = "app.kubernetes.io/name=cainjector";
}

/// Operator Lifecycle Manager identifiers
pub mod olm {
    pub const PACKAGE: &str = "eclipse-che";
    pub const SUBSCRIPTION: &str = "eclipse-che";
    pub const CSV_PREFIX: &str = "eclipse-che";
    pub const STABLE_CHANNEL: &str = "stable";
    pub const STABLE_CHANNEL_CATALOG_SOURCE: &str = "community-operators";
    pub const MARKETPLACE_NAMESPACE: &str = "openshift-marketplace";
    pub const AUXILIARY_PACKAGE: &str = "devworkspace-operator";
    pub const ALM_EXAMPLES_ANNOTATION: &str = "alm-examples";
    pub const CATALOG_SOURCE_POLL_INTERVAL: &str = "15m";
}
