use serde_json::Value;
use std::fmt;

/// API coordinates of a resource type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceKind {
    /// API group, empty for the core group
    pub group: &'static str,
    pub version: &'static str,
    pub kind: &'static str,
    pub plural: &'static str,
    pub namespaced: bool,
}

impl ResourceKind {
    pub const fn new(
        group: &'static str,
        version: &'static str,
        kind: &'static str,
        plural: &'static str,
        namespaced: bool,
    ) -> Self {
        Self {
            group,
            version,
            kind,
            plural,
            namespaced,
        }
    }

    pub const NAMESPACE: Self = Self::new("", "v1", "Namespace", "namespaces", false);
    pub const POD: Self = Self::new("", "v1", "Pod", "pods", true);
    pub const SERVICE: Self = Self::new("", "v1", "Service", "services", true);
    pub const SERVICE_ACCOUNT: Self =
        Self::new("", "v1", "ServiceAccount", "serviceaccounts", true);
    pub const CONFIG_MAP: Self = Self::new("", "v1", "ConfigMap", "configmaps", true);
    pub const SECRET: Self = Self::new("", "v1", "Secret", "secrets", true);
    pub const DEPLOYMENT: Self = Self::new("apps", "v1", "Deployment", "deployments", true);
    pub const ROLE: Self = Self::new("rbac.authorization.k8s.io", "v1", "Role", "roles", true);
    pub const ROLE_BINDING: Self = Self::new(
        "rbac.authorization.k8s.io",
        "v1",
        "RoleBinding",
        "rolebindings",
        true,
    );
    pub const CLUSTER_ROLE: Self = Self::new(
        "rbac.authorization.k8s.io",
        "v1",
        "ClusterRole",
        "clusterroles",
        false,
    );
    pub const CLUSTER_ROLE_BINDING: Self = Self::new(
        "rbac.authorization.k8s.io",
        "v1",
        "ClusterRoleBinding",
        "clusterrolebindings",
        false,
    );
    pub const CUSTOM_RESOURCE_DEFINITION: Self = Self::new(
        "apiextensions.k8s.io",
        "v1",
        "CustomResourceDefinition",
        "customresourcedefinitions",
        false,
    );
    pub const VALIDATING_WEBHOOK: Self = Self::new(
        "admissionregistration.k8s.io",
        "v1",
        "ValidatingWebhookConfiguration",
        "validatingwebhookconfigurations",
        false,
    );
    pub const MUTATING_WEBHOOK: Self = Self::new(
        "admissionregistration.k8s.io",
        "v1",
        "MutatingWebhookConfiguration",
        "mutatingwebhookconfigurations",
        false,
    );
    pub const CERTIFICATE: Self =
        Self::new("cert-manager.io", "v1", "Certificate", "certificates", true);
    pub const ISSUER: Self = Self::new("cert-manager.io", "v1", "Issuer", "issuers", true);
    pub const SUBSCRIPTION: Self = Self::new(
        "operators.coreos.com",
        "v1alpha1",
        "Subscription",
        "subscriptions",
        true,
    );
    pub const INSTALL_PLAN: Self = Self::new(
        "operators.coreos.com",
        "v1alpha1",
        "InstallPlan",
        "installplans",
        true,
    );
    pub const CLUSTER_SERVICE_VERSION: Self = Self::new(
        "operators.coreos.com",
        "v1alpha1",
        "ClusterServiceVersion",
        "clusterserviceversions",
        true,
    );
    pub const CATALOG_SOURCE: Self = Self::new(
        "operators.coreos.com",
        "v1alpha1",
        "CatalogSource",
        "catalogsources",
        true,
    );
    pub const OPERATOR: Self =
        Self::new("operators.coreos.com", "v1", "Operator", "operators", false);
    pub const CHE_CLUSTER: Self = Self::new("org.eclipse.che", "v2", "CheCluster", "checlusters", true);

    const KNOWN: [Self; 22] = [
        Self::NAMESPACE,
        Self::POD,
        Self::SERVICE,
        Self::SERVICE_ACCOUNT,
        Self::CONFIG_MAP,
        Self::SECRET,
        Self::DEPLOYMENT,
        Self::ROLE,
        Self::ROLE_BINDING,
        Self::CLUSTER_ROLE,
        Self::CLUSTER_ROLE_BINDING,
        Self::CUSTOM_RESOURCE_DEFINITION,
        Self::VALIDATING_WEBHOOK,
        Self::MUTATING_WEBHOOK,
        Self::CERTIFICATE,
        Self::ISSUER,
        Self::SUBSCRIPTION,
        Self::INSTALL_PLAN,
        Self::CLUSTER_SERVICE_VERSION,
        Self::CATALOG_SOURCE,
        Self::OPERATOR,
        Self::CHE_CLUSTER,
    ];

    /// `group/version`, or just `version` for the core group
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.to_string()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Resolve the kind a manifest declares through `apiVersion` and `kind`
    pub fn of_manifest(manifest: &Value) -> Option<Self> {
        let api_version = manifest.get("apiVersion")?.as_str()?;
        let kind = manifest.get("kind")?.as_str()?;
        Self::KNOWN
            .iter()
            .find(|known| known.kind == kind && known.api_version() == api_version)
            .copied()
    }

    /// The namespace to address for this kind; cluster-scoped kinds ignore it
    pub fn scope<'a>(&self, namespace: Option<&'a str>) -> Option<&'a str> {
        if self.namespaced {
            namespace
        } else {
            None
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}
