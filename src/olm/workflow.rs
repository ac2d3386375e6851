use super::types::{
    from_document, version_from_csv, ClusterServiceVersion, InstallPlan, InstallPlanPhase, Subscription,
    SubscriptionState, SubscriptionStatus,
};
use crate::client::{wait_for_object, ResourceClient, ResourceKind, ResourcePatch, WaitDecision};
use crate::config::{ApprovalStrategy, OlmConfig, TimeoutConfig};
use crate::constants::{PART_OF_LABEL, PART_OF_VALUE};
use crate::error::{DeployError, Result};
use crate::shutdown::ShutdownSignal;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

/// Whether [`InstallWorkflow::ensure_subscription`] had to create the subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionAction {
    Existing,
    Created,
}

/// Result of approving a pending upgrade
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeOutcome {
    /// Nothing to approve; the latest known version is installed
    UpToDate { version: String },
    /// The package manager is already upgrading
    InProgress,
    Upgraded { package: String, from: String, to: String },
    Installed { package: String, version: String },
}

impl UpgradeOutcome {
    /// Line printed after the run, if any
    pub fn post_output_message(&self) -> Option<String> {
        match self {
            Self::Upgraded { package, from, to } => {
                Some(format!("{package} is upgraded from '{from}' to '{to}' version"))
            }
            Self::Installed { package, version } => Some(format!("{package} '{version}' version installed")),
            Self::UpToDate { .. } | Self::InProgress => None,
        }
    }

    /// Status tag shown after the task title
    pub fn tag(&self) -> String {
        match self {
            Self::UpToDate { version } => {
                format!("Everything is up to date. Installed the latest known '{version}' version")
            }
            Self::InProgress => "Upgrade is already in progress".to_string(),
            Self::Upgraded { .. } | Self::Installed { .. } => "OK".to_string(),
        }
    }
}

/// Wait budgets of the install workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowTimeouts {
    pub subscription_ready: Duration,
    pub install_plan: Duration,
    pub install_plan_update: Duration,
    pub csv: Duration,
    pub catalog_source: Duration,
}

impl WorkflowTimeouts {
    pub fn from_timeouts(timeouts: &TimeoutConfig) -> Self {
        Self {
            subscription_ready: timeouts.subscription_ready(),
            install_plan: timeouts.install_plan(),
            install_plan_update: timeouts.install_plan_update(),
            csv: timeouts.csv(),
            catalog_source: timeouts.catalog_source(),
        }
    }
}

/// Subscription, install plan and CSV state machine in one namespace.
///
/// Every wait is a bounded watch raced against the shutdown signal.
#[derive(Debug, Clone)]
pub struct InstallWorkflow {
    client: Arc<dyn ResourceClient>,
    shutdown: ShutdownSignal,
    namespace: String,
    timeouts: WorkflowTimeouts,
}

impl InstallWorkflow {
    pub fn new(
        client: Arc<dyn ResourceClient>,
        shutdown: ShutdownSignal,
        namespace: impl Into<String>,
        timeouts: WorkflowTimeouts,
    ) -> Self {
        Self {
            client,
            shutdown,
            namespace: namespace.into(),
            timeouts,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub async fn subscription(&self, name: &str) -> Result<Option<Subscription>> {
        self.client
            .get(&ResourceKind::SUBSCRIPTION, Some(&self.namespace), name)
            .await?
            .map(from_document)
            .transpose()
    }

    pub async fn cluster_service_version(&self, name: &str) -> Result<Option<ClusterServiceVersion>> {
        self.client
            .get(&ResourceKind::CLUSTER_SERVICE_VERSION, Some(&self.namespace), name)
            .await?
            .map(from_document)
            .transpose()
    }

    /// Create the subscription unless one with the same name exists
    #[instrument(skip(self, olm), fields(namespace = %self.namespace))]
    pub async fn ensure_subscription(&self, name: &str, olm: &OlmConfig) -> Result<SubscriptionAction> {
        if self
            .client
            .exists(&ResourceKind::SUBSCRIPTION, Some(&self.namespace), name)
            .await?
        {
            return Ok(SubscriptionAction::Existing);
        }

        let mut spec = json!({
            "channel": olm.channel,
            "installPlanApproval": olm.approval_strategy.to_string(),
            "name": olm.package_name,
            "source": olm.catalog_source_name,
            "sourceNamespace": olm.catalog_source_namespace,
        });
        if let Some(starting_csv) = &olm.starting_csv {
            spec["startingCSV"] = Value::String(starting_csv.clone());
        }
        let subscription = json!({
            "apiVersion": ResourceKind::SUBSCRIPTION.api_version(),
            "kind": ResourceKind::SUBSCRIPTION.kind,
            "metadata": {
                "name": name,
                "labels": {PART_OF_LABEL: PART_OF_VALUE},
            },
            "spec": spec,
        });
        self.client
            .create(&ResourceKind::SUBSCRIPTION, Some(&self.namespace), &subscription)
            .await?;
        info!(subscription = %name, "Subscription created");
        Ok(SubscriptionAction::Created)
    }

    /// Wait until the subscription has an install plan to approve, or is
    /// already installed. Returns the install plan name.
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn wait_ready_for_approval(&self, name: &str) -> Result<String> {
        wait_for_object(
            self.client.as_ref(),
            &ResourceKind::SUBSCRIPTION,
            Some(&self.namespace),
            name,
            self.timeouts.subscription_ready,
            &self.shutdown,
            format!("Timeout reached while waiting for \"{name}\" subscription is ready."),
            |object| {
                let Some(status) = subscription_status(object) else {
                    return WaitDecision::Continue;
                };
                let Some(conditions) = &status.conditions else {
                    return WaitDecision::Continue;
                };
                let ready = status.installed_csv().is_some()
                    || conditions.iter().any(|c| c.is_true("InstallPlanPending"));
                match (ready, status.installplan.and_then(|plan| plan.name)) {
                    (true, Some(plan)) => WaitDecision::Resolve(plan),
                    (true, None) => WaitDecision::Reject(DeployError::workflow(format!(
                        "Subscription {name} does not reference an InstallPlan."
                    ))),
                    (false, _) => WaitDecision::Continue,
                }
            },
        )
        .await
    }

    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn approve_install_plan(&self, name: &str) -> Result<()> {
        self.client
            .patch(
                &ResourceKind::INSTALL_PLAN,
                Some(&self.namespace),
                name,
                &ResourcePatch::Merge(json!({"spec": {"approved": true}})),
            )
            .await?;
        Ok(())
    }

    /// Wait for the install plan to report `Installed`, failing on phase `Failed`
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn wait_install_plan(&self, name: &str, timeout: Duration) -> Result<()> {
        wait_for_object(
            self.client.as_ref(),
            &ResourceKind::INSTALL_PLAN,
            Some(&self.namespace),
            name,
            timeout,
            &self.shutdown,
            format!("Timeout reached while waiting for \"{name}\" has go status 'Installed'."),
            |object| {
                let Ok(plan) = from_document::<InstallPlan>(object.clone()) else {
                    return WaitDecision::Continue;
                };
                let Some(status) = plan.status else {
                    return WaitDecision::Continue;
                };
                if status.phase == InstallPlanPhase::Failed {
                    return WaitDecision::Reject(DeployError::workflow(status.failure_message()));
                }
                if status.conditions.iter().any(|c| c.is_true("Installed")) {
                    WaitDecision::Resolve(())
                } else {
                    WaitDecision::Continue
                }
            },
        )
        .await
    }

    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn wait_installed_csv(&self, subscription: &str) -> Result<String> {
        wait_for_object(
            self.client.as_ref(),
            &ResourceKind::SUBSCRIPTION,
            Some(&self.namespace),
            subscription,
            self.timeouts.csv,
            &self.shutdown,
            format!("Timeout reached while waiting for installed CSV of '{subscription}' subscription."),
            |object| match subscription_status(object).as_ref().and_then(SubscriptionStatus::installed_csv) {
                Some(csv) => WaitDecision::Resolve(csv.to_string()),
                None => WaitDecision::Continue,
            },
        )
        .await
    }

    /// Wait for the CSV to report any phase; a `Failed` phase is an error
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn wait_csv_phase(&self, csv: &str) -> Result<String> {
        let phase = wait_for_object(
            self.client.as_ref(),
            &ResourceKind::CLUSTER_SERVICE_VERSION,
            Some(&self.namespace),
            csv,
            self.timeouts.csv,
            &self.shutdown,
            format!("Timeout reached while waiting CSV '{csv}' status."),
            |object| match crate::client::str_at(object, "/status/phase") {
                Some(phase) => WaitDecision::Resolve(phase.to_string()),
                None => WaitDecision::Continue,
            },
        )
        .await?;

        if phase != "Failed" {
            return Ok(phase);
        }
        let Some(failed) = self.cluster_service_version(csv).await? else {
            return Err(DeployError::workflow(format!(
                "Cluster service version '{csv}' not found."
            )));
        };
        let status = failed.status.unwrap_or_default();
        Err(DeployError::workflow(format!(
            "Cluster service version resource failed, cause: {}, reason: {}.",
            status.message.unwrap_or_default(),
            status.reason.unwrap_or_default()
        )))
    }

    /// Full install: subscribe, approve the first plan, wait for the CSV.
    /// Returns whether the subscription already existed.
    ///
    /// An existing subscription that already reports an installed CSV only has
    /// its CSV phase checked.
    pub async fn install(&self, name: &str, olm: &OlmConfig) -> Result<SubscriptionAction> {
        let action = self.ensure_subscription(name, olm).await?;
        if action == SubscriptionAction::Existing {
            let installed = self
                .subscription(name)
                .await?
                .and_then(|subscription| subscription.status)
                .and_then(|status| status.installed_csv().map(str::to_string));
            if let Some(csv) = installed {
                info!(subscription = %name, csv = %csv, "Subscription already installed");
                self.wait_csv_phase(&csv).await?;
                return Ok(action);
            }
        }
        let plan = self.wait_ready_for_approval(name).await?;
        self.approve_install_plan(&plan).await?;
        self.wait_install_plan(&plan, self.timeouts.install_plan).await?;
        let csv = self.wait_installed_csv(name).await?;
        self.wait_csv_phase(&csv).await?;
        Ok(action)
    }

    /// Approve a pending upgrade of the subscription, if there is one
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn approve_upgrade(&self, name: &str) -> Result<UpgradeOutcome> {
        let Some(subscription) = self.subscription(name).await? else {
            return Err(DeployError::workflow(format!("Subscription {name} not found.")));
        };
        let package = subscription.spec.name.clone();
        let Some(status) = subscription.status else {
            return Err(DeployError::workflow("InstallPlan not found."));
        };
        let current = status.current_csv.clone().unwrap_or_default();

        match status.state {
            Some(SubscriptionState::AtLatestKnown) => Ok(UpgradeOutcome::UpToDate {
                version: version_from_csv(&current).to_string(),
            }),
            Some(SubscriptionState::UpgradeAvailable) => Ok(UpgradeOutcome::InProgress),
            Some(SubscriptionState::UpgradePending) => {
                let Some(plan) = status.installplan.and_then(|plan| plan.name).filter(|n| !n.is_empty()) else {
                    return Err(DeployError::workflow(format!(
                        "{} InstallPlan name is empty.",
                        crate::constants::PRODUCT_NAME
                    )));
                };
                self.approve_install_plan(&plan).await?;
                self.wait_install_plan(&plan, self.timeouts.install_plan_update).await?;
                let to = version_from_csv(&current).to_string();
                Ok(match status.installed_csv.as_deref().filter(|csv| !csv.is_empty()) {
                    Some(installed) => UpgradeOutcome::Upgraded {
                        package,
                        from: version_from_csv(installed).to_string(),
                        to,
                    },
                    None => UpgradeOutcome::Installed { package, version: to },
                })
            }
            Some(SubscriptionState::Other(state)) => {
                Err(DeployError::workflow(format!("Subscription in '{state}' state.")))
            }
            None => Err(DeployError::workflow("Subscription in '' state.")),
        }
    }

    /// The subscription's approval strategy, which must be `Manual` for updates
    pub async fn check_manual_approval(&self, name: &str) -> Result<ApprovalStrategy> {
        let Some(subscription) = self.subscription(name).await? else {
            return Err(DeployError::workflow(format!("Subscription {name} not found.")));
        };
        match subscription.spec.install_plan_approval.as_deref() {
            Some("Automatic") => Err(DeployError::workflow(
                "Use 'update' command only with Manual InstallPlan approval strategy.",
            )),
            _ => Ok(ApprovalStrategy::Manual),
        }
    }
}

fn subscription_status(object: &Value) -> Option<SubscriptionStatus> {
    object
        .get("status")
        .cloned()
        .and_then(|status| from_document(status).ok())
}
