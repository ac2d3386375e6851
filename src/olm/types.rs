//! Typed views over Operator Lifecycle Manager objects.
//!
//! Only the fields the install workflow reads are modelled; unknown fields are
//! ignored on deserialization.

use crate::error::{ClientError, Result};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parse a raw document into one of the typed views
pub fn from_document<T: serde::de::DeserializeOwned>(document: Value) -> Result<T> {
    Ok(serde_json::from_value(document).map_err(ClientError::from)?)
}

/// Condition entry shared by subscriptions and install plans
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl Condition {
    pub fn is_true(&self, condition_type: &str) -> bool {
        self.type_ == condition_type && self.status == "True"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSpec {
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub install_plan_approval: Option<String>,
    /// Package name
    pub name: String,
    pub source: String,
    pub source_namespace: String,
    #[serde(default, rename = "startingCSV", skip_serializing_if = "Option::is_none")]
    pub starting_csv: Option<String>,
}

/// Upgrade state reported by the package manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionState {
    AtLatestKnown,
    UpgradeAvailable,
    UpgradePending,
    #[serde(untagged)]
    Other(String),
}

impl std::fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AtLatestKnown => write!(f, "AtLatestKnown"),
            Self::UpgradeAvailable => write!(f, "UpgradeAvailable"),
            Self::UpgradePending => write!(f, "UpgradePending"),
            Self::Other(state) => write!(f, "{state}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstallPlanReference {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatus {
    #[serde(default)]
    pub state: Option<SubscriptionState>,
    #[serde(default, rename = "installedCSV")]
    pub installed_csv: Option<String>,
    #[serde(default, rename = "currentCSV")]
    pub current_csv: Option<String>,
    #[serde(default)]
    pub installplan: Option<InstallPlanReference>,
    #[serde(default)]
    pub conditions: Option<Vec<Condition>>,
}

impl SubscriptionStatus {
    pub fn installed_csv(&self) -> Option<&str> {
        self.installed_csv.as_deref().filter(|csv| !csv.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: SubscriptionSpec,
    #[serde(default)]
    pub status: Option<SubscriptionStatus>,
}

impl Subscription {
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }
}

/// Install plan phase; anything unrecognised reads as empty
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstallPlanPhase {
    Installing,
    Failed,
    Installed,
    #[default]
    #[serde(rename = "", other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstallPlanStatus {
    #[serde(default)]
    pub phase: InstallPlanPhase,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl InstallPlanStatus {
    /// `Reason: R Message: M` for every condition that carries a reason
    pub fn failure_message(&self) -> String {
        self.conditions
            .iter()
            .filter_map(|condition| {
                let reason = condition.reason.as_deref().filter(|r| !r.is_empty())?;
                Some(match condition.message.as_deref().filter(|m| !m.is_empty()) {
                    Some(message) => format!("Reason: {reason} Message: {message}"),
                    None => format!("Reason: {reason}"),
                })
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstallPlan {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: Option<InstallPlanStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterServiceVersionStatus {
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterServiceVersion {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: Option<ClusterServiceVersionStatus>,
}

impl ClusterServiceVersion {
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(key))
            .map(String::as_str)
    }
}

/// Version part of a CSV name: the text after the last `v`
pub fn version_from_csv(csv_name: &str) -> &str {
    csv_name
        .rfind('v')
        .map_or(csv_name, |index| &csv_name[index + 1..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subscription_state_parsing() {
        let subscription: Subscription = from_document(json!({
            "metadata": {"name": "eclipse-che"},
            "spec": {"name": "eclipse-che", "source": "community-operators", "sourceNamespace": "openshift-marketplace"},
            "status": {"state": "AtLatestKnown", "currentCSV": "eclipse-che.v7.90.0"}
        }))
        .unwrap();
        let status = subscription.status.unwrap();
        assert_eq!(status.state, Some(SubscriptionState::AtLatestKnown));
        assert_eq!(status.current_csv.as_deref(), Some("eclipse-che.v7.90.0"));

        let other: SubscriptionStatus = from_document(json!({"state": "Frozen"})).unwrap();
        assert_eq!(other.state, Some(SubscriptionState::Other("Frozen".into())));
    }

    #[test]
    fn test_install_plan_phase_defaults() {
        let plan: InstallPlan = from_document(json!({"status": {"phase": "Complete"}})).unwrap();
        assert_eq!(plan.status.unwrap().phase, InstallPlanPhase::Unknown);
        let plan: InstallPlan = from_document(json!({"status": {"phase": "Failed"}})).unwrap();
        assert_eq!(plan.status.unwrap().phase, InstallPlanPhase::Failed);

        let status: InstallPlanStatus = from_document(json!({})).unwrap();
        assert_eq!(status.phase, InstallPlanPhase::Unknown);
        assert_eq!(serde_json::to_value(InstallPlanPhase::Unknown).unwrap(), json!(""));
        assert_eq!(serde_json::to_value(InstallPlanPhase::Installed).unwrap(), json!("Installed"));
    }

    #[test]
    fn test_failure_message_collects_conditions_with_reason() {
        let status: InstallPlanStatus = from_document(json!({
            "phase": "Failed",
            "conditions": [
                {"type": "Installed", "status": "False", "reason": "InstallComponentFailed", "message": "rbac denied"},
                {"type": "Other", "status": "False"},
                {"type": "Bundle", "status": "False", "reason": "BundleLookupFailed"}
            ]
        }))
        .unwrap();
        assert_eq!(
            status.failure_message(),
            "Reason: InstallComponentFailed Message: rbac denied Reason: BundleLookupFailed"
        );
    }

    #[test]
    fn test_version_from_csv() {
        assert_eq!(version_from_csv("eclipse-che.v7.90.0"), "7.90.0");
        assert_eq!(version_from_csv("nothing"), "nothing");
    }
}
