//! Pure evaluation of pod lists.
//!
//! Every function here inspects a snapshot of typed [`Pod`]s; the poller lists
//! pods once per tick and feeds the same snapshot to all of them.

use crate::constants::PRODUCT_NAME;
use k8s_openapi::api::core::v1::{ContainerStateTerminated, Pod};
use serde::Serialize;
use std::fmt;

pub const POD_SCHEDULED: &str = "PodScheduled";
pub const READY: &str = "Ready";

/// Reason and message of an observed failure; both are always non-empty
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailState {
    pub reason: String,
    pub message: String,
}

impl FailState {
    /// `None` unless both parts are present and non-empty
    pub fn from_parts(reason: Option<&str>, message: Option<&str>) -> Option<Self> {
        match (reason, message) {
            (Some(reason), Some(message)) if !reason.is_empty() && !message.is_empty() => Some(Self {
                reason: reason.to_string(),
                message: message.to_string(),
            }),
            _ => None,
        }
    }
}

impl fmt::Display for FailState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reason: {}, message: {}", self.reason, self.message)
    }
}

fn phase_of(pod: &Pod) -> Option<&str> {
    pod.status.as_ref().and_then(|status| status.phase.as_deref())
}

/// First condition of `condition_type` that is `False` with a reason and message
pub fn condition_fail_state(pods: &[Pod], condition_type: &str) -> Option<FailState> {
    pods.iter()
        .filter_map(|pod| pod.status.as_ref()?.conditions.as_ref())
        .flatten()
        .filter(|condition| condition.type_ == condition_type && condition.status == "False")
        .find_map(|condition| FailState::from_parts(condition.reason.as_deref(), condition.message.as_deref()))
}

/// At least one pod exists, and every pod carries a `condition_type`
/// condition with all of them `True`
pub fn conditions_passed(pods: &[Pod], condition_type: &str) -> bool {
    !pods.is_empty()
        && pods.iter().all(|pod| {
            let mut matching = pod
                .status
                .as_ref()
                .and_then(|status| status.conditions.as_deref())
                .unwrap_or_default()
                .iter()
                .filter(|condition| condition.type_ == condition_type)
                .peekable();
            matching.peek().is_some() && matching.all(|condition| condition.status == "True")
        })
}

/// First container waiting state with a reason and message, in pods whose phase is `pod_phase`
pub fn container_fail_state(pods: &[Pod], pod_phase: &str) -> Option<FailState> {
    pods.iter()
        .filter(|pod| phase_of(pod) == Some(pod_phase))
        .filter_map(|pod| pod.status.as_ref()?.container_statuses.as_ref())
        .flatten()
        .filter_map(|container| container.state.as_ref()?.waiting.as_ref())
        .find_map(|waiting| FailState::from_parts(waiting.reason.as_deref(), waiting.message.as_deref()))
}

/// First container whose previous run terminated
pub fn last_terminated_state(pods: &[Pod]) -> Option<&ContainerStateTerminated> {
    pods.iter()
        .filter_map(|pod| pod.status.as_ref()?.container_statuses.as_ref())
        .flatten()
        .find_map(|container| container.last_state.as_ref()?.terminated.as_ref())
}

/// At least one pod exists and all of them are `Running`
pub fn all_running(pods: &[Pod]) -> bool {
    !pods.is_empty() && pods.iter().all(|pod| phase_of(pod) == Some("Running"))
}

/// Fatal message for a container that terminated while starting
pub fn terminated_message(terminated: &ContainerStateTerminated) -> String {
    let mut message = format!(
        "Failed to start a pod, reason: {}",
        terminated.reason.as_deref().unwrap_or_default()
    );
    if let Some(detail) = terminated.message.as_deref().filter(|m| !m.is_empty()) {
        message.push_str(&format!(", message: {detail}"));
    }
    if terminated.exit_code != 0 {
        message.push_str(&format!(", exitCode: {}", terminated.exit_code));
    }
    if let Some(signal) = terminated.signal.filter(|signal| *signal != 0) {
        message.push_str(&format!(", signal: {signal}"));
    }
    message
}

/// Message used when no pod matched the selector for a whole phase
pub fn no_pods_message(namespace: &str, selector: &str) -> String {
    format!(
        "Timeout: there are no pods in the namespace: {namespace}, selector: {selector}. \
         Check {PRODUCT_NAME} logs for details. Consider increasing error recheck timeout \
         with --k8spoderrorrechecktimeout flag."
    )
}

/// `Timeout:` followed by every pod's container statuses and conditions
pub fn timeout_diagnostics(pods: &[Pod]) -> String {
    let mut message = String::from("Timeout:");
    for pod in pods {
        message.push_str(&format!(
            "\nPod: {}",
            pod.metadata.name.as_deref().unwrap_or_default()
        ));
        let Some(status) = &pod.status else {
            message.push_str(", status not found.");
            continue;
        };
        if let Some(containers) = &status.container_statuses {
            message.push_str(&format!("\n\t\tstatus: {}", pretty(containers)));
        }
        if let Some(conditions) = &status.conditions {
            message.push_str(&format!("\n\t\tconditions: {}", pretty(conditions)));
        }
    }
    message
}

fn pretty(value: &impl Serialize) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pod(value: serde_json::Value) -> Pod {
        serde_json::from_value(value).unwrap()
    }

    fn scheduled(name: &str, status: &str) -> Pod {
        pod(json!({
            "metadata": {"name": name},
            "status": {"phase": "Pending", "conditions": [{"type": "PodScheduled", "status": status}]}
        }))
    }

    #[test]
    fn test_conditions_passed_requires_all_and_at_least_one() {
        assert!(!conditions_passed(&[], POD_SCHEDULED));
        assert!(conditions_passed(&[scheduled("a", "True"), scheduled("b", "True")], POD_SCHEDULED));
        assert!(!conditions_passed(&[scheduled("a", "True"), scheduled("b", "False")], POD_SCHEDULED));
    }

    #[test]
    fn test_pod_without_condition_has_not_passed() {
        let pending = pod(json!({"metadata": {"name": "c"}, "status": {"phase": "Pending"}}));
        let no_status = pod(json!({"metadata": {"name": "d"}}));
        assert!(!conditions_passed(&[scheduled("a", "True"), pending], POD_SCHEDULED));
        assert!(!conditions_passed(&[scheduled("a", "True"), no_status], POD_SCHEDULED));
    }

    #[test]
    fn test_condition_fail_state_needs_reason_and_message() {
        let bare = scheduled("a", "False");
        assert_eq!(condition_fail_state(&[bare], POD_SCHEDULED), None);

        let unschedulable = pod(json!({
            "metadata": {"name": "a"},
            "status": {"conditions": [{
                "type": "PodScheduled", "status": "False",
                "reason": "Unschedulable", "message": "0/1 nodes are available"
            }]}
        }));
        assert_eq!(
            condition_fail_state(&[unschedulable], POD_SCHEDULED),
            Some(FailState {
                reason: "Unschedulable".into(),
                message: "0/1 nodes are available".into()
            })
        );
    }

    #[test]
    fn test_container_fail_state_filters_by_pod_phase() {
        let pulling = pod(json!({
            "metadata": {"name": "a"},
            "status": {"phase": "Pending", "containerStatuses": [{
                "name": "c", "image": "i", "imageID": "", "ready": false, "restartCount": 0,
                "state": {"waiting": {"reason": "ErrImagePull", "message": "not found"}}
            }]}
        }));
        assert!(container_fail_state(std::slice::from_ref(&pulling), "Pending").is_some());
        assert!(container_fail_state(&[pulling], "Running").is_none());
    }

    #[test]
    fn test_terminated_message_includes_present_parts() {
        let terminated = ContainerStateTerminated {
            reason: Some("Error".into()),
            message: None,
            exit_code: 137,
            signal: None,
            ..Default::default()
        };
        assert_eq!(
            terminated_message(&terminated),
            "Failed to start a pod, reason: Error, exitCode: 137"
        );
    }

    #[test]
    fn test_timeout_diagnostics_lists_every_pod() {
        let pods = vec![
            scheduled("che-1", "False"),
            pod(json!({"metadata": {"name": "che-2"}})),
        ];
        let message = timeout_diagnostics(&pods);
        assert!(message.starts_with("Timeout:"));
        assert!(message.contains("Pod: che-1"));
        assert!(message.contains("conditions: ["));
        assert!(message.contains("Pod: che-2, status not found."));
    }

    #[test]
    fn test_all_running() {
        let running = pod(json!({"metadata": {"name": "a"}, "status": {"phase": "Running"}}));
        assert!(!all_running(&[]));
        assert!(all_running(std::slice::from_ref(&running)));
        assert!(!all_running(&[running, scheduled("b", "True")]));
    }
}
