//! # Run Context
//!
//! Everything a task body can see during one command invocation. Shared,
//! read-only parts sit behind `Arc`; the mutable [`RunState`] is owned, so a
//! parallel group can fork one copy per branch and merge them back after the
//! join without any shared mutable map.

use crate::client::ResourceClient;
use crate::config::DeploySettings;
use crate::error::{DeployError, Result};
use crate::progress::ProgressPublisher;
use crate::shutdown::ShutdownSignal;
use serde_json::Value;
use std::sync::Arc;

/// Facts discovered about the target cluster
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InfrastructureFacts {
    pub is_openshift: Option<bool>,
    pub kubernetes_version: Option<String>,
}

/// Deployed and target operator images, recorded before an update
#[derive(Debug, Clone, PartialEq)]
pub struct ImageUpgrade {
    pub deployed_image: String,
    pub deployed_tag: String,
    pub new_image: String,
    pub new_tag: String,
}

impl ImageUpgrade {
    pub fn from_images(deployed: &str, new: &str) -> Self {
        let (deployed_image, deployed_tag) = split_image(deployed);
        let (new_image, new_tag) = split_image(new);
        Self {
            deployed_image,
            deployed_tag,
            new_image,
            new_tag,
        }
    }
}

/// Split `repo[:tag]` or `repo@digest`; a missing tag reads as `latest`
pub fn split_image(image: &str) -> (String, String) {
    if let Some((repo, digest)) = image.split_once('@') {
        return (repo.to_string(), digest.to_string());
    }
    match image.rsplit_once(':') {
        // A colon before the last slash belongs to a registry port
        Some((repo, tag)) if !tag.contains('/') => (repo.to_string(), tag.to_string()),
        _ => (image.to_string(), "latest".to_string()),
    }
}

/// Output accumulated by task bodies over one run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunState {
    /// Lines printed once the run succeeds
    pub post_output_messages: Vec<String>,
    pub infrastructure: InfrastructureFacts,
    /// Custom resource sample read from the installed CSV
    pub custom_resource_sample: Option<Value>,
    pub operator_image_upgrade: Option<ImageUpgrade>,
}

impl RunState {
    pub fn push_message(&mut self, message: impl Into<String>) {
        self.post_output_messages.push(message.into());
    }

    /// Fold the states of parallel branches back into `self`.
    ///
    /// `self` must be the state the branches were forked from. Messages are
    /// appended in branch order. A fact changed by a branch is adopted, and a
    /// fact changed differently by two branches is a [`DeployError::ContextConflict`].
    pub fn merge_branches(&mut self, branches: Vec<RunState>) -> Result<()> {
        let base = self.clone();
        for branch in branches {
            self.post_output_messages.extend(
                branch
                    .post_output_messages
                    .into_iter()
                    .skip(base.post_output_messages.len()),
            );
            merge_fact(
                "infrastructure.is_openshift",
                &base.infrastructure.is_openshift,
                &mut self.infrastructure.is_openshift,
                branch.infrastructure.is_openshift,
            )?;
            merge_fact(
                "infrastructure.kubernetes_version",
                &base.infrastructure.kubernetes_version,
                &mut self.infrastructure.kubernetes_version,
                branch.infrastructure.kubernetes_version,
            )?;
            merge_fact(
                "custom_resource_sample",
                &base.custom_resource_sample,
                &mut self.custom_resource_sample,
                branch.custom_resource_sample,
            )?;
            merge_fact(
                "operator_image_upgrade",
                &base.operator_image_upgrade,
                &mut self.operator_image_upgrade,
                branch.operator_image_upgrade,
            )?;
        }
        Ok(())
    }
}

fn merge_fact<T: PartialEq>(field: &str, base: &T, merged: &mut T, branch: T) -> Result<()> {
    if branch == *base {
        return Ok(());
    }
    if *merged != *base && *merged != branch {
        return Err(DeployError::ContextConflict {
            field: field.to_string(),
        });
    }
    *merged = branch;
    Ok(())
}

/// Execution context threaded through every task body
#[derive(Debug, Clone)]
pub struct RunContext {
    pub settings: Arc<DeploySettings>,
    pub client: Arc<dyn ResourceClient>,
    pub shutdown: ShutdownSignal,
    pub progress: ProgressPublisher,
    pub state: RunState,
}

impl RunContext {
    pub fn new(
        settings: Arc<DeploySettings>,
        client: Arc<dyn ResourceClient>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            settings,
            client,
            shutdown,
            progress: ProgressPublisher::default(),
            state: RunState::default(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressPublisher) -> Self {
        self.progress = progress;
        self
    }

    /// Branch copy for a parallel group member
    pub fn fork(&self) -> Self {
        self.clone()
    }

    pub fn namespace(&self) -> &str {
        self.settings.namespace()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_split_image() {
        assert_eq!(
            split_image("quay.io/eclipse/che-operator:7.90.0"),
            ("quay.io/eclipse/che-operator".to_string(), "7.90.0".to_string())
        );
        assert_eq!(
            split_image("localhost:5000/che-operator"),
            ("localhost:5000/che-operator".to_string(), "latest".to_string())
        );
        assert_eq!(
            split_image("quay.io/che@sha256:abc"),
            ("quay.io/che".to_string(), "sha256:abc".to_string())
        );
    }

    #[test]
    fn test_merge_appends_messages_in_branch_order() {
        let mut base = RunState::default();
        base.push_message("before");

        let mut first = base.clone();
        first.push_message("from first");
        let mut second = base.clone();
        second.push_message("from second");

        base.merge_branches(vec![first, second]).unwrap();
        assert_eq!(
            base.post_output_messages,
            vec!["before", "from first", "from second"]
        );
    }

    #[test]
    fn test_merge_adopts_facts_written_by_one_branch() {
        let mut base = RunState::default();
        let mut first = base.clone();
        first.infrastructure.kubernetes_version = Some("v1.32.0".into());
        let mut second = base.clone();
        second.custom_resource_sample = Some(json!({"kind": "CheCluster"}));

        base.merge_branches(vec![first, second]).unwrap();
        assert_eq!(base.infrastructure.kubernetes_version.as_deref(), Some("v1.32.0"));
        assert!(base.custom_resource_sample.is_some());
    }

    #[test]
    fn test_merge_agreeing_writes_is_not_a_conflict() {
        let mut base = RunState::default();
        let mut first = base.clone();
        first.infrastructure.is_openshift = Some(true);
        let second = first.clone();

        assert!(base.merge_branches(vec![first, second]).is_ok());
    }

    #[test]
    fn test_merge_conflicting_writes_fails() {
        let mut base = RunState::default();
        let mut first = base.clone();
        first.infrastructure.is_openshift = Some(true);
        let mut second = base.clone();
        second.infrastructure.is_openshift = Some(false);

        let err = base.merge_branches(vec![first, second]).unwrap_err();
        assert!(matches!(
            err,
            DeployError::ContextConflict { ref field } if field == "infrastructure.is_openshift"
        ));
    }
}
