use super::pod_status::FailState;
use crate::client::{str_at, ResourceClient, ResourceKind};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Source of an out-of-band failure reported by whatever owns the pods
#[async_trait]
pub trait FailStateProbe: Send + Sync {
    async fn fail_state(&self) -> Result<Option<FailState>>;
}

/// Reads `status.reason` and `status.message` of the first application
/// custom resource in a namespace.
#[derive(Debug, Clone)]
pub struct CustomResourceFailState {
    client: Arc<dyn ResourceClient>,
    namespace: String,
}

impl CustomResourceFailState {
    pub fn new(client: Arc<dyn ResourceClient>, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }
}

#[async_trait]
impl FailStateProbe for CustomResourceFailState {
    async fn fail_state(&self) -> Result<Option<FailState>> {
        let resources = self
            .client
            .list(&ResourceKind::CHE_CLUSTER, Some(&self.namespace), None)
            .await?;
        Ok(resources.first().and_then(|resource| {
            FailState::from_parts(
                str_at(resource, "/status/reason"),
                str_at(resource, "/status/message"),
            )
        }))
    }
}
