use super::{set_path, ReconcileOps};
use crate::client::{object_name, ResourceKind};
use crate::constants::resources::RESTARTED_AT_ANNOTATION;
use crate::context::RunContext;
use crate::error::{ClientError, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

/// Reconcile operations for one templated manifest
#[derive(Debug, Clone)]
pub struct ManifestOps {
    kind: ResourceKind,
    namespace: Option<String>,
    manifest: Value,
}

impl ManifestOps {
    /// `namespace` is ignored for cluster-scoped kinds
    pub fn new(kind: ResourceKind, namespace: impl Into<String>, manifest: Value) -> Self {
        let namespace = namespace.into();
        Self {
            namespace: kind.scope(Some(namespace.as_str())).map(str::to_string),
            kind,
            manifest,
        }
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    pub fn name(&self) -> &str {
        object_name(&self.manifest)
    }

    pub fn manifest(&self) -> &Value {
        &self.manifest
    }

    /// Manifest as sent on create: the target namespace comes from the request path
    fn create_body(&self) -> Value {
        let mut body = self.manifest.clone();
        if let Some(metadata) = body.get_mut("metadata").and_then(Value::as_object_mut) {
            metadata.remove("namespace");
            metadata.remove("resourceVersion");
        }
        body
    }

    fn replace_body(&self, live: &Value) -> Value {
        let mut body = self.create_body();
        if let Some(version) = live.pointer("/metadata/resourceVersion").cloned() {
            set_path(&mut body, &["metadata", "resourceVersion"], version);
        }
        if self.kind == ResourceKind::DEPLOYMENT {
            set_path(
                &mut body,
                &["spec", "template", "metadata", "annotations", RESTARTED_AT_ANNOTATION],
                Value::String(Utc::now().to_rfc3339()),
            );
        }
        body
    }
}

#[async_trait]
impl ReconcileOps for ManifestOps {
    async fn exists(&self, ctx: &RunContext) -> Result<bool> {
        Ok(ctx
            .client
            .exists(&self.kind, self.namespace.as_deref(), self.name())
            .await?)
    }

    async fn create(&self, ctx: &RunContext) -> Result<()> {
        ctx.client
            .create(&self.kind, self.namespace.as_deref(), &self.create_body())
            .await?;
        Ok(())
    }

    async fn replace(&self, ctx: &RunContext) -> Result<()> {
        let namespace = self.namespace.as_deref();
        let name = self.name();
        let Some(live) = ctx.client.get(&self.kind, namespace, name).await? else {
            return Err(ClientError::not_found(self.kind.kind, name).into());
        };

        match ctx
            .client
            .replace(&self.kind, namespace, name, &self.replace_body(&live))
            .await
        {
            Ok(_) => Ok(()),
            Err(error) if error.is_conflict() => {
                warn!(
                    kind = self.kind.kind,
                    name = %name,
                    error = %error,
                    "Replace rejected, recreating object"
                );
                ctx.client.delete(&self.kind, namespace, name).await?;
                ctx.client
                    .create(&self.kind, namespace, &self.create_body())
                    .await?;
                info!(kind = self.kind.kind, name = %name, "Object recreated");
                Ok(())
            }
            Err(error) => Err(error.into()),
        }
    }
}
