//! [`ResourceClient`] backed by a live API server.
//!
//! Every kind is addressed dynamically through [`ApiResource`] so the same
//! code path serves core objects, OLM objects and the application's own
//! custom resource.

use super::{ObjectStream, ResourceClient, ResourceKind, ResourcePatch};
use crate::error::{ClientError, ClientResult};
use crate::logging::log_resource_operation;
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch,
    PatchParams, PostParams,
};
use kube::runtime::watcher;
use serde_json::Value;
use tracing::debug;

/// Cluster client over `kube`
#[derive(Clone)]
pub struct KubeResourceClient {
    client: kube::Client,
}

impl std::fmt::Debug for KubeResourceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeResourceClient").finish_non_exhaustive()
    }
}

impl KubeResourceClient {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    /// Connect using the ambient kubeconfig or in-cluster service account
    pub async fn try_default() -> ClientResult<Self> {
        let client = kube::Client::try_default()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Ok(Self::new(client))
    }

    fn api(&self, kind: &ResourceKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let gvk = GroupVersionKind::gvk(kind.group, kind.version, kind.kind);
        let resource = ApiResource::from_gvk_with_plural(&gvk, kind.plural);
        match kind.scope(namespace) {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &resource),
            None => Api::all_with(self.client.clone(), &resource),
        }
    }
}

/// Serialize an object and restore the type fields list responses omit
fn to_document(kind: &ResourceKind, object: DynamicObject) -> ClientResult<Value> {
    let mut document = serde_json::to_value(object)?;
    if let Some(map) = document.as_object_mut() {
        map.entry("apiVersion")
            .or_insert_with(|| Value::String(kind.api_version()));
        map.entry("kind")
            .or_insert_with(|| Value::String(kind.kind.to_string()));
    }
    Ok(document)
}

fn to_object(body: &Value) -> ClientResult<DynamicObject> {
    Ok(serde_json::from_value(body.clone())?)
}

/// Translate API server rejections into the client error vocabulary
fn map_error(kind: &ResourceKind, name: &str, error: kube::Error) -> ClientError {
    match error {
        kube::Error::Api(response) => match response.code {
            404 => ClientError::not_found(kind.kind, name),
            409 if response.reason == "AlreadyExists" => ClientError::AlreadyExists {
                kind: kind.kind.to_string(),
                name: name.to_string(),
            },
            409 => ClientError::conflict(kind.kind, name, response.message),
            422 if response.message.contains("field is immutable") => {
                ClientError::conflict(kind.kind, name, response.message)
            }
            code => ClientError::api(code, response.reason, response.message),
        },
        other => ClientError::Transport(other.to_string()),
    }
}

#[async_trait]
impl ResourceClient for KubeResourceClient {
    async fn get(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> ClientResult<Option<Value>> {
        let found = self
            .api(kind, namespace)
            .get_opt(name)
            .await
            .map_err(|e| map_error(kind, name, e))?;
        found.map(|object| to_document(kind, object)).transpose()
    }

    async fn create(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        body: &Value,
    ) -> ClientResult<Value> {
        let name = super::object_name(body).to_string();
        let created = self
            .api(kind, namespace)
            .create(&PostParams::default(), &to_object(body)?)
            .await
            .map_err(|e| map_error(kind, &name, e))?;
        log_resource_operation("create", kind.kind, namespace, &name, "ok");
        to_document(kind, created)
    }

    async fn replace(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        name: &str,
        body: &Value,
    ) -> ClientResult<Value> {
        let replaced = self
            .api(kind, namespace)
            .replace(name, &PostParams::default(), &to_object(body)?)
            .await
            .map_err(|e| map_error(kind, name, e))?;
        log_resource_operation("replace", kind.kind, namespace, name, "ok");
        to_document(kind, replaced)
    }

    async fn patch(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        name: &str,
        patch: &ResourcePatch,
    ) -> ClientResult<Value> {
        let ResourcePatch::Merge(document) = patch;
        let patched = self
            .api(kind, namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(document))
            .await
            .map_err(|e| map_error(kind, name, e))?;
        log_resource_operation("patch", kind.kind, namespace, name, "ok");
        to_document(kind, patched)
    }

    async fn delete(&self, kind: &ResourceKind, namespace: Option<&str>, name: &str) -> ClientResult<()> {
        match self
            .api(kind, namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => {
                log_resource_operation("delete", kind.kind, namespace, name, "ok");
                Ok(())
            }
            Err(e) => match map_error(kind, name, e) {
                ClientError::NotFound { .. } => {
                    log_resource_operation("delete", kind.kind, namespace, name, "absent");
                    Ok(())
                }
                other => Err(other),
            },
        }
    }

    async fn list(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> ClientResult<Vec<Value>> {
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        let list = self
            .api(kind, namespace)
            .list(&params)
            .await
            .map_err(|e| map_error(kind, label_selector.unwrap_or_default(), e))?;
        list.items
            .into_iter()
            .map(|object| to_document(kind, object))
            .collect()
    }

    async fn watch(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> ClientResult<ObjectStream> {
        debug!(kind = kind.kind, namespace = ?namespace, name = %name, "Opening watch");
        let config = watcher::Config::default().fields(&format!("metadata.name={name}"));
        let kind = *kind;
        let stream = watcher(self.api(&kind, namespace), config)
            .map_err(|e| ClientError::Transport(e.to_string()))
            .try_filter_map(move |event| async move {
                match event {
                    watcher::Event::Apply(object) | watcher::Event::InitApply(object) => {
                        to_document(&kind, object).map(Some)
                    }
                    watcher::Event::Delete(_) | watcher::Event::Init | watcher::Event::InitDone => {
                        Ok(None)
                    }
                }
            })
            .boxed();
        Ok(stream)
    }

    async fn server_version(&self) -> ClientResult<String> {
        let info = self
            .client
            .apiserver_version()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Ok(if info.git_version.is_empty() {
            format!("{}.{}", info.major, info.minor)
        } else {
            info.git_version
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, reason: &str, message: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: message.to_string(),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn test_error_mapping() {
        let kind = ResourceKind::DEPLOYMENT;
        assert!(map_error(&kind, "che", api_error(404, "NotFound", "gone")).is_not_found());
        assert!(map_error(&kind, "che", api_error(409, "Conflict", "stale")).is_conflict());
        assert!(matches!(
            map_error(&kind, "che", api_error(409, "AlreadyExists", "exists")),
            ClientError::AlreadyExists { .. }
        ));
        assert!(map_error(
            &kind,
            "che",
            api_error(422, "Invalid", "spec.selector: Invalid value: field is immutable")
        )
        .is_conflict());
        assert!(matches!(
            map_error(&kind, "che", api_error(403, "Forbidden", "denied")),
            ClientError::Api { code: 403, .. }
        ));
    }

    #[test]
    fn test_to_document_restores_type_fields() {
        let object: DynamicObject = serde_json::from_value(serde_json::json!({
            "metadata": {"name": "che-tls"}
        }))
        .unwrap();
        let document = to_document(&ResourceKind::SECRET, object).unwrap();
        assert_eq!(document["apiVersion"], "v1");
        assert_eq!(document["kind"], "Secret");
        assert_eq!(document["metadata"]["name"], "che-tls");
    }
}
