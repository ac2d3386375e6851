//! In-process object store implementing [`ResourceClient`].
//!
//! Used by the test suite and for dry runs. Writes bump a per-store
//! `resourceVersion`, notify watchers through a broadcast channel and are
//! counted so idempotence can be asserted. Failures can be queued per
//! operation to exercise retry paths.

use super::{object_name, LabelSelector, ObjectStream, ResourceClient, ResourceKind, ResourcePatch};
use crate::error::{ClientError, ClientResult};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::broadcast;

type ObjectKey = (&'static str, String, String);

/// Operations that accept injected failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    Create,
    Replace,
    Patch,
    Delete,
    List,
}

#[derive(Debug, Clone)]
struct ChangeEvent {
    key: ObjectKey,
    object: Value,
}

/// Thread-safe in-memory cluster
#[derive(Debug)]
pub struct InMemoryResourceClient {
    objects: RwLock<BTreeMap<ObjectKey, Value>>,
    resource_version: AtomicU64,
    writes: AtomicUsize,
    failures: Mutex<HashMap<Operation, VecDeque<ClientError>>>,
    changes: broadcast::Sender<ChangeEvent>,
    server_version: String,
}

impl Default for InMemoryResourceClient {
    fn default() -> Self {
        Self::new()
    }
}

fn key(kind: &ResourceKind, namespace: Option<&str>, name: &str) -> ObjectKey {
    (
        kind.plural,
        kind.scope(namespace).unwrap_or_default().to_string(),
        name.to_string(),
    )
}

/// RFC 7386 merge of `patch` into `target`
pub(crate) fn merge_patch(target: &mut Value, patch: &Value) {
    match patch {
        Value::Object(entries) => {
            if !target.is_object() {
                *target = Value::Object(Map::new());
            }
            if let Value::Object(map) = target {
                for (field, value) in entries {
                    if value.is_null() {
                        map.remove(field);
                    } else {
                        merge_patch(map.entry(field.clone()).or_insert(Value::Null), value);
                    }
                }
            }
        }
        other => *target = other.clone(),
    }
}

impl InMemoryResourceClient {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(1024);
        Self {
            objects: RwLock::new(BTreeMap::new()),
            resource_version: AtomicU64::new(0),
            writes: AtomicUsize::new(0),
            failures: Mutex::new(HashMap::new()),
            changes,
            server_version: "v1.32.0".to_string(),
        }
    }

    /// Number of create/replace/patch/delete calls that reached the store
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Queue an error returned by the next call of `operation`
    pub fn fail_next(&self, operation: Operation, error: ClientError) {
        self.failures
            .lock()
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Store an object as-is, bypassing write accounting. Used to seed state.
    pub fn upsert(&self, kind: &ResourceKind, namespace: Option<&str>, object: Value) -> Value {
        let name = object_name(&object).to_string();
        self.store(kind, namespace, &name, object)
    }

    /// Replace the `status` of an existing object, notifying watchers
    pub fn set_status(&self, kind: &ResourceKind, namespace: Option<&str>, name: &str, status: Value) {
        let current = self.objects.read().get(&key(kind, namespace, name)).cloned();
        if let Some(mut object) = current {
            object["status"] = status;
            self.store(kind, namespace, name, object);
        }
    }

    /// Snapshot of a stored object
    pub fn object(&self, kind: &ResourceKind, namespace: Option<&str>, name: &str) -> Option<Value> {
        self.objects.read().get(&key(kind, namespace, name)).cloned()
    }

    pub fn remove(&self, kind: &ResourceKind, namespace: Option<&str>, name: &str) {
        self.objects.write().remove(&key(kind, namespace, name));
    }

    pub fn with_server_version(mut self, version: impl Into<String>) -> Self {
        self.server_version = version.into();
        self
    }

    fn injected(&self, operation: Operation) -> ClientResult<()> {
        match self
            .failures
            .lock()
            .get_mut(&operation)
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn store(&self, kind: &ResourceKind, namespace: Option<&str>, name: &str, mut object: Value) -> Value {
        let version = self.resource_version.fetch_add(1, Ordering::SeqCst) + 1;
        if !object.get("metadata").is_some_and(Value::is_object) {
            object["metadata"] = Value::Object(Map::new());
        }
        object["metadata"]["name"] = Value::String(name.to_string());
        object["metadata"]["resourceVersion"] = Value::String(version.to_string());
        if let Some(ns) = kind.scope(namespace) {
            object["metadata"]["namespace"] = Value::String(ns.to_string());
        }
        object["apiVersion"] = Value::String(kind.api_version());
        object["kind"] = Value::String(kind.kind.to_string());

        let object_key = key(kind, namespace, name);
        self.objects.write().insert(object_key.clone(), object.clone());
        // No receivers is fine
        let _ = self.changes.send(ChangeEvent {
            key: object_key,
            object: object.clone(),
        });
        object
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ResourceClient for InMemoryResourceClient {
    async fn get(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> ClientResult<Option<Value>> {
        self.injected(Operation::Get)?;
        Ok(self.object(kind, namespace, name))
    }

    async fn create(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        body: &Value,
    ) -> ClientResult<Value> {
        self.injected(Operation::Create)?;
        let name = object_name(body).to_string();
        if name.is_empty() {
            return Err(ClientError::api(422, "Invalid", "metadata.name: Required value"));
        }
        if self.objects.read().contains_key(&key(kind, namespace, &name)) {
            return Err(ClientError::AlreadyExists {
                kind: kind.kind.to_string(),
                name,
            });
        }
        self.record_write();
        Ok(self.store(kind, namespace, &name, body.clone()))
    }

    async fn replace(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        name: &str,
        body: &Value,
    ) -> ClientResult<Value> {
        self.injected(Operation::Replace)?;
        let current = self
            .object(kind, namespace, name)
            .ok_or_else(|| ClientError::not_found(kind.kind, name))?;
        let live_version = current.pointer("/metadata/resourceVersion");
        let sent_version = body.pointer("/metadata/resourceVersion");
        if sent_version.is_some() && sent_version != live_version {
            return Err(ClientError::conflict(
                kind.kind,
                name,
                "the object has been modified; please apply your changes to the latest version",
            ));
        }
        self.record_write();
        Ok(self.store(kind, namespace, name, body.clone()))
    }

    async fn patch(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        name: &str,
        patch: &ResourcePatch,
    ) -> ClientResult<Value> {
        self.injected(Operation::Patch)?;
        let mut current = self
            .object(kind, namespace, name)
            .ok_or_else(|| ClientError::not_found(kind.kind, name))?;
        let ResourcePatch::Merge(document) = patch;
        merge_patch(&mut current, document);
        self.record_write();
        Ok(self.store(kind, namespace, name, current))
    }

    async fn delete(&self, kind: &ResourceKind, namespace: Option<&str>, name: &str) -> ClientResult<()> {
        self.injected(Operation::Delete)?;
        self.record_write();
        self.objects.write().remove(&key(kind, namespace, name));
        Ok(())
    }

    async fn list(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> ClientResult<Vec<Value>> {
        self.injected(Operation::List)?;
        let selector = LabelSelector::parse(label_selector.unwrap_or_default());
        let scope = kind.scope(namespace);
        Ok(self
            .objects
            .read()
            .iter()
            .filter(|((plural, ns, _), _)| {
                *plural == kind.plural && scope.map_or(true, |wanted| wanted == ns)
            })
            .map(|(_, object)| object)
            .filter(|object| selector.matches(object))
            .cloned()
            .collect())
    }

    async fn watch(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> ClientResult<ObjectStream> {
        let watched = key(kind, namespace, name);
        // Subscribe before the snapshot so no change slips between them
        let receiver = self.changes.subscribe();
        let current = self.object(kind, namespace, name);

        let changes = change_stream(receiver).filter_map(move |event| {
            let matched = (event.key == watched).then_some(event.object);
            async move { matched.map(Ok) }
        });
        Ok(futures::stream::iter(current.map(Ok)).chain(changes).boxed())
    }

    async fn server_version(&self) -> ClientResult<String> {
        Ok(self.server_version.clone())
    }
}

/// Adapts a broadcast receiver into a stream, skipping lagged gaps
fn change_stream(
    receiver: broadcast::Receiver<ChangeEvent>,
) -> impl futures::Stream<Item = ChangeEvent> + Send + 'static {
    futures::stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(event) => return Some((event, receiver)),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_get_and_write_count() {
        let client = InMemoryResourceClient::new();
        let body = json!({"metadata": {"name": "che"}, "data": {"a": "1"}});

        client
            .create(&ResourceKind::CONFIG_MAP, Some("eclipse-che"), &body)
            .await
            .unwrap();
        let stored = client
            .get(&ResourceKind::CONFIG_MAP, Some("eclipse-che"), "che")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(stored["data"]["a"], "1");
        assert_eq!(stored["metadata"]["namespace"], "eclipse-che");
        assert_eq!(client.write_count(), 1);

        let duplicate = client
            .create(&ResourceKind::CONFIG_MAP, Some("eclipse-che"), &body)
            .await;
        assert!(matches!(duplicate, Err(ClientError::AlreadyExists { .. })));
    }

    #[tokio::test]
    async fn test_replace_rejects_stale_resource_version() {
        let client = InMemoryResourceClient::new();
        let stored = client.upsert(
            &ResourceKind::SERVICE,
            Some("che"),
            json!({"metadata": {"name": "svc"}}),
        );
        client.upsert(&ResourceKind::SERVICE, Some("che"), json!({"metadata": {"name": "svc"}}));

        let result = client
            .replace(&ResourceKind::SERVICE, Some("che"), "svc", &stored)
            .await;
        assert!(result.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn test_merge_patch_and_null_removal() {
        let client = InMemoryResourceClient::new();
        client.upsert(
            &ResourceKind::DEPLOYMENT,
            Some("che"),
            json!({"metadata": {"name": "che", "labels": {"a": "1", "b": "2"}}, "spec": {"replicas": 1}}),
        );
        let patched = client
            .patch(
                &ResourceKind::DEPLOYMENT,
                Some("che"),
                "che",
                &ResourcePatch::Merge(json!({"metadata": {"labels": {"b": null}}, "spec": {"replicas": 0}})),
            )
            .await
            .unwrap();

        assert_eq!(patched["spec"]["replicas"], 0);
        assert_eq!(patched["metadata"]["labels"], json!({"a": "1"}));
    }

    #[tokio::test]
    async fn test_list_filters_namespace_and_labels() {
        let client = InMemoryResourceClient::new();
        client.upsert(&ResourceKind::POD, Some("a"), json!({"metadata": {"name": "p1", "labels": {"app": "x"}}}));
        client.upsert(&ResourceKind::POD, Some("a"), json!({"metadata": {"name": "p2", "labels": {"app": "y"}}}));
        client.upsert(&ResourceKind::POD, Some("b"), json!({"metadata": {"name": "p3", "labels": {"app": "x"}}}));

        let pods = client.list(&ResourceKind::POD, Some("a"), Some("app=x")).await.unwrap();
        assert_eq!(pods.len(), 1);
        assert_eq!(object_name(&pods[0]), "p1");
    }

    #[tokio::test]
    async fn test_injected_failure_is_consumed_once() {
        let client = InMemoryResourceClient::new();
        client.fail_next(Operation::Get, ClientError::Transport("connection reset".into()));

        assert!(client.get(&ResourceKind::POD, Some("a"), "p").await.is_err());
        assert!(client.get(&ResourceKind::POD, Some("a"), "p").await.is_ok());
    }

    #[tokio::test]
    async fn test_watch_yields_current_then_changes() {
        let client = InMemoryResourceClient::new();
        client.upsert(&ResourceKind::SUBSCRIPTION, Some("ns"), json!({"metadata": {"name": "sub"}}));

        let mut stream = client
            .watch(&ResourceKind::SUBSCRIPTION, Some("ns"), "sub")
            .await
            .unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert!(first.get("status").is_none());

        client.upsert(&ResourceKind::SUBSCRIPTION, Some("ns"), json!({"metadata": {"name": "other"}}));
        client.set_status(&ResourceKind::SUBSCRIPTION, Some("ns"), "sub", json!({"state": "AtLatestKnown"}));

        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second["status"]["state"], "AtLatestKnown");
    }
}
