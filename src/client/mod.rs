//! # Resource Client
//!
//! The boundary between the orchestration engine and the cluster's object
//! store. Objects travel as JSON documents (`serde_json::Value`) addressed by a
//! [`ResourceKind`], an optional namespace and a name.
//!
//! ## Implementations
//!
//! - [`KubeResourceClient`]: talks to a real API server through `kube`
//! - [`InMemoryResourceClient`]: an in-process store with watch support, used by
//!   tests and dry runs
//!
//! ## Waiting
//!
//! [`wait_for_object`] turns a watch into a bounded, cancellable
//! "wait until condition" primitive.

pub mod kind;
pub mod kube_client;
pub mod memory;
pub mod selector;
pub mod wait;

use crate::error::ClientResult;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

pub use kube_client::KubeResourceClient;
pub use kind::ResourceKind;
pub use memory::InMemoryResourceClient;
pub use selector::LabelSelector;
pub use wait::{wait_for_object, WaitDecision};

/// Stream of object snapshots produced by [`ResourceClient::watch`]
pub type ObjectStream = BoxStream<'static, ClientResult<Value>>;

/// Partial update of a remote object
#[derive(Debug, Clone, PartialEq)]
pub enum ResourcePatch {
    /// RFC 7386 JSON merge patch
    Merge(Value),
}

/// Remote object store operations consumed by every task
#[async_trait]
pub trait ResourceClient: Send + Sync + std::fmt::Debug {
    /// Fetch an object, `None` when it does not exist
    async fn get(&self, kind: &ResourceKind, namespace: Option<&str>, name: &str)
        -> ClientResult<Option<Value>>;

    async fn create(&self, kind: &ResourceKind, namespace: Option<&str>, body: &Value)
        -> ClientResult<Value>;

    /// Replace an object. The body must carry the live `metadata.resourceVersion`.
    async fn replace(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        name: &str,
        body: &Value,
    ) -> ClientResult<Value>;

    async fn patch(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        name: &str,
        patch: &ResourcePatch,
    ) -> ClientResult<Value>;

    /// Delete an object; a missing object counts as success
    async fn delete(&self, kind: &ResourceKind, namespace: Option<&str>, name: &str) -> ClientResult<()>;

    async fn list(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> ClientResult<Vec<Value>>;

    /// Watch a single object by name. The current state, if any, is yielded
    /// first, followed by every later modification.
    async fn watch(&self, kind: &ResourceKind, namespace: Option<&str>, name: &str)
        -> ClientResult<ObjectStream>;

    /// `major.minor` (git version when available) reported by the API server
    async fn server_version(&self) -> ClientResult<String>;

    async fn exists(&self, kind: &ResourceKind, namespace: Option<&str>, name: &str) -> ClientResult<bool> {
        Ok(self.get(kind, namespace, name).await?.is_some())
    }
}

/// `metadata.name` of a document, empty when absent
pub fn object_name(object: &Value) -> &str {
    object
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .unwrap_or_default()
}

/// `metadata.namespace` of a document
pub fn object_namespace(object: &Value) -> Option<&str> {
    object.pointer("/metadata/namespace").and_then(Value::as_str)
}

/// String at a JSON pointer, treating empty strings as absent
pub fn str_at<'a>(object: &'a Value, pointer: &str) -> Option<&'a str> {
    object
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}
