//! Shared fixtures for integration tests: settings, contexts and pod documents
//! seeded into the in-memory client.

#![allow(dead_code)]

use deployctl::client::{InMemoryResourceClient, ResourceKind};
use deployctl::config::{DeployConfig, DeploySettings};
use deployctl::context::RunContext;
use deployctl::shutdown::ShutdownSignal;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::Arc;

pub const NAMESPACE: &str = "che";

/// Bundled manifest templates at the crate root
pub fn templates_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("templates")
}

pub fn settings_with(configure: impl FnOnce(&mut DeployConfig)) -> DeploySettings {
    let mut config = DeployConfig::default();
    config.deploy.namespace = NAMESPACE.to_string();
    config.deploy.templates_dir = templates_dir();
    configure(&mut config);
    DeploySettings::from_config(config).expect("test settings must be valid")
}

pub fn context(settings: DeploySettings, client: Arc<InMemoryResourceClient>) -> RunContext {
    RunContext::new(Arc::new(settings), client, ShutdownSignal::never())
}

/// Labels of an equality selector such as `a=b,c=d`
pub fn selector_labels(selector: &str) -> Value {
    let labels: Map<String, Value> = selector
        .split(',')
        .filter_map(|term| term.split_once('='))
        .map(|(key, value)| (key.to_string(), Value::String(value.to_string())))
        .collect();
    Value::Object(labels)
}

pub fn ready_status() -> Value {
    json!({
        "phase": "Running",
        "conditions": [
            {"type": "PodScheduled", "status": "True"},
            {"type": "Ready", "status": "True"}
        ],
        "containerStatuses": [{
            "name": "main", "image": "image", "imageID": "", "ready": true, "restartCount": 0,
            "state": {"running": {}}
        }]
    })
}

pub fn starting_status() -> Value {
    json!({
        "phase": "Running",
        "conditions": [
            {"type": "PodScheduled", "status": "True"},
            {"type": "Ready", "status": "False"}
        ],
        "containerStatuses": [{
            "name": "main", "image": "image", "imageID": "", "ready": false, "restartCount": 0,
            "state": {"running": {}}
        }]
    })
}

pub fn unschedulable_status(message: &str) -> Value {
    json!({
        "phase": "Pending",
        "conditions": [{
            "type": "PodScheduled", "status": "False",
            "reason": "Unschedulable", "message": message
        }]
    })
}

pub fn seed_pod(client: &InMemoryResourceClient, namespace: &str, name: &str, selector: &str, status: Value) {
    client.upsert(
        &ResourceKind::POD,
        Some(namespace),
        json!({
            "metadata": {"name": name, "labels": selector_labels(selector)},
            "status": status,
        }),
    );
}

pub fn seed_ready_pod(client: &InMemoryResourceClient, namespace: &str, name: &str, selector: &str) {
    seed_pod(client, namespace, name, selector, ready_status());
}

pub fn seed_active_namespace(client: &InMemoryResourceClient, namespace: &str) {
    client.upsert(
        &ResourceKind::NAMESPACE,
        None,
        json!({"metadata": {"name": namespace}, "status": {"phase": "Active"}}),
    );
}
