//! # Reconciler
//!
//! Create-or-update task factory. [`reconcile`] turns any [`ReconcileOps`]
//! implementation into a [`Task`] titled `Create {kind} {name}` or
//! `Update {kind} {name}`:
//!
//! | exists | create_only | action      | tag       |
//! |--------|-------------|-------------|-----------|
//! | yes    | yes         | none        | `Exists`  |
//! | yes    | no          | `replace()` | `Updated` |
//! | no     | either      | `create()`  | `Created` |
//!
//! Errors from the ops propagate unmodified; the reconciler itself never
//! retries and keeps no local cache. [`ManifestOps`] is the JSON manifest
//! implementation used for every templated resource.

pub mod custom_resource;
pub mod manifest;

use crate::context::RunContext;
use crate::error::Result;
use crate::progress::TaskProgress;
use crate::task::{tags, Task, TaskBody, TaskOutcome};
use async_trait::async_trait;
use serde_json::{Map, Value};

pub use custom_resource::{build_custom_resource, deep_merge};
pub use manifest::ManifestOps;

/// Remote operations backing one reconciled resource
#[async_trait]
pub trait ReconcileOps: Send + Sync {
    async fn exists(&self, ctx: &RunContext) -> Result<bool>;

    async fn create(&self, ctx: &RunContext) -> Result<()>;

    async fn replace(&self, ctx: &RunContext) -> Result<()>;
}

/// Build a create-or-update task for one resource
pub fn reconcile(create_only: bool, kind: &str, name: &str, ops: impl ReconcileOps + 'static) -> Task {
    let verb = if create_only { "Create" } else { "Update" };
    Task::new(
        format!("{verb} {kind} {name}"),
        ReconcileBody {
            create_only,
            ops: Box::new(ops),
        },
    )
}

struct ReconcileBody {
    create_only: bool,
    ops: Box<dyn ReconcileOps>,
}

#[async_trait]
impl TaskBody for ReconcileBody {
    async fn run(&self, ctx: &mut RunContext, _progress: &TaskProgress) -> Result<TaskOutcome> {
        if self.ops.exists(ctx).await? {
            if self.create_only {
                return Ok(TaskOutcome::tagged(tags::EXISTS));
            }
            self.ops.replace(ctx).await?;
            Ok(TaskOutcome::tagged(tags::UPDATED))
        } else {
            self.ops.create(ctx).await?;
            Ok(TaskOutcome::tagged(tags::CREATED))
        }
    }
}

/// Set `value` at `path`, creating intermediate objects and replacing
/// non-object intermediates.
pub(crate) fn set_path(target: &mut Value, path: &[&str], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        *target = value;
        return;
    };
    let mut current = target;
    for segment in parents {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(map) = current else {
            return;
        };
        current = map.entry(segment.to_string()).or_insert(Value::Null);
    }
    if !current.is_object() {
        *current = Value::Object(Map::new());
    }
    if let Value::Object(map) = current {
        map.insert(last.to_string(), value);
    }
}
