//! # Tasks and Task Graphs
//!
//! A [`Task`] is a titled unit of work with optional gating predicates and a
//! [`TaskBody`]. Tasks are grouped into a [`TaskGraph`] that runs either
//! sequentially (declaration order is execution order) or as a parallel group.
//! A body can return a nested graph through [`TaskOutcome::Continue`], which
//! runs to completion before its parent is reported complete.
//!
//! Bodies must be idempotent: re-running one against converged cluster state
//! reports "already satisfied" and performs no writes.

pub mod runner;

use crate::context::RunContext;
use crate::error::Result;
use crate::progress::TaskProgress;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use std::fmt;

pub use runner::TaskRunner;

/// Status tags rendered after a task title
pub mod tags {
    pub const EXISTS: &str = "Exists";
    pub const CREATED: &str = "Created";
    pub const UPDATED: &str = "Updated";
    pub const DELETED: &str = "Deleted";
    pub const DONE: &str = "OK";
}

/// Result of running a task body
#[derive(Debug)]
pub enum TaskOutcome {
    /// Finished, with an optional status tag such as `Exists` or `Created`
    Done(Option<String>),
    /// Nothing to do, with the reason shown to the user
    Skip(String),
    /// Run this graph before the task is considered complete
    Continue(TaskGraph),
}

impl TaskOutcome {
    pub fn done() -> Self {
        Self::Done(None)
    }

    pub fn tagged(tag: impl Into<String>) -> Self {
        Self::Done(Some(tag.into()))
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        Self::Skip(reason.into())
    }
}

/// Executable part of a task
#[async_trait]
pub trait TaskBody: Send + Sync {
    /// Run the body once
    ///
    /// # Arguments
    ///
    /// * `ctx` - Run context; bodies record their outputs in `ctx.state`
    /// * `progress` - Handle for publishing intermediate notes under this task's title
    ///
    /// # Returns
    ///
    /// * `Ok(TaskOutcome)` - How the runner should report or continue this task
    /// * `Err` - The failure that aborts the run
    async fn run(&self, ctx: &mut RunContext, progress: &TaskProgress) -> Result<TaskOutcome>;
}

type BodyFn = dyn for<'a> Fn(&'a mut RunContext, &'a TaskProgress) -> BoxFuture<'a, Result<TaskOutcome>>
    + Send
    + Sync;

/// Adapts a closure returning a boxed future into a [`TaskBody`]
pub struct FnBody {
    body: Box<BodyFn>,
}

impl FnBody {
    pub fn new<F>(body: F) -> Self
    where
        F: for<'a> Fn(&'a mut RunContext, &'a TaskProgress) -> BoxFuture<'a, Result<TaskOutcome>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            body: Box::new(body),
        }
    }
}

#[async_trait]
impl TaskBody for FnBody {
    async fn run(&self, ctx: &mut RunContext, progress: &TaskProgress) -> Result<TaskOutcome> {
        (self.body)(ctx, progress).await
    }
}

type EnabledFn = dyn Fn(&RunContext) -> bool + Send + Sync;
type SkipFn = dyn Fn(&RunContext) -> Option<String> + Send + Sync;

/// A titled unit of work
pub struct Task {
    title: String,
    enabled: Option<Box<EnabledFn>>,
    skip: Option<Box<SkipFn>>,
    body: Box<dyn TaskBody>,
}

impl Task {
    pub fn new(title: impl Into<String>, body: impl TaskBody + 'static) -> Self {
        Self {
            title: title.into(),
            enabled: None,
            skip: None,
            body: Box::new(body),
        }
    }

    /// Shorthand for a closure body
    pub fn from_fn<F>(title: impl Into<String>, body: F) -> Self
    where
        F: for<'a> Fn(&'a mut RunContext, &'a TaskProgress) -> BoxFuture<'a, Result<TaskOutcome>>
            + Send
            + Sync
            + 'static,
    {
        Self::new(title, FnBody::new(body))
    }

    /// A task whose body expands into the graph returned by `build`
    pub fn group<F>(title: impl Into<String>, build: F) -> Self
    where
        F: Fn(&RunContext) -> Result<TaskGraph> + Send + Sync + 'static,
    {
        Self::from_fn(title, move |ctx, _| {
            let graph = build(ctx);
            async move { Ok(TaskOutcome::Continue(graph?)) }.boxed()
        })
    }

    /// Omit the task entirely (no event, no report entry) when `predicate` is false
    pub fn enabled_if(mut self, predicate: impl Fn(&RunContext) -> bool + Send + Sync + 'static) -> Self {
        self.enabled = Some(Box::new(predicate));
        self
    }

    /// Report the task skipped with the returned reason instead of running it
    pub fn skip_if(
        mut self,
        predicate: impl Fn(&RunContext) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.skip = Some(Box::new(predicate));
        self
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub(crate) fn is_enabled(&self, ctx: &RunContext) -> bool {
        self.enabled.as_ref().map_or(true, |enabled| enabled(ctx))
    }

    pub(crate) fn skip_reason(&self, ctx: &RunContext) -> Option<String> {
        self.skip.as_ref().and_then(|skip| skip(ctx))
    }

    pub(crate) fn body(&self) -> &dyn TaskBody {
        self.body.as_ref()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("title", &self.title)
            .field("enabled", &self.enabled.is_some())
            .field("skip", &self.skip.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum GraphMode {
    #[default]
    Sequential,
    /// Direct children run concurrently on forked contexts
    Parallel,
}

/// Ordered group of tasks
#[derive(Debug, Default)]
pub struct TaskGraph {
    pub mode: GraphMode,
    pub tasks: Vec<Task>,
}

impl TaskGraph {
    pub fn sequential(tasks: Vec<Task>) -> Self {
        Self {
            mode: GraphMode::Sequential,
            tasks,
        }
    }

    pub fn parallel(tasks: Vec<Task>) -> Self {
        Self {
            mode: GraphMode::Parallel,
            tasks,
        }
    }

    pub fn push(&mut self, task: Task) {
        self.tasks.push(task);
    }

    pub fn extend(&mut self, tasks: impl IntoIterator<Item = Task>) {
        self.tasks.extend(tasks);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Titles of the direct children, in declaration order
    pub fn titles(&self) -> Vec<&str> {
        self.tasks.iter().map(Task::title).collect()
    }
}

/// Final state of a reported task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TaskStatus {
    Completed(Option<String>),
    Skipped(String),
}

/// Report entry for one task and its nested graph
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskReport {
    pub title: String,
    pub status: TaskStatus,
    pub children: Vec<TaskReport>,
}

impl TaskReport {
    pub fn tag(&self) -> Option<&str> {
        match &self.status {
            TaskStatus::Completed(tag) => tag.as_deref(),
            TaskStatus::Skipped(_) => None,
        }
    }

    fn walk<'a>(&'a self, out: &mut Vec<&'a TaskReport>) {
        out.push(self);
        for child in &self.children {
            child.walk(out);
        }
    }
}

/// Tree of reports produced by one [`TaskRunner::run`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub tasks: Vec<TaskReport>,
}

impl RunReport {
    /// Every report entry, depth-first in execution order
    pub fn flatten(&self) -> Vec<&TaskReport> {
        let mut out = Vec::new();
        for task in &self.tasks {
            task.walk(&mut out);
        }
        out
    }

    /// First entry with the given title, searched depth-first
    pub fn find(&self, title: &str) -> Option<&TaskReport> {
        self.flatten().into_iter().find(|report| report.title == title)
    }
}
