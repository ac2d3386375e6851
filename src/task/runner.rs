//! # Task Graph Runner
//!
//! Executes a [`TaskGraph`] against a [`RunContext`], publishing progress
//! events and building a [`RunReport`].
//!
//! ## Semantics
//!
//! - Sequential graphs run in declaration order and stop at the first error.
//! - Parallel groups run their direct children concurrently on forked
//!   contexts. The first failure fails the group and drops the remaining
//!   branches; branch states are merged back in declaration order on success.
//! - No new task starts once shutdown has been requested.

use super::{GraphMode, RunReport, Task, TaskGraph, TaskOutcome, TaskReport, TaskStatus};
use crate::context::RunContext;
use crate::error::Result;
use crate::logging::log_task_operation;
use crate::progress::{ProgressEvent, TaskProgress};
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use tracing::{instrument, warn};

/// Stateless executor for task graphs
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskRunner;

impl TaskRunner {
    pub fn new() -> Self {
        Self
    }

    /// Run `graph` to completion or to its first failure
    #[instrument(skip_all, fields(tasks = graph.len(), mode = ?graph.mode))]
    pub async fn run(&self, graph: &TaskGraph, ctx: &mut RunContext) -> Result<RunReport> {
        let tasks = run_graph(graph, ctx, 0).await?;
        Ok(RunReport { tasks })
    }
}

fn run_graph<'a>(
    graph: &'a TaskGraph,
    ctx: &'a mut RunContext,
    depth: usize,
) -> BoxFuture<'a, Result<Vec<TaskReport>>> {
    async move {
        match graph.mode {
            GraphMode::Sequential => run_sequential(graph, ctx, depth).await,
            GraphMode::Parallel => run_parallel(graph, ctx, depth).await,
        }
    }
    .boxed()
}

async fn run_sequential(graph: &TaskGraph, ctx: &mut RunContext, depth: usize) -> Result<Vec<TaskReport>> {
    let mut reports = Vec::with_capacity(graph.len());
    for task in &graph.tasks {
        if let Some(report) = run_task(task, ctx, depth).await? {
            reports.push(report);
        }
    }
    Ok(reports)
}

async fn run_parallel(graph: &TaskGraph, ctx: &mut RunContext, depth: usize) -> Result<Vec<TaskReport>> {
    let mut forks: Vec<RunContext> = graph.tasks.iter().map(|_| ctx.fork()).collect();
    let mut reports: Vec<Option<TaskReport>> = vec![None; graph.len()];

    {
        let mut pending: FuturesUnordered<_> = graph
            .tasks
            .iter()
            .zip(forks.iter_mut())
            .enumerate()
            .map(|(index, (task, fork))| async move { (index, run_task(task, fork, depth).await) })
            .collect();

        while let Some((index, outcome)) = pending.next().await {
            match outcome {
                Ok(report) => reports[index] = report,
                Err(error) => {
                    // Surface failures other branches already produced before dropping them
                    while let Some(Some((other, outcome))) = pending.next().now_or_never() {
                        if let Err(other_error) = outcome {
                            warn!(
                                task = graph.tasks[other].title(),
                                error = %other_error,
                                "Parallel task also failed"
                            );
                        }
                    }
                    return Err(error);
                }
            }
        }
    }

    let branches = forks.into_iter().map(|fork| fork.state).collect();
    ctx.state.merge_branches(branches)?;
    Ok(reports.into_iter().flatten().collect())
}

async fn run_task(task: &Task, ctx: &mut RunContext, depth: usize) -> Result<Option<TaskReport>> {
    if !task.is_enabled(ctx) {
        return Ok(None);
    }
    ctx.shutdown.check()?;

    let title = task.title().to_string();
    if let Some(reason) = task.skip_reason(ctx) {
        return Ok(Some(skipped(ctx, title, depth, reason)));
    }

    ctx.progress.publish(ProgressEvent::TaskStarted {
        title: title.clone(),
        depth,
    });
    log_task_operation("start", &title, depth, "running", None);

    let progress = TaskProgress::new(ctx.progress.clone(), title.clone(), depth);
    let outcome = task.body().run(ctx, &progress).await;

    let result = match outcome {
        Ok(TaskOutcome::Done(tag)) => Ok(completed(ctx, title.clone(), depth, tag, Vec::new())),
        Ok(TaskOutcome::Skip(reason)) => Ok(skipped(ctx, title.clone(), depth, reason)),
        Ok(TaskOutcome::Continue(subgraph)) => run_graph(&subgraph, ctx, depth + 1)
            .await
            .map(|children| completed(ctx, title.clone(), depth, None, children)),
        Err(error) => Err(error),
    };

    match result {
        Ok(report) => Ok(Some(report)),
        Err(error) => {
            let error = error.in_task(&title);
            ctx.progress.publish(ProgressEvent::TaskFailed {
                title: title.clone(),
                depth,
                error: error.root().to_string(),
            });
            log_task_operation("fail", &title, depth, "failed", Some(&error.to_string()));
            Err(error)
        }
    }
}

fn completed(
    ctx: &RunContext,
    title: String,
    depth: usize,
    tag: Option<String>,
    children: Vec<TaskReport>,
) -> TaskReport {
    ctx.progress.publish(ProgressEvent::TaskCompleted {
        title: title.clone(),
        depth,
        tag: tag.clone(),
    });
    log_task_operation("complete", &title, depth, "completed", tag.as_deref());
    TaskReport {
        title,
        status: TaskStatus::Completed(tag),
        children,
    }
}

fn skipped(ctx: &RunContext, title: String, depth: usize, reason: String) -> TaskReport {
    ctx.progress.publish(ProgressEvent::TaskSkipped {
        title: title.clone(),
        depth,
        reason: reason.clone(),
    });
    log_task_operation("skip", &title, depth, "skipped", Some(&reason));
    TaskReport {
        title,
        status: TaskStatus::Skipped(reason),
        children: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InMemoryResourceClient;
    use crate::config::{DeployConfig, DeploySettings};
    use crate::error::DeployError;
    use crate::shutdown::{ShutdownController, ShutdownSignal};
    use crate::task::tags;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    fn context() -> RunContext {
        let settings = DeploySettings::from_config(DeployConfig::default()).unwrap();
        RunContext::new(
            Arc::new(settings),
            Arc::new(InMemoryResourceClient::new()),
            ShutdownSignal::never(),
        )
    }

    fn note(title: &'static str) -> Task {
        Task::from_fn(title, move |ctx, _| {
            async move {
                ctx.state.push_message(title);
                Ok(TaskOutcome::done())
            }
            .boxed()
        })
    }

    fn sleeping(title: &'static str, millis: u64) -> Task {
        Task::from_fn(title, move |ctx, _| {
            async move {
                tokio::time::sleep(Duration::from_millis(millis)).await;
                ctx.state.push_message(title);
                Ok(TaskOutcome::tagged(tags::DONE))
            }
            .boxed()
        })
    }

    fn failing_after(title: &'static str, millis: u64) -> Task {
        Task::from_fn(title, move |_, _| {
            async move {
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Err(DeployError::workflow(format!("{title} failed")))
            }
            .boxed()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_task_finishes_before_next_starts() {
        let mut ctx = context();
        let graph = TaskGraph::sequential(vec![
            sleeping("A", 10),
            sleeping("B", 500),
            sleeping("C", 1),
        ]);

        let started = Instant::now();
        TaskRunner::new().run(&graph, &mut ctx).await.unwrap();

        assert_eq!(ctx.state.post_output_messages, vec!["A", "B", "C"]);
        assert!(started.elapsed() >= Duration::from_millis(511));
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_branches_overlap_and_merge_in_declaration_order() {
        let mut ctx = context();
        ctx.state.push_message("before");
        let group = Task::group("parallel", |_| {
            Ok(TaskGraph::parallel(vec![
                sleeping("a", 1000),
                sleeping("b", 600),
                sleeping("c", 200),
            ]))
        });
        let graph = TaskGraph::sequential(vec![group]);

        let started = Instant::now();
        let report = TaskRunner::new().run(&graph, &mut ctx).await.unwrap();
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_millis(1000), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(1500), "branches ran one after another: {elapsed:?}");
        assert_eq!(ctx.state.post_output_messages, vec!["before", "a", "b", "c"]);
        let children: Vec<_> = report.tasks[0].children.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(children, vec!["a", "b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_parallel_branch_aborts_group() {
        let mut ctx = context();
        let group = Task::group("parallel", |_| {
            Ok(TaskGraph::parallel(vec![
                sleeping("a", 1000),
                failing_after("b", 200),
                sleeping("c", 1000),
            ]))
        });
        let graph = TaskGraph::sequential(vec![group, note("after")]);

        let started = Instant::now();
        let err = TaskRunner::new().run(&graph, &mut ctx).await.unwrap_err();

        assert_eq!(err.failed_task(), Some("b"));
        assert_eq!(err.to_string(), "b: b failed");
        assert!(started.elapsed() < Duration::from_millis(1000));
        assert!(ctx.state.post_output_messages.is_empty());
    }

    #[tokio::test]
    async fn test_sequential_order_and_gating() {
        let mut ctx = context();
        let graph = TaskGraph::sequential(vec![
            note("a"),
            note("hidden").enabled_if(|_| false),
            note("skipped").skip_if(|_| Some("not needed".to_string())),
            note("b"),
        ]);

        let report = TaskRunner::new().run(&graph, &mut ctx).await.unwrap();

        assert_eq!(ctx.state.post_output_messages, vec!["a", "b"]);
        let titles: Vec<_> = report.tasks.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["a", "skipped", "b"]);
        assert_eq!(
            report.find("skipped").map(|r| &r.status),
            Some(&TaskStatus::Skipped("not needed".to_string()))
        );
    }

    #[tokio::test]
    async fn test_first_failure_aborts_siblings_and_keeps_innermost_title() {
        let mut ctx = context();
        let failing = Task::from_fn("outer", |_, _| {
            async {
                Ok(TaskOutcome::Continue(TaskGraph::sequential(vec![Task::from_fn(
                    "inner",
                    |_, _| async { Err(DeployError::workflow("boom")) }.boxed(),
                )])))
            }
            .boxed()
        });
        let graph = TaskGraph::sequential(vec![note("a"), failing, note("never")]);

        let err = TaskRunner::new().run(&graph, &mut ctx).await.unwrap_err();
        assert_eq!(err.failed_task(), Some("inner"));
        assert_eq!(err.to_string(), "inner: boom");
        assert_eq!(ctx.state.post_output_messages, vec!["a"]);
    }

    #[tokio::test]
    async fn test_cancelled_run_starts_no_task() {
        let controller = ShutdownController::new();
        let mut ctx = context();
        ctx.shutdown = controller.signal();
        controller.shutdown();

        let graph = TaskGraph::sequential(vec![note("a")]);
        let err = TaskRunner::new().run(&graph, &mut ctx).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(ctx.state.post_output_messages.is_empty());
    }
}
