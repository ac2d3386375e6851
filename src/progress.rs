//! Task lifecycle events.
//!
//! The runner publishes a [`ProgressEvent`] for every visible transition. A
//! renderer (the CLI prints `title...[tag]`) subscribes to the broadcast
//! channel; publishing with no subscriber is not an error.
//!
//! ```rust
//! use deployctl::progress::{ProgressEvent, ProgressPublisher};
//!
//! # tokio_test::block_on(async {
//! let publisher = ProgressPublisher::new(16);
//! let mut events = publisher.subscribe();
//! publisher.publish(ProgressEvent::TaskStarted { title: "Verify Kubernetes API".into(), depth: 0 });
//!
//! let published = events.recv().await.unwrap();
//! assert_eq!(published.event.title(), "Verify Kubernetes API");
//! # });
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

/// One task lifecycle transition
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    TaskStarted { title: String, depth: usize },
    /// Free-form progress text emitted by a running body
    TaskNote { title: String, depth: usize, note: String },
    TaskCompleted { title: String, depth: usize, tag: Option<String> },
    TaskSkipped { title: String, depth: usize, reason: String },
    TaskFailed { title: String, depth: usize, error: String },
}

impl ProgressEvent {
    pub fn title(&self) -> &str {
        match self {
            Self::TaskStarted { title, .. }
            | Self::TaskNote { title, .. }
            | Self::TaskCompleted { title, .. }
            | Self::TaskSkipped { title, .. }
            | Self::TaskFailed { title, .. } => title,
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            Self::TaskStarted { depth, .. }
            | Self::TaskNote { depth, .. }
            | Self::TaskCompleted { depth, .. }
            | Self::TaskSkipped { depth, .. }
            | Self::TaskFailed { depth, .. } => *depth,
        }
    }
}

/// Event together with its publication time
#[derive(Debug, Clone, Serialize)]
pub struct PublishedProgress {
    pub event: ProgressEvent,
    pub published_at: DateTime<Utc>,
}

/// Broadcast publisher shared by the runner and every forked context
#[derive(Debug, Clone)]
pub struct ProgressPublisher {
    sender: broadcast::Sender<PublishedProgress>,
}

impl ProgressPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: ProgressEvent) {
        // Nobody listening is fine
        let _ = self.sender.send(PublishedProgress {
            event,
            published_at: Utc::now(),
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedProgress> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ProgressPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Handle a running body uses to report intermediate progress under its own title
#[derive(Debug, Clone)]
pub struct TaskProgress {
    publisher: ProgressPublisher,
    title: String,
    depth: usize,
}

impl TaskProgress {
    pub fn new(publisher: ProgressPublisher, title: impl Into<String>, depth: usize) -> Self {
        Self {
            publisher,
            title: title.into(),
            depth,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn note(&self, note: impl Into<String>) {
        self.publisher.publish(ProgressEvent::TaskNote {
            title: self.title.clone(),
            depth: self.depth,
            note: note.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let publisher = ProgressPublisher::default();
        assert_eq!(publisher.subscriber_count(), 0);
        publisher.publish(ProgressEvent::TaskStarted {
            title: "Create Namespace che".into(),
            depth: 0,
        });
    }

    #[tokio::test]
    async fn test_notes_carry_task_title() {
        let publisher = ProgressPublisher::new(16);
        let mut receiver = publisher.subscribe();
        let progress = TaskProgress::new(publisher, "Scheduling", 2);

        progress.note("waiting for pods");

        let published = receiver.recv().await.unwrap();
        assert_eq!(published.event.title(), "Scheduling");
        assert_eq!(published.event.depth(), 2);
        assert!(matches!(published.event, ProgressEvent::TaskNote { ref note, .. } if note == "waiting for pods"));
    }
}
