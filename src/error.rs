//! # Error Types
//!
//! Structured errors for every layer of the orchestration engine. Remote calls
//! produce [`ClientError`], everything above the resource client produces
//! [`DeployError`].

use crate::config::error::ConfigurationError;
use thiserror::Error;

/// Errors raised by a [`ResourceClient`](crate::client::ResourceClient) implementation
#[derive(Debug, Error)]
pub enum ClientError {
    /// The addressed object does not exist
    #[error("{kind} '{name}' not found")]
    NotFound { kind: String, name: String },

    /// A write was rejected because the target is in an unexpected state
    #[error("Conflict writing {kind} '{name}': {message}")]
    Conflict {
        kind: String,
        name: String,
        message: String,
    },

    /// A create was rejected because the object is already present
    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: String, name: String },

    /// Any other API server rejection
    #[error("API error {code} ({reason}): {message}")]
    Api {
        code: u16,
        reason: String,
        message: String,
    },

    /// The connection to the API server failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// A document could not be converted to or from JSON
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A watch stream ended before the awaited condition was observed
    #[error("Watch on {kind} '{name}' closed unexpectedly")]
    WatchClosed { kind: String, name: String },
}

impl ClientError {
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn conflict(
        kind: impl Into<String>,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            kind: kind.into(),
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn api(code: u16, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            code,
            reason: reason.into(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::Api { code: 404, .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// True when the API server rejected a request because the operator's
    /// admission or conversion webhook is not reachable yet.
    pub fn is_webhook_unavailable(&self, operator_service: &str) -> bool {
        let message = match self {
            Self::Api { message, .. } | Self::Conflict { message, .. } => message.as_str(),
            Self::Transport(message) => message.as_str(),
            _ => return false,
        };
        message.contains(&format!("service \"{operator_service}\" not found"))
            || message.contains(&format!(
                "no endpoints available for service \"{operator_service}\""
            ))
            || message.contains("failed calling webhook")
            || message.contains("conversion webhook")
    }
}

/// Result type for resource client calls
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Top-level error for task bodies, pollers, workflows and the runner
#[derive(Debug, Error)]
pub enum DeployError {
    #[error(transparent)]
    Client(#[from] ClientError),

    /// A fail state survived its recheck budget, or a container terminated
    #[error("{message}")]
    PollFailed { message: String },

    /// The outer polling budget ran out
    #[error("{message}")]
    PollTimeout { message: String },

    /// A watch-based wait ran out of time
    #[error("{message}")]
    WaitTimeout { message: String },

    /// The package manager reported a failed install plan or CSV
    #[error("{message}")]
    Workflow { message: String },

    /// A task body failed; carries the title of the innermost failing task
    #[error("{title}: {source}")]
    TaskFailed {
        title: String,
        #[source]
        source: Box<DeployError>,
    },

    /// Two branches of a parallel group wrote the same run-state field
    #[error("Parallel tasks wrote conflicting values for '{field}'")]
    ContextConflict { field: String },

    #[error("Failed to load template '{path}': {message}")]
    Template { path: String, message: String },

    #[error(transparent)]
    Config(#[from] ConfigurationError),

    #[error("{0}")]
    Validation(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl DeployError {
    pub fn poll_failed(message: impl Into<String>) -> Self {
        Self::PollFailed {
            message: message.into(),
        }
    }

    pub fn poll_timeout(message: impl Into<String>) -> Self {
        Self::PollTimeout {
            message: message.into(),
        }
    }

    pub fn wait_timeout(message: impl Into<String>) -> Self {
        Self::WaitTimeout {
            message: message.into(),
        }
    }

    pub fn workflow(message: impl Into<String>) -> Self {
        Self::Workflow {
            message: message.into(),
        }
    }

    pub fn template(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Template {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Wrap an error with the title of the task that produced it.
    ///
    /// Errors already attributed to a task pass through untouched, so a failure
    /// deep inside nested graphs keeps the innermost title.
    pub fn in_task(self, title: &str) -> Self {
        match self {
            already @ Self::TaskFailed { .. } => already,
            other => Self::TaskFailed {
                title: title.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// The title of the failing task, if this error was raised by the runner
    pub fn failed_task(&self) -> Option<&str> {
        match self {
            Self::TaskFailed { title, .. } => Some(title),
            _ => None,
        }
    }

    /// The innermost error, skipping task attribution
    pub fn root(&self) -> &DeployError {
        match self {
            Self::TaskFailed { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, DeployError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_task_keeps_innermost_title() {
        let inner = DeployError::poll_failed("Failed to start a pod, reason: CrashLoopBackOff");
        let wrapped = inner.in_task("Starting").in_task("Dashboard pod bootstrap");

        assert_eq!(wrapped.failed_task(), Some("Starting"));
        assert_eq!(
            wrapped.to_string(),
            "Starting: Failed to start a pod, reason: CrashLoopBackOff"
        );
        assert!(matches!(wrapped.root(), DeployError::PollFailed { .. }));
    }

    #[test]
    fn test_webhook_unavailable_detection() {
        let err = ClientError::api(
            500,
            "InternalError",
            "Internal error occurred: failed calling webhook \"vchecluster.kb.io\"",
        );
        assert!(err.is_webhook_unavailable("che-operator-service"));

        let err = ClientError::api(
            500,
            "InternalError",
            "no endpoints available for service \"che-operator-service\"",
        );
        assert!(err.is_webhook_unavailable("che-operator-service"));

        let err = ClientError::api(403, "Forbidden", "checlusters is forbidden");
        assert!(!err.is_webhook_unavailable("che-operator-service"));
    }

    #[test]
    fn test_not_found_classification() {
        assert!(ClientError::not_found("Pod", "x").is_not_found());
        assert!(ClientError::api(404, "NotFound", "gone").is_not_found());
        assert!(!ClientError::api(500, "InternalError", "boom").is_not_found());
    }

    #[test]
    fn test_cancelled_through_task_wrapper() {
        let err = DeployError::Cancelled.in_task("Scheduling");
        assert!(err.is_cancelled());
    }
}
