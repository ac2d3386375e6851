use super::{ResourceClient, ResourceKind};
use crate::error::{ClientError, DeployError, Result};
use crate::shutdown::ShutdownSignal;
use futures::StreamExt;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument};

/// Verdict of a wait predicate on one observed snapshot
#[derive(Debug)]
pub enum WaitDecision<T> {
    /// The condition holds; stop watching
    Resolve(T),
    /// The object reached a terminal failure
    Reject(DeployError),
    /// Keep watching
    Continue,
}

/// Watch a single object until `predicate` resolves or rejects.
///
/// The watch stream is dropped when the wait ends for any reason, including
/// `timeout` elapsing (`WaitTimeout` carrying `timeout_message`) and shutdown
/// (`Cancelled`). A stream that closes early yields `WatchClosed`.
#[instrument(skip(client, kind, shutdown, predicate, timeout_message), fields(kind = kind.kind))]
pub async fn wait_for_object<T, F>(
    client: &dyn ResourceClient,
    kind: &ResourceKind,
    namespace: Option<&str>,
    name: &str,
    timeout: Duration,
    shutdown: &ShutdownSignal,
    timeout_message: impl Into<String>,
    mut predicate: F,
) -> Result<T>
where
    F: FnMut(&Value) -> WaitDecision<T> + Send,
    T: Send,
{
    let timeout_message = timeout_message.into();
    shutdown.check()?;
    let mut stream = client.watch(kind, namespace, name).await?;

    let observe = async {
        while let Some(snapshot) = stream.next().await {
            let snapshot = match snapshot {
                Ok(snapshot) => snapshot,
                Err(error) => return Err(DeployError::from(error)),
            };
            match predicate(&snapshot) {
                WaitDecision::Resolve(value) => return Ok(value),
                WaitDecision::Reject(error) => return Err(error),
                WaitDecision::Continue => debug!(name = %name, "Condition not met yet"),
            }
        }
        Err(DeployError::from(ClientError::WatchClosed {
            kind: kind.kind.to_string(),
            name: name.to_string(),
        }))
    };

    tokio::select! {
        outcome = observe => outcome,
        _ = tokio::time::sleep(timeout) => Err(DeployError::wait_timeout(timeout_message)),
        _ = shutdown.cancelled() => Err(DeployError::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InMemoryResourceClient;
    use crate::shutdown::ShutdownController;
    use serde_json::json;
    use std::sync::Arc;

    fn phase_of(object: &Value) -> WaitDecision<String> {
        match object.pointer("/status/phase").and_then(Value::as_str) {
            Some("Failed") => WaitDecision::Reject(DeployError::workflow("failed")),
            Some(phase) => WaitDecision::Resolve(phase.to_string()),
            None => WaitDecision::Continue,
        }
    }

    #[tokio::test]
    async fn test_resolves_on_later_change() {
        let client = Arc::new(InMemoryResourceClient::new());
        client.upsert(&ResourceKind::INSTALL_PLAN, Some("ns"), json!({"metadata": {"name": "ip"}}));

        let writer = client.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.set_status(&ResourceKind::INSTALL_PLAN, Some("ns"), "ip", json!({"phase": "Installed"}));
        });

        let phase = wait_for_object(
            client.as_ref(),
            &ResourceKind::INSTALL_PLAN,
            Some("ns"),
            "ip",
            Duration::from_secs(5),
            &ShutdownSignal::never(),
            "timed out",
            phase_of,
        )
        .await
        .unwrap();
        assert_eq!(phase, "Installed");
    }

    #[tokio::test]
    async fn test_rejection_propagates() {
        let client = InMemoryResourceClient::new();
        client.upsert(
            &ResourceKind::INSTALL_PLAN,
            Some("ns"),
            json!({"metadata": {"name": "ip"}, "status": {"phase": "Failed"}}),
        );
        let result = wait_for_object(
            &client,
            &ResourceKind::INSTALL_PLAN,
            Some("ns"),
            "ip",
            Duration::from_secs(5),
            &ShutdownSignal::never(),
            "timed out",
            phase_of,
        )
        .await;
        assert!(matches!(result, Err(DeployError::Workflow { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_carries_message() {
        let client = InMemoryResourceClient::new();
        let result = wait_for_object(
            &client,
            &ResourceKind::SUBSCRIPTION,
            Some("ns"),
            "missing",
            Duration::from_secs(600),
            &ShutdownSignal::never(),
            "Timeout reached while waiting for \"missing\" subscription is ready.",
            phase_of,
        )
        .await;
        assert_eq!(
            result.unwrap_err().to_string(),
            "Timeout reached while waiting for \"missing\" subscription is ready."
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_wait() {
        let client = InMemoryResourceClient::new();
        let controller = ShutdownController::new();
        let signal = controller.signal();

        let waiter = tokio::spawn(async move {
            wait_for_object(
                &client,
                &ResourceKind::SUBSCRIPTION,
                Some("ns"),
                "sub",
                Duration::from_secs(600),
                &signal,
                "timed out",
                phase_of,
            )
            .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        controller.shutdown();

        assert!(waiter.await.unwrap().unwrap_err().is_cancelled());
    }
}
