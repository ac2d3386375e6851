use super::pod_status::{
    all_running, condition_fail_state, conditions_passed, container_fail_state, last_terminated_state,
    no_pods_message, terminated_message, timeout_diagnostics, FailState, POD_SCHEDULED, READY,
};
use super::probe::FailStateProbe;
use crate::client::{ResourceClient, ResourceKind};
use crate::config::TimeoutConfig;
use crate::constants::PRODUCT_NAME;
use crate::error::{ClientError, DeployError, Result};
use crate::shutdown::ShutdownSignal;
use k8s_openapi::api::core::v1::Pod;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

pub const POLL_INTERVAL: Duration = Duration::from_millis(500);
const RECHECK_TICK: Duration = Duration::from_secs(1);
const RECHECK_HINT: &str = "Consider increasing error recheck timeout with --k8spoderrorrechecktimeout flag.";

/// Readiness phase of a selector's pods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReadinessPhase {
    Scheduling,
    Downloading,
    Starting,
    Ready,
    Failed,
}

impl ReadinessPhase {
    fn failure_prefix(self) -> &'static str {
        match self {
            Self::Scheduling => "Failed to schedule a pod",
            Self::Downloading => "Failed to download image",
            _ => "Failed to start a pod",
        }
    }
}

impl fmt::Display for ReadinessPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Scheduling => "Scheduling",
            Self::Downloading => "Downloading images",
            Self::Starting => "Starting",
            Self::Ready => "Ready",
            Self::Failed => "Failed",
        };
        write!(f, "{name}")
    }
}

/// What one tick observed; rebuilt from a fresh pod list every time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PodReadinessRecord {
    pub phase: ReadinessPhase,
    pub namespace: String,
    pub selector: String,
    pub pods: usize,
    pub last_fail: Option<FailState>,
}

/// Per-phase polling budgets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessBudgets {
    pub scheduling: Duration,
    pub downloading: Duration,
    pub starting: Duration,
    pub error_recheck: Duration,
}

impl ReadinessBudgets {
    pub fn from_timeouts(timeouts: &TimeoutConfig) -> Self {
        Self {
            scheduling: timeouts.pod_wait(),
            downloading: timeouts.pod_download_image(),
            starting: timeouts.pod_ready(),
            error_recheck: timeouts.pod_error_recheck(),
        }
    }

    /// Use `starting` as the Starting phase budget
    pub fn with_starting(mut self, starting: Duration) -> Self {
        self.starting = starting;
        self
    }
}

enum FailSource {
    Owner(FailState),
    Pod(FailState),
}

/// Polls the pods of one selector through Scheduling, Downloading and Starting.
///
/// Each phase is a bounded loop of `budget / interval` ticks. A detected fail
/// state is re-evaluated once per second for the error recheck budget before
/// it becomes fatal, so transient failures such as an image pull retry do not
/// abort the run.
#[derive(Clone)]
pub struct PodReadinessPoller {
    client: Arc<dyn ResourceClient>,
    shutdown: ShutdownSignal,
    namespace: String,
    selector: String,
    budgets: ReadinessBudgets,
    interval: Duration,
    owner: Option<Arc<dyn FailStateProbe>>,
}

impl fmt::Debug for PodReadinessPoller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PodReadinessPoller")
            .field("namespace", &self.namespace)
            .field("selector", &self.selector)
            .field("budgets", &self.budgets)
            .field("interval", &self.interval)
            .field("owner", &self.owner.is_some())
            .finish()
    }
}

impl PodReadinessPoller {
    pub fn new(
        client: Arc<dyn ResourceClient>,
        shutdown: ShutdownSignal,
        namespace: impl Into<String>,
        selector: impl Into<String>,
        budgets: ReadinessBudgets,
    ) -> Self {
        Self {
            client,
            shutdown,
            namespace: namespace.into(),
            selector: selector.into(),
            budgets,
            interval: POLL_INTERVAL,
            owner: None,
        }
    }

    /// Also treat a failure reported by the owning custom resource as a fail state
    pub fn with_owner(mut self, owner: Arc<dyn FailStateProbe>) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run all three phases in order
    pub async fn wait_ready(&self) -> Result<()> {
        self.wait_scheduled().await?;
        self.wait_images_pulled().await?;
        self.wait_started().await
    }

    #[instrument(skip(self), fields(namespace = %self.namespace, selector = %self.selector))]
    pub async fn wait_scheduled(&self) -> Result<()> {
        self.run_phase(ReadinessPhase::Scheduling, self.budgets.scheduling).await
    }

    #[instrument(skip(self), fields(namespace = %self.namespace, selector = %self.selector))]
    pub async fn wait_images_pulled(&self) -> Result<()> {
        self.run_phase(ReadinessPhase::Downloading, self.budgets.downloading).await
    }

    #[instrument(skip(self), fields(namespace = %self.namespace, selector = %self.selector))]
    pub async fn wait_started(&self) -> Result<()> {
        self.run_phase(ReadinessPhase::Starting, self.budgets.starting).await
    }

    async fn run_phase(&self, phase: ReadinessPhase, budget: Duration) -> Result<()> {
        let iterations = budget.as_millis() / self.interval.as_millis().max(1);
        let mut record = self.record(phase, 0, None);

        for _ in 0..iterations {
            self.shutdown.check()?;
            let mut pods = self.list_pods().await?;

            if let Some(initial) = self.fail_state(phase, &pods).await? {
                record.last_fail = Some(initial.state().clone());
                warn!(phase = %phase, fail = ?record.last_fail, "Fail state detected, rechecking");
                pods = self.recheck(phase, initial).await?;
            }

            if phase == ReadinessPhase::Starting {
                if let Some(terminated) = last_terminated_state(&pods) {
                    return Err(DeployError::poll_failed(terminated_message(terminated)));
                }
            }

            record = self.record(phase, pods.len(), record.last_fail);
            debug!(record = ?record, "Readiness tick");
            if passed(phase, &pods) {
                info!(phase = %phase, pods = pods.len(), "Phase complete");
                return Ok(());
            }

            self.shutdown.sleep(self.interval).await?;
        }

        let pods = self.list_pods().await?;
        if pods.is_empty() {
            return Err(DeployError::poll_timeout(no_pods_message(&self.namespace, &self.selector)));
        }
        Err(DeployError::poll_timeout(format!(
            "{}: {}",
            phase.failure_prefix(),
            timeout_diagnostics(&pods)
        )))
    }

    /// Re-evaluate a detected fail state once per second until it clears or
    /// the recheck budget runs out. Returns the pod snapshot that cleared.
    async fn recheck(&self, phase: ReadinessPhase, initial: FailSource) -> Result<Vec<Pod>> {
        let ticks = self.budgets.error_recheck.as_secs();
        let mut current = Some(initial);
        for _ in 0..ticks {
            self.shutdown.sleep(RECHECK_TICK).await?;
            let pods = self.list_pods().await?;
            current = self.fail_state(phase, &pods).await?;
            if current.is_none() {
                info!(phase = %phase, "Fail state cleared");
                return Ok(pods);
            }
        }

        match current {
            Some(FailSource::Owner(state)) => Err(DeployError::poll_failed(format!(
                "{PRODUCT_NAME} operator failed, {state}. {RECHECK_HINT}"
            ))),
            Some(FailSource::Pod(state)) => Err(DeployError::poll_failed(match phase {
                ReadinessPhase::Scheduling => format!("{}, {state}. {RECHECK_HINT}", phase.failure_prefix()),
                ReadinessPhase::Downloading => format!("{}, {state}.", phase.failure_prefix()),
                _ => format!("{}, {state}", phase.failure_prefix()),
            })),
            None => Ok(Vec::new()),
        }
    }

    /// Owner failures take precedence over pod failures
    async fn fail_state(&self, phase: ReadinessPhase, pods: &[Pod]) -> Result<Option<FailSource>> {
        if phase != ReadinessPhase::Downloading {
            if let Some(owner) = &self.owner {
                if let Some(state) = owner.fail_state().await? {
                    return Ok(Some(FailSource::Owner(state)));
                }
            }
        }
        let pod_state = match phase {
            ReadinessPhase::Scheduling => condition_fail_state(pods, POD_SCHEDULED),
            ReadinessPhase::Downloading => container_fail_state(pods, "Pending"),
            _ => container_fail_state(pods, "Running"),
        };
        Ok(pod_state.map(FailSource::Pod))
    }

    async fn list_pods(&self) -> Result<Vec<Pod>> {
        let objects = self
            .client
            .list(&ResourceKind::POD, Some(&self.namespace), Some(&self.selector))
            .await?;
        objects
            .into_iter()
            .map(|object| serde_json::from_value(object).map_err(|e| ClientError::from(e).into()))
            .collect()
    }

    fn record(&self, phase: ReadinessPhase, pods: usize, last_fail: Option<FailState>) -> PodReadinessRecord {
        PodReadinessRecord {
            phase,
            namespace: self.namespace.clone(),
            selector: self.selector.clone(),
            pods,
            last_fail,
        }
    }
}

impl FailSource {
    fn state(&self) -> &FailState {
        match self {
            Self::Owner(state) | Self::Pod(state) => state,
        }
    }
}

fn passed(phase: ReadinessPhase, pods: &[Pod]) -> bool {
    match phase {
        ReadinessPhase::Scheduling => conditions_passed(pods, POD_SCHEDULED),
        ReadinessPhase::Downloading => all_running(pods),
        _ => conditions_passed(pods, READY),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InMemoryResourceClient;
    use crate::shutdown::ShutdownController;
    use serde_json::json;

    fn budgets(recheck_secs: u64) -> ReadinessBudgets {
        ReadinessBudgets {
            scheduling: Duration::from_millis(2000),
            downloading: Duration::from_millis(2000),
            starting: Duration::from_millis(2000),
            error_recheck: Duration::from_secs(recheck_secs),
        }
    }

    fn seed_pod(client: &InMemoryResourceClient, name: &str, status: serde_json::Value) {
        client.upsert(
            &ResourceKind::POD,
            Some("ns"),
            json!({"metadata": {"name": name, "labels": {"app": "x"}}, "status": status}),
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_recheck_budget_fails_immediately() {
        let client = Arc::new(InMemoryResourceClient::new());
        seed_pod(
            &client,
            "p",
            json!({"conditions": [{
                "type": "PodScheduled", "status": "False",
                "reason": "Unschedulable", "message": "no nodes"
            }]}),
        );
        let poller = PodReadinessPoller::new(client, ShutdownSignal::never(), "ns", "app=x", budgets(0));

        let err = poller.wait_scheduled().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("Failed to schedule a pod, reason: Unschedulable, message: no nodes. {RECHECK_HINT}")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleared_fail_state_is_checked_for_success_in_same_iteration() {
        let client = Arc::new(InMemoryResourceClient::new());
        seed_pod(
            &client,
            "p",
            json!({"conditions": [{
                "type": "PodScheduled", "status": "False",
                "reason": "Unschedulable", "message": "no nodes"
            }]}),
        );
        let writer = client.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            writer.set_status(
                &ResourceKind::POD,
                Some("ns"),
                "p",
                json!({"conditions": [{"type": "PodScheduled", "status": "True"}]}),
            );
        });
        // A single outer iteration: the recheck must not consume it
        let mut single = budgets(5);
        single.scheduling = POLL_INTERVAL;
        let poller = PodReadinessPoller::new(client, ShutdownSignal::never(), "ns", "app=x", single);

        poller.wait_scheduled().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_pods_times_out_with_selector_message() {
        let client = Arc::new(InMemoryResourceClient::new());
        let poller = PodReadinessPoller::new(client, ShutdownSignal::never(), "ns", "app=x", budgets(5));

        let err = poller.wait_images_pulled().await.unwrap_err();
        assert!(matches!(err, DeployError::PollTimeout { .. }));
        assert!(err
            .to_string()
            .starts_with("Timeout: there are no pods in the namespace: ns, selector: app=x."));
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminated_container_is_fatal_while_starting() {
        let client = Arc::new(InMemoryResourceClient::new());
        seed_pod(
            &client,
            "p",
            json!({"phase": "Running", "containerStatuses": [{
                "name": "c", "image": "i", "imageID": "", "ready": false, "restartCount": 3,
                "lastState": {"terminated": {"exitCode": 1, "reason": "Error", "message": "boom"}}
            }]}),
        );
        let poller = PodReadinessPoller::new(client, ShutdownSignal::never(), "ns", "app=x", budgets(5));

        let err = poller.wait_started().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to start a pod, reason: Error, message: boom, exitCode: 1"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_polling() {
        let client = Arc::new(InMemoryResourceClient::new());
        let controller = ShutdownController::new();
        let poller = PodReadinessPoller::new(client, controller.signal(), "ns", "app=x", budgets(5));

        let handle = tokio::spawn(async move { poller.wait_scheduled().await });
        tokio::time::sleep(Duration::from_millis(600)).await;
        controller.shutdown();

        let err = handle.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
    }
}
