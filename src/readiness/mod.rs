//! # Readiness
//!
//! Bounded, cancellable polling of pod state. [`PodReadinessPoller`] drives a
//! selector's pods through three phases with an error-recheck window, and the
//! task factories in [`tasks`] expose the poller and the smaller deployment
//! waits as runnable tasks.

pub mod pod_status;
pub mod poller;
pub mod probe;
pub mod tasks;

pub use pod_status::FailState;
pub use poller::{PodReadinessPoller, PodReadinessRecord, ReadinessBudgets, ReadinessPhase};
pub use probe::{CustomResourceFailState, FailStateProbe};
pub use tasks::{
    deployment_existence_task, pod_deleted_task, pod_start_tasks, scale_deployment_task,
    wait_custom_resource_active_task, wait_latest_replica_task,
};
