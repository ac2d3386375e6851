//! # Install Workflow
//!
//! Operator Lifecycle Manager support. [`InstallWorkflow`] drives a
//! subscription through install-plan approval to an installed CSV and handles
//! upgrade approval; [`tasks`] wraps each step as a runnable task.
//!
//! Every wait is a watch on one named object, bounded by a timeout from
//! [`TimeoutConfig`](crate::config::TimeoutConfig) and raced against shutdown.

pub mod tasks;
pub mod types;
pub mod workflow;

pub use tasks::{
    approve_install_plan_task, catalog_source_task, check_approval_strategy_task, create_subscription_task,
    custom_resource_sample, delete_operators_task, delete_subscription_task, fetch_custom_resource_sample_task,
    prometheus_rbac_task, set_custom_operator_image_task,
};
pub use types::{
    ClusterServiceVersion, Condition, InstallPlan, InstallPlanPhase, Subscription, SubscriptionState,
    SubscriptionStatus,
};
pub use workflow::{InstallWorkflow, SubscriptionAction, UpgradeOutcome, WorkflowTimeouts};
