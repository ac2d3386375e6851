#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # deployctl
//!
//! Reconciliation and readiness orchestration for deploying, updating and
//! removing Eclipse Che on Kubernetes and OpenShift clusters.
//!
//! ## Overview
//!
//! Every command is a tree of titled tasks. Leaf tasks create or update one
//! cluster object, wait for pods to become ready, or drive the Operator
//! Lifecycle Manager through an install; group tasks expand into sequential
//! or parallel children. Progress is published as events while the tree runs
//! and the first failure aborts the run with the failing task's title attached.
//!
//! ## Module Organization
//!
//! - [`task`] - Task tree, outcomes and the runner
//! - [`reconciler`] - Create-or-update tasks over manifests and the custom resource
//! - [`readiness`] - Pod readiness polling with failure rechecks
//! - [`olm`] - Subscription, install plan and CSV workflow
//! - [`installers`] - Operator and OLM install methods
//! - [`commands`] - `deploy`, `update` and `delete` task graphs
//! - [`client`] - Kubernetes resource access, live and in-memory
//! - [`config`] - Configuration loading and per-run settings
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use deployctl::client::KubeResourceClient;
//! use deployctl::config::{ConfigManager, DeploySettings};
//! use deployctl::context::RunContext;
//! use deployctl::installers::Templates;
//! use deployctl::shutdown::ShutdownSignal;
//! use deployctl::task::TaskRunner;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = DeploySettings::from_config(ConfigManager::load(None)?.into_config())?;
//! let templates = Templates::new(settings.config.deploy.templates_dir.clone());
//! let graph = deployctl::commands::deploy_graph(&settings, &templates);
//!
//! let client = KubeResourceClient::try_default().await?;
//! let mut ctx = RunContext::new(Arc::new(settings), Arc::new(client), ShutdownSignal::never());
//! let report = TaskRunner::new().run(&graph, &mut ctx).await?;
//! println!("{} tasks ran", report.flatten().len());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod commands;
pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod installers;
pub mod logging;
pub mod olm;
pub mod progress;
pub mod readiness;
pub mod reconciler;
pub mod shutdown;
pub mod task;

pub use client::{InMemoryResourceClient, KubeResourceClient, ResourceClient, ResourceKind};
pub use config::{ConfigManager, DeployConfig, DeploySettings, SettingsOverrides};
pub use context::{RunContext, RunState};
pub use error::{ClientError, DeployError, Result};
pub use installers::{installer_for, Installer, Templates};
pub use shutdown::{ShutdownController, ShutdownSignal};
pub use task::{Task, TaskGraph, TaskOutcome, TaskRunner};
