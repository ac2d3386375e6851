//! # deployctl
//!
//! Deploy, update or remove Eclipse Che on a Kubernetes or OpenShift cluster.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use deployctl::client::KubeResourceClient;
use deployctl::config::{
    ApprovalStrategy, ConfigManager, DeploySettings, InstallerKind, Platform, SettingsOverrides,
};
use deployctl::context::RunContext;
use deployctl::installers::Templates;
use deployctl::logging::{init_structured_logging, log_error};
use deployctl::progress::{ProgressEvent, ProgressPublisher, PublishedProgress};
use deployctl::shutdown::ShutdownController;
use deployctl::task::{TaskGraph, TaskRunner};
use deployctl::{commands, DeployError};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "deployctl")]
#[command(about = "Deploy, update or remove Eclipse Che on a cluster")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install the operator and create the custom resource
    Deploy(RunArgs),
    /// Upgrade the operator and wait for the application to settle
    Update(RunArgs),
    /// Remove the application, its operator and namespace
    Delete(RunArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Configuration file (YAML)
    #[arg(long, env = "DEPLOYCTL_CONFIG")]
    config: Option<PathBuf>,

    /// Target namespace
    #[arg(short, long)]
    namespace: Option<String>,

    /// Cluster platform (openshift, k8s, minikube, microk8s, docker-desktop)
    #[arg(short, long)]
    platform: Option<Platform>,

    /// Installation method (operator, olm)
    #[arg(short, long)]
    installer: Option<InstallerKind>,

    /// Directory holding the operator manifests
    #[arg(long)]
    templates: Option<PathBuf>,

    /// Operator image overriding the template or CSV image
    #[arg(long)]
    che_operator_image: Option<String>,

    /// Server image set on the custom resource
    #[arg(long)]
    cheimage: Option<String>,

    /// Ingress domain
    #[arg(short = 'b', long)]
    domain: Option<String>,

    /// Merge patch applied to the custom resource
    #[arg(long)]
    che_operator_cr_patch_yaml: Option<PathBuf>,

    /// Custom resource replacing the default one
    #[arg(long)]
    che_operator_cr_yaml: Option<PathBuf>,

    #[arg(long)]
    postgres_pvc_storage_class_name: Option<String>,

    #[arg(long)]
    workspace_pvc_storage_class_name: Option<String>,

    #[arg(long)]
    plugin_registry_url: Option<String>,

    #[arg(long)]
    devfile_registry_url: Option<String>,

    /// Enable server debug mode
    #[arg(long)]
    debug: bool,

    /// Do not wait for cert-manager before creating certificates
    #[arg(long)]
    skip_cert_manager: bool,

    /// Grant the cluster monitoring stack access to the namespace
    #[arg(long)]
    cluster_monitoring: bool,

    /// Also remove the auxiliary operator on delete
    #[arg(long)]
    delete_all: bool,

    /// Package channel
    #[arg(long)]
    olm_channel: Option<String>,

    /// First CSV to install
    #[arg(long)]
    starting_csv: Option<String>,

    /// InstallPlan approval strategy (Manual, Automatic)
    #[arg(long)]
    approval_strategy: Option<ApprovalStrategy>,

    #[arg(long)]
    catalog_source_name: Option<String>,

    #[arg(long)]
    catalog_source_namespace: Option<String>,

    /// Index image for a custom catalog source
    #[arg(long)]
    catalog_source_image: Option<String>,

    /// Budget for pods to get scheduled (ms)
    #[arg(long)]
    k8spodwaittimeout: Option<u64>,

    /// Budget for pods to become ready (ms)
    #[arg(long)]
    k8spodreadytimeout: Option<u64>,

    /// Budget for image pulls (ms)
    #[arg(long)]
    k8spoddownloadimagetimeout: Option<u64>,

    /// Grace period before a failing pod is reported (ms)
    #[arg(long)]
    k8spoderrorrechecktimeout: Option<u64>,
}

impl RunArgs {
    fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            namespace: self.namespace.clone(),
            platform: self.platform,
            installer: self.installer,
            templates_dir: self.templates.clone(),
            operator_image: self.che_operator_image.clone(),
            skip_cert_manager: self.skip_cert_manager.then_some(true),
            cluster_monitoring: self.cluster_monitoring.then_some(true),
            delete_all: self.delete_all.then_some(true),
            pod_wait_timeout_ms: self.k8spodwaittimeout,
            pod_ready_timeout_ms: self.k8spodreadytimeout,
            pod_download_image_timeout_ms: self.k8spoddownloadimagetimeout,
            pod_error_recheck_timeout_ms: self.k8spoderrorrechecktimeout,
            olm_channel: self.olm_channel.clone(),
            olm_starting_csv: self.starting_csv.clone(),
            olm_approval_strategy: self.approval_strategy,
            olm_catalog_source_name: self.catalog_source_name.clone(),
            olm_catalog_source_namespace: self.catalog_source_namespace.clone(),
            olm_catalog_source_image: self.catalog_source_image.clone(),
            debug: self.debug.then_some(true),
            server_image: self.cheimage.clone(),
            domain: self.domain.clone(),
            postgres_storage_class: self.postgres_pvc_storage_class_name.clone(),
            workspace_storage_class: self.workspace_pvc_storage_class_name.clone(),
            plugin_registry_url: self.plugin_registry_url.clone(),
            devfile_registry_url: self.devfile_registry_url.clone(),
            cr_patch_file: self.che_operator_cr_patch_yaml.clone(),
            custom_resource_file: self.che_operator_cr_yaml.clone(),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let (name, args, build): (&str, RunArgs, fn(&DeploySettings, &Templates) -> TaskGraph) = match cli.command {
        Commands::Deploy(args) => ("deploy", args, commands::deploy_graph),
        Commands::Update(args) => ("update", args, commands::update_graph),
        Commands::Delete(args) => ("delete", args, commands::delete_graph),
    };

    let manager = ConfigManager::load(args.config.as_deref()).context("Failed to load configuration")?;
    let settings = DeploySettings::resolve(manager.into_config(), args.overrides())
        .context("Invalid deployment settings")?;
    init_structured_logging(&settings.config.logging);
    info!(
        command = name,
        namespace = settings.namespace(),
        platform = %settings.platform(),
        installer = %settings.config.deploy.installer,
        "Starting"
    );

    let templates = Templates::new(settings.config.deploy.templates_dir.clone());
    let graph = build(&settings, &templates);

    let client = KubeResourceClient::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let controller = ShutdownController::new();
    let shutdown = controller.signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            controller.shutdown();
        }
    });

    let progress = ProgressPublisher::new(256);
    let renderer = tokio::spawn(render_progress(progress.subscribe()));

    let mut ctx = RunContext::new(Arc::new(settings), Arc::new(client), shutdown).with_progress(progress);
    let result = TaskRunner::new().run(&graph, &mut ctx).await;
    let messages = std::mem::take(&mut ctx.state.post_output_messages);
    // Closing the last publisher ends the renderer
    drop(ctx);
    let _ = renderer.await;

    match result {
        Ok(report) => {
            info!(tasks = report.flatten().len(), "Run completed");
            for message in messages {
                println!("{message}");
            }
            println!("Command {name} has completed successfully.");
            Ok(())
        }
        Err(e) => Err(report_failure(name, e)),
    }
}

fn report_failure(command: &str, e: DeployError) -> anyhow::Error {
    if e.is_cancelled() {
        return anyhow::anyhow!("Command {command} was cancelled");
    }
    log_error("runner", command, &e.root().to_string(), e.failed_task());
    match e.failed_task() {
        Some(task) => anyhow::anyhow!("Command {command} failed at '{task}': {}", e.root()),
        None => anyhow::Error::new(e).context(format!("Command {command} failed")),
    }
}

/// Print `title...[tag]` lines, indented by depth
async fn render_progress(mut events: broadcast::Receiver<PublishedProgress>) {
    loop {
        let published = match events.recv().await {
            Ok(published) => published,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Progress renderer fell behind");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let indent = "  ".repeat(published.event.depth());
        match &published.event {
            ProgressEvent::TaskStarted { .. } | ProgressEvent::TaskNote { .. } => {}
            ProgressEvent::TaskCompleted { title, tag, .. } => match tag {
                Some(tag) => println!("{indent}✔ {title}...[{tag}]"),
                None => println!("{indent}✔ {title}"),
            },
            ProgressEvent::TaskSkipped { title, reason, .. } => println!("{indent}↓ {title} [{reason}]"),
            ProgressEvent::TaskFailed { title, error, .. } => println!("{indent}✖ {title}\n{indent}  → {error}"),
        }
    }
}
