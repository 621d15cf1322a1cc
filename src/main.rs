//! KubeVirt worker provider - machine classes and deployments for worker pools

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{error, info};

use kubevirt_common::crd::{ProviderConfigDecoder, WorkerStatus};
use kubevirt_common::kube_utils::create_client;
use kubevirt_common::telemetry::{init_tracing, LogFormat, TelemetryConfig};
use kubevirt_worker::file::{FileCloudProfileSource, FileSecretSource, FileWorkerSource, Offline};
use kubevirt_worker::kubernetes::{KubeManifestApplier, KubeProviderClientFactory, KubeSecretSource};
use kubevirt_worker::{
    Collaborators, MachineClass, MachineDeployment, ReconcilerConfig, Reconciler, SecretSource,
    ZoningStrategy,
};

/// KubeVirt worker provider
#[derive(Parser, Debug)]
#[command(name = "kubevirt-provider", version, about, long_about = None)]
struct Cli {
    /// Log output format (text or json)
    #[arg(long, global = true, env = "KUBEVIRT_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the machine classes, deployments and worker status for a worker
    ///
    /// Needs no cluster: data volumes are not touched and nothing is applied.
    /// Secret material is redacted in the output.
    Render(RenderArgs),

    /// Run one reconciliation pass against the seed and provider clusters
    Reconcile(ReconcileArgs),
}

/// Inputs shared by every subcommand
#[derive(Args, Debug)]
struct InputArgs {
    /// Path to the Worker YAML document
    #[arg(long)]
    worker: PathBuf,

    /// Path to the CloudProfile YAML document
    #[arg(long)]
    cloud_profile: PathBuf,

    /// Deployment layout for multi-zone pools (aggregate or per-zone)
    #[arg(long, env = "KUBEVIRT_ZONING", default_value = "aggregate")]
    zoning: ZoningStrategy,
}

#[derive(Args, Debug)]
struct RenderArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Path to the provider cluster kubeconfig
    #[arg(long)]
    provider_kubeconfig: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Yaml)]
    output: OutputFormat,
}

#[derive(Args, Debug)]
struct ReconcileArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Path to the provider cluster kubeconfig
    ///
    /// When omitted the kubeconfig is read from the worker's credentials
    /// secret in the seed cluster.
    #[arg(long)]
    provider_kubeconfig: Option<PathBuf>,

    /// Seed cluster kubeconfig (defaults to in-cluster config or KUBECONFIG)
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Field manager for server-side apply
    #[arg(long, env = "KUBEVIRT_FIELD_MANAGER", default_value = "kubevirt-worker")]
    field_manager: String,

    /// Where to write the reported WorkerStatus
    #[arg(long)]
    status_file: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

/// Everything `render` prints
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RenderOutput {
    machine_classes: Vec<MachineClass>,
    machine_deployments: Vec<MachineDeployment>,
    status: WorkerStatus,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(TelemetryConfig {
        format: cli.log_format,
        ..Default::default()
    })?;

    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        error!(error = ?e, "Failed to install aws-lc-rs crypto provider");
        std::process::exit(1);
    }

    match cli.command {
        Commands::Render(args) => run_render(args).await,
        Commands::Reconcile(args) => run_reconcile(args).await,
    }
}

async fn run_render(args: RenderArgs) -> anyhow::Result<()> {
    let reconciler = Reconciler::new(
        Arc::new(FileWorkerSource::new(&args.input.worker, None)),
        Arc::new(FileCloudProfileSource::new(&args.input.cloud_profile)),
        Collaborators {
            secrets: Arc::new(FileSecretSource::new(&args.provider_kubeconfig)),
            applier: Arc::new(Offline),
            provider_clients: Arc::new(Offline),
        },
        ProviderConfigDecoder::new(),
        ReconcilerConfig {
            zoning: args.input.zoning,
            ..Default::default()
        },
    );

    let delegate = reconciler.delegate().await?;
    let desired = delegate.desired_state().await?;
    let output = RenderOutput {
        machine_classes: desired.classes.iter().map(MachineClass::redacted).collect(),
        machine_deployments: delegate.generate_machine_deployments().await?,
        status: delegate.get_machine_images().await?,
    };

    let rendered = match args.output {
        OutputFormat::Yaml => serde_yaml::to_string(&output)
            .map_err(|e| anyhow::anyhow!("Failed to serialize output: {}", e))?,
        OutputFormat::Json => serde_json::to_string_pretty(&output)
            .map_err(|e| anyhow::anyhow!("Failed to serialize output: {}", e))?,
    };
    println!("{rendered}");
    Ok(())
}

async fn run_reconcile(args: ReconcileArgs) -> anyhow::Result<()> {
    let client = create_client(args.kubeconfig.as_deref()).await?;

    let secrets: Arc<dyn SecretSource> = match &args.provider_kubeconfig {
        Some(path) => Arc::new(FileSecretSource::new(path)),
        None => Arc::new(KubeSecretSource::new(client.clone())),
    };

    let reconciler = Reconciler::new(
        Arc::new(FileWorkerSource::new(&args.input.worker, args.status_file.clone())),
        Arc::new(FileCloudProfileSource::new(&args.input.cloud_profile)),
        Collaborators {
            secrets,
            applier: Arc::new(KubeManifestApplier::new(client, args.field_manager.clone())),
            provider_clients: Arc::new(KubeProviderClientFactory),
        },
        ProviderConfigDecoder::new(),
        ReconcilerConfig {
            zoning: args.input.zoning,
            field_manager: args.field_manager,
        },
    );

    match reconciler.reconcile().await {
        Ok(report) => {
            info!(
                classes = report.classes.len(),
                deployments = report.deployments.len(),
                gated = report.gated.len(),
                "Reconciliation succeeded"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, retryable = e.is_retryable(), "Reconciliation failed");
            Err(e.into())
        }
    }
}
