/// hcloud-talos - Talos Linux Kubernetes on Hetzner Cloud
///
/// Provisions and tears down Talos clusters on Hetzner Cloud and bootstraps
/// a GitOps stack (cloud controller, ingress, cert-manager, Argo CD) onto them.
mod cluster;
mod config;
mod error;
mod gitops;
mod hcloud;
mod k8s;
mod talos;
#[cfg(test)]
mod testing;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cluster::{Backends, Deprovisioner, Provisioner, StatusReporter};
use crate::config::{ClusterConfig, ClusterPaths, Waits};
use crate::error::PreflightError;
use crate::gitops::{CloudAccess, GitOpsBootstrapper};
use crate::hcloud::context::TokenSources;
use crate::hcloud::{CloudApi, HetznerCloudClient};
use crate::k8s::KubernetesClient;
use crate::utils::command::{CommandRunner, ProcessRunner};
use crate::utils::probe::SystemProbe;
use crate::utils::prompt::TerminalPrompt;

#[derive(Parser)]
#[command(name = "hcloud-talos")]
#[command(about = "Deploy Talos Linux clusters on Hetzner Cloud", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "cluster.yaml")]
    config: PathBuf,

    /// Output directory for generated files
    #[arg(short, long, default_value = "./output")]
    output: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the cluster, or finish a partial one
    Create,

    /// Destroy the cluster and its local files
    #[command(alias = "wipe")]
    Destroy {
        /// Do not ask for confirmation
        #[arg(long)]
        yes: bool,
    },

    /// Show cluster status
    Status,

    /// Generate example configuration file
    Init,

    /// Manage the GitOps stack on a running cluster
    Gitops {
        #[command(subcommand)]
        command: GitOpsCommands,
    },
}

#[derive(Subcommand)]
enum GitOpsCommands {
    /// Install the cloud controller, add-ons and root Application
    Install,

    /// Remove everything `install` added
    Wipe {
        /// Do not ask for confirmation
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("hcloud_talos={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Execute command
    let result = match &cli.command {
        Commands::Create => create_cluster(&cli).await,
        Commands::Destroy { yes } => destroy_cluster(&cli, *yes).await,
        Commands::Status => show_status(&cli).await,
        Commands::Init => init_config(&cli).await,
        Commands::Gitops { command } => match command {
            GitOpsCommands::Install => gitops_install(&cli).await,
            GitOpsCommands::Wipe { yes } => gitops_wipe(&cli, *yes).await,
        },
    };

    if let Err(e) = result {
        match e.downcast_ref::<PreflightError>() {
            Some(PreflightError::Aborted) => warn!("{}", e),
            _ => error!("Error: {:#}", e),
        }
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> Result<ClusterConfig> {
    let config = ClusterConfig::from_file(&cli.config).context("Failed to load configuration")?;
    info!("Cluster name: {}", config.cluster_name);
    Ok(config)
}

fn resolve_token(config: &ClusterConfig) -> Result<String> {
    TokenSources::from_env(config.hcloud.token.clone()).resolve()
}

fn cloud_client(config: &ClusterConfig) -> Result<Arc<dyn CloudApi>> {
    Ok(Arc::new(HetznerCloudClient::new(resolve_token(config)?)?))
}

/// Create a new Talos cluster
async fn create_cluster(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let paths = ClusterPaths::new(&cli.output, &config.cluster_name);

    let backends = Backends {
        cloud: cloud_client(&config)?,
        runner: Arc::new(ProcessRunner),
        probe: Arc::new(SystemProbe::new()),
    };

    Provisioner::new(&config, &paths, backends, Waits::from_config(&config))
        .run()
        .await
}

/// Destroy an existing cluster
async fn destroy_cluster(cli: &Cli, yes: bool) -> Result<()> {
    let config = load_config(cli)?;
    let paths = ClusterPaths::new(&cli.output, &config.cluster_name);

    Deprovisioner::new(
        &config.cluster_name,
        &paths,
        cloud_client(&config)?,
        Waits::from_config(&config),
    )
    .run(&TerminalPrompt, yes)
    .await
}

/// Show cluster status
async fn show_status(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let paths = ClusterPaths::new(&cli.output, &config.cluster_name);

    StatusReporter::new(&config, &paths, cloud_client(&config)?, Arc::new(ProcessRunner))
        .report()
        .await?;
    Ok(())
}

/// Initialize example configuration file
async fn init_config(cli: &Cli) -> Result<()> {
    if cli.config.exists() {
        anyhow::bail!(
            "Configuration file already exists: {}",
            cli.config.display()
        );
    }

    let example_config = ClusterConfig::example();
    let yaml = serde_yaml::to_string(&example_config)?;

    tokio::fs::write(&cli.config, yaml)
        .await
        .context("Failed to write configuration file")?;

    info!("Example configuration created: {}", cli.config.display());
    info!("");
    info!("Next steps:");
    info!("  1. Edit the configuration file to match your requirements");
    info!("  2. Set your Hetzner Cloud API token, or activate an hcloud context:");
    info!("     export HCLOUD_TOKEN=your-token-here");
    info!("  3. Create the cluster:");
    info!("     hcloud-talos create");

    Ok(())
}

fn gitops_bootstrapper<'a>(cli: &Cli, config: &'a ClusterConfig) -> GitOpsBootstrapper<'a> {
    let paths = ClusterPaths::new(&cli.output, &config.cluster_name);
    let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner);
    let client = KubernetesClient::new(runner.clone(), paths.kubeconfig);

    GitOpsBootstrapper::new(config, runner, client, Waits::from_config(config).settle)
}

/// Install the GitOps stack
async fn gitops_install(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    config.validate_gitops()?;

    let bootstrapper = gitops_bootstrapper(cli, &config);
    bootstrapper.preflight().await?;

    let access = if bootstrapper.needs_cloud() {
        let token = resolve_token(&config)?;
        Some(CloudAccess {
            cloud: Arc::new(HetznerCloudClient::new(token.clone())?),
            token,
        })
    } else {
        None
    };

    bootstrapper.install(access.as_ref()).await
}

/// Remove the GitOps stack
async fn gitops_wipe(cli: &Cli, yes: bool) -> Result<()> {
    let config = load_config(cli)?;

    gitops_bootstrapper(cli, &config)
        .teardown(&TerminalPrompt, yes)
        .await
}
