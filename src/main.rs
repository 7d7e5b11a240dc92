use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::{debug, info};

use kube_ecr_cleanup::config::{
    CleanupConfig, DEFAULT_INTERVAL_MINUTES, DEFAULT_MAX_IMAGES, DEFAULT_NAMESPACES,
    DEFAULT_REGION,
};
use kube_ecr_cleanup::kubernetes::KubePodLister;
use kube_ecr_cleanup::processor::CleanupLoop;
use kube_ecr_cleanup::registry::EcrRegistryClient;

/// Delete old, unused images from ECR repositories
#[derive(Parser)]
#[command(name = "kube-ecr-cleanup")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to a kubeconfig file (assumes in-cluster when omitted)
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Do not remove images used by pods in this comma-separated list of
    /// namespaces
    #[arg(long, default_value = DEFAULT_NAMESPACES)]
    namespaces: String,

    /// Check interval in minutes
    #[arg(long, default_value_t = DEFAULT_INTERVAL_MINUTES)]
    interval: u64,

    /// Maximum number of images to keep in each repository
    #[arg(long, default_value_t = DEFAULT_MAX_IMAGES)]
    max_images: usize,

    /// Comma-separated list of repository names to watch
    #[arg(long, required = true)]
    repos: String,

    /// AWS region to use when talking to AWS
    #[arg(long, default_value = DEFAULT_REGION)]
    region: String,

    /// AWS account ID that owns the registry (defaults to the caller's)
    #[arg(long)]
    registry_id: Option<String>,

    /// Just log, don't delete any images
    #[arg(long)]
    dry_run: bool,

    /// Comma-separated regex patterns; images with a matching tag are
    /// always kept
    #[arg(long, default_value = "")]
    keep_filters: String,

    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(cli.verbose >= 2)
        .init();

    let config = CleanupConfig::from_args(
        cli.interval,
        cli.max_images,
        cli.region,
        cli.registry_id,
        &cli.repos,
        &cli.namespaces,
        cli.kubeconfig,
        cli.dry_run,
        &cli.keep_filters,
    )?;

    info!(
        "Kubernetes ECR Image Cleanup Controller v{} started, will run every {} minute(s).",
        env!("CARGO_PKG_VERSION"),
        config.interval.as_secs() / 60
    );
    for repository in &config.repositories {
        info!(
            "Will clean up '{}' repo in '{}' region.",
            repository, config.region
        );
    }
    for namespace in &config.namespaces {
        info!(
            "Images currently used by pods in '{}' namespace *will not* be removed.",
            namespace
        );
    }

    let pod_lister = Arc::new(KubePodLister::new(config.kubeconfig.as_deref()).await?);
    let registry = Arc::new(EcrRegistryClient::new(&config.region).await);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = CleanupLoop::new(config, pod_lister, registry).spawn(shutdown_rx);

    wait_for_shutdown_signal().await;
    info!("Shutdown signal received, exiting...");

    shutdown_tx.send(true).ok();
    worker.await?;

    Ok(())
}

/// Blocks until SIGINT or SIGTERM is delivered.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                debug!("Cannot install SIGTERM handler: {e}");
                tokio::signal::ctrl_c().await.ok();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}
