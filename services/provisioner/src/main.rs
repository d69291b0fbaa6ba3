//! k8s-local-pv-provisioner
//!
//! Watches `PersistentVolume`s and creates the local paths of the ones
//! scheduled on this node. Exits non-zero when the volume feed fails so the
//! pod is restarted and every known volume is reconciled again.

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use lpv_provisioner::cluster;
use lpv_provisioner::config::{self, Cli, Command, LogFormat, RunArgs};
use lpv_provisioner::source::{EventSource, ResyncSource, SourceMode, WatchSource};
use lpv_provisioner::Reconciler;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Version => {
            println!("{}", config::version_string());
            Ok(())
        }
        Command::Run(args) => run(args).await,
    }
}

async fn run(args: RunArgs) -> Result<()> {
    init_tracing(&args.log_level, args.log_format);

    info!(
        node_name = %args.node_name,
        rootfs_path = %args.rootfs_path.display(),
        source = %args.source,
        context = ?args.context,
        "Configuration loaded"
    );

    let client = cluster::connect(args.context.as_deref()).await?;

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    let mut source: Box<dyn EventSource> = match args.source {
        SourceMode::Direct => Box::new(WatchSource::spawn(client)),
        SourceMode::Resync => Box::new(ResyncSource::spawn(client, args.resync_interval())),
    };

    let mut reconciler = Reconciler::with_filesystem(args.node_name, args.rootfs_path);
    reconciler.run(source.as_mut(), shutdown_rx).await?;

    info!("Provisioner shutdown complete");
    Ok(())
}

fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Resolve on Ctrl-C or SIGTERM.
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
