//! Command-line configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use lpv_reconcile::NodeIdentity;

use crate::source::{SourceMode, DEFAULT_RESYNC_INTERVAL};

/// Default mount point of the node's root filesystem.
pub const DEFAULT_ROOTFS_PATH: &str = "/rootfs";

/// Create local paths for local PVs in Kubernetes.
#[derive(Debug, Parser)]
#[command(name = "k8s-local-pv-provisioner")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run an in-cluster watcher for PVs and create the needed paths.
    Run(RunArgs),

    /// Show version and build information.
    Version,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// One JSON object per line.
    Json,

    /// Human-readable text.
    Text,
}

/// Options for the `run` command.
#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Hostname of the current node the pod runs on.
    #[arg(long, env = "NODE_NAME")]
    pub node_name: NodeIdentity,

    /// Load the kubeconfig file and use this context instead of the
    /// in-cluster service account.
    #[arg(long, env = "KUBERNETES_CONTEXT")]
    pub context: Option<String>,

    /// Path to the mounted root file system of the node.
    #[arg(long, env = "ROOTFS_PATH", default_value = DEFAULT_ROOTFS_PATH)]
    pub rootfs_path: PathBuf,

    /// How volume events are received.
    #[arg(long = "source", env = "EVENT_SOURCE", value_enum, default_value_t = SourceMode::Direct)]
    pub source: SourceMode,

    /// Seconds between full re-deliveries of known volumes (resync source only).
    #[arg(
        long,
        env = "RESYNC_INTERVAL_SECS",
        default_value_t = DEFAULT_RESYNC_INTERVAL.as_secs(),
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub resync_interval_secs: u64,

    /// Log level used when RUST_LOG is not set.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format.
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
}

impl RunArgs {
    /// Interval between resyncs.
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }
}

/// Version line printed by the `version` command.
pub fn version_string() -> String {
    format!(
        "{} {} (build {})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        option_env!("LPV_BUILD").unwrap_or("undefined"),
    )
}
