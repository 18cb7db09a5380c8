use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Parser)]
#[command(
    name = "axe",
    version,
    about = "A keyboard-driven Kubernetes dashboard with live-refreshing pages."
)]
pub struct CliArgs {
    /// Refresh interval in milliseconds (overrides the config file)
    #[arg(long)]
    pub refresh_ms: Option<u64>,

    /// Start in a specific namespace
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Start with all namespaces selected
    #[arg(short = 'A', long)]
    pub all_namespaces: bool,

    /// tracing filter (for example: info,axe=debug)
    #[arg(long, default_value = "info")]
    pub log_filter: String,

    /// Write logs to this file instead of discarding them
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Config file to load instead of the discovered one
    #[arg(long)]
    pub config: Option<PathBuf>,
}
