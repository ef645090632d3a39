use std::path::PathBuf;

use clap::Parser;

use super::action::ActionArgs;

#[derive(Parser, Debug, Clone)]
pub struct DaemonArgs {
    #[arg(
        long,
        env = "KUBECONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to kubeconfig file (defaults to cluster config or ~/.kube/config)"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(
        long,
        env = "API_LISTEN_ADDR",
        default_value = "0.0.0.0:8080",
        help = "HTTP API server listen address"
    )]
    pub api_listen_addr: String,

    #[arg(
        long,
        env = "RESIZER_LEASE_SWEEP_INTERVAL_SECS",
        default_value = "5",
        help = "Interval in seconds between sweeps of expired lock leases"
    )]
    pub lease_sweep_interval_secs: u64,

    #[arg(
        long,
        default_value = "30",
        help = "Seconds to wait for background tasks on shutdown"
    )]
    pub shutdown_timeout_secs: u64,

    #[command(flatten)]
    pub action: ActionArgs,
}
