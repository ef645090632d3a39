use std::path::PathBuf;

use clap::Parser;

use super::action::ActionArgs;

#[derive(Parser, Debug, Clone)]
pub struct ExecuteArgs {
    #[arg(
        long,
        value_hint = clap::ValueHint::FilePath,
        help = "Path to a JSON action request"
    )]
    pub action: PathBuf,

    #[arg(
        long,
        env = "KUBECONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to kubeconfig file (defaults to cluster config or ~/.kube/config)"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[command(flatten)]
    pub tunables: ActionArgs,
}
