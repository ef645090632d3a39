use clap::Parser;
use clap::Subcommand;
use utils::version;

use crate::config::daemon::DaemonArgs;
use crate::config::execute::ExecuteArgs;

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the resize action daemon
    Daemon(Box<DaemonArgs>),
    /// Execute a single resize action and exit
    Execute(Box<ExecuteArgs>),
}
