use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use api_types::ActionRequest;
use api_types::ActionResponse;
use clap::Parser;
use utils::logging;
use utils::version;

use resizer::app::builder::create_executor;
use resizer::app::builder::standalone_registry;
use resizer::app::ApplicationBuilder;
use resizer::config::Cli;
use resizer::config::Commands;
use resizer::config::DaemonArgs;
use resizer::config::ExecuteArgs;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    setup_global_hooks();

    let cli = Cli::parse();
    let _guard = logging::init(std::env::var(logging::LOG_PATH_ENV_VAR).ok());

    match cli.command {
        Commands::Daemon(daemon_args) => run_daemon(*daemon_args).await,
        Commands::Execute(execute_args) => run_execute(*execute_args).await,
    }
}

async fn run_daemon(daemon_args: DaemonArgs) -> Result<ExitCode> {
    tracing::info!("Starting resizer daemon {}", &**version::VERSION);

    let app = ApplicationBuilder::new(daemon_args).build().await?;

    app.run().await?;
    app.shutdown().await?;

    Ok(ExitCode::SUCCESS)
}

async fn run_execute(execute_args: ExecuteArgs) -> Result<ExitCode> {
    tracing::info!("Executing resize action from {}", execute_args.action.display());

    let content = tokio::fs::read_to_string(&execute_args.action)
        .await
        .with_context(|| format!("read action file {} failed", execute_args.action.display()))?;
    let request: ActionRequest = serde_json::from_str(&content)
        .with_context(|| format!("parse action file {} failed", execute_args.action.display()))?;

    let registry = standalone_registry(&execute_args.tunables);
    let executor = create_executor(
        execute_args.kubeconfig.clone(),
        &execute_args.tunables,
        Arc::clone(&registry),
    )
    .await?;

    let outcome = executor.execute(&request).await;
    let response = ActionResponse::from(&outcome);
    println!(
        "{}",
        serde_json::to_string_pretty(&response).context("serialize action response failed")?
    );

    Ok(if response.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
