//! runlink CLI binary entry point.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use runlink::cli::{Cli, Commands, EngineArgs, TerminalCallbacks};
use runlink::config::RunlinkConfig;
use runlink::error::RunlinkError;
use runlink::reconcile::HistoryReconciler;
use runlink::stream::{AttachOptions, RunStreamController};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = run(cli).await;

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), RunlinkError> {
    let config = load_config(&cli.engine)?;
    let controller = RunStreamController::from_config(config)?;

    let (session_id, run_id) = match cli.command {
        Commands::Watch(args) => (args.session_id, args.run_id),
        Commands::Prompt(args) => {
            let run_id = match controller.api().start_run(&args.session_id, &args.prompt).await {
                Ok(run_id) => run_id,
                Err(RunlinkError::RunConflict { active_run_id, .. }) => {
                    eprintln!("[runlink] session busy, attaching to active run {active_run_id}");
                    active_run_id
                }
                Err(e) => return Err(e),
            };
            (args.session_id, run_id)
        }
    };

    let options = AttachOptions {
        idle_timeout: cli.engine.idle_timeout.map(Duration::from_secs),
        ..AttachOptions::default()
    };
    let handle = controller
        .attach(&session_id, &run_id, Arc::new(TerminalCallbacks), options)
        .await?;

    let Some(summary) = handle.wait().await else {
        return Err(RunlinkError::InvalidState("run stream detached".into()));
    };
    if cli.engine.no_reconcile {
        return Ok(());
    }

    let run = HistoryReconciler::new(controller.api()).reconcile(&summary).await?;
    if run.diverged {
        eprintln!("[runlink] stream output was incomplete, output from history:");
        println!("{}", run.text);
    }
    for tool in run.tools.iter().filter(|t| t.is_open()) {
        eprintln!("[runlink] {} never reported completion", tool.tool_name);
    }
    Ok(())
}

fn load_config(args: &EngineArgs) -> Result<RunlinkConfig, RunlinkError> {
    let mut config = RunlinkConfig::load_from(args.config.as_deref())?;
    if let Some(url) = &args.base_url {
        config = config.with_base_url(url.clone());
    }
    Ok(config)
}
