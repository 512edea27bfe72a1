//! CLI entry point for runlink.

use std::io::Write;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::stream::RunCallbacks;
use crate::types::{QuestionAsked, RunOutcome, ToolEnd, ToolStart, ToolStatus};

/// Watch agent engine runs from the terminal
#[derive(Parser, Debug)]
#[command(name = "runlink", version, about = "runlink: follow engine runs to completion")]
pub struct Cli {
    #[command(flatten)]
    pub engine: EngineArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Attach to a run that is already in flight
    Watch(WatchArgs),
    /// Start a run from a prompt and watch it
    Prompt(PromptArgs),
}

/// Connection settings shared by every command.
#[derive(Args, Debug)]
pub struct EngineArgs {
    /// Engine base URL (overrides RUNLINK_BASE_URL)
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Config file (defaults to ~/.runlink/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Seconds of silence after the last event before giving up (0 disables)
    #[arg(long, global = true)]
    pub idle_timeout: Option<u64>,

    /// Skip the history check after the run ends
    #[arg(long, global = true)]
    pub no_reconcile: bool,
}

/// Arguments for `runlink watch`.
#[derive(Parser, Debug)]
pub struct WatchArgs {
    pub session_id: String,
    pub run_id: String,
}

/// Arguments for `runlink prompt`.
#[derive(Parser, Debug)]
pub struct PromptArgs {
    pub session_id: String,
    /// Prompt text
    pub prompt: String,
}

/// Prints run progress: text to stdout, everything else to stderr.
#[derive(Debug, Default)]
pub struct TerminalCallbacks;

impl RunCallbacks for TerminalCallbacks {
    fn add_system_log(&self, text: &str) {
        eprintln!("[runlink] {text}");
    }

    fn add_text_delta(&self, text: &str) {
        print!("{text}");
        let _ = std::io::stdout().flush();
    }

    fn on_tool_start(&self, start: &ToolStart) {
        eprintln!("\n> {} started", start.tool);
    }

    fn on_tool_end(&self, end: &ToolEnd) {
        match end.status {
            ToolStatus::Failed => eprintln!(
                "> {} failed: {}",
                end.tool,
                end.error.as_deref().unwrap_or("unknown error")
            ),
            _ => eprintln!("> {} {}", end.tool, end.status),
        }
    }

    fn on_finalize(&self, outcome: RunOutcome) {
        eprintln!("\n[runlink] run finished: {outcome}");
    }

    fn on_text_replaced(&self, full_text: &str) {
        println!("\n--- revised output ---\n{full_text}");
    }

    fn on_question(&self, question: &QuestionAsked) {
        for prompt in &question.prompts {
            eprintln!("[question] {prompt}");
        }
    }
}
