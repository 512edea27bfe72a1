//! runlink: client-side run stream supervision for the agent engine.
//!
//! Attach to one run's event stream, pair tool start/end signals, merge text
//! deltas, and notice when a run has died without telling anyone. Every
//! handle finalizes exactly once with a [`types::RunOutcome`]; after that,
//! [`reconcile::HistoryReconciler`] rebuilds the run from durable history.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use runlink::prelude::*;
//!
//! struct Printer;
//!
//! impl RunCallbacks for Printer {
//!     fn add_system_log(&self, text: &str) { eprintln!("[system] {text}"); }
//!     fn add_text_delta(&self, text: &str) { print!("{text}"); }
//!     fn on_text_replaced(&self, full: &str) { print!("\n{full}"); }
//!     fn on_tool_start(&self, start: &ToolStart) { eprintln!("-> {}", start.tool); }
//!     fn on_tool_end(&self, end: &ToolEnd) { eprintln!("<- {} {}", end.tool, end.status); }
//!     fn on_finalize(&self, outcome: RunOutcome) { eprintln!("\n{outcome}"); }
//! }
//!
//! # async fn example() -> runlink::error::Result<()> {
//! let controller = RunStreamController::from_config(RunlinkConfig::load()?)?;
//! let handle = controller
//!     .attach("session-1", "run-1", Arc::new(Printer), AttachOptions::default())
//!     .await?;
//! if let Some(summary) = handle.wait().await {
//!     let run = HistoryReconciler::new(controller.api()).reconcile(&summary).await?;
//!     println!("{}", run.text);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod decode;
pub mod engine;
pub mod error;
pub mod liveness;
pub mod prelude;
pub mod reconcile;
pub mod stream;
pub mod text;
pub mod tracker;
pub mod types;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;
