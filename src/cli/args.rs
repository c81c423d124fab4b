//! Top-level argument definitions

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::cli::commands::analytics::AnalyticsCommands;
use crate::cli::commands::calendar::CalendarCommands;
use crate::cli::commands::completions::CompletionsArgs;
use crate::cli::commands::init::InitArgs;
use crate::cli::commands::step::StepCommands;
use crate::cli::commands::sweep::SweepArgs;
use crate::cli::commands::timer::TimerCommands;
use crate::cli::commands::workflow::WorkflowCommands;
use crate::core::identity::UserId;

#[derive(Parser, Debug)]
#[command(name = "twt")]
#[command(version, about = "Tender workflow timers - deadlines, business hours and an audit log")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options accepted by every command
#[derive(clap::Args, Debug, Clone)]
pub struct GlobalOpts {
    /// Database file (overrides the configured location)
    #[arg(long, global = true, env = "TWT_DB")]
    pub db: Option<PathBuf>,

    /// Config file (default: .twt/config.yaml found from the working directory)
    #[arg(long, global = true, env = "TWT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Acting user id, required for changes
    #[arg(long, short = 'u', global = true, env = "TWT_USER")]
    pub user: Option<UserId>,

    /// Output format
    #[arg(long, short = 'f', global = true, value_enum, default_value = "auto")]
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Tables for people
    Auto,
    Yaml,
    Json,
    Table,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create .twt/ with a starter config and an empty database
    Init(InitArgs),

    /// Workflow definitions and runs
    #[command(subcommand)]
    Workflow(WorkflowCommands),

    /// Drive a single workflow step
    #[command(subcommand)]
    Step(StepCommands),

    /// Inspect timers and their event logs
    #[command(subcommand)]
    Timer(TimerCommands),

    /// Business calendar overrides and arithmetic
    #[command(subcommand)]
    Calendar(CalendarCommands),

    /// Persist overdue status for running timers past their deadline
    Sweep(SweepArgs),

    /// Performance figures from completed timers
    #[command(subcommand)]
    Analytics(AnalyticsCommands),

    /// Generate shell completions
    Completions(CompletionsArgs),
}
