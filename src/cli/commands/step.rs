//! `twt step` command - Drive one workflow step
//!
//! Steps are addressed by entity and step key, e.g.
//! `twt step complete TENDER:42 tender_info`.

use chrono::Duration;
use clap::Subcommand;
use console::style;
use miette::Result;

use crate::cli::helpers::{actor, confirm, find_step, open_engine, parse_duration, report};
use crate::cli::output::{outcome_style, print_timer, structured};
use crate::cli::GlobalOpts;
use crate::core::identity::{EntityRef, UserId};
use crate::core::workflow::{StartStep, StepStatus};

#[derive(Subcommand, Debug)]
pub enum StepCommands {
    /// Start a step's timer (all earlier steps must be finished)
    Start(StartArgs),

    /// Complete a step and activate the next one
    Complete(CompleteArgs),

    /// Pause a step's timer
    Pause(ReasonArgs),

    /// Resume a paused step
    Resume(TargetArgs),

    /// Grant extra time
    Extend(ExtendArgs),

    /// Send a step back for rework
    Reject(RejectArgs),

    /// Skip an optional step and move on
    Skip(CloseArgs),

    /// Cancel a step and move on
    Cancel(CloseArgs),
}

#[derive(clap::Args, Debug)]
pub struct TargetArgs {
    /// Entity reference, TYPE:ID (e.g. TENDER:42)
    pub entity: EntityRef,

    /// Step key (e.g. tender_info)
    pub step: String,
}

#[derive(clap::Args, Debug)]
pub struct StartArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Budget overriding the step default (e.g. 24h, 3d, 90m)
    #[arg(long, short = 'a', value_parser = parse_duration)]
    pub allocate: Option<Duration>,

    /// User responsible for the step
    #[arg(long)]
    pub assign: Option<UserId>,
}

#[derive(clap::Args, Debug)]
pub struct CompleteArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Completion notes
    #[arg(long, short = 'n')]
    pub notes: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct ReasonArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    #[arg(long, short = 'r')]
    pub reason: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct ExtendArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Extra time (e.g. 4h, 1d)
    #[arg(value_parser = parse_duration)]
    pub by: Duration,

    #[arg(long, short = 'r')]
    pub reason: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct RejectArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Rejection reason (required)
    #[arg(long, short = 'r')]
    pub reason: String,

    /// Restart the step's timer from zero
    #[arg(long)]
    pub reset: bool,

    /// Skip confirmation prompt
    #[arg(long, short = 'y')]
    pub yes: bool,
}

#[derive(clap::Args, Debug)]
pub struct CloseArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    #[arg(long, short = 'r')]
    pub reason: Option<String>,

    /// Skip confirmation prompt
    #[arg(long, short = 'y')]
    pub yes: bool,
}

pub fn run(cmd: StepCommands, global: &GlobalOpts) -> Result<()> {
    let user = actor(global)?;
    let mut engine = open_engine(global)?;

    let (verb, status) = match cmd {
        StepCommands::Start(args) => {
            let step = find_step(&engine, &args.target.entity, &args.target.step)?;
            let start = StartStep {
                allocated: args.allocate,
                assigned_user: args.assign,
            };
            ("Started", engine.start_step(step.id, start, user))
        }
        StepCommands::Complete(args) => {
            let step = find_step(&engine, &args.target.entity, &args.target.step)?;
            ("Completed", engine.complete_step(step.id, args.notes, user))
        }
        StepCommands::Pause(args) => {
            let step = find_step(&engine, &args.target.entity, &args.target.step)?;
            ("Paused", engine.pause_step(step.id, args.reason, user))
        }
        StepCommands::Resume(target) => {
            let step = find_step(&engine, &target.entity, &target.step)?;
            ("Resumed", engine.resume_step(step.id, user))
        }
        StepCommands::Extend(args) => {
            let step = find_step(&engine, &args.target.entity, &args.target.step)?;
            ("Extended", engine.extend_step(step.id, args.by, args.reason, user))
        }
        StepCommands::Reject(args) => {
            let step = find_step(&engine, &args.target.entity, &args.target.step)?;
            let prompt = format!(
                "Reject {}{}?",
                step.key(),
                if args.reset { " and restart its timer" } else { "" }
            );
            if !confirm(&prompt, args.yes)? {
                println!("Aborted.");
                return Ok(());
            }
            (
                "Rejected",
                engine.reject_step(step.id, Some(args.reason), args.reset, user),
            )
        }
        StepCommands::Skip(args) => {
            let step = find_step(&engine, &args.target.entity, &args.target.step)?;
            if !confirm(&format!("Skip {}?", step.key()), args.yes)? {
                println!("Aborted.");
                return Ok(());
            }
            ("Skipped", engine.skip_step(step.id, args.reason, user))
        }
        StepCommands::Cancel(args) => {
            let step = find_step(&engine, &args.target.entity, &args.target.step)?;
            if !confirm(&format!("Cancel {}?", step.key()), args.yes)? {
                println!("Aborted.");
                return Ok(());
            }
            ("Cancelled", engine.cancel_step(step.id, args.reason, user))
        }
    };

    let status = status.map_err(report)?;
    if structured(&status, global.format)? {
        return Ok(());
    }
    print_step(verb, &status);
    Ok(())
}

fn print_step(verb: &str, status: &StepStatus) {
    let step = &status.step;
    println!(
        "{} {} {} ({})",
        style("✓").green(),
        verb,
        style(step.key()).cyan(),
        outcome_style(step.outcome)
    );
    if step.rejection_count > 0 {
        println!("  Rejections: {}", step.rejection_count);
    }
    if let Some(view) = &status.timer {
        print_timer(view);
    }
}
