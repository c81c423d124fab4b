//! `twt workflow` command - Workflow definitions and runs

use chrono::{DateTime, Utc};
use clap::Subcommand;
use console::style;
use miette::Result;

use crate::cli::helpers::{actor, open_engine, parse_instant, report, truncate_str};
use crate::cli::output::{indicator_style, outcome_style, structured};
use crate::cli::GlobalOpts;
use crate::core::clock::format_duration;
use crate::core::identity::{EntityRef, EntityType};
use crate::core::workflow::{StartWorkflow, WorkflowStatus};

#[derive(Subcommand, Debug)]
pub enum WorkflowCommands {
    /// List workflow definitions
    List(ListArgs),

    /// Start a workflow for an entity, activating its first step
    Start(StartArgs),

    /// Show every step of an entity's workflows
    Status(StatusArgs),
}

#[derive(clap::Args, Debug)]
pub struct ListArgs {
    /// Only workflows for this entity type (e.g. TENDER)
    #[arg(long, short = 't')]
    pub entity_type: Option<EntityType>,

    /// Show the steps of each workflow
    #[arg(long)]
    pub steps: bool,
}

#[derive(clap::Args, Debug)]
pub struct StartArgs {
    /// Workflow code (e.g. TENDERING_WF)
    pub code: String,

    /// Entity reference, TYPE:ID (e.g. TENDER:42)
    pub entity: EntityRef,

    /// Due date that countdown steps are anchored to (e.g. the submission deadline)
    #[arg(long, value_parser = parse_instant)]
    pub due: Option<DateTime<Utc>>,
}

#[derive(clap::Args, Debug)]
pub struct StatusArgs {
    /// Entity reference, TYPE:ID
    pub entity: EntityRef,
}

pub fn run(cmd: WorkflowCommands, global: &GlobalOpts) -> Result<()> {
    match cmd {
        WorkflowCommands::List(args) => run_list(args, global),
        WorkflowCommands::Start(args) => run_start(args, global),
        WorkflowCommands::Status(args) => run_status(args, global),
    }
}

fn run_list(args: ListArgs, global: &GlobalOpts) -> Result<()> {
    let engine = open_engine(global)?;
    let workflows: Vec<_> = engine
        .catalog()
        .all()
        .filter(|wf| args.entity_type.map_or(true, |t| wf.entity_type == t))
        .collect();

    if structured(&workflows, global.format)? {
        return Ok(());
    }

    if workflows.is_empty() {
        println!("No workflows found.");
        return Ok(());
    }

    println!(
        "{:<16} {:<20} {:<6} NAME",
        style("CODE").bold(),
        style("ENTITY").bold(),
        style("STEPS").bold()
    );
    println!("{}", "-".repeat(64));
    for wf in &workflows {
        println!(
            "{:<16} {:<20} {:<6} {}",
            style(&wf.code).cyan(),
            wf.entity_type,
            wf.steps.len(),
            wf.name
        );
        if args.steps {
            for (i, step) in wf.steps.iter().enumerate() {
                let budget = match step.allocated_ms() {
                    Some(ms) if step.business_hours_only => {
                        format!("{} business", format_duration(ms))
                    }
                    Some(ms) => format_duration(ms),
                    None => "untimed".to_string(),
                };
                let budget = match step.deadline_offset_hours {
                    Some(hours) => format!("{} / due{:+}h", budget, hours),
                    None => budget,
                };
                let optional = if step.optional { " (optional)" } else { "" };
                println!(
                    "    {:>2}. {:<22} {:<16} {}{}",
                    i + 1,
                    step.key,
                    style(budget).dim(),
                    step.name,
                    style(optional).dim()
                );
            }
        }
    }
    println!("\n{} workflow(s).", workflows.len());
    Ok(())
}

fn run_start(args: StartArgs, global: &GlobalOpts) -> Result<()> {
    let user = actor(global)?;
    let mut engine = open_engine(global)?;
    let options = StartWorkflow { due_at: args.due };
    let status = engine
        .start_workflow_with(&args.code, args.entity, options, user)
        .map_err(report)?;

    if structured(&status, global.format)? {
        return Ok(());
    }
    println!(
        "{} Started {} for {}",
        style("✓").green(),
        style(args.code.to_uppercase()).cyan(),
        args.entity
    );
    if let Some(due) = args.due {
        println!("  Due {}", due.format("%Y-%m-%d %H:%M"));
    }
    print_status(&status);
    Ok(())
}

fn run_status(args: StatusArgs, global: &GlobalOpts) -> Result<()> {
    let engine = open_engine(global)?;
    let status = engine.workflow_status(&args.entity).map_err(report)?;

    if structured(&status, global.format)? {
        return Ok(());
    }
    print_status(&status);
    Ok(())
}

/// Step table grouped by workflow
pub fn print_status(status: &WorkflowStatus) {
    let p = &status.progress;
    println!(
        "\n{}  {} of {} steps finished ({:.0}%), {} active, {} overdue",
        style(status.entity).bold(),
        p.completed + p.skipped + p.cancelled,
        p.total,
        p.percent_complete,
        p.active,
        p.overdue
    );

    let mut current_workflow: Option<&str> = None;
    for s in &status.steps {
        if current_workflow != Some(s.step.workflow_code.as_str()) {
            current_workflow = Some(s.step.workflow_code.as_str());
            println!("\n{}", style(&s.step.workflow_code).underlined());
            println!(
                "{:<3} {:<22} {:<10} {:<18} TIMER",
                "#", "STEP", "OUTCOME", "DEADLINE"
            );
        }

        let deadline = s
            .timer
            .as_ref()
            .and_then(|t| t.timer.deadline_at)
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        let timer = match &s.timer {
            Some(view) => indicator_style(view.indicator, view.display.clone()).to_string(),
            None => style("-").dim().to_string(),
        };
        let rejected = if s.step.rejection_count > 0 {
            format!(" (rejected x{})", s.step.rejection_count)
        } else {
            String::new()
        };

        println!(
            "{:<3} {:<22} {:<10} {:<18} {}{}",
            s.step.position,
            truncate_str(&s.step.step_key, 22),
            outcome_style(s.step.outcome),
            deadline,
            timer,
            style(rejected).yellow()
        );
    }
}
