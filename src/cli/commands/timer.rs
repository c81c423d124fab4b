//! `twt timer` command - Inspect timers and their event logs

use clap::Subcommand;
use console::style;
use miette::{miette, Result};

use crate::cli::helpers::{open_engine, report};
use crate::cli::output::{indicator_style, print_timer, structured};
use crate::cli::GlobalOpts;
use crate::core::clock::format_duration;
use crate::core::identity::EntityRef;
use crate::core::store::TimerFilter;
use crate::core::timer::{TimerEventType, TimerStatus};

#[derive(Subcommand, Debug)]
pub enum TimerCommands {
    /// Show the current timer of a step
    Show(KeyArgs),

    /// Show the event log of a step's current timer
    Events(KeyArgs),

    /// List timers
    List(ListArgs),
}

#[derive(clap::Args, Debug)]
pub struct KeyArgs {
    /// Entity reference, TYPE:ID (e.g. TENDER:42)
    pub entity: EntityRef,

    /// Stage key (e.g. tender_info)
    pub stage: String,
}

#[derive(clap::Args, Debug)]
pub struct ListArgs {
    /// Only timers of this entity
    #[arg(long, short = 'e')]
    pub entity: Option<EntityRef>,

    /// Only timers with this stored status (not_started, running, paused, overdue, completed, cancelled)
    #[arg(long, short = 's')]
    pub status: Option<TimerStatus>,

    /// Include cancelled timers
    #[arg(long)]
    pub all: bool,
}

pub fn run(cmd: TimerCommands, global: &GlobalOpts) -> Result<()> {
    match cmd {
        TimerCommands::Show(args) => run_show(args, global),
        TimerCommands::Events(args) => run_events(args, global),
        TimerCommands::List(args) => run_list(args, global),
    }
}

fn run_show(args: KeyArgs, global: &GlobalOpts) -> Result<()> {
    let engine = open_engine(global)?;
    let key = args.entity.stage(args.stage);
    let view = engine
        .timer_for_step(&key)
        .map_err(report)?
        .ok_or_else(|| miette!(code = "twt::not_found", "No timer found for {}", key))?;

    if structured(&view, global.format)? {
        return Ok(());
    }
    print_timer(&view);
    Ok(())
}

fn run_events(args: KeyArgs, global: &GlobalOpts) -> Result<()> {
    let engine = open_engine(global)?;
    let key = args.entity.stage(args.stage);
    let events = engine.timer_events(&key).map_err(report)?;

    if structured(&events, global.format)? {
        return Ok(());
    }

    println!("\n{}\n", style(format!("Event log for {}", key)).bold().underlined());
    println!(
        "{:<6} {:<17} {:<9} {:<24} {:<6} {:<10} REASON",
        "ID", "TIME (UTC)", "EVENT", "TRANSITION", "BY", "CHANGE"
    );
    println!("{}", "-".repeat(90));
    for e in &events {
        let event = match e.event_type {
            TimerEventType::Complete => style(e.event_type.as_str()).green(),
            TimerEventType::Overdue | TimerEventType::Reject => style(e.event_type.as_str()).red(),
            TimerEventType::Cancel | TimerEventType::Skip => style(e.event_type.as_str()).yellow(),
            _ => style(e.event_type.as_str()).cyan(),
        };
        let transition = match e.previous_status {
            Some(prev) => format!("{} -> {}", prev, e.new_status),
            None => e.new_status.to_string(),
        };
        let by = e
            .performed_by
            .map(|u| u.to_string())
            .unwrap_or_else(|| "system".to_string());
        let change = e
            .duration_change_ms
            .map(format_duration)
            .unwrap_or_default();

        println!(
            "{:<6} {:<17} {:<9} {:<24} {:<6} {:<10} {}",
            e.id,
            e.created_at.format("%Y-%m-%d %H:%M"),
            event,
            transition,
            by,
            change,
            style(e.reason.as_deref().unwrap_or("")).dim()
        );
    }
    println!("\n{} event(s).", events.len());
    Ok(())
}

fn run_list(args: ListArgs, global: &GlobalOpts) -> Result<()> {
    let engine = open_engine(global)?;
    let filter = TimerFilter {
        entity: args.entity,
        status: args.status,
        include_cancelled: args.all,
    };
    let timers = engine.list_timers(&filter).map_err(report)?;

    if structured(&timers, global.format)? {
        return Ok(());
    }
    if timers.is_empty() {
        println!("No timers found.");
        return Ok(());
    }

    println!(
        "{:<6} {:<36} {:<12} {:<18} STATE",
        "ID", "KEY", "STATUS", "DEADLINE"
    );
    println!("{}", "-".repeat(90));
    for view in &timers {
        let t = &view.timer;
        println!(
            "{:<6} {:<36} {:<12} {:<18} {}",
            t.id,
            t.key.to_string(),
            indicator_style(view.indicator, view.effective_status),
            t.deadline_at
                .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".to_string()),
            view.display
        );
    }
    println!("\n{} timer(s).", timers.len());
    Ok(())
}
