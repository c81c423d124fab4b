//! `twt calendar` command - Business calendar overrides and arithmetic

use chrono::{DateTime, Duration, NaiveDate, Utc};
use clap::Subcommand;
use console::style;
use miette::Result;
use serde::Serialize;

use crate::cli::helpers::{open_engine, parse_date, parse_duration, parse_instant, report};
use crate::cli::output::structured;
use crate::cli::GlobalOpts;
use crate::core::calendar::CalendarEntry;
use crate::core::clock::format_duration;

#[derive(Subcommand, Debug)]
pub enum CalendarCommands {
    /// Add or replace the override for a date
    Add(AddArgs),

    /// Remove the override for a date
    Remove(DateArgs),

    /// List overrides
    List(ListArgs),

    /// Check whether a date is a business day
    Check(DateArgs),

    /// Add business time to an instant
    AddDuration(AddDurationArgs),
}

#[derive(clap::Args, Debug)]
pub struct AddArgs {
    /// Date (YYYY-MM-DD)
    #[arg(value_parser = parse_date)]
    pub date: NaiveDate,

    /// Holiday name
    #[arg(long, short = 'n')]
    pub name: Option<String>,

    /// Mark the date as a working day instead of a holiday
    #[arg(long, conflicts_with = "weekend")]
    pub working: bool,

    /// Mark the date as a weekend day
    #[arg(long)]
    pub weekend: bool,
}

#[derive(clap::Args, Debug)]
pub struct DateArgs {
    /// Date (YYYY-MM-DD)
    #[arg(value_parser = parse_date)]
    pub date: NaiveDate,
}

#[derive(clap::Args, Debug)]
pub struct ListArgs {
    /// First date (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub from: Option<NaiveDate>,

    /// Last date (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub to: Option<NaiveDate>,
}

#[derive(clap::Args, Debug)]
pub struct AddDurationArgs {
    /// Start instant (RFC 3339, "YYYY-MM-DD HH:MM" UTC, or a date)
    #[arg(value_parser = parse_instant)]
    pub start: DateTime<Utc>,

    /// Business time to add (e.g. 2h, 1d 4h)
    #[arg(value_parser = parse_duration)]
    pub duration: Duration,
}

#[derive(Debug, Serialize)]
struct DayCheck {
    date: NaiveDate,
    business_day: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    opens_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    closes_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    entry: Option<CalendarEntry>,
}

#[derive(Debug, Serialize)]
struct DeadlineResult {
    start: DateTime<Utc>,
    business_ms: i64,
    deadline: DateTime<Utc>,
    wall_ms: i64,
}

pub fn run(cmd: CalendarCommands, global: &GlobalOpts) -> Result<()> {
    match cmd {
        CalendarCommands::Add(args) => run_add(args, global),
        CalendarCommands::Remove(args) => run_remove(args, global),
        CalendarCommands::List(args) => run_list(args, global),
        CalendarCommands::Check(args) => run_check(args, global),
        CalendarCommands::AddDuration(args) => run_add_duration(args, global),
    }
}

fn run_add(args: AddArgs, global: &GlobalOpts) -> Result<()> {
    let mut engine = open_engine(global)?;
    let entry = CalendarEntry {
        date: args.date,
        is_holiday: !args.working && !args.weekend,
        is_weekend: args.weekend,
        name: args.name,
    };
    engine.add_calendar_entry(&entry).map_err(report)?;

    if structured(&entry, global.format)? {
        return Ok(());
    }
    let kind = if args.working {
        "working day"
    } else if args.weekend {
        "weekend day"
    } else {
        "holiday"
    };
    println!(
        "{} {} marked as {}{}",
        style("✓").green(),
        style(entry.date).cyan(),
        kind,
        entry
            .name
            .as_deref()
            .map(|n| format!(" ({})", n))
            .unwrap_or_default()
    );
    Ok(())
}

fn run_remove(args: DateArgs, global: &GlobalOpts) -> Result<()> {
    let mut engine = open_engine(global)?;
    if engine.remove_calendar_entry(args.date).map_err(report)? {
        println!("{} Removed override for {}", style("✓").green(), args.date);
    } else {
        println!("No override for {}", args.date);
    }
    Ok(())
}

fn run_list(args: ListArgs, global: &GlobalOpts) -> Result<()> {
    let engine = open_engine(global)?;
    let entries = engine
        .calendar_entries(args.from, args.to)
        .map_err(report)?;

    if structured(&entries, global.format)? {
        return Ok(());
    }
    if entries.is_empty() {
        println!("No calendar overrides.");
        return Ok(());
    }

    println!("{:<12} {:<12} NAME", "DATE", "KIND");
    println!("{}", "-".repeat(48));
    for e in &entries {
        let kind = if e.is_holiday {
            style("holiday").red()
        } else if e.is_weekend {
            style("weekend").yellow()
        } else {
            style("working").green()
        };
        println!(
            "{:<12} {:<12} {}",
            e.date,
            kind,
            e.name.as_deref().unwrap_or("")
        );
    }
    println!("\n{} override(s).", entries.len());
    Ok(())
}

fn run_check(args: DateArgs, global: &GlobalOpts) -> Result<()> {
    let engine = open_engine(global)?;
    let calendar = engine.calendar().map_err(report)?;

    let business_day = calendar.is_business_day(args.date);
    let (open, close) = calendar.window(args.date);
    let check = DayCheck {
        date: args.date,
        business_day,
        opens_at: business_day.then_some(open),
        closes_at: business_day.then_some(close),
        entry: calendar.entry(args.date).cloned(),
    };

    if structured(&check, global.format)? {
        return Ok(());
    }
    let weekday = args.date.format("%A");
    if business_day {
        println!(
            "{} {} ({}) is a business day, {} - {} UTC",
            style("✓").green(),
            args.date,
            weekday,
            open.format("%H:%M"),
            close.format("%H:%M")
        );
    } else {
        let why = check
            .entry
            .as_ref()
            .and_then(|e| e.name.clone())
            .unwrap_or_else(|| "non-working day".to_string());
        println!(
            "{} {} ({}) is not a business day: {}",
            style("✗").red(),
            args.date,
            weekday,
            why
        );
    }
    Ok(())
}

fn run_add_duration(args: AddDurationArgs, global: &GlobalOpts) -> Result<()> {
    let engine = open_engine(global)?;
    let calendar = engine.calendar().map_err(report)?;
    let deadline = calendar.add_business_duration(args.start, args.duration);
    let result = DeadlineResult {
        start: args.start,
        business_ms: args.duration.num_milliseconds(),
        deadline,
        wall_ms: (deadline - args.start).num_milliseconds(),
    };

    if structured(&result, global.format)? {
        return Ok(());
    }
    println!(
        "{} + {} business = {}",
        args.start.format("%Y-%m-%d %H:%M"),
        format_duration(result.business_ms),
        style(deadline.format("%Y-%m-%d %H:%M UTC")).bold()
    );
    println!("  Wall-clock span: {}", format_duration(result.wall_ms));
    Ok(())
}
