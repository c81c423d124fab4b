//! `twt sweep` command - Persist overdue status

use console::style;
use miette::Result;

use crate::cli::helpers::{open_engine, report};
use crate::cli::output::structured;
use crate::cli::GlobalOpts;
use crate::core::clock::{format_duration, Clock};

#[derive(clap::Args, Debug)]
pub struct SweepArgs {
    /// Only print the number of timers marked
    #[arg(long, short = 'q')]
    pub quiet: bool,
}

pub fn run(args: SweepArgs, global: &GlobalOpts) -> Result<()> {
    let mut engine = open_engine(global)?;
    let swept = engine.sweep_overdue().map_err(report)?;

    if structured(&swept, global.format)? {
        return Ok(());
    }
    if args.quiet {
        println!("{}", swept.len());
        return Ok(());
    }
    if swept.is_empty() {
        println!("No running timers past their deadline.");
        return Ok(());
    }

    let now = engine.clock().now();
    for timer in &swept {
        let late = timer
            .deadline_at
            .map(|d| format_duration((now - d).num_milliseconds()))
            .unwrap_or_default();
        println!(
            "{} {} overdue by {}",
            style("!").red().bold(),
            style(&timer.key).cyan(),
            late
        );
    }
    println!("\n{} timer(s) marked overdue.", swept.len());
    Ok(())
}
