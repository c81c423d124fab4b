//! `twt analytics` command - Performance figures from completed timers

use chrono::{DateTime, Duration, Utc};
use clap::Subcommand;
use console::style;
use miette::{miette, Result};

use crate::cli::helpers::{open_engine, parse_instant, report};
use crate::cli::output::{percent, structured};
use crate::cli::GlobalOpts;
use crate::core::analytics::{StepPerformance, Summary, UserPerformance};
use crate::core::clock::{format_duration, Clock};
use crate::core::identity::{EntityRef, UserId};

#[derive(Subcommand, Debug)]
pub enum AnalyticsCommands {
    /// Performance of one stage across all entities
    Step(StepArgs),

    /// Per-stage performance, bottlenecks first
    Workflow(WorkflowArgs),

    /// Ranked per-user performance
    User(UserArgs),

    /// Everything completed for one entity
    Entity(EntityArgs),

    /// Weekly completion trends
    Trends(TrendArgs),
}

#[derive(clap::Args, Debug)]
pub struct RangeArgs {
    /// Only completions at or after this time
    #[arg(long, value_parser = parse_instant)]
    pub from: Option<DateTime<Utc>>,

    /// Only completions before this time
    #[arg(long, value_parser = parse_instant)]
    pub to: Option<DateTime<Utc>>,
}

#[derive(clap::Args, Debug)]
pub struct StepArgs {
    /// Stage key (e.g. costing_sheets)
    pub stage: String,

    #[command(flatten)]
    pub range: RangeArgs,
}

#[derive(clap::Args, Debug)]
pub struct WorkflowArgs {
    /// Workflow code; all workflows when omitted
    pub code: Option<String>,

    #[command(flatten)]
    pub range: RangeArgs,
}

#[derive(clap::Args, Debug)]
pub struct UserArgs {
    /// Only this user's ranked entry
    pub user: Option<UserId>,

    #[command(flatten)]
    pub range: RangeArgs,
}

#[derive(clap::Args, Debug)]
pub struct EntityArgs {
    /// Entity reference, TYPE:ID
    pub entity: EntityRef,
}

#[derive(clap::Args, Debug)]
pub struct TrendArgs {
    /// Number of weeks back from now (ignored when --from is given)
    #[arg(long, short = 'w', default_value_t = 8)]
    pub weeks: u32,

    #[command(flatten)]
    pub range: RangeArgs,
}

pub fn run(cmd: AnalyticsCommands, global: &GlobalOpts) -> Result<()> {
    let engine = open_engine(global)?;

    match cmd {
        AnalyticsCommands::Step(args) => {
            let perf = engine
                .step_performance(&args.stage, args.range.from, args.range.to)
                .map_err(report)?
                .ok_or_else(|| {
                    miette!(code = "twt::not_found", "No completions for stage '{}'", args.stage)
                })?;
            if !structured(&perf, global.format)? {
                print_steps(std::slice::from_ref(&perf));
            }
        }
        AnalyticsCommands::Workflow(args) => {
            let code = args.code.as_deref().map(|c| {
                engine
                    .catalog()
                    .get(c)
                    .map(|wf| wf.code.clone())
                    .unwrap_or_else(|| c.to_string())
            });
            let steps = engine
                .workflow_step_performance(code.as_deref(), args.range.from, args.range.to)
                .map_err(report)?;
            if !structured(&steps, global.format)? {
                if steps.is_empty() {
                    println!("No completions found.");
                } else {
                    print_steps(&steps);
                }
            }
        }
        AnalyticsCommands::User(args) => {
            let users = engine
                .user_performance(args.user, args.range.from, args.range.to)
                .map_err(report)?;
            if !structured(&users, global.format)? {
                if users.is_empty() {
                    println!("No completions found.");
                } else {
                    print_users(&users);
                }
            }
        }
        AnalyticsCommands::Entity(args) => {
            let perf = engine.entity_performance(&args.entity).map_err(report)?;
            if !structured(&perf, global.format)? {
                println!("\n{}", style(perf.entity).bold());
                print_summary(&perf.summary);
                if !perf.steps.is_empty() {
                    println!();
                    print_steps(&perf.steps);
                    println!();
                    print_users(&perf.users);
                }
            }
        }
        AnalyticsCommands::Trends(args) => {
            let to = args.range.to.unwrap_or_else(|| engine.clock().now());
            let from = args
                .range
                .from
                .unwrap_or_else(|| to - Duration::weeks(i64::from(args.weeks)));
            let buckets = engine.trends(from, to).map_err(report)?;
            if !structured(&buckets, global.format)? {
                println!(
                    "{:<10} {:<12} {:>5} {:>8} {:>8} {:>8}",
                    "WEEK", "STARTING", "DONE", "ON TIME", "USED", "AVG(3)"
                );
                println!("{}", "-".repeat(56));
                for b in &buckets {
                    println!(
                        "{:<10} {:<12} {:>5} {:>8} {:>8} {:>8}",
                        b.week,
                        b.week_start,
                        b.completions,
                        percent(b.on_time_rate),
                        percent(b.avg_percent_used),
                        percent(b.moving_avg_percent_used)
                    );
                }
            }
        }
    }
    Ok(())
}

fn print_summary(s: &Summary) {
    println!(
        "  {} completed, {} on time ({:.0}%), {} late",
        s.completions, s.on_time, s.on_time_rate, s.late
    );
    println!(
        "  Average: {} actual vs {} allocated ({:.0}% used)",
        format_duration(s.avg_actual_ms),
        format_duration(s.avg_allocated_ms),
        s.avg_percent_used
    );
    if s.late > 0 {
        println!("  Average lateness: {}", format_duration(s.avg_overdue_ms));
    }
}

fn print_steps(steps: &[StepPerformance]) {
    println!(
        "{:<24} {:>5} {:>8} {:>8} {:>10}  FLAG",
        "STAGE", "DONE", "ON TIME", "USED", "AVG LATE"
    );
    println!("{}", "-".repeat(66));
    for s in steps {
        let flag = if s.is_bottleneck {
            style("bottleneck").red().bold().to_string()
        } else {
            String::new()
        };
        println!(
            "{:<24} {:>5} {:>8} {:>8} {:>10}  {}",
            s.stage,
            s.summary.completions,
            percent(Some(s.summary.on_time_rate)),
            percent(Some(s.summary.avg_percent_used)),
            if s.summary.late > 0 {
                format_duration(s.summary.avg_overdue_ms)
            } else {
                "-".to_string()
            },
            flag
        );
    }
}

fn print_users(users: &[UserPerformance]) {
    println!(
        "{:<5} {:<10} {:>5} {:>8} {:>8}",
        "RANK", "USER", "DONE", "ON TIME", "USED"
    );
    println!("{}", "-".repeat(40));
    for u in users {
        println!(
            "{:<5} {:<10} {:>5} {:>8} {:>8}",
            u.rank,
            u.user
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string()),
            u.summary.completions,
            percent(Some(u.summary.on_time_rate)),
            percent(Some(u.summary.avg_percent_used))
        );
    }
}
