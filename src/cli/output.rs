//! Output formatting utilities

use console::{style, StyledObject};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;

use crate::cli::OutputFormat;
use crate::core::clock::format_duration;
use crate::core::timer::{Indicator, TimerView};
use crate::core::workflow::StepOutcome;

/// Print `value` as YAML or JSON when that format was asked for
///
/// Returns false for table output, leaving the caller to render it.
pub fn structured<T: Serialize + ?Sized>(value: &T, format: OutputFormat) -> Result<bool> {
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value).into_diagnostic()?;
            println!("{}", json);
            Ok(true)
        }
        OutputFormat::Yaml => {
            let yaml = serde_yml::to_string(value).into_diagnostic()?;
            print!("{}", yaml);
            Ok(true)
        }
        OutputFormat::Auto | OutputFormat::Table => Ok(false),
    }
}

/// Colour a piece of text by traffic-light indicator
pub fn indicator_style<D>(indicator: Indicator, text: D) -> StyledObject<D> {
    match indicator {
        Indicator::Green => style(text).green(),
        Indicator::Yellow => style(text).yellow(),
        Indicator::Red => style(text).red().bold(),
        Indicator::Grey => style(text).dim(),
    }
}

pub fn outcome_style(outcome: StepOutcome) -> StyledObject<&'static str> {
    let text = outcome.as_str();
    match outcome {
        StepOutcome::Pending => style(text).dim(),
        StepOutcome::Active => style(text).cyan(),
        StepOutcome::Completed => style(text).green(),
        StepOutcome::Skipped => style(text).yellow(),
        StepOutcome::Cancelled => style(text).red(),
    }
}

/// Multi-line description of one timer
pub fn print_timer(view: &TimerView) {
    let t = &view.timer;
    println!(
        "{} {}",
        style(format!("Timer {}", t.id)).bold(),
        style(&t.key).cyan()
    );
    println!(
        "  Status:     {} ({})",
        indicator_style(view.indicator, view.effective_status),
        view.display
    );
    println!("  Allocated:  {}", format_duration(t.allocated_ms));
    if t.total_extension_ms > 0 {
        println!("  Extended:   {}", format_duration(t.total_extension_ms));
    }
    if t.total_paused_ms > 0 {
        println!("  Paused:     {}", format_duration(t.total_paused_ms));
    }
    if let Some(started) = t.started_at {
        println!("  Started:    {}", started.format("%Y-%m-%d %H:%M UTC"));
    }
    if let Some(deadline) = t.deadline_at {
        println!("  Deadline:   {}", deadline.format("%Y-%m-%d %H:%M UTC"));
    }
    if let Some(ended) = t.ended_at {
        println!("  Ended:      {}", ended.format("%Y-%m-%d %H:%M UTC"));
    }
    println!(
        "  Elapsed:    {} ({:.0}% used)",
        format_duration(view.elapsed_ms),
        view.percent_used
    );
    if let Some(user) = t.assigned_user {
        println!("  Assigned:   {}", user);
    }
}

/// Format an optional percentage for a table cell
pub fn percent(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.0}%", v))
        .unwrap_or_else(|| "-".to_string())
}
