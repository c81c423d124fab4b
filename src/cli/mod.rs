//! CLI module - argument parsing and command dispatch

pub mod args;
pub mod commands;
pub mod helpers;
pub mod output;

pub use args::{Cli, Commands, GlobalOpts, OutputFormat};

use miette::Result;

/// Run the parsed command line
pub fn run(cli: Cli) -> Result<()> {
    let global = cli.global;
    match cli.command {
        Commands::Init(args) => commands::init::run(args, &global),
        Commands::Workflow(cmd) => commands::workflow::run(cmd, &global),
        Commands::Step(cmd) => commands::step::run(cmd, &global),
        Commands::Timer(cmd) => commands::timer::run(cmd, &global),
        Commands::Calendar(cmd) => commands::calendar::run(cmd, &global),
        Commands::Sweep(args) => commands::sweep::run(args, &global),
        Commands::Analytics(cmd) => commands::analytics::run(cmd, &global),
        Commands::Completions(args) => commands::completions::run(args),
    }
}
