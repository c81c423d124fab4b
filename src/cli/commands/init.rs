//! `twt init` command - Create a project directory

use console::style;
use miette::{miette, IntoDiagnostic, Result};
use std::fs;
use std::path::PathBuf;

use crate::cli::helpers::display_path;
use crate::cli::GlobalOpts;
use crate::core::config::{CONFIG_FILE, PROJECT_DIR};
use crate::core::store::TimerStore;
use crate::core::Config;

#[derive(clap::Args, Debug)]
pub struct InitArgs {
    /// Directory to initialize (default: current directory)
    pub path: Option<PathBuf>,

    /// Overwrite an existing config file with the template
    #[arg(long)]
    pub force: bool,
}

pub fn run(args: InitArgs, global: &GlobalOpts) -> Result<()> {
    let cwd = std::env::current_dir().into_diagnostic()?;
    let root = match args.path {
        Some(path) if path.is_relative() => cwd.join(path),
        Some(path) => path,
        None => cwd.clone(),
    };

    let project_dir = root.join(PROJECT_DIR);
    fs::create_dir_all(&project_dir).into_diagnostic()?;

    let config_path = project_dir.join(CONFIG_FILE);
    if config_path.exists() && !args.force {
        println!(
            "{} {} already exists, keeping it",
            style("!").yellow(),
            display_path(&config_path, &root)
        );
    } else {
        fs::write(&config_path, Config::template()).into_diagnostic()?;
    }

    let mut config = Config::load(&config_path).into_diagnostic()?;
    if let Some(db) = &global.db {
        config.storage.database = Some(if db.is_relative() { cwd.join(db) } else { db.clone() });
    }
    let db_path = config
        .database_path()
        .ok_or_else(|| miette!("Cannot determine a database location"))?;
    TimerStore::open(
        &db_path,
        std::time::Duration::from_millis(config.storage.busy_timeout_ms),
    )
    .into_diagnostic()?;

    println!(
        "{} Initialized twt project in {}",
        style("✓").green(),
        root.display()
    );
    println!("  Config:   {}", display_path(&config_path, &root));
    println!("  Database: {}", display_path(&db_path, &root));
    Ok(())
}
