use clap::Parser;
use miette::Result;
use tracing_subscriber::EnvFilter;
use twt::cli::Cli;

/// Log to stderr, filtered by TWT_LOG (or RUST_LOG), warnings only by default
fn init_tracing() {
    let filter = EnvFilter::try_from_env("TWT_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    // Install miette's fancy error handler for beautiful diagnostics
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(2)
                .tab_width(4)
                .build(),
        )
    }))?;

    init_tracing();

    let cli = Cli::parse();
    twt::cli::run(cli)
}
