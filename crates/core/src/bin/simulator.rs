use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use sts::{config::DEFAULT_CONFIG, signals::SignalGuard, ConfigResolver, Orchestrator, RunState};
use tracing::level_filters::LevelFilter;

/// Run a simulation.
#[derive(clap::Parser, Debug)]
#[clap(name = "simulator")]
#[clap(after_help = "Example usage:\n\n  $ simulator -c config.fat_tree")]
struct Cli {
    /// Experiment config in the `config` namespace, e.g. `config.fat_tree`, or
    /// a path to an experiment file ending in `.toml`.
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG, env = "STS_CONFIG")]
    config: String,
    /// Directory experiment files are looked up in.
    #[arg(long, default_value = ".", env = "STS_CONFIG_DIR")]
    config_dir: PathBuf,
    /// Overrides the default log level (debug). `RUST_LOG` directives take precedence.
    #[arg(long, env = "STS_LOG_LEVEL")]
    log_level: Option<LevelFilter>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    sts::config::set_logger(cli.log_level);

    let state = Arc::new(RunState::new());
    SignalGuard::install(state.clone())?;

    let orchestrator = Orchestrator::new(ConfigResolver::with_defaults(cli.config_dir), state);
    orchestrator.run(&cli.config)?;
    Ok(())
}
