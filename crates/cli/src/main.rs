mod cli;
mod commands;
mod demo;
mod repl;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{CliArgs, Command};
use hub_core::HubConfig;

fn main() -> anyhow::Result<()> {
    hub_core::config::load_dotenv();
    let mut config = HubConfig::from_env();

    let args = CliArgs::parse();
    if let Some(root) = &args.backup_root {
        config.backup_root = root.into();
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_target(false)
        .init();

    config.log_summary();

    match args.command.unwrap_or(Command::Repl) {
        Command::Demo => demo::run(config),
        Command::Repl => repl::run(config),
    }
}
