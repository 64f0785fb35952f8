mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use trainer_core::EngineConfig;

use cli::{Cli, Command};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("trainer=info".parse()?))
        .init();

    let args = Cli::parse();

    let mut config = load_config(&args.config);
    if let Some(process) = args.process {
        config.process_name = process;
    }
    let wait = Duration::from_secs(args.wait);

    match args.command {
        Command::Watch { focus } => commands::watch::run(config, focus),
        Command::Read {
            target,
            value_type,
            count,
        } => commands::read::run(config, wait, &target.resolve(), value_type, count),
        Command::Write {
            target,
            value_type,
            value,
        } => commands::write::run(config, wait, &target.resolve(), value_type, &value),
        Command::Scan { signatures, json } => {
            commands::scan::run(config, wait, &signatures, json)
        }
        Command::Call {
            address,
            relative,
            ints,
            floats,
            string,
        } => commands::call::run(
            config,
            wait,
            commands::call::CallRequest {
                address: &address,
                relative,
                ints: &ints,
                floats: &floats,
                string: string.as_deref(),
            },
        ),
        Command::Symbolize { stack, base } => commands::symbolize::run(&stack, base.as_deref()),
    }
}

fn load_config(path: &Path) -> EngineConfig {
    match EngineConfig::load(path) {
        Ok(config) => {
            info!("Loaded config from {:?}", path);
            config
        }
        Err(e) if e.is_not_found() => EngineConfig::default(),
        Err(e) => {
            warn!("Failed to load config: {}, using defaults", e);
            EngineConfig::default()
        }
    }
}
