use clap::Parser;

mod cli;
mod commands;

use cli::{CliArgs, Commands};

pub type CliResult<T> = stegchat_core::Result<T>;

fn main() -> CliResult<()> {
    env_logger::init();

    let args = CliArgs::parse();

    match args.command {
        Commands::Hide(hide) => hide.run(),
        Commands::Unveil(unveil) => unveil.run(),
        Commands::Relay(relay) => relay.run(),
    }
}
