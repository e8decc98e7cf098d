use clap::{Args, Parser, Subcommand};
use stegchat_core::media::DEFAULT_BIT_DENSITY;
use stegchat_core::TranscoderOptions;

use crate::commands::*;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Hide(hide::HideArgs),
    Unveil(unveil::UnveilArgs),
    Relay(relay::RelayArgs),
}

/// Embedding parameters, both sides have to agree on them
#[derive(Args, Debug, Clone)]
pub struct TranscoderArgs {
    /// Key for the pseudorandom pixel order, without it data follows in raster order
    #[arg(short, long, value_name = "key")]
    pub key: Option<String>,

    /// Low order bits per color channel that carry data
    #[arg(
        long,
        value_name = "bits",
        default_value_t = DEFAULT_BIT_DENSITY,
        value_parser = clap::value_parser!(u8).range(1..=8)
    )]
    pub density: u8,
}

impl From<TranscoderArgs> for TranscoderOptions {
    fn from(args: TranscoderArgs) -> Self {
        TranscoderOptions::default()
            .with_density(args.density)
            .use_key(args.key)
    }
}
