use std::path::PathBuf;

use clap::Args;
use stegchat_core::relay::DEFAULT_PORT;
use stegchat_core::{ChannelRelay, RelayConfig};

use crate::CliResult;

/// Runs a channel relay that rebroadcasts messages to every channel member
#[derive(Args, Debug)]
pub struct RelayArgs {
    /// Address to listen on
    #[arg(long, value_name = "host", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, value_name = "port", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Directory of PNG carrier images for outgoing messages
    #[arg(long = "images", value_name = "image directory", required = true)]
    pub image_repository: PathBuf,

    /// Require a Diffie-Hellman handshake and encrypt every message
    #[arg(short, long)]
    pub encrypted: bool,
}

impl RelayArgs {
    pub fn run(self) -> CliResult<()> {
        let config = RelayConfig::default()
            .with_address(self.host, self.port)
            .with_image_repository(self.image_repository)
            .with_encryption(self.encrypted);

        ChannelRelay::new(config)?.run()
    }
}
