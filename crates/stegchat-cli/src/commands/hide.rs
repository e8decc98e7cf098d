use std::fs;
use std::path::PathBuf;

use clap::Args;
use log::info;
use stegchat_core::{StegchatError, StegoTranscoder};

use crate::cli::TranscoderArgs;
use crate::CliResult;

/// Hides a message or a file in a PNG image
#[derive(Args, Debug)]
pub struct HideArgs {
    /// Carrier PNG image, used readonly
    #[arg(short = 'i', long = "in", value_name = "media file", required = true)]
    pub media: PathBuf,

    /// Final image will be stored as file
    #[arg(
        short = 'o',
        long = "out",
        value_name = "output image file",
        required = true
    )]
    pub write_to_file: PathBuf,

    /// File to hide in the image
    #[arg(
        short = 'd',
        long = "data",
        value_name = "data file",
        conflicts_with = "message",
        required_unless_present = "message"
    )]
    pub data_file: Option<PathBuf>,

    /// A text message that will be hidden
    #[arg(
        short,
        long,
        value_name = "text message",
        required_unless_present = "data_file"
    )]
    pub message: Option<String>,

    #[command(flatten)]
    pub transcoder: TranscoderArgs,
}

impl HideArgs {
    pub fn run(self) -> CliResult<()> {
        let payload = match (self.message, &self.data_file) {
            (Some(message), _) => message.into_bytes(),
            (None, Some(file)) => {
                fs::read(file).map_err(|source| StegchatError::ReadError { source })?
            }
            (None, None) => Vec::new(),
        };

        let transcoder = StegoTranscoder::new(self.transcoder.into())?;
        transcoder.encode_file(&payload, &self.media, &self.write_to_file)?;
        info!(
            "hid {} bytes in {}",
            payload.len(),
            self.write_to_file.display()
        );
        Ok(())
    }
}
