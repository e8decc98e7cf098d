use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use clap::Args;
use stegchat_core::{StegchatError, StegoTranscoder};

use crate::cli::TranscoderArgs;
use crate::CliResult;

/// Unveils data hidden in a PNG image
#[derive(Args, Debug)]
pub struct UnveilArgs {
    /// Source image that contains secret data
    #[arg(
        short = 'i',
        long = "in",
        value_name = "media source file",
        required = true
    )]
    pub media: PathBuf,

    /// Data will be stored in that file, printed to stdout otherwise
    #[arg(short = 'o', long = "out", value_name = "output file")]
    pub output_file: Option<PathBuf>,

    #[command(flatten)]
    pub transcoder: TranscoderArgs,
}

impl UnveilArgs {
    pub fn run(self) -> CliResult<()> {
        let transcoder = StegoTranscoder::new(self.transcoder.into())?;
        let data = transcoder.decode_file(&self.media)?;

        match self.output_file {
            Some(file) => fs::write(file, &data).map_err(|source| StegchatError::WriteError { source }),
            None => {
                let mut stdout = io::stdout().lock();
                stdout
                    .write_all(&data)
                    .and_then(|_| stdout.flush())
                    .map_err(|source| StegchatError::WriteError { source })
            }
        }
    }
}
