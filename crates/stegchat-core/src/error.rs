use std::io::ErrorKind;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StegchatError {
    /// Represents a payload that does not fit into the carrier image together with its length header
    #[error("Capacity Error: {needed} bits are required but the carrier only offers {available} bits")]
    CapacityExceeded { needed: usize, available: usize },

    /// Represents a failure of the underlying connection, e.g. a reset or a closed stream
    #[error("Transport error: {0}")]
    TransportError(#[source] std::io::Error),

    /// Represents an expired read or write deadline in the middle of a transfer
    #[error("Timeout expired while waiting for data")]
    TimeoutExpired,

    /// Represents a failed key exchange, key derivation, decryption or unpadding
    #[error("Crypto failure: {0}")]
    CryptoFailure(String),

    /// Represents a peer that does not speak the protocol, for example a malformed handshake or length header
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Represents an unsupported carrier media. For example, a text file
    #[error("Media format is not supported")]
    UnsupportedMedia,

    /// Represents an invalid carrier image media. For example, a broken PNG file
    #[error("Image media is invalid")]
    InvalidImageMedia,

    /// Represents a failure when writing an image file.
    #[error("Image encoding error")]
    ImageEncodingError,

    /// Represents an image repository without a single usable carrier image
    #[error("Image repository {0} does not contain any carrier images")]
    EmptyImageRepository(String),

    /// Represents an empty permutation key
    #[error("Permutation key must not be empty")]
    InvalidKey,

    /// Represents a bit density outside of 1..=8
    #[error("Bit density {0} is out of range, expected 1 to 8")]
    InvalidDensity(u8),

    /// Represents a failure to read from a local file.
    #[error("Read error")]
    ReadError { source: std::io::Error },

    /// Represents a failure to write a local file.
    #[error("Write error")]
    WriteError { source: std::io::Error },
}

impl StegchatError {
    /// true for the failures that leave a connection unusable, the relay drops a peer
    /// whose broadcast send fails with one of these
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            StegchatError::TransportError(_)
                | StegchatError::TimeoutExpired
                | StegchatError::CryptoFailure(_)
                | StegchatError::ProtocolViolation(_)
                | StegchatError::InvalidImageMedia
                | StegchatError::UnsupportedMedia
        )
    }
}

impl From<std::io::Error> for StegchatError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            ErrorKind::WouldBlock | ErrorKind::TimedOut => StegchatError::TimeoutExpired,
            _ => StegchatError::TransportError(e),
        }
    }
}
