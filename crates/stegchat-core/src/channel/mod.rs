//! One covert connection: every message travels as a PNG image.

pub mod cipher;
pub mod framing;
pub mod handshake;
pub mod repository;
pub mod transport;

use std::net::TcpStream;
use std::time::Duration;

use log::{debug, info};
use zeroize::Zeroizing;

pub use handshake::{DhKeyPair, DhParams};
pub use repository::ImageRepository;
pub use transport::Transport;

use crate::channel::cipher::KEY_LEN;
use crate::channel::framing::{read_frame_body, read_frame_len, write_frame};
use crate::error::StegchatError;
use crate::media::{CarrierImage, TranscoderOptions};
use crate::result::Result;
use crate::stego::StegoTranscoder;

pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// run the key exchange and encrypt every payload
    pub encrypted: bool,
    /// how long [`SecureChannel::recv`] waits for the next frame
    pub poll_timeout: Duration,
    /// group the server side offers during the key exchange
    pub dh_params: DhParams,
    /// must match on both ends
    pub transcoder: TranscoderOptions,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            encrypted: false,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            dh_params: DhParams::default(),
            transcoder: TranscoderOptions::default(),
        }
    }
}

impl ChannelOptions {
    pub fn with_encryption(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_dh_params(mut self, params: DhParams) -> Self {
        self.dh_params = params;
        self
    }

    pub fn with_transcoder(mut self, options: TranscoderOptions) -> Self {
        self.transcoder = options;
        self
    }
}

/// Which side of the key exchange this end plays, the server sends the DH parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

/// Sends and receives messages hidden in carrier images over a single connection.
///
/// Wire format per message: `[u32 LE length][PNG bytes]`. With encryption enabled the
/// hidden payload is `IV || AES-256-CBC(message)` under the key agreed in the
/// handshake.
///
/// ## Example of usage
/// ```rust,no_run
/// use std::net::TcpStream;
/// use stegchat_core::channel::{ChannelOptions, ImageRepository, SecureChannel};
///
/// let images = ImageRepository::open("images/").expect("carrier images");
/// let stream = TcpStream::connect("127.0.0.1:56565").expect("peer is listening");
/// let mut channel = SecureChannel::client(images, stream, ChannelOptions::default())
///     .expect("handshake failed");
///
/// channel.send(b"hello").expect("send failed");
/// match channel.recv().expect("connection broke") {
///     Some(reply) => println!("{}", String::from_utf8_lossy(&reply)),
///     None => println!("nothing within 5 seconds"),
/// }
/// ```
pub struct SecureChannel<T: Transport = TcpStream> {
    transport: T,
    images: ImageRepository,
    transcoder: StegoTranscoder,
    options: ChannelOptions,
    key: Option<Zeroizing<[u8; KEY_LEN]>>,
}

impl<T: Transport> SecureChannel<T> {
    /// Wraps a connected transport without talking to the peer yet.
    pub fn new(images: ImageRepository, transport: T, options: ChannelOptions) -> Result<Self> {
        let transcoder = StegoTranscoder::new(options.transcoder.clone())?;

        Ok(Self {
            transport,
            images,
            transcoder,
            options,
            key: None,
        })
    }

    /// [`new`](Self::new) followed by the server side of the handshake
    pub fn server(images: ImageRepository, transport: T, options: ChannelOptions) -> Result<Self> {
        let mut channel = Self::new(images, transport, options)?;
        channel.handshake(Role::Server)?;
        Ok(channel)
    }

    /// [`new`](Self::new) followed by the client side of the handshake
    pub fn client(images: ImageRepository, transport: T, options: ChannelOptions) -> Result<Self> {
        let mut channel = Self::new(images, transport, options)?;
        channel.handshake(Role::Client)?;
        Ok(channel)
    }

    /// Agrees on the session key. Does nothing for unencrypted channels.
    ///
    /// The key can be established once per channel, a second handshake is refused.
    pub fn handshake(&mut self, role: Role) -> Result<()> {
        if !self.options.encrypted {
            return Ok(());
        }
        if self.key.is_some() {
            return Err(StegchatError::CryptoFailure(
                "session key is already established".to_string(),
            ));
        }

        let key = match role {
            Role::Server => handshake::server_handshake(&mut self.transport, &self.options.dh_params)?,
            Role::Client => handshake::client_handshake(&mut self.transport)?,
        };
        self.key = Some(Zeroizing::new(key));
        info!("established session key with {} as {role:?}", self.peer());
        Ok(())
    }

    pub fn is_encrypted(&self) -> bool {
        self.key.is_some()
    }

    pub fn options(&self) -> &ChannelOptions {
        &self.options
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn peer(&self) -> String {
        self.transport.peer()
    }

    /// Hides `message` in the next carrier image and writes it as one frame.
    ///
    /// A message too large for the carrier fails with
    /// [`StegchatError::CapacityExceeded`] before anything is written, the channel
    /// stays usable.
    pub fn send(&mut self, message: &[u8]) -> Result<()> {
        let payload = match (&self.key, self.options.encrypted) {
            (Some(key), _) => cipher::encrypt(key, message)?,
            (None, true) => {
                return Err(StegchatError::CryptoFailure(
                    "handshake has not been completed".to_string(),
                ))
            }
            (None, false) => message.to_vec(),
        };

        let carrier = self.images.next_carrier()?;
        let image = self.transcoder.encode(&payload, &carrier)?.to_png_bytes()?;

        write_frame(&mut self.transport, &image)?;
        debug!(
            "sent {} byte message as {} byte image to {}",
            message.len(),
            image.len(),
            self.peer()
        );
        Ok(())
    }

    /// [`recv_timeout`](Self::recv_timeout) with the configured poll timeout
    pub fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        self.recv_timeout(self.options.poll_timeout)
    }

    /// Waits at most `timeout` for the next frame.
    ///
    /// `Ok(None)` means nothing arrived in time, which is different from an empty
    /// message. Once a frame has started, the read is bounded only by the transport's
    /// own read timeout; a peer closing the connection is a transport error.
    /// An encrypted channel refuses to receive before its handshake.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        if self.options.encrypted && self.key.is_none() {
            return Err(StegchatError::CryptoFailure(
                "handshake has not been completed".to_string(),
            ));
        }
        if !self.poll_readable(timeout)? {
            return Ok(None);
        }

        let len = read_frame_len(&mut self.transport)?;
        let frame = read_frame_body(&mut self.transport, len)?;
        let payload = self.transcoder.decode(&CarrierImage::from_png_bytes(&frame)?)?;

        let message = match &self.key {
            Some(key) => cipher::decrypt(key, &payload)?,
            None => payload,
        };
        debug!(
            "received {} byte message in {len} byte image from {}",
            message.len(),
            self.peer()
        );
        Ok(Some(message))
    }

    /// true when a frame, or the end of the stream, is waiting
    pub fn poll_readable(&mut self, timeout: Duration) -> Result<bool> {
        self.transport.poll_readable(timeout)
    }

    /// Shuts the connection down in both directions.
    pub fn close(&mut self) -> Result<()> {
        debug!("closing channel to {}", self.peer());
        self.transport.shutdown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::framing::read_frame;
    use crate::media::Persist;
    use crate::test_utils::prepare_rgb_carrier;
    use std::net::TcpListener;
    use std::thread;
    use tempfile::TempDir;

    fn repository(size: u32) -> (TempDir, ImageRepository) {
        let dir = TempDir::new().unwrap();
        prepare_rgb_carrier(size, size)
            .save_as(&dir.path().join("carrier.png"))
            .unwrap();
        let repo = ImageRepository::open(dir.path()).unwrap();
        (dir, repo)
    }

    fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    fn plain_pair(size: u32) -> (TempDir, SecureChannel, SecureChannel) {
        let (dir, repo) = repository(size);
        let (a, b) = pair();
        let options = ChannelOptions::default().with_poll_timeout(Duration::from_secs(2));
        (
            dir,
            SecureChannel::new(repo.clone(), a, options.clone()).unwrap(),
            SecureChannel::new(repo, b, options).unwrap(),
        )
    }

    fn encrypted_pair() -> (TempDir, SecureChannel, SecureChannel) {
        let (dir, repo) = repository(64);
        let (a, b) = pair();
        let options = ChannelOptions::default()
            .with_encryption(true)
            .with_poll_timeout(Duration::from_secs(2));

        let server_repo = repo.clone();
        let server_options = options.clone();
        let server = thread::spawn(move || SecureChannel::server(server_repo, b, server_options).unwrap());
        let client = SecureChannel::client(repo, a, options).unwrap();
        (dir, client, server.join().unwrap())
    }

    #[test]
    fn should_deliver_a_message() {
        let (_dir, mut alice, mut bob) = plain_pair(32);

        alice.send(b"Hello World!").unwrap();

        assert_eq!(bob.recv().unwrap().unwrap(), b"Hello World!");
        assert!(!alice.is_encrypted());
    }

    #[test]
    fn should_tell_empty_messages_from_no_message() {
        let (_dir, mut alice, mut bob) = plain_pair(16);

        assert_eq!(bob.recv_timeout(Duration::from_millis(50)).unwrap(), None);

        alice.send(b"").unwrap();
        assert_eq!(bob.recv().unwrap(), Some(vec![]));
    }

    #[test]
    fn should_deliver_encrypted_messages_both_ways() {
        let (_dir, mut client, mut server) = encrypted_pair();
        assert!(client.is_encrypted());
        assert!(server.is_encrypted());

        client.send(b"ping").unwrap();
        assert_eq!(server.recv().unwrap().unwrap(), b"ping");

        server.send(b"pong").unwrap();
        assert_eq!(client.recv().unwrap().unwrap(), b"pong");
    }

    #[test]
    fn should_produce_different_images_for_the_same_message() {
        let (_dir, mut client, mut server) = encrypted_pair();

        client.send(b"same").unwrap();
        client.send(b"same").unwrap();
        let first = read_frame(server.transport_mut()).unwrap();
        let second = read_frame(server.transport_mut()).unwrap();

        assert_ne!(first, second);
    }

    #[test]
    fn should_refuse_a_second_handshake() {
        let (_dir, mut client, _server) = encrypted_pair();

        assert!(matches!(
            client.handshake(Role::Client),
            Err(StegchatError::CryptoFailure(_))
        ));
    }

    #[test]
    fn should_refuse_to_send_before_the_handshake() {
        let (_dir, repo) = repository(16);
        let (a, _b) = pair();
        let mut channel =
            SecureChannel::new(repo, a, ChannelOptions::default().with_encryption(true)).unwrap();

        assert!(matches!(
            channel.send(b"too early"),
            Err(StegchatError::CryptoFailure(_))
        ));
    }

    #[test]
    fn should_refuse_to_receive_before_the_handshake() {
        let (_dir, repo) = repository(16);
        let (a, b) = pair();
        let mut sender = SecureChannel::new(repo.clone(), a, ChannelOptions::default()).unwrap();
        let mut channel =
            SecureChannel::new(repo, b, ChannelOptions::default().with_encryption(true)).unwrap();

        sender.send(b"in the clear").unwrap();

        assert!(matches!(
            channel.recv_timeout(Duration::from_secs(1)),
            Err(StegchatError::CryptoFailure(_))
        ));
    }

    #[test]
    fn should_send_nothing_when_the_message_does_not_fit() {
        let (_dir, mut alice, mut bob) = plain_pair(4);

        // 4x4 RGB at density 2 offers 96 bits, 16 of them for the header
        assert!(matches!(
            alice.send(&[0u8; 11]),
            Err(StegchatError::CapacityExceeded { .. })
        ));
        assert!(!bob.poll_readable(Duration::from_millis(50)).unwrap());

        alice.send(&[1u8; 10]).unwrap();
        assert_eq!(bob.recv().unwrap().unwrap(), vec![1u8; 10]);
    }

    #[test]
    fn should_fail_on_frames_that_are_not_images() {
        let (_dir, mut alice, mut bob) = plain_pair(16);

        write_frame(alice.transport_mut(), b"this is not a png").unwrap();

        let err = bob.recv().unwrap_err();
        assert!(matches!(err, StegchatError::InvalidImageMedia));
        assert!(err.is_session_fatal());
    }

    #[test]
    fn should_report_a_closed_peer_as_transport_error() {
        let (_dir, mut alice, mut bob) = plain_pair(16);

        alice.close().unwrap();

        assert!(matches!(bob.recv(), Err(StegchatError::TransportError(_))));
    }
}
