//! Groups sessions into named channels and rebroadcasts what each channel says.

pub mod protocol;
pub mod registry;

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, info, warn};

pub use protocol::{BroadcastMessage, HandshakeMessage};
pub use registry::{ChannelRegistry, PassSummary, SessionId};

use crate::channel::{ChannelOptions, DhParams, ImageRepository, SecureChannel};
use crate::error::StegchatError;
use crate::result::Result;

pub const DEFAULT_PORT: u16 = 56565;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub host: String,
    /// 0 picks a free port, see [`RelayHandle::local_addr`]
    pub port: u16,
    /// directory of PNG carriers for everything the relay sends
    pub image_repository: PathBuf,
    /// require the key exchange from every client
    pub encrypted: bool,
    /// read and write deadline on every client connection
    pub socket_timeout: Duration,
    /// how long a new client may take to name its channel
    pub handshake_timeout: Duration,
    /// pause of a worker that found nothing to do
    pub idle_interval: Duration,
    pub dh_params: DhParams,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            image_repository: PathBuf::from("images"),
            encrypted: false,
            socket_timeout: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(10),
            idle_interval: Duration::from_millis(50),
            dh_params: DhParams::default(),
        }
    }
}

impl RelayConfig {
    pub fn with_address(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    pub fn with_image_repository(mut self, dir: impl Into<PathBuf>) -> Self {
        self.image_repository = dir.into();
        self
    }

    pub fn with_encryption(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }

    pub fn with_socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_idle_interval(mut self, interval: Duration) -> Self {
        self.idle_interval = interval;
        self
    }

    pub fn with_dh_params(mut self, params: DhParams) -> Self {
        self.dh_params = params;
        self
    }

    fn channel_options(&self) -> ChannelOptions {
        ChannelOptions::default()
            .with_encryption(self.encrypted)
            .with_dh_params(self.dh_params.clone())
    }
}

type SharedRegistry = Arc<Mutex<ChannelRegistry>>;

fn lock(registry: &SharedRegistry) -> MutexGuard<'_, ChannelRegistry> {
    // a worker that panicked mid pass leaves a consistent map behind
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The relay server.
///
/// Two workers share one [`ChannelRegistry`] behind a single mutex:
/// - ingestion accepts connections, runs the handshake, reads the
///   [`HandshakeMessage`] and registers the session
/// - routing runs [`ChannelRegistry::route_pass`] over and over
///
/// A failing client only ever costs its own session.
///
/// ## Example of usage
/// ```rust,no_run
/// use stegchat_core::{ChannelRelay, RelayConfig};
///
/// let config = RelayConfig::default()
///     .with_address("0.0.0.0", 56565)
///     .with_image_repository("images/")
///     .with_encryption(true);
///
/// ChannelRelay::new(config).expect("usable image repository").run().expect("relay failed");
/// ```
#[derive(Clone)]
pub struct ChannelRelay {
    config: Arc<RelayConfig>,
    images: ImageRepository,
    registry: SharedRegistry,
    stop: Arc<AtomicBool>,
}

impl ChannelRelay {
    /// Checks the configuration, the image repository must hold at least one carrier.
    pub fn new(config: RelayConfig) -> Result<Self> {
        let images = ImageRepository::open(&config.image_repository)?;

        Ok(Self {
            config: Arc::new(config),
            images,
            registry: Arc::default(),
            stop: Arc::default(),
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Binds the listener and starts both workers in the background.
    pub fn spawn(&self) -> Result<RelayHandle> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port))?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        info!("relay listening on {local_addr}");

        let ingestion = {
            let relay = self.clone();
            thread::Builder::new()
                .name("stegchat-ingestion".to_string())
                .spawn(move || relay.ingestion_loop(listener))?
        };
        let routing = {
            let relay = self.clone();
            thread::Builder::new()
                .name("stegchat-routing".to_string())
                .spawn(move || relay.routing_loop())?
        };

        Ok(RelayHandle {
            local_addr,
            registry: Arc::clone(&self.registry),
            stop: Arc::clone(&self.stop),
            workers: vec![ingestion, routing],
        })
    }

    /// Serves until the process ends.
    pub fn run(&self) -> Result<()> {
        self.spawn()?.join();
        Ok(())
    }

    /// Turns a fresh connection into a session and learns which channel it joins.
    ///
    /// The key exchange (for encrypted relays) runs under the socket timeout, the
    /// channel name must follow within the handshake timeout.
    pub fn accept_session(&self, stream: TcpStream) -> Result<(String, SecureChannel)> {
        // accepted sockets may inherit the listener's non-blocking mode
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(self.config.socket_timeout))?;
        stream.set_write_timeout(Some(self.config.socket_timeout))?;

        let mut session = SecureChannel::server(
            self.images.clone(),
            stream,
            self.config.channel_options(),
        )?;
        let Some(raw) = session.recv_timeout(self.config.handshake_timeout)? else {
            return Err(StegchatError::TimeoutExpired);
        };
        let handshake = HandshakeMessage::from_bytes(&raw)?;

        Ok((handshake.channel, session))
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    fn ingestion_loop(&self, listener: TcpListener) {
        while !self.stopped() {
            match listener.accept() {
                Ok((stream, addr)) => match self.accept_session(stream) {
                    Ok((channel, session)) => {
                        lock(&self.registry).register(&channel, session);
                    }
                    Err(e) => warn!("rejected connection from {addr}: {e}"),
                },
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(self.config.idle_interval),
                Err(e) => {
                    error!("accepting a connection failed: {e}");
                    thread::sleep(self.config.idle_interval);
                }
            }
        }
    }

    fn routing_loop(&self) {
        while !self.stopped() {
            let summary = lock(&self.registry).route_pass(Duration::ZERO);
            if summary.is_idle() {
                thread::sleep(self.config.idle_interval);
            }
        }
    }
}

/// A running relay, returned by [`ChannelRelay::spawn`]
pub struct RelayHandle {
    local_addr: SocketAddr,
    registry: SharedRegistry,
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl RelayHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// channel name to session ids, as of now
    pub fn channel_members(&self) -> BTreeMap<String, Vec<SessionId>> {
        lock(&self.registry).snapshot()
    }

    /// Stops both workers and closes every session.
    pub fn shutdown(self) {
        self.stop.store(true, Ordering::Relaxed);
        let registry = Arc::clone(&self.registry);
        self.join();
        lock(&registry).close_all();
        info!("relay stopped");
    }

    fn join(self) {
        for worker in self.workers {
            let name = worker.thread().name().unwrap_or("worker").to_string();
            if worker.join().is_err() {
                error!("relay {name} thread panicked");
            }
        }
    }
}
