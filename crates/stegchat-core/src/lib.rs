//! # Stegchat Core API
//!
//! Covert messaging over ordinary looking image transfers. Three building blocks:
//! - [`StegoTranscoder`][tc] hides a byte payload in the low order bits of a carrier
//!   image, optionally spread over a keyed pixel permutation
//! - [`SecureChannel`][sc] sends every message as a length-prefixed PNG over one
//!   connection, with an optional Diffie-Hellman handshake and AES-256-CBC encryption
//! - [`ChannelRelay`][relay] groups connections into named channels and rebroadcasts
//!   whatever one member says to all members
//!
//! # Usage Examples
//!
//! ## Hide data inside an image
//!
//! ```rust
//! use image::{DynamicImage, ImageBuffer, Rgba};
//! use stegchat_core::{CarrierImage, StegoTranscoder, TranscoderOptions};
//!
//! let carrier = CarrierImage::from_dynamic(DynamicImage::ImageRgba8(ImageBuffer::from_fn(
//!     64,
//!     64,
//!     |x, y| Rgba([x as u8, y as u8, 42, 255]),
//! )));
//!
//! let transcoder = StegoTranscoder::new(TranscoderOptions::default().with_density(1))
//!     .expect("density 1 is valid");
//! let secret = transcoder
//!     .encode(b"Hello, World!", &carrier)
//!     .expect("Failed to hide message in image");
//!
//! let message = transcoder.decode(&secret).expect("Failed to unveil message");
//! assert_eq!(message, b"Hello, World!");
//! ```
//!
//! ## Talk through a relay
//!
//! ```rust,no_run
//! use std::net::TcpStream;
//! use stegchat_core::channel::ImageRepository;
//! use stegchat_core::{BroadcastMessage, ChannelOptions, HandshakeMessage, SecureChannel};
//!
//! let images = ImageRepository::open("images/").expect("carrier images");
//! let stream = TcpStream::connect("127.0.0.1:56565").expect("relay is running");
//! let mut channel = SecureChannel::client(
//!     images,
//!     stream,
//!     ChannelOptions::default().with_encryption(true),
//! )
//! .expect("handshake failed");
//!
//! channel.send(&HandshakeMessage::new("alpha").to_bytes().unwrap()).unwrap();
//! channel.send(b"hello").unwrap();
//! if let Some(batch) = channel.recv().unwrap() {
//!     for message in BroadcastMessage::from_bytes(&batch).unwrap().messages {
//!         println!("{message}");
//!     }
//! }
//! ```
//!
//! [tc]: ./stego/transcoder/struct.StegoTranscoder.html
//! [sc]: ./channel/struct.SecureChannel.html
//! [relay]: ./relay/struct.ChannelRelay.html

#![warn(clippy::redundant_else)]

pub mod channel;
pub mod error;
pub mod media;
pub mod relay;
pub mod result;
pub mod stego;

pub use crate::channel::{ChannelOptions, Role, SecureChannel};
pub use crate::error::StegchatError;
pub use crate::media::{CarrierImage, Persist, TranscoderOptions};
pub use crate::relay::{BroadcastMessage, ChannelRelay, HandshakeMessage, RelayConfig};
pub use crate::result::Result;
pub use crate::stego::StegoTranscoder;
