//! Tungate - user-space TUN traffic interception engine
//!
//! Tungate reads raw IPv4 packets from a TUN-like virtual interface,
//! tracks destination-keyed flows, and relays TCP traffic through a local
//! SOCKS5 proxy (such as Tor's SocksPort). UDP queries to port 53 are
//! intercepted and resolved through the proxy as well, either via a
//! dedicated DNS port or tunneled as DNS-over-TCP.
//!
//! The embedding platform supplies two seams: a [`tun::TunProvider`] that
//! opens the interface, and a [`protect::SocketProtector`] that excludes
//! upstream sockets from the interface's routing so relayed traffic is not
//! captured again.
//!
//! # Example
//!
//! ```no_run
//! use tungate::config::EngineConfig;
//! use tungate::engine::Engine;
//! use tungate::tun::{ChannelDevice, ChannelTunProvider};
//!
//! # async fn run() -> Result<(), tungate::error::TungateError> {
//! let engine = Engine::new(EngineConfig::default());
//! let (device, _handle) = ChannelDevice::new();
//! engine.start(&ChannelTunProvider::new(device)).await?;
//! // ... packets flow ...
//! engine.stop().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod dns;
pub mod engine;
pub mod error;
pub mod flow;
pub mod packet;
pub mod probe;
pub mod protect;
pub mod relay;
pub mod socks;
pub mod status;
pub mod tun;

pub use engine::{Engine, EngineState};
pub use error::TungateError;
pub use status::StatusSnapshot;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
