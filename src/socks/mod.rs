//! SOCKS5 client module
//!
//! Implements the client side of the SOCKS5 protocol (RFC 1928) used to
//! tunnel intercepted TCP flows through the local proxy.

pub mod client;
pub mod consts;

pub use client::Socks5Client;
