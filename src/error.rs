//! Error types for Tungate
//!
//! This module defines all custom error types used throughout the engine.
//! Only [`TungateError::Interface`] is fatal to `Engine::start`; every other
//! variant is contained to the packet or flow that produced it.

use std::io;
use thiserror::Error;

/// Main error type for Tungate operations
#[derive(Error, Debug)]
pub enum TungateError {
    /// Virtual interface error (fatal - aborts engine start)
    #[error("Interface error: {0}")]
    Interface(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// SOCKS5 proxy is not reachable; the flow is dropped without a connect attempt
    #[error("SOCKS5 proxy unavailable")]
    ProxyUnavailable,

    /// Packet parse error (the offending packet is skipped)
    #[error("Packet parse error: {0}")]
    Parse(#[from] ParseError),

    /// SOCKS5 client error (the half-open connection is discarded)
    #[error("SOCKS5 error: {0}")]
    Socks(#[from] SocksError),

    /// Relay IO error (tears down one connection)
    #[error("Relay error: {0}")]
    Relay(String),

    /// DNS resolution error (the originating query goes unanswered)
    #[error("DNS error: {0}")]
    Dns(String),
}

/// Errors produced while parsing IPv4/TCP/UDP headers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Buffer is shorter than the structure it should contain
    #[error("Truncated packet: need {needed} bytes, got {got}")]
    Truncated {
        /// Minimum number of bytes required
        needed: usize,
        /// Number of bytes actually available
        got: usize,
    },

    /// IP version nibble is not 4
    #[error("Unsupported IP version: {0}")]
    UnsupportedVersion(u8),

    /// Declared header length is smaller than the protocol minimum
    #[error("Invalid header length: {0} bytes")]
    BadHeaderLength(usize),
}

/// SOCKS5 client errors
#[derive(Error, Debug)]
pub enum SocksError {
    /// Proxy answered with a version byte other than 5
    #[error("Unsupported SOCKS version in reply: {0}")]
    BadVersion(u8),

    /// Proxy refused the no-authentication method
    #[error("Handshake rejected: method {0:#04x} not acceptable")]
    HandshakeRejected(u8),

    /// CONNECT request was refused with the given reply code
    #[error("Connect rejected: {}", reply_name(*.0))]
    ConnectRejected(u8),

    /// A handshake step did not complete within its timeout
    #[error("Timeout during {0}")]
    Timeout(&'static str),

    /// IO error on the proxy socket
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Human-readable name for a SOCKS5 reply code (RFC 1928, section 6)
pub fn reply_name(code: u8) -> &'static str {
    match code {
        0x00 => "succeeded",
        0x01 => "general SOCKS server failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unassigned reply code",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        let err = ParseError::Truncated { needed: 20, got: 7 };
        assert_eq!(format!("{}", err), "Truncated packet: need 20 bytes, got 7");

        let err = ParseError::UnsupportedVersion(6);
        assert_eq!(format!("{}", err), "Unsupported IP version: 6");

        let err = ParseError::BadHeaderLength(8);
        assert_eq!(format!("{}", err), "Invalid header length: 8 bytes");
    }

    #[test]
    fn test_socks_error_display() {
        let err = SocksError::BadVersion(4);
        assert_eq!(format!("{}", err), "Unsupported SOCKS version in reply: 4");

        let err = SocksError::HandshakeRejected(0xFF);
        assert_eq!(
            format!("{}", err),
            "Handshake rejected: method 0xff not acceptable"
        );

        let err = SocksError::ConnectRejected(1);
        assert_eq!(
            format!("{}", err),
            "Connect rejected: general SOCKS server failure"
        );

        let err = SocksError::Timeout("greeting read");
        assert_eq!(format!("{}", err), "Timeout during greeting read");
    }

    #[test]
    fn test_reply_name_known_codes() {
        assert_eq!(reply_name(0x00), "succeeded");
        assert_eq!(reply_name(0x03), "network unreachable");
        assert_eq!(reply_name(0x05), "connection refused");
        assert_eq!(reply_name(0x08), "address type not supported");
    }

    #[test]
    fn test_reply_name_unknown_code() {
        assert_eq!(reply_name(0x09), "unassigned reply code");
        assert_eq!(reply_name(0xFF), "unassigned reply code");
    }

    #[test]
    fn test_tungate_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::Other, "io error");
        let err: TungateError = io_err.into();
        assert!(matches!(err, TungateError::Io(_)));
    }

    #[test]
    fn test_tungate_error_from_parse() {
        let err: TungateError = ParseError::UnsupportedVersion(6).into();
        assert!(matches!(err, TungateError::Parse(_)));
    }

    #[test]
    fn test_tungate_error_from_socks() {
        let err: TungateError = SocksError::ConnectRejected(2).into();
        assert!(matches!(err, TungateError::Socks(_)));
    }

    #[test]
    fn test_tungate_error_display() {
        let err = TungateError::Interface("tun open failed".to_string());
        assert_eq!(format!("{}", err), "Interface error: tun open failed");

        let err = TungateError::ProxyUnavailable;
        assert_eq!(format!("{}", err), "SOCKS5 proxy unavailable");

        let err = TungateError::Dns("no answer".to_string());
        assert_eq!(format!("{}", err), "DNS error: no answer");
    }

    #[test]
    fn test_parse_error_eq() {
        assert_eq!(
            ParseError::Truncated { needed: 20, got: 0 },
            ParseError::Truncated { needed: 20, got: 0 }
        );
        assert_ne!(
            ParseError::UnsupportedVersion(6),
            ParseError::UnsupportedVersion(7)
        );
    }
}
