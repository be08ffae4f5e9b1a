//! SOCKS5 protocol constants
//!
//! Defines the constants used by the SOCKS5 client implementation.

/// SOCKS5 protocol version
pub const SOCKS5_VERSION: u8 = 0x05;

// Authentication methods
/// No authentication required
pub const SOCKS5_AUTH_METHOD_NONE: u8 = 0x00;
/// No acceptable methods
pub const SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE: u8 = 0xFF;

// Commands
/// TCP CONNECT command
pub const SOCKS5_CMD_TCP_CONNECT: u8 = 0x01;

// Address types
/// IPv4 address
pub const SOCKS5_ADDR_TYPE_IPV4: u8 = 0x01;
/// Domain name
pub const SOCKS5_ADDR_TYPE_DOMAIN: u8 = 0x03;
/// IPv6 address
pub const SOCKS5_ADDR_TYPE_IPV6: u8 = 0x04;

// Reply codes
/// Succeeded
pub const SOCKS5_REPLY_SUCCEEDED: u8 = 0x00;

/// Reserved byte value (always 0x00)
pub const SOCKS5_RESERVED: u8 = 0x00;

/// Greeting advertising exactly one method: no authentication
pub const SOCKS5_GREETING_NO_AUTH: [u8; 3] = [SOCKS5_VERSION, 0x01, SOCKS5_AUTH_METHOD_NONE];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greeting_bytes() {
        assert_eq!(SOCKS5_GREETING_NO_AUTH, [0x05, 0x01, 0x00]);
    }

    #[test]
    fn test_protocol_constants() {
        assert_eq!(SOCKS5_VERSION, 5);
        assert_eq!(SOCKS5_AUTH_METHOD_NONE, 0);
        assert_eq!(SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE, 255);
        assert_eq!(SOCKS5_CMD_TCP_CONNECT, 1);
        assert_eq!(SOCKS5_ADDR_TYPE_IPV4, 1);
        assert_eq!(SOCKS5_REPLY_SUCCEEDED, 0);
        assert_eq!(SOCKS5_RESERVED, 0);
    }
}
