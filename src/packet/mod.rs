//! IPv4/TCP/UDP header parsing
//!
//! Pure, stateless codec for the raw packets read from the virtual
//! interface. Every function validates lengths before indexing and returns
//! a typed [`ParseError`] for truncated or malformed input; adversarial
//! packets must never cause an out-of-bounds read.

use crate::error::ParseError;
use std::net::Ipv4Addr;

/// Minimum IPv4 header length in bytes
pub const IPV4_MIN_HEADER_LEN: usize = 20;

/// Minimum TCP header length in bytes
pub const TCP_MIN_HEADER_LEN: usize = 20;

/// UDP header length in bytes
pub const UDP_HEADER_LEN: usize = 8;

/// IANA protocol number for TCP
const PROTO_TCP: u8 = 6;

/// IANA protocol number for UDP
const PROTO_UDP: u8 = 17;

/// Transport protocol carried by an IPv4 packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// TCP (protocol number 6)
    Tcp,
    /// UDP (protocol number 17)
    Udp,
    /// Any other protocol number (e.g. ICMP = 1)
    Other(u8),
}

impl From<u8> for Protocol {
    fn from(value: u8) -> Self {
        match value {
            PROTO_TCP => Protocol::Tcp,
            PROTO_UDP => Protocol::Udp,
            other => Protocol::Other(other),
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "TCP"),
            Protocol::Udp => write!(f, "UDP"),
            Protocol::Other(n) => write!(f, "proto/{}", n),
        }
    }
}

/// Parsed IPv4 header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Header {
    /// Header length in bytes (IHL x 4); payload of the IP packet starts here
    pub header_len: usize,
    /// Total packet length as declared by the header
    pub total_len: usize,
    /// Transport protocol of the nested payload
    pub protocol: Protocol,
    /// Source address
    pub source: Ipv4Addr,
    /// Destination address
    pub dest: Ipv4Addr,
}

/// Parsed TCP header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpHeader {
    /// Source port
    pub source_port: u16,
    /// Destination port
    pub dest_port: u16,
    /// Header length in bytes (data offset x 4)
    pub header_len: usize,
}

/// Parsed UDP header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpHeader {
    /// Source port
    pub source_port: u16,
    /// Destination port
    pub dest_port: u16,
    /// Length of UDP header plus payload as declared by the header
    pub length: usize,
}

/// Parse an IPv4 header from the start of `bytes`.
///
/// Validates the version nibble and the declared header length before
/// extracting addresses, so a malformed packet yields an error instead of
/// a bogus header.
pub fn parse_ipv4(bytes: &[u8]) -> Result<Ipv4Header, ParseError> {
    if bytes.len() < IPV4_MIN_HEADER_LEN {
        return Err(ParseError::Truncated {
            needed: IPV4_MIN_HEADER_LEN,
            got: bytes.len(),
        });
    }

    let version = bytes[0] >> 4;
    if version != 4 {
        return Err(ParseError::UnsupportedVersion(version));
    }

    let header_len = ((bytes[0] & 0x0F) as usize) * 4;
    if header_len < IPV4_MIN_HEADER_LEN {
        return Err(ParseError::BadHeaderLength(header_len));
    }
    if bytes.len() < header_len {
        return Err(ParseError::Truncated {
            needed: header_len,
            got: bytes.len(),
        });
    }

    let total_len = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
    let protocol = Protocol::from(bytes[9]);
    let source = Ipv4Addr::new(bytes[12], bytes[13], bytes[14], bytes[15]);
    let dest = Ipv4Addr::new(bytes[16], bytes[17], bytes[18], bytes[19]);

    Ok(Ipv4Header {
        header_len,
        total_len,
        protocol,
        source,
        dest,
    })
}

/// Parse a TCP header located at `offset` within `bytes`.
///
/// `offset` is normally the IPv4 header length. The returned header's
/// `header_len` locates the start of the TCP payload relative to `offset`.
pub fn parse_tcp(bytes: &[u8], offset: usize) -> Result<TcpHeader, ParseError> {
    let segment = bytes.get(offset..).ok_or(ParseError::Truncated {
        needed: offset,
        got: bytes.len(),
    })?;

    if segment.len() < TCP_MIN_HEADER_LEN {
        return Err(ParseError::Truncated {
            needed: TCP_MIN_HEADER_LEN,
            got: segment.len(),
        });
    }

    let source_port = u16::from_be_bytes([segment[0], segment[1]]);
    let dest_port = u16::from_be_bytes([segment[2], segment[3]]);

    let header_len = ((segment[12] >> 4) as usize) * 4;
    if header_len < TCP_MIN_HEADER_LEN {
        return Err(ParseError::BadHeaderLength(header_len));
    }
    if segment.len() < header_len {
        return Err(ParseError::Truncated {
            needed: header_len,
            got: segment.len(),
        });
    }

    Ok(TcpHeader {
        source_port,
        dest_port,
        header_len,
    })
}

/// Parse a UDP header located at `offset` within `bytes`.
pub fn parse_udp(bytes: &[u8], offset: usize) -> Result<UdpHeader, ParseError> {
    let datagram = bytes.get(offset..).ok_or(ParseError::Truncated {
        needed: offset,
        got: bytes.len(),
    })?;

    if datagram.len() < UDP_HEADER_LEN {
        return Err(ParseError::Truncated {
            needed: UDP_HEADER_LEN,
            got: datagram.len(),
        });
    }

    let source_port = u16::from_be_bytes([datagram[0], datagram[1]]);
    let dest_port = u16::from_be_bytes([datagram[2], datagram[3]]);
    let length = u16::from_be_bytes([datagram[4], datagram[5]]) as usize;

    Ok(UdpHeader {
        source_port,
        dest_port,
        length,
    })
}
