//! Flow tracking
//!
//! A flow is a destination-identified unit of traffic keyed by transport
//! protocol, destination address, and destination port. The source address
//! and port are deliberately excluded from the key: the engine handles
//! single-tenant device traffic, so one upstream connection per destination
//! is sufficient and keeps the table small.

mod connection;
mod table;

pub use connection::{CloseReason, Connection, ConnectionState, PAYLOAD_QUEUE_SIZE};
pub use table::FlowTable;

use crate::packet::Protocol;
use std::net::Ipv4Addr;

/// Key identifying one flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    /// Transport protocol
    pub protocol: Protocol,
    /// Destination address
    pub dest_addr: Ipv4Addr,
    /// Destination port
    pub dest_port: u16,
}

impl FlowKey {
    /// Create a new flow key
    pub fn new(protocol: Protocol, dest_addr: Ipv4Addr, dest_port: u16) -> Self {
        Self {
            protocol,
            dest_addr,
            dest_port,
        }
    }
}

impl std::fmt::Display for FlowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}:{}", self.protocol, self.dest_addr, self.dest_port)
    }
}
