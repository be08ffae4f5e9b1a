//! DNS interception
//!
//! UDP packets addressed to port 53 never reach the regular flow path;
//! their DNS payload is resolved out-of-band. The preferred path is a
//! single datagram exchange with the proxy's dedicated DNS port; when that
//! port is not configured or not reachable, the query is tunneled as
//! DNS-over-TCP (2-byte big-endian length prefix in both directions)
//! through the SOCKS5 proxy to a fixed upstream resolver.
//!
//! Resolution failures are swallowed here: an unanswered query degrades to
//! a client-side DNS timeout and must never disturb the interception loop.

use crate::error::TungateError;
use crate::flow::FlowKey;
use crate::protect::{protected_udp_socket, ArcProtector};
use crate::relay::ResponseSink;
use crate::socks::Socks5Client;
use crate::status::EngineStatus;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Maximum size of a DNS reply datagram we accept
const DNS_REPLY_BUF_SIZE: usize = 4096;

/// One intercepted DNS query; transient, dropped after a single resolution
/// attempt.
#[derive(Debug, Clone)]
pub struct DnsQuery {
    /// Raw DNS message extracted from the UDP payload
    pub payload: Bytes,
    /// Source port of the originating datagram
    pub source_port: u16,
}

/// Resolves intercepted DNS queries through the proxy
pub struct DnsInterceptor {
    /// Dedicated DNS port endpoint, when enabled
    dns_addr: Option<SocketAddr>,
    /// Upstream resolver for the DNS-over-TCP fallback
    resolver: SocketAddr,
    /// Timeout for one resolution round trip
    dns_timeout: Duration,
    /// SOCKS5 client for the fallback path
    socks: Socks5Client,
    /// Gates the datagram path on DNS-port reachability
    status: Arc<EngineStatus>,
    /// Protector for the datagram socket
    protector: ArcProtector,
    /// Destination for response bytes
    sink: Arc<dyn ResponseSink>,
}

impl DnsInterceptor {
    /// Create an interceptor
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dns_addr: Option<SocketAddr>,
        resolver: SocketAddr,
        dns_timeout: Duration,
        socks: Socks5Client,
        status: Arc<EngineStatus>,
        protector: ArcProtector,
        sink: Arc<dyn ResponseSink>,
    ) -> Self {
        Self {
            dns_addr,
            resolver,
            dns_timeout,
            socks,
            status,
            protector,
            sink,
        }
    }

    /// Resolve one query and deliver the response to the sink.
    ///
    /// Every failure is logged and swallowed; the query is simply not
    /// answered.
    pub async fn handle(&self, key: FlowKey, query: DnsQuery) {
        match self.resolve(&query).await {
            Ok(response) => {
                debug!(
                    "{}: DNS response of {} bytes for source port {}",
                    key,
                    response.len(),
                    query.source_port
                );
                self.sink.deliver(&key, &response).await;
            }
            Err(e) => warn!("{}: DNS resolution failed: {}", key, e),
        }
    }

    /// Pick the resolution path and run it once (no retry)
    async fn resolve(&self, query: &DnsQuery) -> Result<Vec<u8>, TungateError> {
        if let Some(addr) = self.dns_addr {
            if self.status.dns_proxy_reachable() {
                return self.resolve_datagram(addr, query).await;
            }
        }
        self.resolve_over_tcp(query).await
    }

    /// Forward the query as one datagram to the dedicated DNS port and
    /// await one reply datagram.
    async fn resolve_datagram(
        &self,
        addr: SocketAddr,
        query: &DnsQuery,
    ) -> Result<Vec<u8>, TungateError> {
        let socket = protected_udp_socket(self.protector.as_ref())?;
        socket.send_to(&query.payload, addr).await?;

        let mut buf = vec![0u8; DNS_REPLY_BUF_SIZE];
        let (n, _) = timeout(self.dns_timeout, socket.recv_from(&mut buf))
            .await
            .map_err(|_| TungateError::Dns(format!("no reply from {} in time", addr)))??;

        buf.truncate(n);
        Ok(buf)
    }

    /// Tunnel the query as DNS-over-TCP through the SOCKS5 proxy.
    async fn resolve_over_tcp(&self, query: &DnsQuery) -> Result<Vec<u8>, TungateError> {
        let resolver_ip = match self.resolver {
            SocketAddr::V4(v4) => *v4.ip(),
            SocketAddr::V6(_) => {
                return Err(TungateError::Dns(
                    "IPv6 resolver not supported over SOCKS5 tunnel".to_string(),
                ))
            }
        };

        let mut stream = self.socks.connect(resolver_ip, self.resolver.port()).await?;

        if query.payload.len() > u16::MAX as usize {
            return Err(TungateError::Dns("query exceeds 65535 bytes".to_string()));
        }
        let len_prefix = (query.payload.len() as u16).to_be_bytes();
        stream.write_all(&len_prefix).await?;
        stream.write_all(&query.payload).await?;

        let mut reply_len = [0u8; 2];
        timeout(self.dns_timeout, stream.read_exact(&mut reply_len))
            .await
            .map_err(|_| TungateError::Dns("DNS-over-TCP reply timed out".to_string()))??;

        let mut response = vec![0u8; u16::from_be_bytes(reply_len) as usize];
        timeout(self.dns_timeout, stream.read_exact(&mut response))
            .await
            .map_err(|_| TungateError::Dns("DNS-over-TCP reply timed out".to_string()))??;

        Ok(response)
    }
}
