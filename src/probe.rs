//! Proxy reachability probing
//!
//! Periodically verifies that the SOCKS5 proxy (TCP connect) and the
//! optional dedicated DNS port (one-question UDP round trip) are alive, and
//! publishes the results into [`EngineStatus`]. Probe failures never
//! propagate; an unreachable endpoint simply reads as `false`, which makes
//! the pump drop new flows immediately instead of timing them out one by
//! one.

use crate::protect::{protected_tcp_socket, protected_udp_socket, ArcProtector};
use crate::status::EngineStatus;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, info};

/// Interval between probe rounds
const PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// Minimal DNS query for the root name (`. IN A`), used to probe the
/// dedicated DNS port. Any reply counts as reachable.
const DNS_PROBE_QUERY: [u8; 17] = [
    0x13, 0x37, // id
    0x01, 0x00, // flags: recursion desired
    0x00, 0x01, // one question
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // no answer/authority/additional
    0x00, // root name
    0x00, 0x01, // qtype A
    0x00, 0x01, // qclass IN
];

/// Periodic reachability prober
pub struct ProxyProbe {
    /// SOCKS5 proxy endpoint
    proxy_addr: SocketAddr,
    /// Dedicated DNS port endpoint, when configured
    dns_addr: Option<SocketAddr>,
    /// Timeout for each probe attempt
    probe_timeout: Duration,
    /// Status block receiving the results
    status: Arc<EngineStatus>,
    /// Socket protector for probe sockets
    protector: ArcProtector,
}

impl ProxyProbe {
    /// Create a prober for the given endpoints
    pub fn new(
        proxy_addr: SocketAddr,
        dns_addr: Option<SocketAddr>,
        probe_timeout: Duration,
        status: Arc<EngineStatus>,
        protector: ArcProtector,
    ) -> Self {
        Self {
            proxy_addr,
            dns_addr,
            probe_timeout,
            status,
            protector,
        }
    }

    /// Run one probe round and publish the results
    pub async fn check_once(&self) {
        let proxy_up =
            check_reachable(self.proxy_addr, self.probe_timeout, &*self.protector).await;
        self.status.set_proxy_reachable(proxy_up);

        let dns_up = match self.dns_addr {
            Some(addr) => check_dns_reachable(addr, self.probe_timeout, &*self.protector).await,
            None => false,
        };
        self.status.set_dns_proxy_reachable(dns_up);

        debug!(
            "Probe round: proxy_reachable={}, dns_proxy_reachable={}",
            proxy_up, dns_up
        );
    }

    /// Probe periodically until shutdown
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<bool>) {
        info!("Proxy probe started for {}", self.proxy_addr);
        loop {
            self.check_once().await;

            tokio::select! {
                _ = tokio::time::sleep(PROBE_INTERVAL) => {}
                _ = shutdown_rx.recv() => {
                    debug!("Proxy probe stopping");
                    return;
                }
            }
        }
    }
}

/// Check whether a TCP endpoint accepts connections.
///
/// Opens a protected probe socket, attempts the connect, drops the socket.
/// Never errors: any failure yields `false`.
pub async fn check_reachable(
    endpoint: SocketAddr,
    probe_timeout: Duration,
    protector: &dyn crate::protect::SocketProtector,
) -> bool {
    let socket = match protected_tcp_socket(protector) {
        Ok(socket) => socket,
        Err(_) => return false,
    };

    matches!(
        timeout(probe_timeout, socket.connect(endpoint)).await,
        Ok(Ok(_))
    )
}

/// Check whether a UDP DNS endpoint answers queries.
///
/// Sends a one-question query for the root name and waits for any reply
/// datagram. No reply within the timeout counts as unreachable.
pub async fn check_dns_reachable(
    endpoint: SocketAddr,
    probe_timeout: Duration,
    protector: &dyn crate::protect::SocketProtector,
) -> bool {
    let socket = match protected_udp_socket(protector) {
        Ok(socket) => socket,
        Err(_) => return false,
    };

    if socket.send_to(&DNS_PROBE_QUERY, endpoint).await.is_err() {
        return false;
    }

    let mut reply = [0u8; 512];
    matches!(
        timeout(probe_timeout, socket.recv_from(&mut reply)).await,
        Ok(Ok((n, _))) if n > 0
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protect::NoopProtector;
    use tokio::net::{TcpListener, UdpSocket};

    const PROBE: Duration = Duration::from_millis(300);

    #[tokio::test]
    async fn test_check_reachable_listening_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        assert!(check_reachable(addr, PROBE, &NoopProtector).await);
    }

    #[tokio::test]
    async fn test_check_reachable_closed_port() {
        // Bind then drop to get a port with no listener.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        assert!(!check_reachable(addr, PROBE, &NoopProtector).await);
    }

    #[tokio::test]
    async fn test_check_dns_reachable_with_responder() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (n, peer) = server.recv_from(&mut buf).await.unwrap();
            // Echo the query back as a stand-in for a DNS answer.
            server.send_to(&buf[..n], peer).await.unwrap();
        });

        assert!(check_dns_reachable(addr, PROBE, &NoopProtector).await);
    }

    #[tokio::test]
    async fn test_check_dns_reachable_silent_port() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        // Server never replies.

        assert!(!check_dns_reachable(addr, Duration::from_millis(100), &NoopProtector).await);
    }

    #[tokio::test]
    async fn test_probe_round_publishes_status() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = listener.local_addr().unwrap();

        let status = Arc::new(EngineStatus::new());
        let probe = ProxyProbe::new(
            proxy_addr,
            None,
            PROBE,
            status.clone(),
            Arc::new(NoopProtector),
        );

        probe.check_once().await;
        assert!(status.proxy_reachable());
        assert!(!status.dns_proxy_reachable());
    }

    #[tokio::test]
    async fn test_probe_round_marks_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = listener.local_addr().unwrap();
        drop(listener);

        let status = Arc::new(EngineStatus::new());
        let probe = ProxyProbe::new(
            proxy_addr,
            None,
            PROBE,
            status.clone(),
            Arc::new(NoopProtector),
        );

        probe.check_once().await;
        assert!(!status.proxy_reachable());
    }
}
