//! Interface read loop
//!
//! [`TunPump`] is the single loop reading raw packets from the virtual
//! interface. Each packet is parsed, classified, and dispatched: TCP to the
//! flow table and its per-flow relay task, UDP port 53 to the DNS
//! interceptor, everything else to passthrough or drop. A malformed packet
//! skips that packet only; the loop itself terminates on shutdown or an
//! unrecoverable device error.

use super::TunDevice;
use crate::dns::{DnsInterceptor, DnsQuery};
use crate::error::TungateError;
use crate::flow::{CloseReason, Connection, ConnectionState, FlowKey, FlowTable, PAYLOAD_QUEUE_SIZE};
use crate::packet::{self, Ipv4Header, Protocol, UDP_HEADER_LEN};
use crate::relay::{ConnectionRelay, ResponseSink};
use crate::socks::Socks5Client;
use crate::status::EngineStatus;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, trace, warn};

/// DNS port intercepted on UDP
const DNS_PORT: u16 = 53;

/// The single packet-ingestion loop
pub struct TunPump {
    /// Interface packets are read from
    device: Arc<dyn TunDevice>,
    /// Active flows
    table: Arc<FlowTable>,
    /// Client used to open upstream tunnels for new flows
    socks: Socks5Client,
    /// DNS interception path
    dns: Arc<DnsInterceptor>,
    /// Destination for upstream response bytes
    sink: Arc<dyn ResponseSink>,
    /// Gates creation of new flows on proxy reachability
    status: Arc<EngineStatus>,
    /// Used to hand each relay task a shutdown receiver
    shutdown_tx: broadcast::Sender<bool>,
    /// Relay read/write timeout
    relay_timeout: Duration,
    /// Interface MTU; read buffer size
    mtu: usize,
    /// Write unmatched packets back instead of dropping them
    passthrough: bool,
}

impl TunPump {
    /// Create a pump over the given device
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device: Arc<dyn TunDevice>,
        table: Arc<FlowTable>,
        socks: Socks5Client,
        dns: Arc<DnsInterceptor>,
        sink: Arc<dyn ResponseSink>,
        status: Arc<EngineStatus>,
        shutdown_tx: broadcast::Sender<bool>,
        relay_timeout: Duration,
        mtu: usize,
        passthrough: bool,
    ) -> Self {
        Self {
            device,
            table,
            socks,
            dns,
            sink,
            status,
            shutdown_tx,
            relay_timeout,
            mtu,
            passthrough,
        }
    }

    /// Read and dispatch packets until shutdown or device failure
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<bool>) {
        info!("Interface read loop started (mtu={})", self.mtu);
        let mut buf = vec![0u8; self.mtu];

        loop {
            let n = tokio::select! {
                read = self.device.recv(&mut buf) => match read {
                    Ok(0) => continue,
                    Ok(n) => n,
                    Err(e) => {
                        warn!("Interface read failed, stopping loop: {}", e);
                        break;
                    }
                },
                _ = shutdown_rx.recv() => {
                    debug!("Interface read loop stopping");
                    break;
                }
            };

            if let Err(e) = self.dispatch(&buf[..n]).await {
                // Contained to this packet; the loop keeps running.
                debug!("Packet skipped: {}", e);
            }
        }
    }

    /// Classify one packet and route it to the right path
    async fn dispatch(&self, raw: &[u8]) -> Result<(), TungateError> {
        let ip = packet::parse_ipv4(raw)?;

        match ip.protocol {
            Protocol::Tcp => self.dispatch_tcp(raw, &ip).await,
            Protocol::Udp => self.dispatch_udp(raw, &ip).await,
            Protocol::Other(_) => self.passthrough(raw).await,
        }
    }

    /// TCP: look up or create the flow, fold payload into its relay
    async fn dispatch_tcp(&self, raw: &[u8], ip: &Ipv4Header) -> Result<(), TungateError> {
        let tcp = packet::parse_tcp(raw, ip.header_len)?;
        let key = FlowKey::new(Protocol::Tcp, ip.dest, tcp.dest_port);
        let payload = raw.get(ip.header_len + tcp.header_len..).unwrap_or(&[]);

        // Packets for an existing flow are folded in regardless of proxy
        // state; only new flows are gated on reachability.
        if let Some(conn) = self.table.get(&key).await {
            self.fold_payload(&conn, payload);
            return Ok(());
        }

        if !self.status.proxy_reachable() {
            debug!("{}: dropped, proxy unreachable", key);
            return Err(TungateError::ProxyUnavailable);
        }

        let (payload_tx, payload_rx) = mpsc::channel(PAYLOAD_QUEUE_SIZE);
        let (conn, inserted) = self
            .table
            .get_or_insert(key, || Arc::new(Connection::new(key, payload_tx)))
            .await;

        if inserted {
            trace!("{}: new flow", key);
            self.fold_payload(&conn, payload);
            self.spawn_flow(conn, payload_rx);
        } else {
            // Lost the insert race; the winner's relay takes the payload.
            self.fold_payload(&conn, payload);
        }

        Ok(())
    }

    /// Queue payload bytes for a flow's relay task
    fn fold_payload(&self, conn: &Connection, payload: &[u8]) {
        if payload.is_empty() {
            return;
        }
        if !conn.push_payload(Bytes::copy_from_slice(payload)) {
            trace!("{}: payload dropped, relay queue unavailable", conn.key());
        }
    }

    /// Establish the upstream tunnel for a new flow, then hand off to the
    /// relay. Runs as its own task so a slow proxy cannot stall ingestion.
    fn spawn_flow(&self, conn: Arc<Connection>, payload_rx: mpsc::Receiver<Bytes>) {
        let socks = self.socks.clone();
        let table = self.table.clone();
        let sink = self.sink.clone();
        let relay_timeout = self.relay_timeout;
        let mtu = self.mtu;

        // Subscribe before spawning so a shutdown broadcast racing this
        // flow's creation is still observed.
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let key = *conn.key();

            let upstream = tokio::select! {
                result = socks.connect(key.dest_addr, key.dest_port) => match result {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!("{}: SOCKS5 connect failed: {}", key, e);
                        if conn.claim_close(CloseReason::Error) {
                            table.remove(&key).await;
                        }
                        return;
                    }
                },
                _ = shutdown_rx.recv() => {
                    if conn.claim_close(CloseReason::Success) {
                        table.remove(&key).await;
                    }
                    return;
                }
            };

            conn.set_state(ConnectionState::Established);

            ConnectionRelay::new(conn, table, sink, relay_timeout, mtu)
                .run(upstream, payload_rx, shutdown_rx)
                .await;
        });
    }

    /// UDP: intercept DNS, pass everything else through
    async fn dispatch_udp(&self, raw: &[u8], ip: &Ipv4Header) -> Result<(), TungateError> {
        let udp = packet::parse_udp(raw, ip.header_len)?;

        if udp.dest_port != DNS_PORT {
            return self.passthrough(raw).await;
        }

        let payload_offset = ip.header_len + UDP_HEADER_LEN;
        let payload = raw.get(payload_offset..).unwrap_or(&[]);
        if payload.is_empty() {
            return Err(TungateError::Dns("empty DNS payload".to_string()));
        }

        let key = FlowKey::new(Protocol::Udp, ip.dest, udp.dest_port);
        let query = DnsQuery {
            payload: Bytes::copy_from_slice(payload),
            source_port: udp.source_port,
        };

        // Resolution has its own timeout discipline; keep it off the loop.
        let dns = self.dns.clone();
        tokio::spawn(async move {
            dns.handle(key, query).await;
        });

        Ok(())
    }

    /// Write the packet back unchanged, or drop it, per configuration
    async fn passthrough(&self, raw: &[u8]) -> Result<(), TungateError> {
        if self.passthrough {
            self.device.send(raw).await?;
        } else {
            trace!("Dropped {}-byte non-relayed packet", raw.len());
        }
        Ok(())
    }
}
