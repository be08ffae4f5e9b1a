//! Test utilities and mocks for Tungate
//!
//! This module provides common test utilities used across integration tests.

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tungate::config::{DnsConfig, EngineConfig};
use tungate::flow::FlowKey;
use tungate::relay::ResponseSink;

/// Sink that records every delivered chunk, keyed by flow
#[derive(Default)]
pub struct CollectSink {
    /// Delivered chunks in arrival order
    pub delivered: Mutex<Vec<(FlowKey, Vec<u8>)>>,
}

#[async_trait]
impl ResponseSink for CollectSink {
    async fn deliver(&self, key: &FlowKey, data: &[u8]) {
        self.delivered.lock().await.push((*key, data.to_vec()));
    }
}

impl CollectSink {
    /// Concatenated bytes delivered so far
    pub async fn bytes(&self) -> Vec<u8> {
        let delivered = self.delivered.lock().await;
        delivered.iter().flat_map(|(_, d)| d.iter().copied()).collect()
    }
}

/// Mock SOCKS5 proxy that accepts CONNECT requests and echoes all payload
/// bytes back to the client.
pub struct MockSocksProxy {
    /// Address the proxy listens on
    pub addr: SocketAddr,
    /// Number of tunnels established so far
    connections: Arc<AtomicUsize>,
    /// CONNECT destinations in arrival order, as (ip octets, port)
    targets: Arc<Mutex<Vec<([u8; 4], u16)>>>,
}

impl MockSocksProxy {
    /// Bind on an ephemeral loopback port and start accepting
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let targets = Arc::new(Mutex::new(Vec::new()));

        let conn_counter = connections.clone();
        let target_log = targets.clone();
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(_) => return,
                };
                let conn_counter = conn_counter.clone();
                let target_log = target_log.clone();

                tokio::spawn(async move {
                    // Greeting: expect no-auth, accept it.
                    let mut greeting = [0u8; 3];
                    if stream.read_exact(&mut greeting).await.is_err() {
                        return;
                    }
                    assert_eq!(greeting, [0x05, 0x01, 0x00]);
                    if stream.write_all(&[0x05, 0x00]).await.is_err() {
                        return;
                    }

                    // CONNECT request with an IPv4 destination.
                    let mut request = [0u8; 10];
                    if stream.read_exact(&mut request).await.is_err() {
                        return;
                    }
                    assert_eq!(&request[0..4], &[0x05, 0x01, 0x00, 0x01]);
                    let dest = [request[4], request[5], request[6], request[7]];
                    let port = u16::from_be_bytes([request[8], request[9]]);
                    target_log.lock().await.push((dest, port));
                    conn_counter.fetch_add(1, Ordering::SeqCst);

                    if stream
                        .write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                        .await
                        .is_err()
                    {
                        return;
                    }

                    // Echo payload back until the client hangs up.
                    let mut buf = [0u8; 4096];
                    loop {
                        match stream.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => {
                                if stream.write_all(&buf[..n]).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                });
            }
        });

        Self {
            addr,
            connections,
            targets,
        }
    }

    /// Number of tunnels established so far
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// CONNECT destinations seen so far
    pub async fn targets(&self) -> Vec<([u8; 4], u16)> {
        self.targets.lock().await.clone()
    }
}

/// Engine configuration pointing at the given proxy, DNS interception off
pub fn engine_config(proxy_addr: SocketAddr) -> EngineConfig {
    EngineConfig {
        proxy_host: proxy_addr.ip().to_string(),
        proxy_port: proxy_addr.port(),
        dns: DnsConfig {
            enabled: false,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Build a minimal IPv4+TCP packet to `dest:port` carrying `payload`
pub fn tcp_packet(dest: [u8; 4], port: u16, payload: &[u8]) -> Vec<u8> {
    let total = 40 + payload.len();
    let mut pkt = vec![0u8; 40];
    pkt[0] = 0x45;
    pkt[2..4].copy_from_slice(&(total as u16).to_be_bytes());
    pkt[9] = 6;
    pkt[12..16].copy_from_slice(&[10, 0, 0, 2]);
    pkt[16..20].copy_from_slice(&dest);
    pkt[20..22].copy_from_slice(&49152u16.to_be_bytes());
    pkt[22..24].copy_from_slice(&port.to_be_bytes());
    pkt[32] = 5 << 4;
    pkt.extend_from_slice(payload);
    pkt
}

/// Build a minimal IPv4+UDP packet to `dest:port` carrying `payload`
pub fn udp_packet(dest: [u8; 4], port: u16, payload: &[u8]) -> Vec<u8> {
    let mut pkt = vec![0u8; 28];
    pkt[0] = 0x45;
    pkt[2..4].copy_from_slice(&((28 + payload.len()) as u16).to_be_bytes());
    pkt[9] = 17;
    pkt[12..16].copy_from_slice(&[10, 0, 0, 2]);
    pkt[16..20].copy_from_slice(&dest);
    pkt[20..22].copy_from_slice(&51000u16.to_be_bytes());
    pkt[22..24].copy_from_slice(&port.to_be_bytes());
    pkt[24..26].copy_from_slice(&((8 + payload.len()) as u16).to_be_bytes());
    pkt.extend_from_slice(payload);
    pkt
}

/// Poll `predicate` until it holds or the deadline passes
pub async fn wait_for<F, Fut>(mut predicate: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if predicate().await {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    false
}
