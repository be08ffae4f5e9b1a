//! Per-connection byte relay
//!
//! One [`ConnectionRelay`] owns one established upstream socket. Device-side
//! payload arrives over the connection's queue (later packets of the same
//! flow are folded in here, never into a second socket); upstream response
//! bytes are read into an MTU-bounded buffer and handed to a
//! [`ResponseSink`]. Either direction terminating tears the whole
//! connection down, and teardown removes the flow-table entry exactly once.

use crate::flow::{CloseReason, Connection, ConnectionState, FlowKey, FlowTable};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

/// Receives upstream response bytes on their way back toward the device.
///
/// Synthesizing valid IP/TCP packets for reinjection is a deliberate
/// non-goal of the engine; this seam is where a future reinjector plugs in.
#[async_trait]
pub trait ResponseSink: Send + Sync {
    /// Deliver one chunk of upstream bytes for the given flow
    async fn deliver(&self, key: &FlowKey, data: &[u8]);
}

/// Default sink: counts and logs delivered bytes
#[derive(Debug, Default)]
pub struct LogSink {
    /// Total bytes delivered across all flows
    bytes_delivered: AtomicU64,
}

impl LogSink {
    /// Create a new logging sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes delivered so far
    pub fn bytes_delivered(&self) -> u64 {
        self.bytes_delivered.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ResponseSink for LogSink {
    async fn deliver(&self, key: &FlowKey, data: &[u8]) {
        self.bytes_delivered
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        trace!("{}: {} response bytes from upstream", key, data.len());
    }
}

/// Relay for one established connection
pub struct ConnectionRelay {
    /// Connection being served
    conn: Arc<Connection>,
    /// Table to remove the connection from on teardown
    table: Arc<FlowTable>,
    /// Destination for upstream response bytes
    sink: Arc<dyn ResponseSink>,
    /// Timeout applied to every read and write
    relay_timeout: Duration,
    /// Upstream read buffer size (interface MTU)
    mtu: usize,
}

impl ConnectionRelay {
    /// Create a relay for `conn`
    pub fn new(
        conn: Arc<Connection>,
        table: Arc<FlowTable>,
        sink: Arc<dyn ResponseSink>,
        relay_timeout: Duration,
        mtu: usize,
    ) -> Self {
        Self {
            conn,
            table,
            sink,
            relay_timeout,
            mtu,
        }
    }

    /// Pump bytes in both directions until EOF, error, timeout, or shutdown.
    ///
    /// All exits funnel through [`teardown`](Self::teardown), so the flow
    /// table entry is removed and the socket dropped exactly once even when
    /// two termination causes race.
    pub async fn run<S>(
        self,
        upstream: S,
        mut payload_rx: mpsc::Receiver<Bytes>,
        mut shutdown_rx: broadcast::Receiver<bool>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        self.conn.set_state(ConnectionState::Relaying);

        let (mut upstream_rd, mut upstream_wr) = tokio::io::split(upstream);
        let mut buf = vec![0u8; self.mtu];

        let reason = loop {
            tokio::select! {
                queued = payload_rx.recv() => match queued {
                    Some(data) => {
                        match timeout(self.relay_timeout, upstream_wr.write_all(&data)).await {
                            Ok(Ok(())) => {
                                trace!("{}: {} bytes to upstream", self.conn.key(), data.len());
                            }
                            Ok(Err(e)) => {
                                warn!("{}: upstream write failed: {}", self.conn.key(), e);
                                break CloseReason::Error;
                            }
                            Err(_) => break CloseReason::Timeout,
                        }
                    }
                    // The device side of this flow is gone.
                    None => break CloseReason::Success,
                },
                read = timeout(self.relay_timeout, upstream_rd.read(&mut buf)) => match read {
                    Ok(Ok(0)) => break CloseReason::Success,
                    Ok(Ok(n)) => self.sink.deliver(self.conn.key(), &buf[..n]).await,
                    Ok(Err(e)) => {
                        warn!("{}: upstream read failed: {}", self.conn.key(), e);
                        break CloseReason::Error;
                    }
                    Err(_) => break CloseReason::Timeout,
                },
                _ = shutdown_rx.recv() => break CloseReason::Success,
            }
        };

        self.teardown(reason).await;
        // Dropping the split halves closes the upstream socket.
    }

    /// Close the connection and remove it from the table, once.
    pub async fn teardown(&self, reason: CloseReason) {
        if self.conn.claim_close(reason) {
            self.table.remove(self.conn.key()).await;
            debug!("{}: closed ({:?})", self.conn.key(), reason);
        }
    }
}
