//! Per-flow connection state
//!
//! A [`Connection`] is created when the first packet of an unseen flow
//! arrives, lives in the [`FlowTable`](super::FlowTable) while its relay
//! task runs, and is closed exactly once regardless of which path (EOF,
//! error, timeout, engine stop) triggers teardown.

use super::FlowKey;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;
use tokio::sync::mpsc;

/// Capacity of the device-to-upstream payload queue per flow
pub const PAYLOAD_QUEUE_SIZE: usize = 64;

/// Reason a connection reached its terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Clean termination (EOF from either side, or engine stop)
    Success,
    /// Proxy or relay IO failure
    Error,
    /// A read or write did not complete within its timeout
    Timeout,
}

/// Lifecycle state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// SOCKS5 handshake in progress
    Handshaking,
    /// Upstream tunnel established, relay not yet pumping
    Established,
    /// Bytes flowing in both directions
    Relaying,
    /// Terminal state
    Closed(CloseReason),
}

/// One tracked flow and its upstream relay
pub struct Connection {
    /// Flow this connection serves
    key: FlowKey,
    /// Current lifecycle state
    state: Mutex<ConnectionState>,
    /// Creation time
    created_at: Instant,
    /// Queue feeding device-side payload into the relay task
    payload_tx: mpsc::Sender<Bytes>,
    /// Set by the first teardown path to win the close race
    closed: AtomicBool,
}

impl Connection {
    /// Create a new connection in the `Handshaking` state
    pub fn new(key: FlowKey, payload_tx: mpsc::Sender<Bytes>) -> Self {
        Self {
            key,
            state: Mutex::new(ConnectionState::Handshaking),
            created_at: Instant::now(),
            payload_tx,
            closed: AtomicBool::new(false),
        }
    }

    /// Flow key of this connection
    pub fn key(&self) -> &FlowKey {
        &self.key
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Time this connection was created
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Advance the lifecycle state. Ignored once the connection is closed,
    /// so a late state change cannot resurrect a torn-down flow.
    pub fn set_state(&self, state: ConnectionState) {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !matches!(*guard, ConnectionState::Closed(_)) {
            *guard = state;
        }
    }

    /// Queue device-side payload for the relay task.
    ///
    /// Returns `false` when the relay is gone or its queue is full; the
    /// packet is dropped in that case, never buffered elsewhere.
    pub fn push_payload(&self, payload: Bytes) -> bool {
        self.payload_tx.try_send(payload).is_ok()
    }

    /// Claim the right to tear this connection down.
    ///
    /// The first caller transitions the state to `Closed(reason)` and gets
    /// `true`; every later caller gets `false`. This is what makes teardown
    /// idempotent when timeout and peer EOF race.
    pub fn claim_close(&self, reason: CloseReason) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *guard = ConnectionState::Closed(reason);
        true
    }

    /// Whether teardown has been claimed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("key", &self.key)
            .field("state", &self.state())
            .finish()
    }
}
