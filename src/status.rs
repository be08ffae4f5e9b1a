//! Engine status flags
//!
//! Shared, lock-free view of engine health consumed by the control surface
//! and by dispatch decisions (new TCP flows are dropped while the proxy is
//! unreachable).

use std::sync::atomic::{AtomicBool, Ordering};

/// Live status flags shared between the engine tasks
#[derive(Debug, Default)]
pub struct EngineStatus {
    /// SOCKS5 proxy endpoint answers TCP connects
    proxy_reachable: AtomicBool,
    /// Dedicated DNS port answers queries
    dns_proxy_reachable: AtomicBool,
    /// Engine read loop is running
    running: AtomicBool,
}

impl EngineStatus {
    /// Create a status block with all flags down
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the SOCKS5 proxy is currently reachable
    pub fn proxy_reachable(&self) -> bool {
        self.proxy_reachable.load(Ordering::SeqCst)
    }

    /// Whether the dedicated DNS port is currently reachable
    pub fn dns_proxy_reachable(&self) -> bool {
        self.dns_proxy_reachable.load(Ordering::SeqCst)
    }

    /// Whether the engine is running
    pub fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Update the proxy reachability flag
    pub fn set_proxy_reachable(&self, value: bool) {
        self.proxy_reachable.store(value, Ordering::SeqCst);
    }

    /// Update the DNS port reachability flag
    pub fn set_dns_proxy_reachable(&self, value: bool) {
        self.dns_proxy_reachable.store(value, Ordering::SeqCst);
    }

    /// Update the running flag
    pub fn set_running(&self, value: bool) {
        self.running.store(value, Ordering::SeqCst);
    }

    /// Take a point-in-time snapshot for the control surface
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            proxy_reachable: self.proxy_reachable(),
            dns_proxy_reachable: self.dns_proxy_reachable(),
            running: self.running(),
        }
    }
}

/// Read-only point-in-time status view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSnapshot {
    /// SOCKS5 proxy endpoint answers TCP connects
    pub proxy_reachable: bool,
    /// Dedicated DNS port answers queries
    pub dns_proxy_reachable: bool,
    /// Engine read loop is running
    pub running: bool,
}
