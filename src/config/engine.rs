//! Engine configuration types
//!
//! Defines the configuration structures consumed by the interception engine.

use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

/// Default SOCKS5 proxy host
fn default_proxy_host() -> String {
    "127.0.0.1".to_string()
}

/// Default SOCKS5 proxy port (Tor)
fn default_proxy_port() -> u16 {
    9050
}

/// Root configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    /// Engine configuration
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Engine configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EngineConfig {
    /// SOCKS5 proxy host
    #[serde(default = "default_proxy_host")]
    pub proxy_host: String,

    /// SOCKS5 proxy port
    #[serde(default = "default_proxy_port")]
    pub proxy_port: u16,

    /// Write non-relayed packets back to the interface unchanged
    /// instead of dropping them
    #[serde(default)]
    pub udp_passthrough: bool,

    /// DNS interception configuration
    #[serde(default)]
    pub dns: DnsConfig,

    /// Per-socket timeouts
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Virtual interface parameters
    #[serde(default)]
    pub tun: TunConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            proxy_host: default_proxy_host(),
            proxy_port: default_proxy_port(),
            udp_passthrough: false,
            dns: DnsConfig::default(),
            timeouts: TimeoutConfig::default(),
            tun: TunConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Resolve the configured SOCKS5 proxy endpoint to a socket address
    pub fn proxy_addr(&self) -> Result<SocketAddr, String> {
        resolve_first(&self.proxy_host, self.proxy_port)
    }

    /// Resolve the dedicated DNS port endpoint (same host as the proxy)
    pub fn dns_proxy_addr(&self) -> Result<SocketAddr, String> {
        resolve_first(&self.proxy_host, self.dns.port)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.proxy_host.is_empty() {
            return Err("proxy_host must not be empty".to_string());
        }
        if self.proxy_port == 0 {
            return Err("proxy_port must not be zero".to_string());
        }
        if self.dns.enabled && self.dns.port == 0 {
            return Err("dns.port must not be zero when dns is enabled".to_string());
        }
        if self.tun.mtu < 576 {
            return Err(format!("tun.mtu too small: {} (minimum 576)", self.tun.mtu));
        }
        Ok(())
    }
}

/// Resolve `host:port` to the first matching socket address
fn resolve_first(host: &str, port: u16) -> Result<SocketAddr, String> {
    (host, port)
        .to_socket_addrs()
        .map_err(|e| format!("Cannot resolve {}:{}: {}", host, port, e))?
        .next()
        .ok_or_else(|| format!("No address found for {}:{}", host, port))
}

/// Default dedicated DNS port (Tor DNSPort)
fn default_dns_port() -> u16 {
    9053
}

/// Default DNS interception setting
fn default_dns_enabled() -> bool {
    true
}

/// Default upstream resolver for DNS-over-TCP fallback
fn default_dns_resolver() -> String {
    "8.8.8.8:53".to_string()
}

/// Default DNS round-trip timeout in seconds
fn default_dns_timeout() -> u64 {
    5
}

/// DNS interception configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DnsConfig {
    /// Use the proxy's dedicated DNS port for intercepted queries
    #[serde(default = "default_dns_enabled")]
    pub enabled: bool,

    /// Dedicated DNS port on the proxy host
    #[serde(default = "default_dns_port")]
    pub port: u16,

    /// Upstream resolver for the DNS-over-TCP fallback path
    #[serde(default = "default_dns_resolver")]
    pub resolver: String,

    /// Timeout for one DNS round trip in seconds
    #[serde(default = "default_dns_timeout")]
    pub timeout: u64,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            enabled: default_dns_enabled(),
            port: default_dns_port(),
            resolver: default_dns_resolver(),
            timeout: default_dns_timeout(),
        }
    }
}

impl DnsConfig {
    /// DNS round-trip timeout as a [`Duration`]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Resolve the fallback resolver address
    pub fn resolver_addr(&self) -> Result<SocketAddr, String> {
        self.resolver
            .to_socket_addrs()
            .map_err(|e| format!("Cannot resolve {}: {}", self.resolver, e))?
            .next()
            .ok_or_else(|| format!("No address found for {}", self.resolver))
    }
}

/// Default connect timeout in seconds
fn default_connect_timeout() -> u64 {
    10
}

/// Default handshake read timeout in seconds
fn default_handshake_timeout() -> u64 {
    10
}

/// Default relay read/write timeout in seconds
fn default_relay_timeout() -> u64 {
    60
}

/// Per-socket timeout configuration (seconds)
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TimeoutConfig {
    /// TCP connect timeout
    #[serde(default = "default_connect_timeout")]
    pub connect: u64,

    /// SOCKS5 handshake step timeout
    #[serde(default = "default_handshake_timeout")]
    pub handshake: u64,

    /// Relay read/write timeout
    #[serde(default = "default_relay_timeout")]
    pub relay: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: default_connect_timeout(),
            handshake: default_handshake_timeout(),
            relay: default_relay_timeout(),
        }
    }
}

impl TimeoutConfig {
    /// Connect timeout as a [`Duration`]
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect)
    }

    /// Handshake timeout as a [`Duration`]
    pub fn handshake(&self) -> Duration {
        Duration::from_secs(self.handshake)
    }

    /// Relay timeout as a [`Duration`]
    pub fn relay(&self) -> Duration {
        Duration::from_secs(self.relay)
    }
}

/// Default virtual interface session name
fn default_tun_session() -> String {
    "tungate".to_string()
}

/// Default virtual interface address (assigned with a /32 prefix)
fn default_tun_address() -> String {
    "10.0.0.2".to_string()
}

/// Default DNS server advertised to the device
fn default_tun_dns_server() -> String {
    "10.0.0.1".to_string()
}

/// Default interface MTU
fn default_tun_mtu() -> usize {
    1500
}

/// Virtual interface parameters handed to the platform VPN collaborator.
///
/// The interface captures all device traffic through a single default
/// route (0.0.0.0/0); the assigned address always carries a /32 prefix.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TunConfig {
    /// Session name shown by the platform
    #[serde(default = "default_tun_session")]
    pub session: String,

    /// Local address assigned to the interface
    #[serde(default = "default_tun_address")]
    pub address: String,

    /// DNS server address advertised to the device
    #[serde(default = "default_tun_dns_server")]
    pub dns_server: String,

    /// Interface MTU in bytes
    #[serde(default = "default_tun_mtu")]
    pub mtu: usize,
}

impl Default for TunConfig {
    fn default() -> Self {
        Self {
            session: default_tun_session(),
            address: default_tun_address(),
            dns_server: default_tun_dns_server(),
            mtu: default_tun_mtu(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.proxy_host, "127.0.0.1");
        assert_eq!(config.proxy_port, 9050);
        assert!(!config.udp_passthrough);
        assert_eq!(config.timeouts.connect, 10);
        assert_eq!(config.timeouts.relay, 60);
    }

    #[test]
    fn test_dns_config_defaults() {
        let config = DnsConfig::default();
        assert!(config.enabled);
        assert_eq!(config.port, 9053);
        assert_eq!(config.resolver, "8.8.8.8:53");
        assert_eq!(config.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_proxy_addr_resolution() {
        let config = EngineConfig::default();
        let addr = config.proxy_addr().unwrap();
        assert_eq!(addr.port(), 9050);
        assert!(addr.ip().is_loopback());
    }

    #[test]
    fn test_dns_proxy_addr_resolution() {
        let config = EngineConfig::default();
        let addr = config.dns_proxy_addr().unwrap();
        assert_eq!(addr.port(), 9053);
    }

    #[test]
    fn test_resolver_addr_resolution() {
        let config = DnsConfig::default();
        let addr = config.resolver_addr().unwrap();
        assert_eq!(addr.port(), 53);
    }

    #[test]
    fn test_validate_rejects_empty_proxy_host() {
        let config = EngineConfig {
            proxy_host: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_proxy_port() {
        let config = EngineConfig {
            proxy_port: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_small_mtu() {
        let mut config = EngineConfig::default();
        config.tun.mtu = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_timeout_durations() {
        let timeouts = TimeoutConfig::default();
        assert_eq!(timeouts.connect(), Duration::from_secs(10));
        assert_eq!(timeouts.handshake(), Duration::from_secs(10));
        assert_eq!(timeouts.relay(), Duration::from_secs(60));
    }

    #[test]
    fn test_tun_config_defaults() {
        let config = TunConfig::default();
        assert_eq!(config.session, "tungate");
        assert_eq!(config.address, "10.0.0.2");
        assert_eq!(config.mtu, 1500);
    }
}
