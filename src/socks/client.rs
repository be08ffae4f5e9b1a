//! SOCKS5 CONNECT client
//!
//! Establishes upstream tunnels through the configured proxy. The exchange
//! proceeds through a fixed sequence of states:
//!
//! ```text
//! Init -> GreetingSent -> MethodAccepted -> ConnectRequestSent -> Established
//! ```
//!
//! with a typed [`SocksError`] at any step. The connect, greeting-read, and
//! request-read steps each carry their own timeout. The proxy socket is
//! protected before it connects; see [`crate::protect`].

use crate::config::TimeoutConfig;
use crate::error::SocksError;
use crate::protect::{protected_tcp_socket, ArcProtector};
use crate::socks::consts::*;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

/// SOCKS5 client bound to one proxy endpoint
#[derive(Clone)]
pub struct Socks5Client {
    /// Proxy endpoint
    proxy_addr: SocketAddr,
    /// TCP connect timeout
    connect_timeout: Duration,
    /// Timeout for each handshake read
    handshake_timeout: Duration,
    /// Socket protector applied before connect
    protector: ArcProtector,
}

impl Socks5Client {
    /// Create a client for the given proxy endpoint
    pub fn new(proxy_addr: SocketAddr, timeouts: &TimeoutConfig, protector: ArcProtector) -> Self {
        Self {
            proxy_addr,
            connect_timeout: timeouts.connect(),
            handshake_timeout: timeouts.handshake(),
            protector,
        }
    }

    /// Proxy endpoint this client connects through
    pub fn proxy_addr(&self) -> SocketAddr {
        self.proxy_addr
    }

    /// Open a tunnel to `dest_ip:dest_port` through the proxy.
    ///
    /// On success the returned stream is past the CONNECT exchange and
    /// ready for payload traffic.
    pub async fn connect(
        &self,
        dest_ip: Ipv4Addr,
        dest_port: u16,
    ) -> Result<TcpStream, SocksError> {
        let socket = protected_tcp_socket(self.protector.as_ref())?;

        let mut stream = timeout(self.connect_timeout, socket.connect(self.proxy_addr))
            .await
            .map_err(|_| SocksError::Timeout("proxy connect"))??;

        trace!("Connected to proxy {}", self.proxy_addr);

        handshake(&mut stream, dest_ip, dest_port, self.handshake_timeout).await?;

        debug!(
            "SOCKS5 tunnel established to {}:{} via {}",
            dest_ip, dest_port, self.proxy_addr
        );

        Ok(stream)
    }
}

impl std::fmt::Debug for Socks5Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socks5Client")
            .field("proxy_addr", &self.proxy_addr)
            .finish_non_exhaustive()
    }
}

/// Run the greeting and CONNECT exchange on an already-connected stream.
///
/// Split out from [`Socks5Client::connect`] so the wire protocol can be
/// exercised against in-memory streams.
pub async fn handshake<S>(
    stream: &mut S,
    dest_ip: Ipv4Addr,
    dest_port: u16,
    step_timeout: Duration,
) -> Result<(), SocksError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Greeting: advertise no-authentication only.
    stream.write_all(&SOCKS5_GREETING_NO_AUTH).await?;

    let mut method_reply = [0u8; 2];
    timeout(step_timeout, stream.read_exact(&mut method_reply))
        .await
        .map_err(|_| SocksError::Timeout("greeting reply"))??;

    if method_reply[0] != SOCKS5_VERSION {
        return Err(SocksError::BadVersion(method_reply[0]));
    }
    if method_reply[1] != SOCKS5_AUTH_METHOD_NONE {
        return Err(SocksError::HandshakeRejected(method_reply[1]));
    }

    // CONNECT request: VER CMD RSV ATYP ADDR[4] PORT[2], port big-endian.
    let octets = dest_ip.octets();
    let port = dest_port.to_be_bytes();
    let request = [
        SOCKS5_VERSION,
        SOCKS5_CMD_TCP_CONNECT,
        SOCKS5_RESERVED,
        SOCKS5_ADDR_TYPE_IPV4,
        octets[0],
        octets[1],
        octets[2],
        octets[3],
        port[0],
        port[1],
    ];
    stream.write_all(&request).await?;

    // Reply: the code is in byte 1; read it before the bind address so a
    // short rejection reply still maps to the right error.
    let mut reply_head = [0u8; 2];
    timeout(step_timeout, stream.read_exact(&mut reply_head))
        .await
        .map_err(|_| SocksError::Timeout("connect reply"))??;

    if reply_head[0] != SOCKS5_VERSION {
        return Err(SocksError::BadVersion(reply_head[0]));
    }
    if reply_head[1] != SOCKS5_REPLY_SUCCEEDED {
        return Err(SocksError::ConnectRejected(reply_head[1]));
    }

    // Consume RSV, ATYP, and the bind address so payload bytes start clean.
    let mut rsv_atyp = [0u8; 2];
    timeout(step_timeout, stream.read_exact(&mut rsv_atyp))
        .await
        .map_err(|_| SocksError::Timeout("connect reply"))??;

    let addr_len = match rsv_atyp[1] {
        SOCKS5_ADDR_TYPE_IPV4 => 4,
        SOCKS5_ADDR_TYPE_IPV6 => 16,
        SOCKS5_ADDR_TYPE_DOMAIN => {
            let mut len = [0u8; 1];
            timeout(step_timeout, stream.read_exact(&mut len))
                .await
                .map_err(|_| SocksError::Timeout("connect reply"))??;
            len[0] as usize
        }
        other => return Err(SocksError::ConnectRejected(other)),
    };

    let mut bind = vec![0u8; addr_len + 2];
    timeout(step_timeout, stream.read_exact(&mut bind))
        .await
        .map_err(|_| SocksError::Timeout("connect reply"))??;

    Ok(())
}
