//! Socket protection seam
//!
//! Every upstream socket must be excluded from the virtual interface's
//! routing *before* it connects, otherwise its own traffic is captured and
//! looped back through the engine. The platform VPN collaborator supplies
//! the actual exclusion mechanism; this module models it as a trait and
//! provides the construction helpers that enforce the protect-then-connect
//! ordering.

use socket2::{Domain, Protocol as SockProtocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpSocket, UdpSocket};

/// Excludes a socket from the virtual interface's routing.
///
/// Implementations are provided by the embedding platform. The engine only
/// guarantees that `protect` is called on every upstream socket before any
/// connect or send.
pub trait SocketProtector: Send + Sync {
    /// Protect the given socket from being routed into the interface
    fn protect(&self, socket: &Socket) -> io::Result<()>;
}

/// Shared handle to a protector
pub type ArcProtector = Arc<dyn SocketProtector>;

/// Protector for hosts where the engine does not sit behind a VPN service
/// (tests, development); protection is a no-op there.
#[derive(Debug, Default)]
pub struct NoopProtector;

impl SocketProtector for NoopProtector {
    fn protect(&self, _socket: &Socket) -> io::Result<()> {
        Ok(())
    }
}

/// Create a protected, not-yet-connected TCP socket.
///
/// The socket is protected while still unconnected, then handed to tokio;
/// callers complete the connect with their own timeout.
pub fn protected_tcp_socket(protector: &dyn SocketProtector) -> io::Result<TcpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(SockProtocol::TCP))?;
    protector.protect(&socket)?;
    socket.set_nonblocking(true)?;
    Ok(TcpSocket::from_std_stream(socket.into()))
}

/// Create a protected UDP socket bound to an ephemeral port.
pub fn protected_udp_socket(protector: &dyn SocketProtector) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(SockProtocol::UDP))?;
    protector.protect(&socket)?;
    socket.set_nonblocking(true)?;

    let any: SocketAddr = SocketAddr::from(([0, 0, 0, 0], 0));
    socket.bind(&any.into())?;

    UdpSocket::from_std(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Protector that counts how often it was invoked.
    #[derive(Default)]
    struct CountingProtector {
        calls: AtomicUsize,
    }

    impl SocketProtector for CountingProtector {
        fn protect(&self, _socket: &Socket) -> io::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_noop_protector() {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, None).unwrap();
        assert!(NoopProtector.protect(&socket).is_ok());
    }

    #[tokio::test]
    async fn test_tcp_socket_is_protected_before_handoff() {
        let protector = CountingProtector::default();
        let socket = protected_tcp_socket(&protector).unwrap();
        assert_eq!(protector.calls.load(Ordering::SeqCst), 1);
        drop(socket);
    }

    #[tokio::test]
    async fn test_udp_socket_is_protected_and_bound() {
        let protector = CountingProtector::default();
        let socket = protected_udp_socket(&protector).unwrap();
        assert_eq!(protector.calls.load(Ordering::SeqCst), 1);
        assert_ne!(socket.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_protect_failure_aborts_construction() {
        struct FailingProtector;
        impl SocketProtector for FailingProtector {
            fn protect(&self, _socket: &Socket) -> io::Result<()> {
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
            }
        }

        assert!(protected_tcp_socket(&FailingProtector).is_err());
        assert!(protected_udp_socket(&FailingProtector).is_err());
    }
}
