//! Virtual interface seam
//!
//! [`TunDevice`] abstracts the TUN-like device that delivers outbound
//! device IP packets to user space and accepts packets for reinjection.
//! The real device comes from the embedding platform; [`ChannelDevice`]
//! is an in-memory implementation backed by channels, used by tests and
//! by hosts that feed packets in from their own capture layer.

use crate::config::TunConfig;
use crate::error::TungateError;
use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Capacity of the in-memory packet queues
const CHANNEL_DEVICE_QUEUE: usize = 256;

/// A TUN-like virtual interface
#[async_trait]
pub trait TunDevice: Send + Sync {
    /// Read one inbound packet into `buf`, returning its length.
    ///
    /// Returns `Ok(0)` only for empty reads; an unrecoverable device error
    /// ends the read loop.
    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write one packet back out through the interface
    async fn send(&self, buf: &[u8]) -> io::Result<usize>;
}

impl std::fmt::Debug for dyn TunDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn TunDevice")
    }
}

/// Opens the virtual interface at engine start.
///
/// Establishment failure is the one fatal error of the engine; `open` maps
/// platform errors to [`TungateError::Interface`].
pub trait TunProvider: Send + Sync {
    /// Open the interface described by `config`
    fn open(&self, config: &TunConfig) -> Result<Arc<dyn TunDevice>, TungateError>;
}

/// In-memory device backed by bounded channels
pub struct ChannelDevice {
    /// Inbound packets (device traffic entering the engine)
    inbound_rx: Mutex<mpsc::Receiver<Vec<u8>>>,
    /// Packets the engine wrote back
    outbound_tx: mpsc::Sender<Vec<u8>>,
}

/// Test/host side of a [`ChannelDevice`]
pub struct ChannelDeviceHandle {
    /// Feeds packets into the engine
    inbound_tx: mpsc::Sender<Vec<u8>>,
    /// Receives packets the engine wrote back
    outbound_rx: Mutex<mpsc::Receiver<Vec<u8>>>,
}

impl ChannelDevice {
    /// Create a device and its host-side handle
    pub fn new() -> (Arc<Self>, ChannelDeviceHandle) {
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_DEVICE_QUEUE);
        let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_DEVICE_QUEUE);

        let device = Arc::new(Self {
            inbound_rx: Mutex::new(inbound_rx),
            outbound_tx,
        });
        let handle = ChannelDeviceHandle {
            inbound_tx,
            outbound_rx: Mutex::new(outbound_rx),
        };
        (device, handle)
    }
}

#[async_trait]
impl TunDevice for ChannelDevice {
    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let packet = self
            .inbound_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "device closed"))?;

        let n = packet.len().min(buf.len());
        buf[..n].copy_from_slice(&packet[..n]);
        Ok(n)
    }

    async fn send(&self, buf: &[u8]) -> io::Result<usize> {
        self.outbound_tx
            .send(buf.to_vec())
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "device closed"))?;
        Ok(buf.len())
    }
}

impl ChannelDeviceHandle {
    /// Inject one packet as if the device emitted it
    pub async fn inject(&self, packet: Vec<u8>) -> bool {
        self.inbound_tx.send(packet).await.is_ok()
    }

    /// Await the next packet the engine wrote back
    pub async fn next_written(&self) -> Option<Vec<u8>> {
        self.outbound_rx.lock().await.recv().await
    }

    /// Close the inbound side, ending the engine's read loop
    pub fn close(&mut self) {
        let (closed_tx, _) = mpsc::channel(1);
        self.inbound_tx = closed_tx;
    }
}

/// Provider handing out one prebuilt [`ChannelDevice`]
pub struct ChannelTunProvider {
    /// The device returned by `open`
    device: std::sync::Mutex<Option<Arc<ChannelDevice>>>,
}

impl ChannelTunProvider {
    /// Wrap an existing device
    pub fn new(device: Arc<ChannelDevice>) -> Self {
        Self {
            device: std::sync::Mutex::new(Some(device)),
        }
    }
}

impl TunProvider for ChannelTunProvider {
    fn open(&self, config: &TunConfig) -> Result<Arc<dyn TunDevice>, TungateError> {
        tracing::info!(
            "Opening in-memory interface: session={}, address={}/32, mtu={}",
            config.session,
            config.address,
            config.mtu
        );
        self.device
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .map(|d| d as Arc<dyn TunDevice>)
            .ok_or_else(|| TungateError::Interface("interface already opened".to_string()))
    }
}
