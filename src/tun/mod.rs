//! Virtual interface layer
//!
//! The platform collaborator (a VPN service) owns the actual TUN device;
//! this module provides the seam the engine reads packets through and the
//! single read loop that drives classification and dispatch.

mod device;
mod pump;

pub use device::{ChannelDevice, ChannelDeviceHandle, ChannelTunProvider, TunDevice, TunProvider};
pub use pump::TunPump;
