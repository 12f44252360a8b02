//! Bulk channel abstraction.
//!
//! The protocol layer only needs two operations from the link: send a
//! buffer and receive up to `max_len` bytes. Everything above this trait is
//! transport-agnostic:
//!
//! ```text
//! +-------------------+     +-------------------+
//! |  Flasher/Session  |     |  Flasher/Session  |
//! +---------+---------+     +---------+---------+
//!           |                         |
//!           v                         v
//! +---------+---------+     +---------+---------+
//! | BulkChannel trait |     | BulkChannel trait |
//! +---------+---------+     +---------+---------+
//!           |                         |
//!           v                         v
//! +---------+---------+     +---------+---------+
//! |    UsbChannel     |     |    DummyDevice    |
//! |      (nusb)       |     |   (in memory)     |
//! +-------------------+     +-------------------+
//! ```
//!
//! ## Example
//!
//! ```rust
//! use rkflash::transport::{BulkChannel, DummyDevice};
//! use rkflash::protocol::{CommandPacket, Opcode};
//!
//! let mut device = DummyDevice::new_default();
//! let packet = CommandPacket::new(Opcode::TestUnitReady, 0, 0);
//! device.send(&packet.encode()).unwrap();
//! let status = device.receive(13).unwrap();
//! assert_eq!(status.len(), 13);
//! ```

pub mod dummy;
#[cfg(feature = "native")]
pub mod usb;

use std::time::Duration;

use crate::error::TransportError;

pub use dummy::{DummyConfig, DummyDevice};
#[cfg(feature = "native")]
pub use usb::UsbChannel;

/// Rockchip USB vendor ID.
pub const ROCKCHIP_VID: u16 = 0x2207;

/// A blocking, unframed bulk link.
pub trait BulkChannel {
    /// Send a buffer to the device.
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Receive at most `max_len` bytes from the device.
    fn receive(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError>;

    /// Human-readable channel name for messages.
    fn name(&self) -> &str {
        "bulk"
    }
}

impl<T: BulkChannel + ?Sized> BulkChannel for &mut T {
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        (**self).send(data)
    }

    fn receive(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        (**self).receive(max_len)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

impl<T: BulkChannel + ?Sized> BulkChannel for Box<T> {
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        (**self).send(data)
    }

    fn receive(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        (**self).receive(max_len)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// USB channel selection and timing.
#[derive(Debug, Clone)]
pub struct UsbConfig {
    /// Vendor ID to match.
    pub vendor_id: u16,
    /// Product ID to match (any Rockchip product if `None`).
    pub product_id: Option<u16>,
    /// Bus identifier to match.
    pub bus: Option<String>,
    /// Device address to match.
    pub address: Option<u8>,
    /// Per-transfer timeout.
    pub timeout: Duration,
}

impl Default for UsbConfig {
    fn default() -> Self {
        Self {
            vendor_id: ROCKCHIP_VID,
            product_id: None,
            bus: None,
            address: None,
            timeout: Duration::from_secs(5),
        }
    }
}

impl UsbConfig {
    /// Match a specific product ID.
    #[must_use]
    pub fn with_product_id(mut self, pid: u16) -> Self {
        self.product_id = Some(pid);
        self
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check whether a device matches this selection.
    pub fn matches(&self, vid: u16, pid: u16, bus: &str, address: u8) -> bool {
        vid == self.vendor_id
            && self.product_id.is_none_or(|p| p == pid)
            && self.bus.as_deref().is_none_or(|b| b == bus)
            && self.address.is_none_or(|a| a == address)
    }
}
