//! # rkflash
//!
//! A library for talking to Rockchip SoCs in bootloader ("rockusb") mode.
//!
//! This crate provides:
//!
//! - The rockusb command codec and a command/payload/status session
//! - Chunked read, write and erase of flash, SDRAM and the IDB area
//! - Parameter block handling and mtdparts partition lookup
//! - RKAF, RKFW and RKFP firmware container parsing and extraction
//! - The Rockchip CRC16 and CRC32 variants
//!
//! ## Supported Platforms
//!
//! - **Native** (default): Linux, macOS, Windows via the `nusb` crate
//! - Any platform: the in-memory [`transport::DummyDevice`] emulator
//!
//! ## Features
//!
//! - `native` (default): USB support through `nusb`
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use rkflash::{Flasher, Region, TransferRequest};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     #[cfg(feature = "native")]
//!     {
//!         let channel = rkflash::UsbChannel::open(&rkflash::UsbConfig::default())?;
//!         let mut flasher = Flasher::new(channel);
//!
//!         // Dump the first MiB of flash
//!         let req = TransferRequest::new(Region::Flash, 0, 2048)?;
//!         let mut file = std::fs::File::create("flash.bin")?;
//!         flasher.read_region(&req, &mut file, |done, total| {
//!             println!("{done}/{total} sectors");
//!         })?;
//!
//!         // Look up a partition from the parameter block
//!         let boot = flasher.partition("boot")?;
//!         println!("boot at {:#x}, {:#x} sectors", boot.offset, boot.size);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod error;
pub mod flasher;
pub mod image;
pub mod partition;
pub mod protocol;
pub mod transport;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use transport::UsbChannel;
pub use {
    device::{ChipKind, DetectedDevice, UsbMode},
    error::{Error, Result},
    flasher::{FlashInfo, Flasher, Region, TransferRequest, TransferSummary},
    image::{Container, ContainerEntry},
    partition::{PartitionLayout, PartitionSize, PartitionSpec},
    protocol::{CommandPacket, Opcode, ResetMode, StatusPacket},
    transport::{BulkChannel, DummyConfig, DummyDevice, UsbConfig},
};
