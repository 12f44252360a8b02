//! Device discovery and classification.
//!
//! Rockchip SoCs enumerate under vendor `0x2207` both in the boot ROM
//! download mode ("maskrom") and when a loader is running. The product ID
//! names the SoC; the low bit of `bcdUSB` tells the two modes apart.

use std::fmt;

use crate::error::{Error, Result};
use crate::transport::ROCKCHIP_VID;

#[cfg(feature = "native")]
use log::{debug, info, trace};

/// Rockchip SoC identified by USB product ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ChipKind {
    /// RK2818.
    Rk2818,
    /// RK2918.
    Rk2918,
    /// RK2928.
    Rk2928,
    /// RK3026.
    Rk3026,
    /// RK3066.
    Rk3066,
    /// RK3168.
    Rk3168,
    /// RK3036.
    Rk3036,
    /// RK3066B.
    Rk3066b,
    /// RK3188.
    Rk3188,
    /// RK312X.
    Rk312x,
    /// RK3288.
    Rk3288,
    /// RK322X.
    Rk322x,
    /// RK3328.
    Rk3328,
    /// RK3368.
    Rk3368,
    /// RK3399.
    Rk3399,
    /// RK3566/RK3568.
    Rk356x,
    /// RK3588.
    Rk3588,
    /// Rockchip device with an unlisted product ID.
    Unknown,
}

/// Known Rockchip product IDs.
const KNOWN_PRODUCTS: &[(u16, ChipKind)] = &[
    (0x281a, ChipKind::Rk2818),
    (0x290a, ChipKind::Rk2918),
    (0x292a, ChipKind::Rk2928),
    (0x292c, ChipKind::Rk3026),
    (0x300a, ChipKind::Rk3066),
    (0x300b, ChipKind::Rk3168),
    (0x301a, ChipKind::Rk3036),
    (0x310a, ChipKind::Rk3066b),
    (0x310b, ChipKind::Rk3188),
    (0x310c, ChipKind::Rk312x),
    (0x320a, ChipKind::Rk3288),
    (0x320b, ChipKind::Rk322x),
    (0x320c, ChipKind::Rk3328),
    (0x330a, ChipKind::Rk3368),
    (0x330c, ChipKind::Rk3399),
    (0x350a, ChipKind::Rk356x),
    (0x350b, ChipKind::Rk3588),
];

impl ChipKind {
    /// Classify a Rockchip product ID.
    #[must_use]
    pub fn from_pid(pid: u16) -> Self {
        KNOWN_PRODUCTS
            .iter()
            .find(|(known, _)| *known == pid)
            .map_or(Self::Unknown, |(_, chip)| *chip)
    }

    /// Product ID for this chip, if listed.
    pub fn pid(self) -> Option<u16> {
        KNOWN_PRODUCTS
            .iter()
            .find(|(_, chip)| *chip == self)
            .map(|(pid, _)| *pid)
    }

    /// Get a human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Rk2818 => "RK2818",
            Self::Rk2918 => "RK2918",
            Self::Rk2928 => "RK2928",
            Self::Rk3026 => "RK3026",
            Self::Rk3066 => "RK3066",
            Self::Rk3168 => "RK3168",
            Self::Rk3036 => "RK3036",
            Self::Rk3066b => "RK3066B",
            Self::Rk3188 => "RK3188",
            Self::Rk312x => "RK312X",
            Self::Rk3288 => "RK3288",
            Self::Rk322x => "RK322X",
            Self::Rk3328 => "RK3328",
            Self::Rk3368 => "RK3368",
            Self::Rk3399 => "RK3399",
            Self::Rk356x => "RK3566/RK3568",
            Self::Rk3588 => "RK3588",
            Self::Unknown => "Unknown",
        }
    }

    /// Whether the product ID was in the table.
    pub fn is_known(self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl fmt::Display for ChipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What is answering on the USB side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum UsbMode {
    /// Boot ROM download mode.
    Maskrom,
    /// Loader (rockusb) mode.
    Loader,
}

impl UsbMode {
    /// Derive the mode from the device's `bcdUSB` field.
    pub fn from_bcd_usb(bcd: u16) -> Self {
        if bcd & 1 == 1 {
            Self::Loader
        } else {
            Self::Maskrom
        }
    }
}

impl fmt::Display for UsbMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Maskrom => f.write_str("maskrom"),
            Self::Loader => f.write_str("loader"),
        }
    }
}

/// An enumerated Rockchip USB device.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DetectedDevice {
    /// Bus identifier.
    pub bus: String,
    /// Device address on the bus.
    pub address: u8,
    /// USB vendor ID.
    pub vid: u16,
    /// USB product ID.
    pub pid: u16,
    /// Chip classification.
    pub chip: ChipKind,
    /// Maskrom or loader.
    pub mode: UsbMode,
}

impl DetectedDevice {
    /// Build from raw descriptor fields.
    pub fn new(bus: impl Into<String>, address: u8, vid: u16, pid: u16, bcd_usb: u16) -> Self {
        Self {
            bus: bus.into(),
            address,
            vid,
            pid,
            chip: ChipKind::from_pid(pid),
            mode: UsbMode::from_bcd_usb(bcd_usb),
        }
    }

    /// Build from an enumerated `nusb` device.
    #[cfg(feature = "native")]
    pub fn from_device_info(info: &nusb::DeviceInfo) -> Self {
        Self::new(
            info.bus_id(),
            info.device_address(),
            info.vendor_id(),
            info.product_id(),
            info.usb_version(),
        )
    }

    /// Whether a loader (rather than the boot ROM) is answering.
    pub fn is_loader(&self) -> bool {
        self.mode == UsbMode::Loader
    }
}

impl fmt::Display for DetectedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bus {} Device {:03}: ID {:04x}:{:04x} {} ({})",
            self.bus, self.address, self.vid, self.pid, self.chip, self.mode
        )
    }
}

/// List every Rockchip device on the system.
#[cfg(feature = "native")]
pub fn detect_devices() -> Vec<DetectedDevice> {
    use nusb::MaybeFuture;

    match nusb::list_devices().wait() {
        Ok(devices) => devices
            .filter(|d| d.vendor_id() == ROCKCHIP_VID)
            .map(|d| {
                let detected = DetectedDevice::from_device_info(&d);
                trace!("Found {detected}");
                detected
            })
            .collect(),
        Err(e) => {
            debug!("Failed to enumerate USB devices: {e}");
            Vec::new()
        },
    }
}

/// List every Rockchip device (stub without native USB support).
#[cfg(not(feature = "native"))]
pub fn detect_devices() -> Vec<DetectedDevice> {
    Vec::new()
}

/// Pick one device, preferring listed chips running a loader.
pub fn select_device(devices: Vec<DetectedDevice>) -> Result<DetectedDevice> {
    if let Some(device) = devices
        .iter()
        .find(|d| d.vid == ROCKCHIP_VID && d.chip.is_known() && d.is_loader())
    {
        return Ok(device.clone());
    }
    if let Some(device) = devices
        .iter()
        .find(|d| d.vid == ROCKCHIP_VID && d.chip.is_known())
    {
        return Ok(device.clone());
    }
    devices
        .into_iter()
        .find(|d| d.vid == ROCKCHIP_VID)
        .ok_or(Error::DeviceNotFound)
}

/// Auto-detect a single Rockchip device.
#[cfg(feature = "native")]
pub fn auto_detect_device() -> Result<DetectedDevice> {
    let device = select_device(detect_devices())?;
    info!("Auto-detected {device}");
    Ok(device)
}

/// Auto-detect a single Rockchip device (stub without native USB support).
#[cfg(not(feature = "native"))]
pub fn auto_detect_device() -> Result<DetectedDevice> {
    Err(Error::Unsupported(
        "USB enumeration requires the `native` feature".to_string(),
    ))
}

/// Format a list of detected devices for display.
pub fn format_device_list(devices: &[DetectedDevice]) -> Vec<String> {
    devices.iter().map(ToString::to_string).collect()
}
