//! RKFW release image.
//!
//! ## Layout
//!
//! ```text
//! 0x00  "RKFW"
//! 0x06  u8   version patch
//! 0x07  u8   version minor
//! 0x08  u8   version major
//! 0x0E  u16  build year, big-endian
//! 0x10  u8   month, day, hour, minute, second (0x10..0x14)
//! 0x15  u8   chip family
//! 0x19  u32  BOOT offset
//! 0x1D  u32  BOOT length
//! 0x21  u32  update image offset
//! 0x25  u32  update image length
//! ```
//!
//! The BOOT blob and the embedded `RKAF` update image are extracted whole.
//! Unpacking the update image is a separate step.

use std::fmt;

use log::{debug, warn};

use crate::error::{FormatError, Result};
use crate::image::{ContainerEntry, Fields};

/// RKFW magic.
pub const RKFW_MAGIC: &[u8; 4] = b"RKFW";

/// Output name of the loader blob.
pub const BOOT_FILE: &str = "BOOT";

/// Output name of the embedded update image.
pub const UPDATE_FILE: &str = "embedded-update.img";

const BOOT_TAG: &[u8; 4] = b"BOOT";
const UPDATE_TAG: &[u8; 4] = b"RKAF";

/// Chip family byte at 0x15.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum RkfwChip {
    /// RK29xx.
    Rk29xx,
    /// RK30xx.
    Rk30xx,
    /// RK31xx.
    Rk31xx,
    /// RK32xx.
    Rk32xx,
    /// RK3368.
    Rk3368,
    /// Unlisted family code.
    Unknown(u8),
}

impl RkfwChip {
    /// Classify the family byte.
    pub fn from_code(code: u8) -> Self {
        match code {
            0x50 => Self::Rk29xx,
            0x60 => Self::Rk30xx,
            0x70 => Self::Rk31xx,
            0x80 => Self::Rk32xx,
            0x41 => Self::Rk3368,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for RkfwChip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rk29xx => f.write_str("rk29xx"),
            Self::Rk30xx => f.write_str("rk30xx"),
            Self::Rk31xx => f.write_str("rk31xx"),
            Self::Rk32xx => f.write_str("rk32xx"),
            Self::Rk3368 => f.write_str("rk3368"),
            Self::Unknown(code) => write!(f, "unknown ({code:#04x})"),
        }
    }
}

/// Firmware version triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RkfwVersion {
    /// Major.
    pub major: u8,
    /// Minor.
    pub minor: u8,
    /// Patch.
    pub patch: u8,
}

impl fmt::Display for RkfwVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Build timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BuildDate {
    /// Year.
    pub year: u16,
    /// Month.
    pub month: u8,
    /// Day.
    pub day: u8,
    /// Hour.
    pub hour: u8,
    /// Minute.
    pub minute: u8,
    /// Second.
    pub second: u8,
}

impl fmt::Display for BuildDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

/// Parsed RKFW image.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RkfwImage {
    /// Firmware version.
    pub version: RkfwVersion,
    /// Build date.
    pub date: BuildDate,
    /// Chip family.
    pub chip: RkfwChip,
    /// BOOT blob and embedded update image.
    pub entries: Vec<ContainerEntry>,
}

impl RkfwImage {
    /// Parse an RKFW image. Both embedded blobs must carry their tags.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let fields = Fields::new(data);
        let magic = fields.bytes(0, 4, "RKFW magic")?;
        if magic != RKFW_MAGIC {
            return Err(FormatError::BadMagic(String::from_utf8_lossy(magic).into_owned()).into());
        }

        let version = RkfwVersion {
            major: fields.u8(0x08, "version")?,
            minor: fields.u8(0x07, "version")?,
            patch: fields.u8(0x06, "version")?,
        };
        let date = BuildDate {
            year: fields.u16_be(0x0E, "build date")?,
            month: fields.u8(0x10, "build date")?,
            day: fields.u8(0x11, "build date")?,
            hour: fields.u8(0x12, "build date")?,
            minute: fields.u8(0x13, "build date")?,
            second: fields.u8(0x14, "build date")?,
        };
        let chip = RkfwChip::from_code(fields.u8(0x15, "chip family")?);
        if let RkfwChip::Unknown(code) = chip {
            warn!("Unknown RKFW chip family {code:#04x}");
        }
        debug!("RKFW version {version}, built {date}, family {chip}");

        let boot = tagged_entry(&fields, 0x19, BOOT_TAG, "BOOT", BOOT_FILE)?;
        let update = tagged_entry(&fields, 0x21, UPDATE_TAG, "RKAF", UPDATE_FILE)?;

        Ok(Self {
            version,
            date,
            chip,
            entries: vec![boot, update],
        })
    }

    /// The BOOT entry.
    pub fn boot(&self) -> &ContainerEntry {
        &self.entries[0]
    }

    /// The embedded update image entry.
    pub fn update(&self) -> &ContainerEntry {
        &self.entries[1]
    }
}

/// Read an `(offset, length)` pair at `field` and check the tag at the
/// start of the blob it points to.
fn tagged_entry(
    fields: &Fields<'_>,
    field: usize,
    tag: &[u8; 4],
    tag_name: &'static str,
    path: &str,
) -> Result<ContainerEntry> {
    let offset = fields.u32(field, "entry offset")? as usize;
    let length = fields.u32(field + 4, "entry length")? as usize;
    debug!("  {tag_name} at {offset:#010x}, {length} bytes");

    let found = fields.bytes(offset, 4, tag_name).ok();
    if length < 4 || found != Some(&tag[..]) {
        return Err(FormatError::MissingSignature {
            tag: tag_name,
            offset,
        }
        .into());
    }
    fields.bytes(offset, length, path)?;

    Ok(ContainerEntry {
        name: tag_name.to_string(),
        path: path.to_string(),
        offset,
        length,
        source_length: length as u64,
        nand_offset: None,
    })
}

impl fmt::Display for RkfwImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "RKFW release image")?;
        writeln!(f, "  Version:      {}", self.version)?;
        writeln!(f, "  Build date:   {}", self.date)?;
        writeln!(f, "  Chip family:  {}", self.chip)?;
        let boot = self.boot();
        let update = self.update();
        writeln!(f, "  BOOT:         {:#010x} ({} bytes)", boot.offset, boot.length)?;
        write!(
            f,
            "  Update image: {:#010x} ({} bytes)",
            update.offset, update.length
        )
    }
}
