//! RKAF update image.
//!
//! ## Layout
//!
//! ```text
//! 0x00  "RKAF"
//! 0x04  u32  image size - 4
//! 0x08  char[0x40] model
//! 0x48  char[0x40] manufacturer
//! 0x88  u32  entry count
//! 0x8C  entry[count], 0x70 bytes each:
//!         0x00 char[0x20] name
//!         0x20 char[0x40] path
//!         0x60 u32 offset in image
//!         0x64 u32 flash offset (sectors, 0xFFFFFFFF = none)
//!         0x68 u32 reserved length in image
//!         0x6C u32 file length
//! ```
//!
//! The `SELF` entry describes the image itself and is skipped. Parameter
//! entries are stored with their `PARM` header and CRC trailer, which are
//! stripped on extraction.

use std::fmt;

use log::{debug, warn};

use crate::error::{FormatError, Result};
use crate::image::{ContainerEntry, Fields};

/// RKAF magic.
pub const RKAF_MAGIC: &[u8; 4] = b"RKAF";

const MODEL_OFFSET: usize = 0x08;
const MANUFACTURER_OFFSET: usize = 0x48;
const NAME_FIELD_LEN: usize = 0x40;
const COUNT_OFFSET: usize = 0x88;
const TABLE_OFFSET: usize = 0x8C;
const ENTRY_SIZE: usize = 0x70;

const NO_NAND_OFFSET: u32 = 0xFFFF_FFFF;
const PARAMETER_HEADER: u32 = 8;
const PARAMETER_OVERHEAD: u32 = 12;

/// Parsed RKAF image.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RkafImage {
    /// Image size from the header (field value + 4).
    pub declared_size: u64,
    /// Actual input size.
    pub actual_size: usize,
    /// Device model string.
    pub model: String,
    /// Manufacturer string.
    pub manufacturer: String,
    /// Entry count from the header, `SELF` included.
    pub count: u32,
    /// Extractable entries.
    pub entries: Vec<ContainerEntry>,
}

impl RkafImage {
    /// Parse an RKAF image.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let fields = Fields::new(data);
        let magic = fields.bytes(0, 4, "RKAF magic")?;
        if magic != RKAF_MAGIC {
            return Err(FormatError::BadMagic(String::from_utf8_lossy(magic).into_owned()).into());
        }

        let declared_size = u64::from(fields.u32(4, "image size")?) + 4;
        if declared_size != data.len() as u64 {
            warn!(
                "RKAF size mismatch: header says {declared_size} bytes, file has {}",
                data.len()
            );
        } else {
            debug!("RKAF file size matches ({declared_size} bytes)");
        }

        let model = fields.cstr(MODEL_OFFSET, NAME_FIELD_LEN, "model")?;
        let manufacturer = fields.cstr(MANUFACTURER_OFFSET, NAME_FIELD_LEN, "manufacturer")?;
        let count = fields.u32(COUNT_OFFSET, "entry count")?;
        debug!("RKAF model {model:?}, manufacturer {manufacturer:?}, {count} entries");

        let mut entries = Vec::new();
        for index in 0..count as usize {
            let base = index
                .checked_mul(ENTRY_SIZE)
                .and_then(|o| o.checked_add(TABLE_OFFSET))
                .ok_or_else(|| FormatError::InvalidField(format!("entry count {count}")))?;
            let raw = Fields::new(fields.bytes(base, ENTRY_SIZE, "entry table")?);

            let name = raw.cstr(0x00, 0x20, "entry name")?;
            let path_raw = raw.bytes(0x20, 4, "entry path")?;
            let path = raw.cstr(0x20, 0x40, "entry path")?;
            let mut offset = raw.u32(0x60, "entry offset")?;
            let nand_offset = raw.u32(0x64, "entry flash offset")?;
            let source_length = raw.u32(0x68, "entry reserved length")?;
            let mut length = raw.u32(0x6C, "entry length")?;

            if path_raw == b"SELF" {
                debug!("  [{index}] skipping SELF entry");
                continue;
            }

            debug!(
                "  [{index}] {:08x}-{:08x} {path:<24} ({length} bytes)",
                offset,
                offset.wrapping_add(source_length).wrapping_sub(1)
            );

            if name.starts_with("parameter") {
                offset = offset.checked_add(PARAMETER_HEADER).ok_or_else(|| {
                    FormatError::InvalidField(format!("{name}: offset {offset:#x} overflows"))
                })?;
                length = length.checked_sub(PARAMETER_OVERHEAD).ok_or_else(|| {
                    FormatError::InvalidField(format!(
                        "{name}: length {length} shorter than the parameter framing"
                    ))
                })?;
            }

            let entry = ContainerEntry {
                name,
                path,
                offset: offset as usize,
                length: length as usize,
                source_length: u64::from(source_length),
                nand_offset: (nand_offset != NO_NAND_OFFSET).then_some(nand_offset),
            };
            entry.data(data)?;
            entries.push(entry);
        }

        Ok(Self {
            declared_size,
            actual_size: data.len(),
            model,
            manufacturer,
            count,
            entries,
        })
    }

    /// Whether the header size matches the input.
    pub fn size_matches(&self) -> bool {
        self.declared_size == self.actual_size as u64
    }
}

impl fmt::Display for RkafImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "RKAF update image")?;
        writeln!(f, "  Manufacturer: {}", self.manufacturer)?;
        writeln!(f, "  Model:        {}", self.model)?;
        if self.size_matches() {
            writeln!(f, "  Size:         {} bytes", self.actual_size)?;
        } else {
            writeln!(
                f,
                "  Size:         {} bytes (header says {})",
                self.actual_size, self.declared_size
            )?;
        }
        write!(f, "  Files:        {}", self.entries.len())?;
        for entry in &self.entries {
            write!(
                f,
                "\n    {:08x} {:>10}  {}",
                entry.offset, entry.length, entry.path
            )?;
            if let Some(nand) = entry.nand_offset {
                write!(f, " @ {nand:#x}")?;
            }
        }
        Ok(())
    }
}
