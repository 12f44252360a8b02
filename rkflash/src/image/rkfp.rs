//! RKFP firmware package.
//!
//! ## Header (512 bytes)
//!
//! ```text
//! 0x000  "RKFP"
//! 0x004  u32  version
//! 0x008  u32  sector size
//! 0x00C  u32  entry table offset (sectors)
//! 0x010  u32  backup entry table offset (sectors)
//! 0x014  u32  entry size (>= 0x54)
//! 0x018  u32  entry count
//! 0x1F8  u32  header CRC
//! 0x1FC  u32  entry table CRC
//! ```
//!
//! ## Entry
//!
//! ```text
//! 0x00  u32  type
//! 0x04  u32  property
//! 0x08  char[64] path
//! 0x48  u32  first sector
//! 0x4C  u32  sector count
//! 0x50  u32  byte length
//! ```

use std::fmt;

use log::debug;

use crate::error::{FormatError, Result};
use crate::image::{ContainerEntry, Fields};

/// RKFP magic.
pub const RKFP_MAGIC: &[u8; 4] = b"RKFP";

/// Header size.
pub const HEADER_SIZE: usize = 0x200;

/// Smallest entry size that holds every field.
pub const MIN_ENTRY_SIZE: u32 = 0x54;

const PATH_OFFSET: usize = 0x08;
const PATH_LEN: usize = 64;

/// Per-entry metadata beyond the common fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RkfpEntryInfo {
    /// Entry type.
    pub kind: u32,
    /// Entry property flags.
    pub property: u32,
    /// First sector.
    pub sector: u32,
    /// Sector count.
    pub sectors: u32,
}

/// Parsed RKFP package.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RkfpImage {
    /// Format version.
    pub version: u32,
    /// Sector size in bytes.
    pub sector_size: u32,
    /// Entry table offset in sectors.
    pub entry_offset: u32,
    /// Backup entry table offset in sectors.
    pub backup_offset: u32,
    /// Entry size in bytes.
    pub entry_size: u32,
    /// Stored header CRC.
    pub header_crc: u32,
    /// Stored entry table CRC.
    pub entry_crc: u32,
    /// Entries.
    pub entries: Vec<ContainerEntry>,
    /// Type, property and sector span of each entry.
    pub info: Vec<RkfpEntryInfo>,
}

impl RkfpImage {
    /// Parse an RKFP package.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let fields = Fields::new(data);
        let header = Fields::new(fields.bytes(0, HEADER_SIZE, "RKFP header")?);
        let magic = header.bytes(0, 4, "RKFP magic")?;
        if magic != RKFP_MAGIC {
            return Err(FormatError::BadMagic(String::from_utf8_lossy(magic).into_owned()).into());
        }

        let version = header.u32(0x04, "version")?;
        let sector_size = header.u32(0x08, "sector size")?;
        let entry_offset = header.u32(0x0C, "entry offset")?;
        let backup_offset = header.u32(0x10, "backup entry offset")?;
        let entry_size = header.u32(0x14, "entry size")?;
        let count = header.u32(0x18, "entry count")?;
        let header_crc = header.u32(0x1F8, "header CRC")?;
        let entry_crc = header.u32(0x1FC, "entry CRC")?;

        if sector_size == 0 {
            return Err(FormatError::InvalidField("RKFP sector size is zero".into()).into());
        }
        if entry_size < MIN_ENTRY_SIZE {
            return Err(FormatError::InvalidField(format!(
                "RKFP entry size {entry_size:#x} below {MIN_ENTRY_SIZE:#x}"
            ))
            .into());
        }
        debug!(
            "RKFP v{version}: {count} entries of {entry_size:#x} bytes at sector {entry_offset}"
        );
        debug!("RKFP sector size {sector_size}");

        let sector_size64 = u64::from(sector_size);
        let table = u64::from(entry_offset) * sector_size64;

        let mut entries = Vec::new();
        let mut info = Vec::new();
        for index in 0..u64::from(count) {
            let base = table
                .checked_add(index * u64::from(entry_size))
                .ok_or_else(|| FormatError::InvalidField("RKFP entry table overflows".into()))?;
            let base = to_usize(base, "entry table")?;
            let raw = Fields::new(fields.bytes(base, entry_size as usize, "entry table")?);

            let kind = raw.u32(0x00, "entry type")?;
            let property = raw.u32(0x04, "entry property")?;
            let path = raw.cstr(PATH_OFFSET, PATH_LEN, "entry path")?;
            let sector = raw.u32(0x48, "entry sector")?;
            let sectors = raw.u32(0x4C, "entry sectors")?;
            let length = raw.u32(0x50, "entry length")?;

            let span = u64::from(sectors) * sector_size64;
            if u64::from(length) > span {
                return Err(FormatError::InvalidField(format!(
                    "{path}: length {length} exceeds {sectors} sectors"
                ))
                .into());
            }

            debug!(
                "  [{index}] {path} sector {sector:#x}+{sectors:#x}, {length} bytes, type {kind:#x}"
            );

            let entry = ContainerEntry {
                name: path.clone(),
                path,
                offset: to_usize(u64::from(sector) * sector_size64, "entry data")?,
                length: length as usize,
                source_length: span,
                nand_offset: None,
            };
            entry.data(data)?;
            entries.push(entry);
            info.push(RkfpEntryInfo {
                kind,
                property,
                sector,
                sectors,
            });
        }

        Ok(Self {
            version,
            sector_size,
            entry_offset,
            backup_offset,
            entry_size,
            header_crc,
            entry_crc,
            entries,
            info,
        })
    }
}

fn to_usize(value: u64, what: &str) -> Result<usize> {
    usize::try_from(value).map_err(|_| {
        FormatError::InvalidField(format!("{what} offset {value:#x} too large")).into()
    })
}

impl fmt::Display for RkfpImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "RKFP package")?;
        writeln!(f, "  Version:      {:#x}", self.version)?;
        writeln!(f, "  Sector size:  {}", self.sector_size)?;
        writeln!(
            f,
            "  Entry table:  sector {} (backup {})",
            self.entry_offset, self.backup_offset
        )?;
        writeln!(
            f,
            "  CRCs:         header {:#010x}, entries {:#010x}",
            self.header_crc, self.entry_crc
        )?;
        write!(f, "  Files:        {}", self.entries.len())?;
        for (entry, info) in self.entries.iter().zip(&self.info) {
            write!(
                f,
                "\n    sector {:#08x} {:>10}  {} (type {:#x})",
                info.sector, entry.length, entry.path, info.kind
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::Error;

    const SECTOR: usize = 512;

    /// Build an RKFP package with its table at sector 1 and one entry per
    /// payload, each starting on its own sector.
    pub(crate) fn build(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let entry_size = MIN_ENTRY_SIZE as usize;
        let table_sectors = (entries.len() * entry_size).div_ceil(SECTOR).max(1);
        let mut data = vec![0u8; SECTOR * (1 + table_sectors)];
        data[..4].copy_from_slice(RKFP_MAGIC);
        data[0x04..0x08].copy_from_slice(&1u32.to_le_bytes());
        data[0x08..0x0C].copy_from_slice(&(SECTOR as u32).to_le_bytes());
        data[0x0C..0x10].copy_from_slice(&1u32.to_le_bytes());
        data[0x14..0x18].copy_from_slice(&(entry_size as u32).to_le_bytes());
        data[0x18..0x1C].copy_from_slice(&(entries.len() as u32).to_le_bytes());

        for (i, (path, payload)) in entries.iter().enumerate() {
            let base = SECTOR + i * entry_size;
            let sector = (data.len() / SECTOR) as u32;
            let sectors = payload.len().div_ceil(SECTOR).max(1) as u32;
            data[base + 8..base + 8 + path.len()].copy_from_slice(path.as_bytes());
            data[base + 0x48..base + 0x4C].copy_from_slice(&sector.to_le_bytes());
            data[base + 0x4C..base + 0x50].copy_from_slice(&sectors.to_le_bytes());
            data[base + 0x50..base + 0x54].copy_from_slice(&(payload.len() as u32).to_le_bytes());
            data.extend_from_slice(payload);
            data.resize((sector + sectors) as usize * SECTOR, 0);
        }
        data
    }

    #[test]
    fn test_parse_entries() {
        let data = build(&[("uboot.img", b"UBOOT"), ("dtb/board.dtb", &[0xD0; 700])]);
        let image = RkfpImage::parse(&data).unwrap();
        assert_eq!(image.sector_size, 512);
        assert_eq!(image.entries.len(), 2);
        assert_eq!(image.entries[0].data(&data).unwrap(), b"UBOOT");
        assert_eq!(image.entries[1].path, "dtb/board.dtb");
        assert_eq!(image.entries[1].length, 700);
        assert_eq!(image.entries[1].source_length, 1024);
        assert_eq!(image.info[1].sectors, 2);
    }

    #[test]
    fn test_small_entry_size_rejected() {
        let mut data = build(&[("a", b"x")]);
        data[0x14..0x18].copy_from_slice(&0x50u32.to_le_bytes());
        assert!(matches!(
            RkfpImage::parse(&data),
            Err(Error::Format(FormatError::InvalidField(_)))
        ));
    }

    #[test]
    fn test_length_beyond_sectors_rejected() {
        let mut data = build(&[("a", b"x")]);
        let base = SECTOR;
        data[base + 0x50..base + 0x54].copy_from_slice(&600u32.to_le_bytes());
        assert!(matches!(
            RkfpImage::parse(&data),
            Err(Error::Format(FormatError::InvalidField(_)))
        ));
    }

    #[test]
    fn test_truncated_header() {
        let data = build(&[]);
        assert!(matches!(
            RkfpImage::parse(&data[..0x100]),
            Err(Error::Format(FormatError::Truncated { .. }))
        ));
    }

    #[test]
    fn test_zero_sector_size_rejected() {
        let mut data = build(&[("a", b"x")]);
        data[0x08..0x0C].copy_from_slice(&0u32.to_le_bytes());
        assert!(RkfpImage::parse(&data).is_err());
    }
}
