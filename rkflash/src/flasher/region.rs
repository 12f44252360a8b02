//! Addressable regions and transfer chunking.
//!
//! | Region | Unit            | Max units per command | Opcodes                  |
//! |--------|-----------------|-----------------------|--------------------------|
//! | Flash  | 512-byte sector | 32                    | `ReadLba` / `WriteLba`   |
//! | SDRAM  | byte            | 0x4000                | `ReadSdram` / `WriteSdram` |
//! | IDB    | 0x210-byte block| 0x20                  | `ReadSector` / `WriteSector` |

use std::fmt;

use crate::error::{Error, Result};
use crate::protocol::Opcode;

/// Flash sector size.
pub const SECTOR_SIZE: usize = 512;

/// IDB block size (512 data bytes plus 16 spare bytes).
pub const IDB_BLOCK_SIZE: usize = 0x210;

/// Sectors per flash command (0x4000 bytes).
pub const FLASH_CHUNK_SECTORS: u16 = 32;

/// Blocks per IDB command.
pub const IDB_CHUNK_BLOCKS: u16 = 0x20;

/// Bytes per SDRAM command.
pub const SDRAM_CHUNK_BYTES: u16 = 0x4000;

/// An addressable region of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// NAND/eMMC flash, addressed in sectors.
    Flash,
    /// Device RAM, addressed in bytes.
    Sdram,
    /// ID block area, addressed in raw blocks.
    Idb,
}

impl Region {
    /// Bytes per addressing unit.
    pub fn unit_size(self) -> usize {
        match self {
            Self::Flash => SECTOR_SIZE,
            Self::Sdram => 1,
            Self::Idb => IDB_BLOCK_SIZE,
        }
    }

    /// Largest unit count one command may carry.
    pub fn chunk_units(self) -> u16 {
        match self {
            Self::Flash => FLASH_CHUNK_SECTORS,
            Self::Sdram => SDRAM_CHUNK_BYTES,
            Self::Idb => IDB_CHUNK_BLOCKS,
        }
    }

    /// Opcode that reads this region.
    pub fn read_opcode(self) -> Opcode {
        match self {
            Self::Flash => Opcode::ReadLba,
            Self::Sdram => Opcode::ReadSdram,
            Self::Idb => Opcode::ReadSector,
        }
    }

    /// Opcode that writes this region.
    pub fn write_opcode(self) -> Opcode {
        match self {
            Self::Flash => Opcode::WriteLba,
            Self::Sdram => Opcode::WriteSdram,
            Self::Idb => Opcode::WriteSector,
        }
    }

    /// Whether a short final write is padded out to a full chunk.
    ///
    /// Flash and IDB writes must stay chunk aligned; SDRAM takes any length.
    pub fn pads_short_writes(self) -> bool {
        !matches!(self, Self::Sdram)
    }

    /// Name of the addressing unit.
    pub fn unit_name(self) -> &'static str {
        match self {
            Self::Flash => "sector",
            Self::Sdram => "byte",
            Self::Idb => "block",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flash => f.write_str("flash"),
            Self::Sdram => f.write_str("sdram"),
            Self::Idb => f.write_str("idb"),
        }
    }
}

/// A span of one region to transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRequest {
    /// Target region.
    pub region: Region,
    /// First unit.
    pub offset: u32,
    /// Number of units.
    pub length: u32,
}

impl TransferRequest {
    /// Validate and build a request. The span must not wrap the 32-bit
    /// address space.
    pub fn new(region: Region, offset: u32, length: u32) -> Result<Self> {
        if offset.checked_add(length).is_none() {
            return Err(Error::InvalidRequest(format!(
                "{region} span {offset:#x}+{length:#x} overflows 32 bits"
            )));
        }
        Ok(Self {
            region,
            offset,
            length,
        })
    }

    /// Total byte length of the span.
    pub fn byte_len(&self) -> u64 {
        u64::from(self.length) * self.region.unit_size() as u64
    }

    /// Split into per-command chunks.
    pub fn chunks(&self) -> Chunks {
        Chunks {
            next: self.offset,
            remaining: self.length,
            max: u32::from(self.region.chunk_units()),
        }
    }
}

/// One command's worth of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// First unit.
    pub offset: u32,
    /// Unit count.
    pub units: u16,
}

/// Iterator over the chunks of a [`TransferRequest`].
#[derive(Debug, Clone)]
pub struct Chunks {
    next: u32,
    remaining: u32,
    max: u32,
}

impl Iterator for Chunks {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.remaining == 0 {
            return None;
        }
        let units = self.remaining.min(self.max);
        let chunk = Chunk {
            offset: self.next,
            // max never exceeds u16::MAX
            units: units as u16,
        };
        self.next = self.next.wrapping_add(units);
        self.remaining -= units;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining.div_ceil(self.max) as usize;
        (n, Some(n))
    }
}

impl ExactSizeIterator for Chunks {}
