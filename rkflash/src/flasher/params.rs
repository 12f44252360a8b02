//! Parameter block layout.
//!
//! ```text
//! +--------+-----------+-------------------+-----------+
//! | "PARM" | len (LE)  | payload[len]      | CRC32 LE  |
//! +--------+-----------+-------------------+-----------+
//! 0        4           8                   8+len       12+len
//! ```
//!
//! The block lives at the start of flash and is replicated eight times,
//! 0x400 sectors apart.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{FormatError, Result};
use crate::flasher::region::{FLASH_CHUNK_SECTORS, SECTOR_SIZE};
use crate::protocol::crc::crc32;

/// Parameter block tag.
pub const PARAM_MAGIC: &[u8; 4] = b"PARM";

/// First sector of the primary copy.
pub const PARAM_BASE: u32 = 0;

/// Number of replicas written.
pub const PARAM_COPIES: u32 = 8;

/// Sector distance between replicas.
pub const PARAM_STRIDE: u32 = 0x400;

/// Sectors reserved for one copy.
pub const PARAM_MAX_SECTORS: usize = 128;

/// Header plus trailer size.
pub const PARAM_OVERHEAD: usize = 12;

/// Largest payload that fits in one copy.
pub const MAX_PARAM_LENGTH: usize = PARAM_MAX_SECTORS * SECTOR_SIZE - PARAM_OVERHEAD;

/// Bytes in one flash read/write chunk.
pub const CHUNK_BYTES: usize = FLASH_CHUNK_SECTORS as usize * SECTOR_SIZE;

/// Sector offsets of every replica.
pub fn replica_offsets() -> impl Iterator<Item = u32> {
    (0..PARAM_COPIES).map(|i| PARAM_BASE + i * PARAM_STRIDE)
}

/// Payload length declared by a block's header.
///
/// `data` must hold at least the 8-byte header.
pub fn declared_length(data: &[u8]) -> Result<usize> {
    if data.len() < 8 {
        return Err(FormatError::Truncated {
            what: "parameter header".into(),
            offset: 0,
            length: 8,
            available: data.len(),
        }
        .into());
    }
    let len = LittleEndian::read_u32(&data[4..8]);
    if len as usize > MAX_PARAM_LENGTH {
        return Err(FormatError::BadParameterLength(len).into());
    }
    Ok(len as usize)
}

/// Build a block for `payload`, zero-padded to whole flash chunks.
pub fn encode(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_PARAM_LENGTH {
        return Err(FormatError::BadParameterLength(payload.len() as u32).into());
    }

    let block_len = payload.len() + PARAM_OVERHEAD;
    let mut block = vec![0u8; block_len.div_ceil(CHUNK_BYTES) * CHUNK_BYTES];
    block[..4].copy_from_slice(PARAM_MAGIC);
    LittleEndian::write_u32(&mut block[4..8], payload.len() as u32);
    block[8..8 + payload.len()].copy_from_slice(payload);
    LittleEndian::write_u32(
        &mut block[8 + payload.len()..block_len],
        crc32(0, payload),
    );
    Ok(block)
}

/// Extract the payload of a block, optionally checking its CRC32 trailer.
///
/// The tag is not checked.
pub fn decode(block: &[u8], verify_crc: bool) -> Result<&[u8]> {
    let len = declared_length(block)?;
    let end = len + PARAM_OVERHEAD;
    if block.len() < end {
        return Err(FormatError::Truncated {
            what: "parameter payload".into(),
            offset: 8,
            length: len + 4,
            available: block.len() - 8,
        }
        .into());
    }

    let payload = &block[8..8 + len];
    if verify_crc {
        let stored = LittleEndian::read_u32(&block[8 + len..end]);
        let computed = crc32(0, payload);
        if stored != computed {
            return Err(FormatError::CrcMismatch {
                expected: stored,
                actual: computed,
            }
            .into());
        }
    }
    Ok(payload)
}
