//! CRC-wrapped images for flashing.
//!
//! Kernel and parameter images are flashed with an 8-byte header (tag plus
//! little-endian payload length) and a trailing CRC32 of the payload.
//! Plain images only get the trailer.

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{FormatError, Result};
use crate::protocol::crc::crc32;

/// Kernel image tag.
pub const KERNEL_MAGIC: &[u8; 4] = b"KRNL";

/// Parameter image tag.
pub const PARAMETER_MAGIC: &[u8; 4] = b"PARM";

const HEADER_LEN: usize = 8;
const CRC_LEN: usize = 4;

/// How a payload is framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WrapKind {
    /// CRC trailer only.
    #[default]
    Plain,
    /// `KRNL` header and CRC trailer.
    Kernel,
    /// `PARM` header and CRC trailer.
    Parameter,
}

impl WrapKind {
    /// Header tag, if the kind has one.
    pub fn magic(self) -> Option<&'static [u8; 4]> {
        match self {
            Self::Plain => None,
            Self::Kernel => Some(KERNEL_MAGIC),
            Self::Parameter => Some(PARAMETER_MAGIC),
        }
    }
}

impl fmt::Display for WrapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain => f.write_str("plain"),
            Self::Kernel => f.write_str("kernel"),
            Self::Parameter => f.write_str("parameter"),
        }
    }
}

/// Frame `payload` as `kind`.
pub fn wrap(kind: WrapKind, payload: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(payload.len() + HEADER_LEN + CRC_LEN);
    if let Some(magic) = kind.magic() {
        let len = u32::try_from(payload.len()).map_err(|_| {
            FormatError::InvalidField(format!("payload of {} bytes too large", payload.len()))
        })?;
        out.extend_from_slice(magic);
        out.extend_from_slice(&len.to_le_bytes());
    }
    out.extend_from_slice(payload);
    out.extend_from_slice(&crc32(0, payload).to_le_bytes());
    Ok(out)
}

/// Verify a wrapped image and return its kind and payload.
///
/// Data that does not start with a known tag is treated as plain.
pub fn unwrap(data: &[u8]) -> Result<(WrapKind, &[u8])> {
    let kind = match data.get(..4) {
        Some(tag) if tag == KERNEL_MAGIC => WrapKind::Kernel,
        Some(tag) if tag == PARAMETER_MAGIC => WrapKind::Parameter,
        _ => WrapKind::Plain,
    };

    let payload = if kind == WrapKind::Plain {
        let end = data.len().checked_sub(CRC_LEN).ok_or_else(|| truncated(data, CRC_LEN))?;
        &data[..end]
    } else {
        let header = data
            .get(..HEADER_LEN)
            .ok_or_else(|| truncated(data, HEADER_LEN))?;
        let len = LittleEndian::read_u32(&header[4..]) as usize;
        let end = HEADER_LEN
            .checked_add(len)
            .filter(|end| end + CRC_LEN <= data.len())
            .ok_or_else(|| truncated(data, HEADER_LEN + len + CRC_LEN))?;
        &data[HEADER_LEN..end]
    };

    let trailer_at = data.len() - CRC_LEN;
    let stored_at = if kind == WrapKind::Plain {
        trailer_at
    } else {
        HEADER_LEN + payload.len()
    };
    let stored = LittleEndian::read_u32(&data[stored_at..stored_at + CRC_LEN]);
    let computed = crc32(0, payload);
    if stored != computed {
        return Err(FormatError::CrcMismatch {
            expected: stored,
            actual: computed,
        }
        .into());
    }
    Ok((kind, payload))
}

fn truncated(data: &[u8], needed: usize) -> FormatError {
    FormatError::Truncated {
        what: "wrapped image".into(),
        offset: 0,
        length: needed,
        available: data.len(),
    }
}
