//! Rockchip firmware containers.
//!
//! Three layouts are recognized by their first four bytes:
//!
//! | Magic  | Layout                                              |
//! |--------|-----------------------------------------------------|
//! | `RKAF` | update image: fixed-stride file table              |
//! | `RKFW` | release image: BOOT loader plus an embedded `RKAF` |
//! | `RKFP` | sector-addressed package with a variable entry table |
//!
//! Parsing validates every entry against the input before anything is
//! extracted, so [`unpack::unpack`] either writes a complete set of files
//! or fails without touching the output directory.

pub mod rkaf;
pub mod rkfp;
pub mod rkfw;
pub mod unpack;
pub mod wrap;

use std::fmt;
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use log::debug;

use crate::error::{FormatError, Result};

pub use rkaf::RkafImage;
pub use rkfp::RkfpImage;
pub use rkfw::{RkfwChip, RkfwImage};

/// One file carried by a container.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ContainerEntry {
    /// Logical name.
    pub name: String,
    /// Output path, relative to the extraction directory.
    pub path: String,
    /// Start of the extracted bytes in the container.
    pub offset: usize,
    /// Number of bytes extracted.
    pub length: usize,
    /// Span the container reserves for the entry.
    pub source_length: u64,
    /// Target flash offset in sectors, if the container gives one.
    pub nand_offset: Option<u32>,
}

impl ContainerEntry {
    /// The entry's bytes within `data`.
    pub fn data<'a>(&self, data: &'a [u8]) -> Result<&'a [u8]> {
        Fields::new(data).bytes(self.offset, self.length, &self.path)
    }
}

/// A parsed container.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Container {
    /// `RKAF` update image.
    Rkaf(RkafImage),
    /// `RKFW` release image.
    Rkfw(RkfwImage),
    /// `RKFP` package.
    Rkfp(RkfpImage),
}

impl Container {
    /// Parse a container, dispatching on its magic.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let magic = data.get(..4).unwrap_or(data);
        if magic == rkaf::RKAF_MAGIC {
            Ok(Self::Rkaf(RkafImage::parse(data)?))
        } else if magic == rkfw::RKFW_MAGIC {
            Ok(Self::Rkfw(RkfwImage::parse(data)?))
        } else if magic == rkfp::RKFP_MAGIC {
            Ok(Self::Rkfp(RkfpImage::parse(data)?))
        } else {
            Err(FormatError::BadMagic(String::from_utf8_lossy(magic).into_owned()).into())
        }
    }

    /// Read a file and parse it. Returns the container and the raw bytes.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<(Self, Vec<u8>)> {
        let path = path.as_ref();
        debug!("Loading container from: {}", path.display());
        let data = std::fs::read(path)?;
        let container = Self::parse(&data)?;
        Ok((container, data))
    }

    /// Magic of this container.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Rkaf(_) => "RKAF",
            Self::Rkfw(_) => "RKFW",
            Self::Rkfp(_) => "RKFP",
        }
    }

    /// Entries in extraction order.
    pub fn entries(&self) -> &[ContainerEntry] {
        match self {
            Self::Rkaf(image) => &image.entries,
            Self::Rkfw(image) => &image.entries,
            Self::Rkfp(image) => &image.entries,
        }
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rkaf(image) => fmt::Display::fmt(image, f),
            Self::Rkfw(image) => fmt::Display::fmt(image, f),
            Self::Rkfp(image) => fmt::Display::fmt(image, f),
        }
    }
}

/// Bounds-checked little-endian field reader.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Fields<'a> {
    data: &'a [u8],
}

impl<'a> Fields<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub(crate) fn bytes(&self, offset: usize, length: usize, what: &str) -> Result<&'a [u8]> {
        offset
            .checked_add(length)
            .and_then(|end| self.data.get(offset..end))
            .ok_or_else(|| {
                FormatError::Truncated {
                    what: what.to_string(),
                    offset,
                    length,
                    available: self.data.len(),
                }
                .into()
            })
    }

    pub(crate) fn u8(&self, offset: usize, what: &str) -> Result<u8> {
        Ok(self.bytes(offset, 1, what)?[0])
    }

    pub(crate) fn u16(&self, offset: usize, what: &str) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.bytes(offset, 2, what)?))
    }

    pub(crate) fn u16_be(&self, offset: usize, what: &str) -> Result<u16> {
        Ok(BigEndian::read_u16(self.bytes(offset, 2, what)?))
    }

    pub(crate) fn u32(&self, offset: usize, what: &str) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.bytes(offset, 4, what)?))
    }

    /// NUL-terminated string in a fixed-size field.
    pub(crate) fn cstr(&self, offset: usize, length: usize, what: &str) -> Result<String> {
        let raw = self.bytes(offset, length, what)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }
}
