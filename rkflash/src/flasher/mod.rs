//! Block transfer engine.
//!
//! `Flasher` drives chunked read, write and erase loops over a
//! [`Session`], plus the small information and control commands the
//! bootloader understands.
//!
//! ## Example
//!
//! ```rust
//! use rkflash::flasher::{Flasher, Region, TransferRequest};
//! use rkflash::transport::DummyDevice;
//!
//! let mut flasher = Flasher::new(DummyDevice::new_default());
//! flasher.test_unit_ready().unwrap();
//!
//! let req = TransferRequest::new(Region::Flash, 0, 64).unwrap();
//! let mut out = Vec::new();
//! flasher.read_region(&req, &mut out, |_, _| {}).unwrap();
//! assert_eq!(out.len(), 64 * 512);
//! ```

pub mod params;
pub mod region;

use std::fmt;
use std::io::{self, Read, Write};

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info};

use crate::error::{Error, FormatError, Result, SyntaxError};
use crate::partition::{self, PartitionSpec};
use crate::protocol::{CommandPacket, Opcode, ResetMode, Session};
use crate::transport::BulkChannel;

pub use region::{Chunk, Region, TransferRequest};

/// Reply buffer size for the information commands.
const INFO_REPLY_LEN: usize = 512;

/// Flash ID length.
const FLASH_ID_LEN: usize = 5;

/// Chip info length.
const CHIP_INFO_LEN: usize = 16;

/// Flash geometry reply length.
const FLASH_INFO_LEN: usize = 11;

/// Flash manufacturers by index.
const MANUFACTURERS: &[&str] = &[
    "Samsung", "Toshiba", "Hynix", "Infineon", "Micron", "Renesas", "Intel", "UNKNOWN", "SanDisk",
];

/// Outcome of a write or erase loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferSummary {
    /// Units sent to the device, padding included.
    pub units: u32,
    /// Bytes taken from the source.
    pub bytes: u64,
    /// Whether the source ended before the requested length.
    pub truncated: bool,
}

/// Flash geometry reported by the bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FlashInfo {
    /// Total size in sectors.
    pub total_sectors: u32,
    /// Erase block size in sectors.
    pub block_sectors: u16,
    /// Page size in sectors.
    pub page_sectors: u8,
    /// ECC strength in bits.
    pub ecc_bits: u8,
    /// Access time.
    pub access_time: u8,
    /// Manufacturer index.
    pub manufacturer_id: u8,
    /// Chip-select bitmap.
    pub chip_select: u8,
}

impl FlashInfo {
    /// Decode the flash info reply.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < FLASH_INFO_LEN {
            return Err(FormatError::Truncated {
                what: "flash info".into(),
                offset: 0,
                length: FLASH_INFO_LEN,
                available: data.len(),
            }
            .into());
        }
        Ok(Self {
            total_sectors: LittleEndian::read_u32(&data[0..4]),
            block_sectors: LittleEndian::read_u16(&data[4..6]),
            page_sectors: data[6],
            ecc_bits: data[7],
            access_time: data[8],
            manufacturer_id: data[9],
            chip_select: data[10],
        })
    }

    /// Manufacturer name, if the index is listed.
    pub fn manufacturer(&self) -> Option<&'static str> {
        MANUFACTURERS.get(usize::from(self.manufacturer_id)).copied()
    }

    /// Total size in bytes.
    pub fn total_bytes(&self) -> u64 {
        u64::from(self.total_sectors) * region::SECTOR_SIZE as u64
    }
}

impl fmt::Display for FlashInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Flash size: {} MiB ({} sectors)",
            self.total_bytes() >> 20,
            self.total_sectors
        )?;
        writeln!(
            f,
            "Block size: {} KiB",
            u32::from(self.block_sectors) * region::SECTOR_SIZE as u32 / 1024
        )?;
        writeln!(f, "Page size:  {} KiB", u32::from(self.page_sectors) / 2)?;
        writeln!(f, "ECC bits:   {}", self.ecc_bits)?;
        writeln!(f, "Access time: {}", self.access_time)?;
        match self.manufacturer() {
            Some(name) => writeln!(f, "Manufacturer: {name}")?,
            None => writeln!(f, "Manufacturer: unknown ({})", self.manufacturer_id)?,
        }
        write!(f, "Flash CS: {:#04x}", self.chip_select)
    }
}

/// Rockchip bootloader flasher.
///
/// Generic over the channel type `C`, so the same loops run against a USB
/// device or the in-memory emulator.
pub struct Flasher<C: BulkChannel> {
    session: Session<C>,
}

impl<C: BulkChannel> Flasher<C> {
    /// Create a flasher over an open channel.
    pub fn new(channel: C) -> Self {
        Self {
            session: Session::new(channel),
        }
    }

    /// Get a reference to the underlying channel.
    pub fn channel(&self) -> &C {
        self.session.channel()
    }

    /// Get a mutable reference to the underlying channel.
    pub fn channel_mut(&mut self) -> &mut C {
        self.session.channel_mut()
    }

    /// Consume the flasher and return the channel.
    pub fn into_channel(self) -> C {
        self.session.into_channel()
    }

    /// Check that the bootloader answers.
    pub fn test_unit_ready(&mut self) -> Result<()> {
        self.session.exec(Opcode::TestUnitReady, 0, 0)?;
        Ok(())
    }

    /// Read the 5-byte flash ID.
    pub fn read_flash_id(&mut self) -> Result<[u8; FLASH_ID_LEN]> {
        let data = self.session.exec_query(Opcode::ReadFlashId, INFO_REPLY_LEN)?;
        fixed_reply("flash ID", &data)
    }

    /// Read flash geometry.
    pub fn read_flash_info(&mut self) -> Result<FlashInfo> {
        let data = self
            .session
            .exec_query(Opcode::ReadFlashInfo, INFO_REPLY_LEN)?;
        let info = FlashInfo::parse(&data)?;
        debug!(
            "Flash info: {} sectors, manufacturer {}",
            info.total_sectors, info.manufacturer_id
        );
        Ok(info)
    }

    /// Read the 16-byte chip info.
    pub fn read_chip_info(&mut self) -> Result<[u8; CHIP_INFO_LEN]> {
        let data = self
            .session
            .exec_query(Opcode::ReadChipInfo, INFO_REPLY_LEN)?;
        fixed_reply("chip info", &data)
    }

    /// Reset the device into `mode`.
    pub fn reset(&mut self, mode: ResetMode) -> Result<()> {
        info!("Resetting device ({mode:?})...");
        let packet = CommandPacket::new(Opcode::ResetDevice, 0, 0).with_subcode(mode as u8);
        self.session.exec_packet(&packet)?;
        Ok(())
    }

    /// Jump to code previously written to device RAM.
    pub fn execute_sdram(&mut self, address: u32) -> Result<()> {
        info!("Executing at {address:#010x}");
        self.session.exec(Opcode::ExecuteSdram, address, 0)?;
        Ok(())
    }

    /// Read a region span into `sink`.
    ///
    /// `progress` receives `(done_units, total_units)` after every chunk.
    /// Returns the number of bytes written to the sink.
    pub fn read_region<W, F>(
        &mut self,
        req: &TransferRequest,
        sink: &mut W,
        mut progress: F,
    ) -> Result<u64>
    where
        W: Write + ?Sized,
        F: FnMut(u32, u32),
    {
        let unit = req.region.unit_size();
        let opcode = req.region.read_opcode();
        let mut done = 0u32;
        let mut bytes = 0u64;

        debug!(
            "Reading {} {:#x}+{:#x} ({} chunks)",
            req.region,
            req.offset,
            req.length,
            req.chunks().len()
        );

        for chunk in req.chunks() {
            let len = usize::from(chunk.units) * unit;
            let data = self.session.exec_read(opcode, chunk.offset, chunk.units, len)?;
            sink.write_all(&data)?;

            done += u32::from(chunk.units);
            bytes += len as u64;
            progress(done, req.length);
        }

        sink.flush()?;
        Ok(bytes)
    }

    /// Write a region span from `source`.
    ///
    /// A source that ends early stops the loop after sending what it had.
    /// Flash and IDB chunks are zero-padded to their full size; SDRAM
    /// chunks are sent at their exact length.
    pub fn write_region<R, F>(
        &mut self,
        req: &TransferRequest,
        source: &mut R,
        mut progress: F,
    ) -> Result<TransferSummary>
    where
        R: Read + ?Sized,
        F: FnMut(u32, u32),
    {
        let region = req.region;
        let unit = region.unit_size();
        let opcode = region.write_opcode();
        let mut summary = TransferSummary::default();

        debug!(
            "Writing {} {:#x}+{:#x} ({} chunks)",
            region,
            req.offset,
            req.length,
            req.chunks().len()
        );

        for chunk in req.chunks() {
            let want = usize::from(chunk.units) * unit;
            let mut buf = vec![0u8; want];
            let filled = fill_from(source, &mut buf)?;
            if filled == 0 {
                summary.truncated = true;
                break;
            }

            let (units, payload) = if filled < want && !region.pads_short_writes() {
                // SDRAM units are bytes, so filled fits the chunk's u16 count
                (filled as u16, &buf[..filled])
            } else {
                (chunk.units, &buf[..])
            };
            self.session
                .exec_write(opcode, chunk.offset, units, payload)?;

            summary.units += u32::from(units);
            summary.bytes += filled as u64;
            progress(summary.units, req.length);

            if filled < want {
                summary.truncated = true;
                break;
            }
        }

        if summary.truncated {
            info!(
                "Input ended after {} bytes, {} {}s written",
                summary.bytes,
                summary.units,
                region.unit_name()
            );
        }
        Ok(summary)
    }

    /// Fill a Flash or IDB span with 0xFF.
    pub fn erase_region<F>(
        &mut self,
        req: &TransferRequest,
        mut progress: F,
    ) -> Result<TransferSummary>
    where
        F: FnMut(u32, u32),
    {
        if req.region == Region::Sdram {
            return Err(Error::Unsupported("erasing SDRAM".to_string()));
        }

        let unit = req.region.unit_size();
        let opcode = req.region.write_opcode();
        let fill = vec![0xFF; usize::from(req.region.chunk_units()) * unit];
        let mut summary = TransferSummary::default();

        debug!("Erasing {} {:#x}+{:#x}", req.region, req.offset, req.length);

        for chunk in req.chunks() {
            let len = usize::from(chunk.units) * unit;
            self.session
                .exec_write(opcode, chunk.offset, chunk.units, &fill[..len])?;
            summary.units += u32::from(chunk.units);
            progress(summary.units, req.length);
        }
        Ok(summary)
    }

    fn read_params_block(&mut self) -> Result<Vec<u8>> {
        let first = TransferRequest::new(
            Region::Flash,
            params::PARAM_BASE,
            u32::from(region::FLASH_CHUNK_SECTORS),
        )?;
        let mut block = Vec::with_capacity(params::CHUNK_BYTES);
        self.read_region(&first, &mut block, |_, _| {})?;

        let needed = params::declared_length(&block)? + params::PARAM_OVERHEAD;
        if needed > block.len() {
            let sectors = needed.div_ceil(region::SECTOR_SIZE) as u32;
            let rest = TransferRequest::new(
                Region::Flash,
                params::PARAM_BASE + first.length,
                sectors - first.length,
            )?;
            debug!("Parameter block spans {sectors} sectors");
            self.read_region(&rest, &mut block, |_, _| {})?;
        }
        Ok(block)
    }

    /// Read the parameter block payload, verifying its CRC32.
    pub fn read_params(&mut self) -> Result<Vec<u8>> {
        let block = self.read_params_block()?;
        Ok(params::decode(&block, true)?.to_vec())
    }

    /// Read the parameter block payload without the CRC check.
    pub fn read_params_unchecked(&mut self) -> Result<Vec<u8>> {
        let block = self.read_params_block()?;
        Ok(params::decode(&block, false)?.to_vec())
    }

    /// Write `payload` as the parameter block to every replica offset.
    pub fn write_params(&mut self, payload: &[u8]) -> Result<()> {
        let block = params::encode(payload)?;
        let sectors = (block.len() / region::SECTOR_SIZE) as u32;

        for offset in params::replica_offsets() {
            debug!("Writing parameter copy at sector {offset:#06x}");
            let req = TransferRequest::new(Region::Flash, offset, sectors)?;
            self.write_region(&req, &mut block.as_slice(), |_, _| {})?;
        }
        info!(
            "Parameter block written ({} bytes, {} copies)",
            payload.len(),
            params::PARAM_COPIES
        );
        Ok(())
    }

    /// Resolve a partition name against the device's parameter block.
    pub fn partition(&mut self, name: &str) -> Result<PartitionSpec> {
        let payload = self.read_params_unchecked()?;
        let text = String::from_utf8_lossy(&payload);
        let mtdparts = partition::find_mtdparts(&text).ok_or(SyntaxError::MissingMtdparts)?;
        let layout = partition::resolve(mtdparts, name)?;

        let total = if layout.extends_to_end() {
            self.read_flash_info()?.total_sectors
        } else {
            0
        };
        let spec = layout.into_spec(total)?;
        debug!(
            "Partition {}: offset {:#x}, size {:#x}",
            spec.name, spec.offset, spec.size
        );
        Ok(spec)
    }

    fn partition_request(&mut self, name: &str) -> Result<TransferRequest> {
        let spec = self.partition(name)?;
        TransferRequest::new(Region::Flash, spec.offset, spec.size)
    }

    /// Read a whole partition into `sink`.
    pub fn read_partition<W, F>(&mut self, name: &str, sink: &mut W, progress: F) -> Result<u64>
    where
        W: Write + ?Sized,
        F: FnMut(u32, u32),
    {
        let req = self.partition_request(name)?;
        self.read_region(&req, sink, progress)
    }

    /// Write a partition from `source`.
    pub fn write_partition<R, F>(
        &mut self,
        name: &str,
        source: &mut R,
        progress: F,
    ) -> Result<TransferSummary>
    where
        R: Read + ?Sized,
        F: FnMut(u32, u32),
    {
        let req = self.partition_request(name)?;
        self.write_region(&req, source, progress)
    }

    /// Erase a whole partition.
    pub fn erase_partition<F>(&mut self, name: &str, progress: F) -> Result<TransferSummary>
    where
        F: FnMut(u32, u32),
    {
        let req = self.partition_request(name)?;
        self.erase_region(&req, progress)
    }
}

/// Read from `source` until `buf` is full or the input ends.
fn fill_from<R: Read + ?Sized>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn fixed_reply<const N: usize>(what: &str, data: &[u8]) -> Result<[u8; N]> {
    data.get(..N)
        .and_then(|d| d.try_into().ok())
        .ok_or_else(|| {
            FormatError::Truncated {
                what: what.to_string(),
                offset: 0,
                length: N,
                available: data.len(),
            }
            .into()
        })
}
