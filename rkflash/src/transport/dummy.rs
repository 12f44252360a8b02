//! In-memory bootloader emulator.
//!
//! `DummyDevice` answers the rockusb command set against flash, IDB and
//! SDRAM arrays held in memory. It is useful for testing and development
//! without real hardware, and records every command block it receives.

use std::collections::VecDeque;

use log::trace;

use crate::error::TransportError;
use crate::flasher::region::{IDB_BLOCK_SIZE, SECTOR_SIZE};
use crate::protocol::command::{CommandPacket, Opcode, StatusPacket};
use crate::transport::BulkChannel;

/// Configuration for the dummy device.
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// Flash size in 512-byte sectors.
    pub flash_sectors: u32,
    /// IDB size in 0x210-byte blocks.
    pub idb_blocks: u32,
    /// First SDRAM address.
    pub sdram_base: u32,
    /// SDRAM size in bytes.
    pub sdram_size: u32,
    /// Flash ID returned by `ReadFlashId`.
    pub flash_id: [u8; 5],
    /// Chip info returned by `ReadChipInfo`.
    pub chip_info: [u8; 16],
    /// Flash manufacturer index reported in flash info.
    pub manufacturer: u8,
}

impl Default for DummyConfig {
    fn default() -> Self {
        let mut chip_info = [0u8; 16];
        chip_info[..4].copy_from_slice(b"8823");
        Self {
            flash_sectors: 0x8000, // 16 MiB
            idb_blocks: 0x100,
            sdram_base: 0x6000_0000,
            sdram_size: 0x10_0000,
            flash_id: [0xEC, 0xD7, 0x94, 0x7E, 0x64],
            chip_info,
            manufacturer: 0, // Samsung
        }
    }
}

#[derive(Debug)]
enum State {
    Idle,
    AwaitingPayload(CommandPacket),
}

/// Emulated rockusb bootloader.
pub struct DummyDevice {
    config: DummyConfig,
    flash: Vec<u8>,
    idb: Vec<u8>,
    sdram: Vec<u8>,
    state: State,
    replies: VecDeque<Vec<u8>>,
    commands: Vec<CommandPacket>,
    resets: Vec<u8>,
    executed: Vec<u32>,
    corrupt_status: bool,
}

impl DummyDevice {
    /// Create a new dummy device with the given configuration.
    pub fn new(config: DummyConfig) -> Self {
        let flash = vec![0xFF; config.flash_sectors as usize * SECTOR_SIZE];
        let idb = vec![0xFF; config.idb_blocks as usize * IDB_BLOCK_SIZE];
        let sdram = vec![0; config.sdram_size as usize];
        Self {
            config,
            flash,
            idb,
            sdram,
            state: State::Idle,
            replies: VecDeque::new(),
            commands: Vec::new(),
            resets: Vec::new(),
            executed: Vec::new(),
            corrupt_status: false,
        }
    }

    /// Create a new dummy device with default configuration (16 MiB flash).
    pub fn new_default() -> Self {
        Self::new(DummyConfig::default())
    }

    /// Create a dummy device with flash pre-filled from `data`.
    pub fn with_flash(config: DummyConfig, data: &[u8]) -> Self {
        let mut device = Self::new(config);
        let len = data.len().min(device.flash.len());
        device.flash[..len].copy_from_slice(&data[..len]);
        device
    }

    /// Get the configuration.
    pub fn config(&self) -> &DummyConfig {
        &self.config
    }

    /// Flash contents.
    pub fn flash(&self) -> &[u8] {
        &self.flash
    }

    /// Mutable flash contents.
    pub fn flash_mut(&mut self) -> &mut [u8] {
        &mut self.flash
    }

    /// IDB contents.
    pub fn idb(&self) -> &[u8] {
        &self.idb
    }

    /// SDRAM contents.
    pub fn sdram(&self) -> &[u8] {
        &self.sdram
    }

    /// Every command block received so far.
    pub fn commands(&self) -> &[CommandPacket] {
        &self.commands
    }

    /// Commands received with the given opcode.
    pub fn commands_with(&self, opcode: Opcode) -> Vec<CommandPacket> {
        self.commands
            .iter()
            .filter(|c| c.opcode == opcode)
            .copied()
            .collect()
    }

    /// Reset sub-codes received.
    pub fn resets(&self) -> &[u8] {
        &self.resets
    }

    /// Addresses passed to `ExecuteSdram`.
    pub fn executed(&self) -> &[u32] {
        &self.executed
    }

    /// Make every following status block one byte short.
    pub fn set_corrupt_status(&mut self, corrupt: bool) {
        self.corrupt_status = corrupt;
    }

    fn push_status(&mut self, tag: u32) {
        let status = StatusPacket::encode(tag, 0);
        if self.corrupt_status {
            self.replies.push_back(status[..status.len() - 1].to_vec());
        } else {
            self.replies.push_back(status.to_vec());
        }
    }

    fn flash_info(&self) -> Vec<u8> {
        let mut info = vec![0u8; 11];
        info[..4].copy_from_slice(&self.config.flash_sectors.to_le_bytes());
        info[4..6].copy_from_slice(&0x0100u16.to_le_bytes());
        info[6] = 4;
        info[7] = 40;
        info[8] = 32;
        info[9] = self.config.manufacturer;
        info[10] = 1;
        info
    }

    fn range(
        offset: u32,
        count: usize,
        unit: usize,
        len: usize,
    ) -> Option<std::ops::Range<usize>> {
        let start = (offset as usize).checked_mul(unit)?;
        let end = start.checked_add(count.checked_mul(unit)?)?;
        (end <= len).then_some(start..end)
    }

    fn sdram_range(&self, offset: u32, count: usize) -> Option<std::ops::Range<usize>> {
        let start = offset.checked_sub(self.config.sdram_base)? as usize;
        let end = start.checked_add(count)?;
        (end <= self.sdram.len()).then_some(start..end)
    }

    fn handle_command(&mut self, packet: CommandPacket) {
        let count = usize::from(packet.count);
        match packet.opcode {
            Opcode::TestUnitReady => self.push_status(packet.tag),
            Opcode::ReadFlashId => {
                self.replies.push_back(self.config.flash_id.to_vec());
                self.push_status(packet.tag);
            },
            Opcode::ReadFlashInfo => {
                self.replies.push_back(self.flash_info());
                self.push_status(packet.tag);
            },
            Opcode::ReadChipInfo => {
                self.replies.push_back(self.config.chip_info.to_vec());
                self.push_status(packet.tag);
            },
            Opcode::ResetDevice => {
                self.resets.push(packet.subcode);
                self.push_status(packet.tag);
            },
            Opcode::ExecuteSdram => {
                self.executed.push(packet.offset);
                self.push_status(packet.tag);
            },
            Opcode::ReadLba => {
                let data = Self::range(packet.offset, count, SECTOR_SIZE, self.flash.len())
                    .map(|r| self.flash[r].to_vec())
                    .unwrap_or_default();
                self.replies.push_back(data);
                self.push_status(packet.tag);
            },
            Opcode::ReadSector => {
                let data = Self::range(packet.offset, count, IDB_BLOCK_SIZE, self.idb.len())
                    .map(|r| self.idb[r].to_vec())
                    .unwrap_or_default();
                self.replies.push_back(data);
                self.push_status(packet.tag);
            },
            Opcode::ReadSdram => {
                let data = self
                    .sdram_range(packet.offset, count)
                    .map(|r| self.sdram[r].to_vec())
                    .unwrap_or_default();
                self.replies.push_back(data);
                self.push_status(packet.tag);
            },
            Opcode::WriteLba | Opcode::WriteSector | Opcode::WriteSdram => {
                self.state = State::AwaitingPayload(packet);
            },
        }
    }

    fn handle_payload(&mut self, packet: CommandPacket, data: &[u8]) {
        let count = usize::from(packet.count);
        let target = match packet.opcode {
            Opcode::WriteLba => Self::range(packet.offset, count, SECTOR_SIZE, self.flash.len())
                .map(|r| &mut self.flash[r]),
            Opcode::WriteSector => {
                Self::range(packet.offset, count, IDB_BLOCK_SIZE, self.idb.len())
                    .map(|r| &mut self.idb[r])
            },
            _ => self
                .sdram_range(packet.offset, count)
                .map(|r| &mut self.sdram[r]),
        };

        if let Some(target) = target {
            let len = data.len().min(target.len());
            target[..len].copy_from_slice(&data[..len]);
        } else {
            trace!("dummy: {:?} out of range, payload dropped", packet.opcode);
        }
        self.push_status(packet.tag);
    }
}

impl BulkChannel for DummyDevice {
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::AwaitingPayload(packet) => {
                self.handle_payload(packet, data);
                Ok(())
            },
            State::Idle => {
                let packet = CommandPacket::decode(data)
                    .map_err(|e| TransportError::Send(e.to_string()))?;
                trace!(
                    "dummy: {:?} offset={:#x} count={:#x}",
                    packet.opcode, packet.offset, packet.count
                );
                self.commands.push(packet);
                self.handle_command(packet);
                Ok(())
            },
        }
    }

    fn receive(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        let mut reply = self
            .replies
            .pop_front()
            .ok_or_else(|| TransportError::Receive("no data pending".into()))?;
        if reply.len() > max_len {
            let rest = reply.split_off(max_len);
            self.replies.push_front(rest);
        }
        Ok(reply)
    }

    fn name(&self) -> &str {
        "dummy"
    }
}
