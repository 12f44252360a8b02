//! rockusb command codec.
//!
//! Every exchange with the bootloader is one command block, an optional data
//! phase, and one status block. The command block reuses the USB mass
//! storage CBW layout:
//!
//! ```text
//! +--------+--------+--------+------+-----+-------+-----+--------+-----+-------+-----+
//! | "USBC" |  tag   |   0    | flag | lun | cblen | op  |  sub   | lba | rsvd  | cnt |
//! +--------+--------+--------+------+-----+-------+-----+--------+-----+-------+-----+
//! | 0..4   | 4..8   | 8..12  |  12  | 13  |  14   | 15  |   16   |17..21| 21   |22..24|
//! +--------+--------+--------+------+-----+-------+-----+--------+-----+-------+-----+
//! ```
//!
//! The opcode constants pack `flag | lun | cblen | op` into one big-endian
//! `u32` written at offset 12, so the command code itself is byte 15 and the
//! sub-code byte that follows it is free for the reset mode. The remaining
//! bytes up to 31 stay zero.

use crate::error::{ProtocolError, Result};
use crate::transport::BulkChannel;
use byteorder::{BigEndian, ByteOrder};
use log::{debug, trace};

/// Command block signature.
pub const COMMAND_SIGNATURE: &[u8; 4] = b"USBC";

/// Status block signature.
pub const STATUS_SIGNATURE: &[u8; 4] = b"USBS";

/// Command block length.
pub const COMMAND_LEN: usize = 31;

/// Status block length.
pub const STATUS_LEN: usize = 13;

const TAG_OFFSET: usize = 4;
const OPCODE_OFFSET: usize = 12;
const SUBCODE_OFFSET: usize = 16;
const ADDRESS_OFFSET: usize = 17;
const COUNT_OFFSET: usize = 22;

/// Bootloader opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Opcode {
    /// Probe that the bootloader is responsive.
    TestUnitReady = 0x8000_0600,
    /// Read the 5-byte NAND/eMMC ID.
    ReadFlashId = 0x8000_0601,
    /// Read flash geometry.
    ReadFlashInfo = 0x8000_061A,
    /// Read the 16-byte chip identification.
    ReadChipInfo = 0x8000_061B,
    /// Reset the device (sub-code selects the mode).
    ResetDevice = 0x0000_06FF,
    /// Read IDB blocks.
    ReadSector = 0x8000_0A04,
    /// Write IDB blocks.
    WriteSector = 0x0000_0A05,
    /// Read flash sectors by LBA.
    ReadLba = 0x8000_0A14,
    /// Write flash sectors by LBA.
    WriteLba = 0x0000_0A15,
    /// Read device RAM.
    ReadSdram = 0x8000_0A17,
    /// Write device RAM.
    WriteSdram = 0x0000_0A18,
    /// Jump to code in device RAM.
    ExecuteSdram = 0x0000_0A19,
}

impl Opcode {
    /// All known opcodes.
    pub const ALL: [Self; 12] = [
        Self::TestUnitReady,
        Self::ReadFlashId,
        Self::ReadFlashInfo,
        Self::ReadChipInfo,
        Self::ResetDevice,
        Self::ReadSector,
        Self::WriteSector,
        Self::ReadLba,
        Self::WriteLba,
        Self::ReadSdram,
        Self::WriteSdram,
        Self::ExecuteSdram,
    ];

    /// Wire value.
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Look up an opcode by wire value.
    pub fn from_u32(value: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_u32() == value)
    }

    /// Command code byte (offset 15 on the wire).
    pub fn code(self) -> u8 {
        self.as_u32().to_be_bytes()[3]
    }

    /// Whether the flag byte marks the command device-to-host.
    pub fn is_device_to_host(self) -> bool {
        self.as_u32() & 0x8000_0000 != 0
    }
}

/// Reset sub-codes carried in the command block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ResetMode {
    /// Plain reboot into the installed system.
    #[default]
    Normal = 0,
    /// Reboot into mass-storage mode.
    Msc = 1,
    /// Power the device off.
    PowerOff = 2,
    /// Reboot into the boot ROM download mode.
    Maskrom = 3,
    /// Drop the USB connection, then reset.
    Disconnect = 4,
}

/// A 31-byte command block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandPacket {
    /// Transaction tag.
    pub tag: u32,
    /// Opcode.
    pub opcode: Opcode,
    /// Sub-code byte (reset mode), usually zero.
    pub subcode: u8,
    /// Sector, block or byte address.
    pub offset: u32,
    /// Sector, block or byte count.
    pub count: u16,
}

impl CommandPacket {
    /// Build a command with a fresh random tag.
    pub fn new(opcode: Opcode, offset: u32, count: u16) -> Self {
        Self::with_tag(rand::random(), opcode, offset, count)
    }

    /// Build a command with an explicit tag.
    pub fn with_tag(tag: u32, opcode: Opcode, offset: u32, count: u16) -> Self {
        Self {
            tag,
            opcode,
            subcode: 0,
            offset,
            count,
        }
    }

    /// Set the sub-code byte.
    #[must_use]
    pub fn with_subcode(mut self, subcode: u8) -> Self {
        self.subcode = subcode;
        self
    }

    /// Encode to wire bytes.
    ///
    /// Fields that are zero are left at the zero fill.
    pub fn encode(&self) -> [u8; COMMAND_LEN] {
        let mut buf = [0u8; COMMAND_LEN];
        buf[..4].copy_from_slice(COMMAND_SIGNATURE);

        if self.tag != 0 {
            BigEndian::write_u32(&mut buf[TAG_OFFSET..TAG_OFFSET + 4], self.tag);
        }
        BigEndian::write_u32(
            &mut buf[OPCODE_OFFSET..OPCODE_OFFSET + 4],
            self.opcode.as_u32(),
        );
        if self.subcode != 0 {
            buf[SUBCODE_OFFSET] = self.subcode;
        }
        if self.offset != 0 {
            BigEndian::write_u32(&mut buf[ADDRESS_OFFSET..ADDRESS_OFFSET + 4], self.offset);
        }
        if self.count != 0 {
            BigEndian::write_u16(&mut buf[COUNT_OFFSET..COUNT_OFFSET + 2], self.count);
        }
        buf
    }

    /// Decode a command block (device side).
    pub fn decode(data: &[u8]) -> std::result::Result<Self, ProtocolError> {
        if data.len() != COMMAND_LEN {
            return Err(ProtocolError::BadCommand(format!(
                "expected {COMMAND_LEN} bytes, got {}",
                data.len()
            )));
        }
        if &data[..4] != COMMAND_SIGNATURE {
            return Err(ProtocolError::BadCommand("missing USBC signature".into()));
        }

        let raw = BigEndian::read_u32(&data[OPCODE_OFFSET..OPCODE_OFFSET + 4]);
        let opcode = Opcode::from_u32(raw)
            .ok_or_else(|| ProtocolError::BadCommand(format!("unknown opcode {raw:#010x}")))?;

        Ok(Self {
            tag: BigEndian::read_u32(&data[TAG_OFFSET..TAG_OFFSET + 4]),
            opcode,
            subcode: data[SUBCODE_OFFSET],
            offset: BigEndian::read_u32(&data[ADDRESS_OFFSET..ADDRESS_OFFSET + 4]),
            count: BigEndian::read_u16(&data[COUNT_OFFSET..COUNT_OFFSET + 2]),
        })
    }
}

/// A 13-byte status block.
///
/// Only the length is part of the contract; tag and status are kept for
/// diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusPacket {
    /// Echoed transaction tag.
    pub tag: u32,
    /// Trailing status byte.
    pub status: u8,
}

impl StatusPacket {
    /// Decode a status block. Anything but exactly 13 bytes fails.
    pub fn decode(data: &[u8]) -> std::result::Result<Self, ProtocolError> {
        if data.len() != STATUS_LEN {
            return Err(ProtocolError::StatusFailed {
                expected: STATUS_LEN,
                actual: data.len(),
                source: None,
            });
        }
        Ok(Self {
            tag: BigEndian::read_u32(&data[4..8]),
            status: data[12],
        })
    }

    /// Encode a status block (device side).
    pub fn encode(tag: u32, status: u8) -> [u8; STATUS_LEN] {
        let mut buf = [0u8; STATUS_LEN];
        buf[..4].copy_from_slice(STATUS_SIGNATURE);
        BigEndian::write_u32(&mut buf[4..8], tag);
        buf[12] = status;
        buf
    }
}

/// One command/payload/status exchange at a time over a bulk channel.
pub struct Session<C: BulkChannel> {
    channel: C,
}

impl<C: BulkChannel> Session<C> {
    /// Wrap an open channel.
    pub fn new(channel: C) -> Self {
        Self { channel }
    }

    /// Get a reference to the underlying channel.
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Get a mutable reference to the underlying channel.
    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    /// Consume the session and return the channel.
    pub fn into_channel(self) -> C {
        self.channel
    }

    fn send_command(&mut self, packet: &CommandPacket) -> Result<()> {
        trace!(
            "-> {:?} tag={:#010x} offset={:#x} count={:#x}",
            packet.opcode, packet.tag, packet.offset, packet.count
        );
        self.channel.send(&packet.encode())?;
        Ok(())
    }

    fn receive_status(&mut self) -> Result<StatusPacket> {
        let data = self.channel.receive(STATUS_LEN).map_err(|e| {
            debug!("status receive failed: {e}");
            ProtocolError::StatusFailed {
                expected: STATUS_LEN,
                actual: 0,
                source: Some(e),
            }
        })?;
        let status = StatusPacket::decode(&data)?;
        trace!("<- status tag={:#010x} status={}", status.tag, status.status);
        Ok(status)
    }

    /// Send a prepared command block and wait for its status.
    pub fn exec_packet(&mut self, packet: &CommandPacket) -> Result<StatusPacket> {
        self.send_command(packet)?;
        self.receive_status()
    }

    /// Run a command without a data phase.
    pub fn exec(&mut self, opcode: Opcode, offset: u32, count: u16) -> Result<StatusPacket> {
        self.exec_packet(&CommandPacket::new(opcode, offset, count))
    }

    /// Run a command that returns exactly `len` bytes.
    pub fn exec_read(
        &mut self,
        opcode: Opcode,
        offset: u32,
        count: u16,
        len: usize,
    ) -> Result<Vec<u8>> {
        self.send_command(&CommandPacket::new(opcode, offset, count))?;

        let mut data = Vec::with_capacity(len);
        while data.len() < len {
            let chunk = self.channel.receive(len - data.len())?;
            if chunk.is_empty() {
                break;
            }
            data.extend_from_slice(&chunk);
        }
        if data.len() != len {
            return Err(ProtocolError::ShortPayload {
                expected: len,
                actual: data.len(),
            }
            .into());
        }

        self.receive_status()?;
        Ok(data)
    }

    /// Run an information command whose reply length the device chooses.
    ///
    /// One receive of at most `max_len` bytes, then the status block.
    pub fn exec_query(&mut self, opcode: Opcode, max_len: usize) -> Result<Vec<u8>> {
        self.send_command(&CommandPacket::new(opcode, 0, 0))?;
        let data = self.channel.receive(max_len)?;
        trace!("<- {} bytes for {opcode:?}", data.len());
        self.receive_status()?;
        Ok(data)
    }

    /// Run a command that sends `payload` to the device.
    pub fn exec_write(
        &mut self,
        opcode: Opcode,
        offset: u32,
        count: u16,
        payload: &[u8],
    ) -> Result<()> {
        self.send_command(&CommandPacket::new(opcode, offset, count))?;
        self.channel.send(payload)?;
        self.receive_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, TransportError};
    use std::collections::VecDeque;

    /// Records sends and replays canned receives.
    #[derive(Default)]
    struct ScriptedChannel {
        sent: Vec<Vec<u8>>,
        replies: VecDeque<Vec<u8>>,
    }

    impl BulkChannel for ScriptedChannel {
        fn send(&mut self, data: &[u8]) -> std::result::Result<(), TransportError> {
            self.sent.push(data.to_vec());
            Ok(())
        }

        fn receive(&mut self, max_len: usize) -> std::result::Result<Vec<u8>, TransportError> {
            let mut reply = self.replies.pop_front().ok_or(TransportError::Closed)?;
            reply.truncate(max_len);
            Ok(reply)
        }
    }

    #[test]
    fn test_encode_layout() {
        let packet = CommandPacket::with_tag(0x1122_3344, Opcode::ReadLba, 0x0000_4000, 0x20);
        let data = packet.encode();

        assert_eq!(data.len(), 31);
        assert_eq!(&data[0..4], b"USBC");
        assert_eq!(&data[4..8], &[0x11, 0x22, 0x33, 0x44]);
        assert_eq!(&data[8..12], &[0, 0, 0, 0]);
        assert_eq!(&data[12..16], &[0x80, 0x00, 0x0A, 0x14]);
        assert_eq!(data[16], 0);
        assert_eq!(&data[17..21], &[0x00, 0x00, 0x40, 0x00]);
        assert_eq!(data[21], 0);
        assert_eq!(&data[22..24], &[0x00, 0x20]);
        assert!(data[24..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_encode_zero_fields_stay_zero() {
        let data = CommandPacket::with_tag(0, Opcode::TestUnitReady, 0, 0).encode();
        assert_eq!(&data[0..4], b"USBC");
        assert_eq!(&data[12..16], &[0x80, 0x00, 0x06, 0x00]);
        assert!(data[4..12].iter().all(|&b| b == 0));
        assert!(data[16..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_random_tags_differ() {
        let tags: Vec<u32> = (0..8)
            .map(|_| CommandPacket::new(Opcode::TestUnitReady, 0, 0).tag)
            .collect();
        assert!(tags.windows(2).any(|w| w[0] != w[1]));
    }

    #[test]
    fn test_decode_roundtrip_with_subcode() {
        let packet = CommandPacket::with_tag(7, Opcode::ResetDevice, 0, 0)
            .with_subcode(ResetMode::Maskrom as u8);
        let decoded = CommandPacket::decode(&packet.encode()).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_decode_rejects_bad_signature() {
        let mut data = CommandPacket::with_tag(1, Opcode::ReadLba, 0, 1).encode();
        data[0] = b'X';
        assert!(CommandPacket::decode(&data).is_err());
    }

    #[test]
    fn test_status_length_contract() {
        assert!(StatusPacket::decode(&StatusPacket::encode(5, 0)).is_ok());
        assert!(matches!(
            StatusPacket::decode(&[0u8; 12]),
            Err(ProtocolError::StatusFailed {
                expected: 13,
                actual: 12,
                ..
            })
        ));
        assert!(StatusPacket::decode(&[0u8; 14]).is_err());
    }

    #[test]
    fn test_opcode_direction() {
        assert!(Opcode::ReadLba.is_device_to_host());
        assert!(Opcode::ReadFlashInfo.is_device_to_host());
        assert!(!Opcode::WriteLba.is_device_to_host());
        assert!(!Opcode::ResetDevice.is_device_to_host());
    }

    #[test]
    fn test_exec_read_sequence() {
        let mut channel = ScriptedChannel::default();
        channel.replies.push_back(vec![0xAB; 512]);
        channel.replies.push_back(StatusPacket::encode(0, 0).to_vec());

        let mut session = Session::new(channel);
        let data = session.exec_read(Opcode::ReadLba, 0, 1, 512).unwrap();
        assert_eq!(data, vec![0xAB; 512]);

        let channel = session.into_channel();
        assert_eq!(channel.sent.len(), 1);
        assert_eq!(channel.sent[0].len(), COMMAND_LEN);
        assert!(channel.replies.is_empty());
    }

    #[test]
    fn test_exec_read_short_payload() {
        let mut channel = ScriptedChannel::default();
        channel.replies.push_back(vec![0; 100]);
        channel.replies.push_back(Vec::new());

        let mut session = Session::new(channel);
        let err = session.exec_read(Opcode::ReadLba, 0, 1, 512).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::ShortPayload {
                expected: 512,
                actual: 100
            })
        ));
    }

    #[test]
    fn test_exec_write_sends_command_then_payload() {
        let mut channel = ScriptedChannel::default();
        channel.replies.push_back(StatusPacket::encode(0, 0).to_vec());

        let mut session = Session::new(channel);
        session
            .exec_write(Opcode::WriteLba, 0x40, 1, &[0x55; 512])
            .unwrap();

        let channel = session.into_channel();
        assert_eq!(channel.sent.len(), 2);
        assert_eq!(&channel.sent[0][..4], b"USBC");
        assert_eq!(channel.sent[1], vec![0x55; 512]);
    }

    #[test]
    fn test_exec_query_takes_device_length() {
        let mut channel = ScriptedChannel::default();
        channel.replies.push_back(vec![1; 11]);
        channel.replies.push_back(StatusPacket::encode(0, 0).to_vec());

        let mut session = Session::new(channel);
        let data = session.exec_query(Opcode::ReadFlashInfo, 512).unwrap();
        assert_eq!(data.len(), 11);
    }

    #[test]
    fn test_missing_status_is_status_failed() {
        let channel = ScriptedChannel::default();
        let mut session = Session::new(channel);
        let err = session.exec(Opcode::TestUnitReady, 0, 0).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::StatusFailed {
                expected: 13,
                actual: 0,
                source: Some(TransportError::Closed),
            })
        ));
    }

    #[test]
    fn test_lost_payload_stays_transport_error() {
        let channel = ScriptedChannel::default();
        let mut session = Session::new(channel);
        let err = session.exec_query(Opcode::ReadFlashInfo, 512).unwrap_err();
        assert!(matches!(err, Error::Transport(TransportError::Closed)));
    }

    #[test]
    fn test_opcode_bytes_on_the_wire() {
        // flag, lun, cdb length, command code
        let expected: [(Opcode, [u8; 4]); 12] = [
            (Opcode::TestUnitReady, [0x80, 0x00, 0x06, 0x00]),
            (Opcode::ReadFlashId, [0x80, 0x00, 0x06, 0x01]),
            (Opcode::ReadFlashInfo, [0x80, 0x00, 0x06, 0x1A]),
            (Opcode::ReadChipInfo, [0x80, 0x00, 0x06, 0x1B]),
            (Opcode::ResetDevice, [0x00, 0x00, 0x06, 0xFF]),
            (Opcode::ReadSector, [0x80, 0x00, 0x0A, 0x04]),
            (Opcode::WriteSector, [0x00, 0x00, 0x0A, 0x05]),
            (Opcode::ReadLba, [0x80, 0x00, 0x0A, 0x14]),
            (Opcode::WriteLba, [0x00, 0x00, 0x0A, 0x15]),
            (Opcode::ReadSdram, [0x80, 0x00, 0x0A, 0x17]),
            (Opcode::WriteSdram, [0x00, 0x00, 0x0A, 0x18]),
            (Opcode::ExecuteSdram, [0x00, 0x00, 0x0A, 0x19]),
        ];
        for (opcode, bytes) in expected {
            let data = CommandPacket::with_tag(1, opcode, 0x40, 0x20).encode();
            assert_eq!(&data[12..16], &bytes, "{opcode:?}");
            assert_eq!(data[15], opcode.code(), "{opcode:?}");
            assert_eq!(data[16], 0, "{opcode:?}");
        }
    }

    #[test]
    fn test_reset_mode_follows_command_code() {
        let data = CommandPacket::with_tag(1, Opcode::ResetDevice, 0, 0)
            .with_subcode(ResetMode::Maskrom as u8)
            .encode();
        assert_eq!(&data[12..17], &[0x00, 0x00, 0x06, 0xFF, 0x03]);
    }
}
