//! Flasher behaviour against the in-memory bootloader.

use std::io::{self, Read, Write};

use rkflash::error::{Error, FormatError, ProtocolError, SyntaxError};
use rkflash::flasher::params::{self, MAX_PARAM_LENGTH};
use rkflash::{DummyConfig, DummyDevice, Flasher, Opcode, Region, TransferRequest};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn flasher() -> Flasher<DummyDevice> {
    init_logger();
    Flasher::new(DummyDevice::new_default())
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn flash_write_then_read_back() {
    let mut flasher = flasher();
    let data = pattern(100 * 512);

    let req = TransferRequest::new(Region::Flash, 0x40, 100).unwrap();
    let summary = flasher
        .write_region(&req, &mut data.as_slice(), |_, _| {})
        .unwrap();
    assert_eq!(summary.units, 100);
    assert_eq!(summary.bytes, data.len() as u64);
    assert!(!summary.truncated);

    let mut out = Vec::new();
    let bytes = flasher.read_region(&req, &mut out, |_, _| {}).unwrap();
    assert_eq!(bytes, data.len() as u64);
    assert_eq!(out, data);

    let writes = flasher.channel().commands_with(Opcode::WriteLba);
    let counts: Vec<u16> = writes.iter().map(|c| c.count).collect();
    assert_eq!(counts, [32, 32, 32, 4]);
    assert_eq!(writes[3].offset, 0x40 + 96);
}

#[test]
fn progress_reports_every_chunk() {
    let mut flasher = flasher();
    let req = TransferRequest::new(Region::Flash, 0, 70).unwrap();
    let mut seen = Vec::new();
    flasher
        .read_region(&req, &mut io::sink(), |done, total| seen.push((done, total)))
        .unwrap();
    assert_eq!(seen, [(32, 70), (64, 70), (70, 70)]);
}

#[test]
fn short_source_pads_flash_and_stops() {
    let mut flasher = flasher();
    let data = vec![0x5A; 40 * 512 + 100];

    let req = TransferRequest::new(Region::Flash, 0, 128).unwrap();
    let summary = flasher
        .write_region(&req, &mut data.as_slice(), |_, _| {})
        .unwrap();
    assert!(summary.truncated);
    assert_eq!(summary.bytes, data.len() as u64);
    assert_eq!(summary.units, 64);

    let writes = flasher.channel().commands_with(Opcode::WriteLba);
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[1].count, 32);

    let flash = flasher.channel().flash();
    assert_eq!(&flash[..data.len()], &data[..]);
    assert!(flash[data.len()..64 * 512].iter().all(|&b| b == 0));
    assert!(flash[64 * 512..65 * 512].iter().all(|&b| b == 0xFF));
}

#[test]
fn empty_source_writes_nothing() {
    let mut flasher = flasher();
    let req = TransferRequest::new(Region::Flash, 0, 32).unwrap();
    let summary = flasher
        .write_region(&req, &mut io::empty(), |_, _| {})
        .unwrap();
    assert!(summary.truncated);
    assert_eq!(summary.units, 0);
    assert!(flasher.channel().commands().is_empty());
}

#[test]
fn short_sdram_write_is_exact() {
    let mut flasher = flasher();
    let base = flasher.channel().config().sdram_base;
    let data = pattern(0x4000 + 10);

    let req = TransferRequest::new(Region::Sdram, base, 0x8000).unwrap();
    let summary = flasher
        .write_region(&req, &mut data.as_slice(), |_, _| {})
        .unwrap();
    assert!(summary.truncated);
    assert_eq!(summary.units, 0x4000 + 10);

    let writes = flasher.channel().commands_with(Opcode::WriteSdram);
    assert_eq!(writes[1].count, 10);
    assert_eq!(&flasher.channel().sdram()[..data.len()], &data[..]);
}

#[test]
fn sdram_read_back_and_execute() {
    let mut flasher = flasher();
    let base = flasher.channel().config().sdram_base;
    let data = pattern(300);

    let req = TransferRequest::new(Region::Sdram, base + 0x100, 300).unwrap();
    flasher
        .write_region(&req, &mut data.as_slice(), |_, _| {})
        .unwrap();
    let mut out = Vec::new();
    flasher.read_region(&req, &mut out, |_, _| {}).unwrap();
    assert_eq!(out, data);

    flasher.execute_sdram(base + 0x100).unwrap();
    assert_eq!(flasher.channel().executed(), &[base + 0x100]);
}

#[test]
fn idb_blocks_use_sector_opcodes() {
    let mut flasher = flasher();
    let data = pattern(0x210 * 0x21);

    let req = TransferRequest::new(Region::Idb, 0, 0x21).unwrap();
    flasher
        .write_region(&req, &mut data.as_slice(), |_, _| {})
        .unwrap();
    assert_eq!(&flasher.channel().idb()[..data.len()], &data[..]);

    let writes = flasher.channel().commands_with(Opcode::WriteSector);
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[0].count, 0x20);
    assert_eq!(writes[1].offset, 0x20);

    let mut out = Vec::new();
    flasher.read_region(&req, &mut out, |_, _| {}).unwrap();
    assert_eq!(out, data);
}

#[test]
fn erase_fills_with_ff() {
    let mut flasher = flasher();
    flasher.channel_mut().flash_mut()[..0x8000].fill(0);

    let req = TransferRequest::new(Region::Flash, 8, 40).unwrap();
    let summary = flasher.erase_region(&req, |_, _| {}).unwrap();
    assert_eq!(summary.units, 40);

    let flash = flasher.channel().flash();
    assert!(flash[..8 * 512].iter().all(|&b| b == 0));
    assert!(flash[8 * 512..48 * 512].iter().all(|&b| b == 0xFF));
    assert!(flash[48 * 512..0x8000].iter().all(|&b| b == 0));
}

#[test]
fn params_roundtrip_with_nuls() {
    let mut flasher = flasher();
    let payload = b"FIRMWARE_VER:4.4\0\0CMDLINE:mtdparts=rk29xxnand:0x2000@0x2000(misc)\0";
    flasher.write_params(payload).unwrap();
    assert_eq!(flasher.read_params().unwrap(), payload);

    let writes = flasher.channel().commands_with(Opcode::WriteLba);
    let offsets: Vec<u32> = writes.iter().map(|c| c.offset).collect();
    assert_eq!(
        offsets,
        [0x0000, 0x0400, 0x0800, 0x0C00, 0x1000, 0x1400, 0x1800, 0x1C00]
    );
}

#[test]
fn params_roundtrip_max_length() {
    let mut flasher = flasher();
    let payload = pattern(MAX_PARAM_LENGTH);
    flasher.write_params(&payload).unwrap();
    assert_eq!(flasher.read_params().unwrap(), payload);
    assert!(flasher.write_params(&pattern(MAX_PARAM_LENGTH + 1)).is_err());
}

#[test]
fn params_crc_and_length_checks() {
    let mut flasher = flasher();
    flasher.write_params(b"mtdparts=nand:-(all)").unwrap();
    flasher.channel_mut().flash_mut()[9] ^= 0xFF;

    assert!(matches!(
        flasher.read_params(),
        Err(Error::Format(FormatError::CrcMismatch { .. }))
    ));
    assert!(flasher.read_params_unchecked().is_ok());

    flasher.channel_mut().flash_mut()[4..8].copy_from_slice(&u32::MAX.to_le_bytes());
    let err = flasher.read_params().unwrap_err();
    assert!(err.to_string().contains("Bad parameter length"));
}

#[test]
fn partition_lookup_through_device() {
    let mut flasher = flasher();
    flasher
        .write_params(
            concat!(
                "CMDLINE:console=ttyS2 ",
                "mtdparts=nand:0x2000@0x4000(boot),0x1000@0x6000(system),-(userdata) rootwait",
            )
            .as_bytes(),
        )
        .unwrap();

    let system = flasher.partition("system").unwrap();
    assert_eq!((system.offset, system.size), (0x6000, 0x1000));
    assert!(flasher.channel().commands_with(Opcode::ReadFlashInfo).is_empty());

    let total = flasher.channel().config().flash_sectors;
    let userdata = flasher.partition("userdata").unwrap();
    assert_eq!(userdata.offset, 0x6000);
    assert_eq!(userdata.size, total - 0x6000);
    assert_eq!(flasher.channel().commands_with(Opcode::ReadFlashInfo).len(), 1);

    let err = flasher.partition("cache").unwrap_err();
    assert!(err.is_soft());
    assert!(matches!(
        err,
        Error::Syntax(SyntaxError::PartitionNotFound(_))
    ));
}

#[test]
fn partition_read_write_erase() {
    let mut flasher = flasher();
    flasher
        .write_params(b"mtdparts=nand:0x40@0x2000(boot),-@0x2040(user)")
        .unwrap();

    let image = pattern(0x40 * 512);
    let summary = flasher
        .write_partition("boot", &mut image.as_slice(), |_, _| {})
        .unwrap();
    assert_eq!(summary.units, 0x40);

    let mut out = Vec::new();
    flasher.read_partition("boot", &mut out, |_, _| {}).unwrap();
    assert_eq!(out, image);

    flasher.erase_partition("boot", |_, _| {}).unwrap();
    let flash = flasher.channel().flash();
    assert!(flash[0x2000 * 512..0x2040 * 512].iter().all(|&b| b == 0xFF));
}

#[test]
fn missing_mtdparts_is_soft() {
    let mut flasher = flasher();
    flasher.write_params(b"CMDLINE:console=ttyS2").unwrap();
    let err = flasher.partition("boot").unwrap_err();
    assert!(err.is_soft());
    assert!(matches!(err, Error::Syntax(SyntaxError::MissingMtdparts)));
}

#[test]
fn corrupt_status_is_fatal() {
    let mut flasher = flasher();
    flasher.channel_mut().set_corrupt_status(true);
    let err = flasher.test_unit_ready().unwrap_err();
    assert!(!err.is_soft());
    assert!(matches!(
        err,
        Error::Protocol(ProtocolError::StatusFailed {
            expected: 13,
            actual: 12,
            ..
        })
    ));
}

#[test]
fn read_past_end_is_short_payload() {
    init_logger();
    let config = DummyConfig {
        flash_sectors: 64,
        ..DummyConfig::default()
    };
    let mut flasher = Flasher::new(DummyDevice::new(config));
    let req = TransferRequest::new(Region::Flash, 48, 32).unwrap();
    let mut out = Vec::new();
    assert!(matches!(
        flasher.read_region(&req, &mut out, |_, _| {}),
        Err(Error::Protocol(ProtocolError::ShortPayload { .. }))
    ));
}

#[test]
fn failing_source_is_io_error() {
    struct Broken;
    impl Read for Broken {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("disk on fire"))
        }
    }

    let mut flasher = flasher();
    let req = TransferRequest::new(Region::Flash, 0, 32).unwrap();
    assert!(matches!(
        flasher.write_region(&req, &mut Broken, |_, _| {}),
        Err(Error::Io(_))
    ));
}

#[test]
fn failing_sink_stops_read_after_first_chunk() {
    struct DiskFull {
        accepted: usize,
    }
    impl Write for DiskFull {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.accepted > 0 {
                return Err(io::Error::new(io::ErrorKind::StorageFull, "disk full"));
            }
            self.accepted += buf.len();
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    let mut flasher = flasher();
    let req = TransferRequest::new(Region::Flash, 0, 96).unwrap();
    let mut sink = DiskFull { accepted: 0 };
    let mut chunks = 0;
    let err = flasher
        .read_region(&req, &mut sink, |_, _| chunks += 1)
        .unwrap_err();

    assert!(matches!(err, Error::Io(ref e) if e.kind() == io::ErrorKind::StorageFull));
    assert!(!err.is_soft());
    assert_eq!(sink.accepted, 32 * 512);
    // second chunk was read from the device, third never requested
    assert_eq!(flasher.channel().commands_with(Opcode::ReadLba).len(), 2);
    assert_eq!(chunks, 1);
}

#[test]
fn params_block_is_written_verbatim() {
    let mut flasher = flasher();
    flasher.write_params(b"abc").unwrap();
    let block = params::encode(b"abc").unwrap();
    for offset in params::replica_offsets() {
        let start = offset as usize * 512;
        assert_eq!(&flasher.channel().flash()[start..start + block.len()], &block[..]);
    }
}
