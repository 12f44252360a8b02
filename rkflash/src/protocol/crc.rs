//! Rockchip CRC variants.
//!
//! Both checksums are bit-serial and MSB-first, with the next input byte
//! folded into the top of the register. They take a seed so long inputs can
//! be checksummed chunk by chunk.
//!
//! | Variant | Polynomial   | Trailer byte order |
//! |---------|--------------|--------------------|
//! | CRC16   | `0x1021`     | big-endian         |
//! | CRC32   | `0x04C10DB7` | little-endian      |

/// CRC16 polynomial.
pub const CRC16_POLY: u16 = 0x1021;

/// CRC32 polynomial.
pub const CRC32_POLY: u32 = 0x04C1_0DB7;

/// Seed used for boot-stage upload trailers.
pub const CRC16_BOOT_SEED: u16 = 0xFFFF;

/// Calculate the Rockchip CRC16 of `data`, continuing from `seed`.
pub fn crc16(seed: u16, data: &[u8]) -> u16 {
    let mut crc = seed;
    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ CRC16_POLY
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Calculate the Rockchip CRC32 of `data`, continuing from `seed`.
pub fn crc32(seed: u32, data: &[u8]) -> u32 {
    let mut crc = seed;
    for &byte in data {
        crc ^= u32::from(byte) << 24;
        for _ in 0..8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ CRC32_POLY
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Copy `data` and append its CRC16 (seeded with `0xFFFF`) big-endian.
///
/// This is the framing used for DDR-init and loader uploads.
pub fn append_crc16_be(data: &[u8]) -> Vec<u8> {
    let crc = crc16(CRC16_BOOT_SEED, data);
    let mut out = Vec::with_capacity(data.len() + 2);
    out.extend_from_slice(data);
    out.extend_from_slice(&crc.to_be_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_known_value() {
        // CRC-16/CCITT-FALSE check value
        assert_eq!(crc16(0xFFFF, b"123456789"), 0x29B1);
        // CRC-16/XMODEM check value
        assert_eq!(crc16(0, b"123456789"), 0x31C3);
    }

    #[test]
    fn test_crc32_empty_is_seed() {
        assert_eq!(crc32(0, &[]), 0);
        assert_eq!(crc32(0x1234_5678, &[]), 0x1234_5678);
    }

    #[test]
    fn test_crc32_single_byte() {
        // 0x80 << 24 shifts out once on the first step, leaving the polynomial
        // to be shifted through the remaining seven steps.
        let mut expected: u32 = CRC32_POLY;
        for _ in 0..7 {
            expected = if expected & 0x8000_0000 != 0 {
                (expected << 1) ^ CRC32_POLY
            } else {
                expected << 1
            };
        }
        assert_eq!(crc32(0, &[0x80]), expected);
    }

    #[test]
    fn test_crc_split_invariance() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let whole16 = crc16(0xFFFF, &data);
        let whole32 = crc32(0, &data);
        for split in [0, 1, 7, 512, 999, 1000] {
            let (a, b) = data.split_at(split);
            assert_eq!(crc16(crc16(0xFFFF, a), b), whole16, "crc16 split {split}");
            assert_eq!(crc32(crc32(0, a), b), whole32, "crc32 split {split}");
        }
    }

    #[test]
    fn test_append_crc16_big_endian() {
        let framed = append_crc16_be(b"123456789");
        assert_eq!(framed.len(), 11);
        assert_eq!(&framed[9..], &[0x29, 0xB1]);
    }
}
