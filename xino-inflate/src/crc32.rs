//! CRC32 (IEEE 802.3 polynomial), nibble-at-a-time.
//!
//! Sixteen table entries keep the table in a couple of cache lines,
//! which matters more than throughput in the boot stub.

const CRCTAB32: [u32; 16] = [
    0x0000_0000, 0x1db7_1064, 0x3b6e_20c8, 0x26d9_30ac,
    0x76dc_4190, 0x6b6b_51f4, 0x4db2_6158, 0x5005_713c,
    0xedb8_8320, 0xf00f_9344, 0xd6d6_a3e8, 0xcb61_b38c,
    0x9b64_c2b0, 0x86d3_d2d4, 0xa00a_e278, 0xbdbd_f21c,
];

/// CRC32 over `buffer`. An empty buffer yields 0.
#[must_use]
pub fn crc32(buffer: &[u8]) -> u32 {
    if buffer.is_empty() {
        return 0;
    }

    let mut crc: u32 = 0xffff_ffff;
    for &b in buffer {
        crc ^= b as u32;
        crc = CRCTAB32[(crc & 0x0f) as usize] ^ (crc >> 4);
        crc = CRCTAB32[(crc & 0x0f) as usize] ^ (crc >> 4);
    }

    crc ^ 0xffff_ffff
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_values() {
        assert_eq!(crc32(b""), 0);
        // The classic check value for CRC-32/IEEE.
        assert_eq!(crc32(b"123456789"), 0xcbf4_3926);
        assert_eq!(crc32(b"hello"), 0x3610_a686);
    }

    #[test]
    fn sensitive_to_single_bit() {
        assert_ne!(crc32(b"hello"), crc32(b"hellp"));
    }
}
