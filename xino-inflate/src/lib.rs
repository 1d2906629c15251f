//! # xino-inflate
//!
//! Minimal, position-independent GZIP/DEFLATE decoder (RFC 1951 /
//! RFC 1952) for decompressing the µkernel payload inside the UEFI stub.
//!
//! One-shot, no allocation, no state kept between calls: the stub hands
//! in the framed source buffer and an output buffer sized from the
//! trailing ISIZE field, and gets back the decompressed length after the
//! CRC32 and ISIZE post-checks have passed.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

mod crc32;
mod deflate;

pub use crc32::crc32;
pub use deflate::{inflate, InflateError};

use core::fmt;

/// GZIP-level failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use = "decompression errors must be handled"]
pub enum GzipError {
    /// Malformed framing: bad signature, method, reserved flag bits,
    /// truncated optional fields, or header-CRC mismatch.
    Invalid,
    /// The DEFLATE payload failed to decode, or the CRC32/ISIZE trailer
    /// does not match the decompressed data.
    Io,
}

impl fmt::Display for GzipError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid => write!(f, "invalid gzip framing"),
            Self::Io => write!(f, "gzip payload corrupt"),
        }
    }
}

// FLG bits (RFC 1952 section 2.3.1).
const F_HCRC: u8 = 1 << 1;
const F_EXTRA: u8 = 1 << 2;
const F_NAME: u8 = 1 << 3;
const F_COMMENT: u8 = 1 << 4;

fn le16(b: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_le_bytes([*b.get(at)?, *b.get(at + 1)?]))
}

fn le32(b: &[u8], at: usize) -> Option<u32> {
    Some(u32::from_le_bytes([
        *b.get(at)?,
        *b.get(at + 1)?,
        *b.get(at + 2)?,
        *b.get(at + 3)?,
    ]))
}

/// Uncompressed size recorded in the GZIP trailer (ISIZE, modulo 2^32).
///
/// The stub uses this to size the output buffer before calling
/// [`gzip_decompress`]. Returns `None` for anything shorter than the
/// smallest legal GZIP stream.
#[must_use]
pub fn gzip_isize(source: &[u8]) -> Option<u32> {
    if source.len() < 18 {
        return None;
    }
    le32(source, source.len() - 4)
}

/// Decompress a GZIP-framed buffer into `dest`.
///
/// Parses the header (honoring FEXTRA/FNAME/FCOMMENT/FHCRC), inflates
/// the DEFLATE payload, and verifies the ISIZE and CRC32 trailer against
/// the produced bytes. The first error aborts; nothing is recovered.
///
/// Returns the number of bytes written to `dest`.
pub fn gzip_decompress(dest: &mut [u8], source: &[u8]) -> Result<usize, GzipError> {
    // 18 bytes is the size of an empty compressed file.
    if source.len() < 18
        || source[0] != 0x1f // ID1
        || source[1] != 0x8b // ID2
        || source[2] != 0x08 // DEFLATE compression method
        || source[3] & 0xe0 != 0
    // reserved FLG bits must be zero
    {
        return Err(GzipError::Invalid);
    }

    let flag = source[3];
    let end = source.len();
    let mut start = 10usize;

    if flag & F_EXTRA != 0 {
        let xlen = le16(source, start).ok_or(GzipError::Invalid)? as usize;
        start += xlen + 2;
        if start > end {
            return Err(GzipError::Invalid);
        }
    }

    if flag & F_NAME != 0 {
        start = skip_nul_terminated(source, start).ok_or(GzipError::Invalid)?;
    }

    if flag & F_COMMENT != 0 {
        start = skip_nul_terminated(source, start).ok_or(GzipError::Invalid)?;
    }

    if flag & F_HCRC != 0 {
        let stored = le16(source, start).ok_or(GzipError::Invalid)?;
        // Header CRC16 is the low half of the CRC32 over the header.
        let expect = (crc32(&source[..start]) & 0xffff) as u16;
        if stored != expect {
            return Err(GzipError::Invalid);
        }
        start += 2;
    }

    // DEFLATE payload runs up to the 8-byte CRC32/ISIZE trailer.
    if start + 8 > end {
        return Err(GzipError::Invalid);
    }

    let len = inflate(dest, &source[start..end - 8]).map_err(|_| GzipError::Io)?;

    // ISIZE: decompressed length modulo 2^32.
    if len as u32 != le32(source, end - 4).unwrap_or(0) {
        return Err(GzipError::Io);
    }

    // CRC32 over the decompressed bytes.
    if crc32(&dest[..len]) != le32(source, end - 8).unwrap_or(0) {
        return Err(GzipError::Io);
    }

    Ok(len)
}

/// Advance past a NUL-terminated field starting at `at`.
fn skip_nul_terminated(b: &[u8], at: usize) -> Option<usize> {
    let mut at = at;
    loop {
        let c = *b.get(at)?;
        at += 1;
        if c == 0 {
            return Some(at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Real `gzip` output captured as bytes (mtime zeroed).

    /// Empty payload: the 20-byte minimum GZIP stream.
    const EMPTY: &[u8] = &[
        0x1f, 0x8b, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x03, 0x03, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    ];

    /// "hello", fixed-Huffman block.
    const HELLO: &[u8] = &[
        0x1f, 0x8b, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x03, 0xcb, 0x48,
        0xcd, 0xc9, 0xc9, 0x07, 0x00, 0x86, 0xa6, 0x10, 0x36, 0x05, 0x00, 0x00,
        0x00,
    ];

    /// "hello" again, but with FHCRC set and a valid header CRC16.
    const HELLO_FHCRC: &[u8] = &[
        0x1f, 0x8b, 0x08, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0xa7, 0x77,
        0xcb, 0x48, 0xcd, 0xc9, 0xc9, 0x07, 0x00, 0x86, 0xa6, 0x10, 0x36, 0x05,
        0x00, 0x00, 0x00,
    ];

    /// "named" with an FNAME field ("k.bin").
    const NAMED: &[u8] = &[
        0x1f, 0x8b, 0x08, 0x08, 0x00, 0x00, 0x00, 0x00, 0x02, 0xff, 0x6b, 0x2e,
        0x62, 0x69, 0x6e, 0x00, 0xcb, 0x4b, 0xcc, 0x4d, 0x4d, 0x01, 0x00, 0x87,
        0xcc, 0xe0, 0x71, 0x05, 0x00, 0x00, 0x00,
    ];

    /// "stored-data" as an uncompressed (stored) DEFLATE block.
    const STORED: &[u8] = &[
        0x1f, 0x8b, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x04, 0x03, 0x01, 0x0b,
        0x00, 0xf4, 0xff, 0x73, 0x74, 0x6f, 0x72, 0x65, 0x64, 0x2d, 0x64, 0x61,
        0x74, 0x61, 0xa0, 0x91, 0x47, 0x61, 0x0b, 0x00, 0x00, 0x00,
    ];

    /// `"0;1;2;...;18f;"` (400 hex-numbered fields, 1328 bytes): a
    /// dynamic-Huffman block with plenty of back-references.
    const DYNAMIC: &[u8] = &[
        0x1f, 0x8b, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x03, 0x1d, 0xd4,
        0x87, 0x11, 0xc4, 0x20, 0x00, 0x03, 0xc1, 0x96, 0x10, 0x99, 0xb9, 0x6a,
        0x88, 0xfd, 0x97, 0xf0, 0xf2, 0x17, 0x20, 0x8f, 0x8d, 0x6f, 0x09, 0x88,
        0x48, 0x22, 0x53, 0xa8, 0x34, 0x3a, 0x83, 0xc9, 0x62, 0x73, 0xb8, 0x3c,
        0x14, 0x90, 0x50, 0x44, 0x09, 0x65, 0x54, 0x50, 0x45, 0x0d, 0x75, 0x34,
        0xd0, 0x44, 0x0b, 0x6d, 0x74, 0xd0, 0x45, 0x8f, 0x18, 0x88, 0x7e, 0x62,
        0x24, 0x26, 0x62, 0x26, 0x16, 0x62, 0x25, 0x36, 0x62, 0x27, 0x0e, 0xe2,
        0x24, 0x2e, 0xe2, 0x26, 0x1e, 0xe2, 0x25, 0x3e, 0x52, 0x20, 0x89, 0xe4,
        0x57, 0x48, 0xa4, 0x4c, 0x2a, 0xa4, 0x4a, 0x6a, 0xa4, 0x4e, 0x1a, 0xa4,
        0x49, 0x5a, 0xa4, 0x4d, 0x3a, 0xa4, 0x4b, 0x7a, 0xe4, 0x40, 0x16, 0x39,
        0x92, 0xfd, 0xce, 0x99, 0x5c, 0xc8, 0x95, 0xdc, 0xc8, 0x9d, 0x3c, 0xc8,
        0x93, 0xbc, 0xc8, 0x9b, 0x7c, 0xc8, 0x97, 0xfc, 0x28, 0x81, 0x22, 0x4a,
        0xa4, 0x24, 0x8a, 0x3f, 0xb2, 0x50, 0x2a, 0xa5, 0x51, 0x3a, 0x65, 0x50,
        0x26, 0x65, 0x51, 0x36, 0xe5, 0x50, 0x2e, 0xe5, 0x51, 0x03, 0x55, 0xd4,
        0x48, 0x4d, 0xd4, 0x4c, 0xf5, 0xa9, 0x54, 0x6a, 0xa3, 0x76, 0xea, 0xa0,
        0x4e, 0xea, 0xa2, 0x6e, 0xea, 0xa1, 0x5e, 0xea, 0xa3, 0x05, 0x9a, 0x68,
        0x91, 0x96, 0x68, 0x99, 0x56, 0x68, 0x3e, 0xc6, 0x46, 0xeb, 0xb4, 0x41,
        0x9b, 0xb4, 0x45, 0xdb, 0xb4, 0x43, 0xbb, 0xb4, 0x47, 0x0f, 0x74, 0xd1,
        0x23, 0x3d, 0xd1, 0x33, 0xbd, 0xd0, 0x2b, 0xdd, 0xe7, 0xde, 0xe9, 0x83,
        0x3e, 0xe9, 0x8b, 0xbe, 0xe9, 0x87, 0x7e, 0xe9, 0x8f, 0x11, 0x18, 0x62,
        0x44, 0x46, 0x62, 0x64, 0x46, 0x61, 0x54, 0x46, 0x63, 0xf8, 0x47, 0x0d,
        0xc6, 0x64, 0x2c, 0xc6, 0x66, 0x1c, 0xc6, 0x65, 0x3c, 0x66, 0x60, 0x8a,
        0x19, 0x99, 0x89, 0x99, 0x99, 0x85, 0x59, 0x99, 0x8d, 0xd9, 0x99, 0xfe,
        0xb3, 0x93, 0xb9, 0x98, 0x9b, 0x79, 0x98, 0x97, 0xf9, 0x58, 0x81, 0x25,
        0x56, 0x64, 0x25, 0x56, 0x66, 0x15, 0x56, 0x65, 0x35, 0x56, 0x67, 0x0d,
        0x96, 0x53, 0x58, 0xac, 0xcd, 0x3a, 0xac, 0xcb, 0x7a, 0xec, 0xc0, 0x16,
        0x3b, 0xb2, 0x13, 0x3b, 0xb3, 0x0b, 0xbb, 0xb2, 0x1b, 0xbb, 0xb3, 0x07,
        0x7b, 0xb2, 0xdd, 0xce, 0x66, 0x1f, 0xf6, 0x65, 0x3f, 0x4e, 0xe0, 0x88,
        0x13, 0x39, 0x89, 0x93, 0x39, 0x85, 0x53, 0x39, 0x8d, 0xd3, 0x39, 0x83,
        0x33, 0x39, 0x8b, 0xe3, 0xd8, 0x0e, 0xe7, 0x72, 0x1e, 0x37, 0x70, 0xc5,
        0x8d, 0xdc, 0xc4, 0xcd, 0xdc, 0xc2, 0xad, 0xdc, 0xc6, 0xed, 0xdc, 0xc1,
        0x9d, 0xdc, 0xc5, 0xdd, 0x5c, 0xd7, 0x79, 0xb9, 0x8f, 0x17, 0x78, 0xe2,
        0x45, 0x5e, 0xe2, 0x65, 0x5e, 0xe1, 0x55, 0x5e, 0xe3, 0x75, 0xde, 0xe0,
        0x4d, 0xde, 0xe2, 0x6d, 0xde, 0xe1, 0x39, 0xe7, 0xaf, 0x67, 0x07, 0x1d,
        0x5c, 0x74, 0x70, 0xd2, 0xc1, 0x4d, 0x07, 0x47, 0x1d, 0x5c, 0x75, 0x70,
        0xd6, 0xc1, 0x5d, 0x07, 0x87, 0x1d, 0x5c, 0x76, 0x70, 0xda, 0xc1, 0x6d,
        0x07, 0xc7, 0x1d, 0x5c, 0x77, 0x70, 0xde, 0xc1, 0xfb, 0x3f, 0x08, 0xef,
        0x3f, 0x12, 0x9f, 0x89, 0x0f, 0xc5, 0xa7, 0xe2, 0x63, 0xf1, 0xb9, 0xf8,
        0x60, 0x7c, 0x32, 0x3e, 0x1a, 0x9f, 0x8d, 0x0f, 0xc7, 0xa7, 0xe3, 0xe3,
        0x61, 0x1f, 0x32, 0x10, 0xc5, 0x4f, 0x94, 0xf7, 0x36, 0x22, 0x23, 0x91,
        0x95, 0xc8, 0x4c, 0x64, 0x27, 0x32, 0x14, 0x59, 0x8a, 0x4c, 0x45, 0xb6,
        0x22, 0x63, 0x91, 0xb5, 0xc8, 0x5c, 0x64, 0x2f, 0x32, 0x18, 0x59, 0x8c,
        0xd2, 0x47, 0xd2, 0x7b, 0xa3, 0x91, 0xd5, 0xc8, 0x6c, 0x64, 0x37, 0x32,
        0x1c, 0x59, 0x8e, 0x4c, 0x47, 0xb6, 0x23, 0xe3, 0x91, 0xf5, 0xc8, 0x7c,
        0x64, 0x3f, 0x32, 0x20, 0x59, 0x90, 0x4c, 0x48, 0xf9, 0x33, 0xed, 0xbd,
        0x15, 0xc9, 0x8c, 0x64, 0x47, 0x32, 0x24, 0x59, 0x92, 0x4c, 0x49, 0xb6,
        0x24, 0x63, 0x92, 0x35, 0xc9, 0x9c, 0x64, 0x4f, 0x32, 0x28, 0x59, 0x94,
        0x4c, 0x4a, 0x36, 0xa5, 0xf2, 0x5d, 0x0a, 0xde, 0x9b, 0x95, 0xec, 0x4a,
        0x86, 0x25, 0xcb, 0x92, 0x69, 0xc9, 0xb6, 0x64, 0x5c, 0xb2, 0x2e, 0x99,
        0x97, 0xec, 0x4b, 0x06, 0x26, 0x0b, 0x93, 0x89, 0xc9, 0xc6, 0x64, 0x64,
        0xaa, 0xdf, 0xad, 0xe2, 0xbd, 0x9d, 0xc9, 0xd0, 0x64, 0x69, 0x32, 0x35,
        0xd9, 0x9a, 0x8c, 0x4d, 0xd6, 0x26, 0x73, 0x93, 0xbd, 0xc9, 0xe0, 0x64,
        0x71, 0x32, 0x39, 0xd9, 0x9c, 0x8c, 0x4e, 0x56, 0xa7, 0xf6, 0x5d, 0x4b,
        0xde, 0x1b, 0x9e, 0x2c, 0x4f, 0xa6, 0x27, 0xdb, 0x93, 0xf1, 0xc9, 0xfa,
        0x64, 0x7e, 0xb2, 0x3f, 0x19, 0xa0, 0x2c, 0x50, 0x26, 0x28, 0x1b, 0x94,
        0x11, 0xca, 0x0a, 0x65, 0x86, 0xea, 0xdf, 0xbd, 0xe6, 0xbd, 0x25, 0xca,
        0x14, 0x65, 0x8b, 0x32, 0x46, 0x59, 0xa3, 0xcc, 0x51, 0xf6, 0xf8, 0x03,
        0x5c, 0xf2, 0x13, 0xa8, 0x30, 0x05, 0x00, 0x00,
    ];

    #[test]
    fn empty_stream_decompresses_to_nothing() {
        let mut out = [0u8; 4];
        assert_eq!(gzip_decompress(&mut out, EMPTY), Ok(0));
    }

    #[test]
    fn fixed_huffman_hello() {
        let mut out = [0u8; 16];
        let n = gzip_decompress(&mut out, HELLO).unwrap();
        assert_eq!(&out[..n], b"hello");
    }

    #[test]
    fn header_crc_is_verified() {
        let mut out = [0u8; 16];
        let n = gzip_decompress(&mut out, HELLO_FHCRC).unwrap();
        assert_eq!(&out[..n], b"hello");

        // Flip one header byte: the stored CRC16 no longer matches.
        let mut bad = HELLO_FHCRC.to_vec();
        bad[8] = 0x04;
        assert_eq!(gzip_decompress(&mut out, &bad), Err(GzipError::Invalid));
    }

    #[test]
    fn fname_field_is_skipped() {
        let mut out = [0u8; 16];
        let n = gzip_decompress(&mut out, NAMED).unwrap();
        assert_eq!(&out[..n], b"named");
    }

    #[test]
    fn stored_block() {
        let mut out = [0u8; 32];
        let n = gzip_decompress(&mut out, STORED).unwrap();
        assert_eq!(&out[..n], b"stored-data");
    }

    #[test]
    fn dynamic_huffman_with_backrefs() {
        let expect: String = (0..400).map(|i| format!("{i:x};")).collect();
        let mut out = vec![0u8; expect.len()];
        let n = gzip_decompress(&mut out, DYNAMIC).unwrap();
        assert_eq!(&out[..n], expect.as_bytes());
    }

    #[test]
    fn framing_errors() {
        let mut out = [0u8; 8];
        // too short
        assert_eq!(
            gzip_decompress(&mut out, &EMPTY[..17]),
            Err(GzipError::Invalid)
        );
        // bad signature
        let mut bad = EMPTY.to_vec();
        bad[0] = 0x1e;
        assert_eq!(gzip_decompress(&mut out, &bad), Err(GzipError::Invalid));
        // not DEFLATE
        let mut bad = EMPTY.to_vec();
        bad[2] = 0x07;
        assert_eq!(gzip_decompress(&mut out, &bad), Err(GzipError::Invalid));
        // reserved flag bits
        let mut bad = EMPTY.to_vec();
        bad[3] = 0x20;
        assert_eq!(gzip_decompress(&mut out, &bad), Err(GzipError::Invalid));
    }

    #[test]
    fn trailer_mismatch_is_io() {
        let mut out = [0u8; 16];
        // corrupt ISIZE
        let mut bad = HELLO.to_vec();
        let at = bad.len() - 4;
        bad[at] ^= 1;
        assert_eq!(gzip_decompress(&mut out, &bad), Err(GzipError::Io));
        // corrupt CRC32
        let mut bad = HELLO.to_vec();
        let at = bad.len() - 8;
        bad[at] ^= 1;
        assert_eq!(gzip_decompress(&mut out, &bad), Err(GzipError::Io));
    }

    #[test]
    fn isize_helper() {
        assert_eq!(gzip_isize(EMPTY), Some(0));
        assert_eq!(gzip_isize(HELLO), Some(5));
        assert_eq!(gzip_isize(&HELLO[..10]), None);
    }
}
