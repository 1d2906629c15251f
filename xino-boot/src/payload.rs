//! Embedded payload discovery
//!
//! The build concatenates the gzip-compressed µkernel image after the
//! stub and brackets it with linker symbols; the uncompressed size is
//! stored as an *unaligned* 32-bit little-endian word (the linker
//! places it with no alignment guarantee, so it must be read as such).

use core::ptr::addr_of;

extern "C" {
    static __efistub__gzdata_start: u8;
    static __efistub__gzdata_end: u8;
    static __efistub_payload_size: u8;
}

/// The compressed payload bytes.
#[must_use]
pub fn gzdata() -> &'static [u8] {
    // SAFETY: the linker script guarantees
    // `__efistub__gzdata_start <= __efistub__gzdata_end` and that the
    // span is mapped as part of the loaded image.
    unsafe {
        let start = addr_of!(__efistub__gzdata_start);
        let end = addr_of!(__efistub__gzdata_end);
        core::slice::from_raw_parts(start, end.offset_from(start) as usize)
    }
}

/// Uncompressed image size recorded at build time.
#[must_use]
pub fn image_size() -> usize {
    // SAFETY: the symbol names a 4-byte field inside the image; the
    // unaligned read is the point.
    unsafe { addr_of!(__efistub_payload_size).cast::<u32>().read_unaligned() as usize }
}
