//! Walk geometry
//!
//! VMSAv8-64 resolves an input address through up to four lookup levels,
//! numbered by the architecture from the top. With the 4 KiB granule a
//! 39-bit IA starts at hardware level 1 (1 GiB per entry); with the
//! 16 KiB granule a 36-bit IA starts at hardware level 2 (32 MiB per
//! entry). The engine numbers levels *logically* from its root
//! (0 = root), so every helper here comes in hardware- and
//! logical-level form, as functions of the input-address width.

use xino_common::config::PAGE_SHIFT;

/// Bits resolved per table: 9 for 4 KiB granule, 11 for 16 KiB.
#[inline]
#[must_use]
pub const fn index_stride() -> u32 {
    PAGE_SHIFT - 3
}

/// Entries per table page: 512 for 4 KiB granule, 2048 for 16 KiB.
#[inline]
#[must_use]
pub const fn entries_per_table() -> usize {
    1 << index_stride()
}

/// Number of walk levels for an `ia_bits`-wide input address.
///
/// `(ia_bits - 4) / index_stride`, the ARM64_HW_PGTABLE_LEVELS shape.
/// Purely geometric; whether stage-2 can start there also depends on
/// VTCR_EL2 constraints.
#[inline]
#[must_use]
pub const fn levels_for_bits(ia_bits: u32) -> u32 {
    (ia_bits - 4) / index_stride()
}

/// Hardware level number of the root table for `ia_bits`.
#[inline]
#[must_use]
pub const fn root_hw_level_for_bits(ia_bits: u32) -> u32 {
    4 - levels_for_bits(ia_bits)
}

/// Address shift of a hardware level.
#[inline]
#[must_use]
pub const fn hw_level_shift(hw_level: u32) -> u32 {
    index_stride() * (4 - hw_level) + 3
}

/// Address shift of a logical level (0 = root) for `ia_bits`.
#[inline]
#[must_use]
pub const fn level_shift_for_bits(ia_bits: u32, level: u32) -> u32 {
    hw_level_shift(root_hw_level_for_bits(ia_bits) + level)
}

/// Bytes mapped by one leaf at a logical level: the granule at the last
/// level, the block size (1 GiB / 2 MiB for 4 KiB granule) above it.
#[inline]
#[must_use]
pub const fn level_size_for_bits(ia_bits: u32, level: u32) -> usize {
    1 << level_shift_for_bits(ia_bits, level)
}

#[cfg(test)]
#[cfg(not(feature = "granule-16k"))]
mod tests {
    use super::*;

    #[test]
    fn geometry_4k_39bit() {
        assert_eq!(index_stride(), 9);
        assert_eq!(entries_per_table(), 512);
        assert_eq!(levels_for_bits(39), 3);
        assert_eq!(root_hw_level_for_bits(39), 1);
        assert_eq!(level_shift_for_bits(39, 0), 30);
        assert_eq!(level_shift_for_bits(39, 1), 21);
        assert_eq!(level_shift_for_bits(39, 2), 12);
        assert_eq!(level_size_for_bits(39, 0), 1 << 30);
        assert_eq!(level_size_for_bits(39, 1), 2 * 1024 * 1024);
        assert_eq!(level_size_for_bits(39, 2), 4096);
    }

    #[test]
    fn geometry_4k_48bit() {
        assert_eq!(levels_for_bits(48), 4);
        assert_eq!(root_hw_level_for_bits(48), 0);
        assert_eq!(level_shift_for_bits(48, 0), 39);
        assert_eq!(level_size_for_bits(48, 3), 4096);
    }

    #[test]
    fn geometry_small_ipa() {
        // A 30-bit IPA walks two levels starting at hardware level 2.
        assert_eq!(levels_for_bits(30), 2);
        assert_eq!(root_hw_level_for_bits(30), 2);
        assert_eq!(level_size_for_bits(30, 0), 2 * 1024 * 1024);
    }
}
