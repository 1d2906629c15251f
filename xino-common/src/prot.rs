//! Abstract mapping protections
//!
//! [`Prot`] is the architecture-neutral input to the page-table descriptor
//! encoders; the paging crate turns it into concrete AArch64 PTE bits.

use core::fmt;
use core::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not};

/// Bitmask of abstract mapping protections/attributes.
///
/// Bits outside the supported set are masked off on construction, so a
/// `Prot` can never carry a flag the encoders do not understand.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Prot(u16);

impl Prot {
    pub const NONE: Self = Self(0);
    pub const READ: Self = Self(0x1);
    pub const WRITE: Self = Self(0x2);
    pub const EXECUTE: Self = Self(0x4);
    /// EL2-only mapping (not accessible from EL0).
    pub const KERNEL: Self = Self(0x8);
    /// Device memory attributes.
    pub const DEVICE: Self = Self(0x10);
    /// Inner-shareable mapping.
    pub const SHARED: Self = Self(0x20);

    /// All bits the encoders understand.
    const SUPPORTED: u16 = 0x3f;

    // Derived combinations.
    pub const RW: Self = Self(Self::READ.0 | Self::WRITE.0);
    pub const RWX: Self = Self(Self::RW.0 | Self::EXECUTE.0);
    pub const KERNEL_RW: Self = Self(Self::KERNEL.0 | Self::RW.0 | Self::SHARED.0);
    pub const KERNEL_RWX: Self = Self(Self::KERNEL_RW.0 | Self::EXECUTE.0);

    /// Construct from a raw mask; unsupported bits are dropped.
    #[inline]
    #[must_use]
    pub const fn from_raw(mask: u16) -> Self {
        Self(mask & Self::SUPPORTED)
    }

    /// Return the raw bitmask.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Test if any bit in `flag` is set.
    #[inline]
    #[must_use]
    pub const fn has(self, flag: Self) -> bool {
        self.0 & flag.0 != 0
    }
}

impl BitOr for Prot {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Prot {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Prot {
    type Output = Self;

    #[inline]
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl BitAndAssign for Prot {
    #[inline]
    fn bitand_assign(&mut self, rhs: Self) {
        self.0 &= rhs.0;
    }
}

impl Not for Prot {
    type Output = Self;

    #[inline]
    fn not(self) -> Self {
        Self(!self.0 & Self::SUPPORTED)
    }
}

impl fmt::Debug for Prot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        let mut put = |f: &mut fmt::Formatter<'_>, name| {
            if !first {
                write!(f, "|")?;
            }
            first = false;
            write!(f, "{}", name)
        };
        if self.has(Self::READ) {
            put(f, "R")?;
        }
        if self.has(Self::WRITE) {
            put(f, "W")?;
        }
        if self.has(Self::EXECUTE) {
            put(f, "X")?;
        }
        if self.has(Self::KERNEL) {
            put(f, "K")?;
        }
        if self.has(Self::DEVICE) {
            put(f, "D")?;
        }
        if self.has(Self::SHARED) {
            put(f, "S")?;
        }
        if first {
            write!(f, "NONE")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_bits_masked() {
        let p = Prot::from_raw(0xffff);
        assert_eq!(p.raw(), 0x3f);
    }

    #[test]
    fn closed_under_bitops() {
        let p = Prot::KERNEL_RW | Prot::EXECUTE;
        assert_eq!(p, Prot::KERNEL_RWX);
        assert!(!(!p).has(Prot::WRITE));
        assert_eq!((p & Prot::WRITE), Prot::WRITE);
        assert_eq!((!Prot::NONE).raw(), 0x3f);
    }

    #[test]
    fn derived_combinations() {
        assert!(Prot::KERNEL_RW.has(Prot::KERNEL));
        assert!(Prot::KERNEL_RW.has(Prot::SHARED));
        assert!(!Prot::KERNEL_RW.has(Prot::EXECUTE));
        assert!(Prot::RWX.has(Prot::EXECUTE));
    }
}
