//! # xino-paging
//!
//! Stage-parameterized AArch64 translation-table engine (VMSAv8-64).
//!
//! - [`geometry`]: walk geometry as functions of the input-address width
//! - [`pte`]: descriptor encoding for stage-1 and stage-2
//! - [`stage`]: the [`stage::TranslationStage`] tag types and their
//!   input-address forms
//! - [`table`]: the [`table::PageTable`] builder with
//!   `map_range` / `protect_range` / `unmap_range`
//! - [`tlb`]: inner-shareable TLB invalidation, bulk and by range
//!
//! Supported configurations:
//! - 4 KiB granule, 39-bit IA, root at hardware level 1
//! - 16 KiB granule, 36-bit IA, root at hardware level 2
//! - output addresses capped at 48 bits
//!
//! # Translation policy latch
//!
//! The engine walks its own tables through [`xino_common::layout`], so it
//! must know whether the MMU is on. That state is a process-wide one-way
//! latch ([`enable_translation`]) rather than a per-call argument: the
//! break-before-make policy and the PA→VA policy must flip together, at
//! exactly one point of the boot, and never silently within a phase.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

use core::sync::atomic::{AtomicBool, Ordering};

pub mod geometry;
pub mod pte;
pub mod stage;
pub mod table;
pub mod tlb;

pub use pte::Pte;
pub use stage::{Stage1, Stage1Addr, Stage2, TranslationStage};
pub use table::{PageAllocator, PageTable};

use xino_common::config::{PAGE_SHIFT, PAGE_SIZE, VA_BITS};

// The supported granule/IA combinations put the stage-1 root at
// hardware level 1 (4 KiB) or 2 (16 KiB).
const _: () = assert!(PAGE_SHIFT == 12 || PAGE_SHIFT == 14);
const _: () = assert!(geometry::levels_for_bits(VA_BITS) >= 1);
const _: () = assert!(PAGE_SIZE == 1 << PAGE_SHIFT);

static TRANSLATION_ENABLED: AtomicBool = AtomicBool::new(false);

/// Flip the translation latch. Called exactly once, right after the MMU
/// is enabled; there is no way back.
pub fn enable_translation() {
    TRANSLATION_ENABLED.store(true, Ordering::Release);
}

/// Is the MMU (and with it the direct map and BBM policy) live?
#[inline]
#[must_use]
pub fn translation_enabled() -> bool {
    TRANSLATION_ENABLED.load(Ordering::Acquire)
}
