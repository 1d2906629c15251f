//! Stage-parameterized page-table builder
//!
//! [`PageTable`] owns a translation-table tree for one stage and offers
//! range operations over contiguous input ranges: [`PageTable::map_range`],
//! [`PageTable::protect_range`], [`PageTable::unmap_range`].
//!
//! Mapping picks the largest feasible leaf (block vs page) from the
//! remaining size and alignment; protect and unmap always work at page
//! granularity and split intermediate blocks on the way down. Every
//! visible descriptor change goes through the break-before-make helper,
//! which is a plain store while the MMU is off and the full
//! FAULT / invalidate / install sequence once it is on.
//!
//! Not internally synchronized: concurrent callers on one instance must
//! hold an external lock. Operations are not atomic either; on error a
//! prefix of the range may already have been changed.

use core::marker::PhantomData;
use core::ptr;

use xino_common::config::PAGE_SIZE;
use xino_common::{layout, Error, PhysAddr, Prot, Result};
use xino_mmio::barrier::{dmb_ishst, dsb_ish, dsb_ishst, isb};

use crate::geometry::{entries_per_table, level_shift_for_bits, level_size_for_bits, levels_for_bits};
use crate::pte::{
    attr_field_mask, make_leaf_block_attr, make_leaf_page_attr, make_table, pte_is_block,
    pte_is_fault, pte_is_table_or_page, pte_to_phys, Pte, PTE_TYPE_FAULT,
};
use crate::stage::TranslationStage;
use crate::translation_enabled;

/// Source of page-table pages.
///
/// The engine allocates and frees table pages one at a time (order 0);
/// pages handed out must be writable through the current translation
/// policy ([`xino_common::layout::phys_to_virt`]).
pub trait PageAllocator {
    /// Allocate `2^order` contiguous pages, or `None` when exhausted.
    #[must_use]
    fn alloc_pages(&mut self, order: u32) -> Option<PhysAddr>;

    /// Return pages obtained from [`PageAllocator::alloc_pages`].
    fn free_pages(&mut self, pa: PhysAddr, order: u32);
}

/// Descriptor update kind for the break-before-make helper.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Kind {
    /// FAULT → valid.
    Install,
    /// valid → FAULT.
    Remove,
    /// valid → valid (or table ↔ block).
    Update,
}

/// A stage-1 or stage-2 translation table tree.
///
/// Trivially constructed ([`PageTable::new`] is `const`, root = 0 means
/// uninitialized); [`PageTable::init`] must run exactly once before any
/// mapping operation, and [`PageTable::deinit`] releases every reachable
/// table page without touching TTBR/VTTBR or the TLB.
pub struct PageTable<S: TranslationStage> {
    /// Physical address of the root table; 0 ⇔ uninitialized.
    root_pa: PhysAddr,
    /// Input-address width: VA bits for stage-1, IPA bits for stage-2.
    ia_bits: u32,
    /// Negotiated output-address width (descriptor field split).
    pa_bits: u32,
    _stage: PhantomData<S>,
}

impl<S: TranslationStage> PageTable<S> {
    /// An uninitialized page table, placeable in static storage.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            root_pa: PhysAddr::null(),
            ia_bits: 0,
            pa_bits: 0,
            _stage: PhantomData,
        }
    }

    /// Allocate the root table.
    ///
    /// `ia_bits` is the input-address width (VA bits for stage-1, the
    /// negotiated IPA bits for stage-2); `pa_bits` the negotiated
    /// output width. After success, [`PageTable::root`] is suitable for
    /// TTBRx_EL2 or VTTBR_EL2.
    ///
    /// # Errors
    ///
    /// [`Error::Invalid`] on double init, [`Error::NoMem`] if the root
    /// allocation fails.
    pub fn init<A: PageAllocator>(
        &mut self,
        ia_bits: u32,
        pa_bits: u32,
        alloc: &mut A,
    ) -> Result<()> {
        if !self.root_pa.is_null() {
            return Err(Error::Invalid);
        }

        self.ia_bits = ia_bits;
        self.pa_bits = pa_bits;
        self.root_pa = self.alloc_single_pt(alloc).ok_or(Error::NoMem)?;
        Ok(())
    }

    /// Physical address of the root table (0 if uninitialized).
    #[inline]
    #[must_use]
    pub fn root(&self) -> PhysAddr {
        self.root_pa
    }

    /// Release every reachable table page and reset the root.
    ///
    /// Performs no TLB maintenance and does not touch the translation
    /// registers; the caller must have retired the tree from hardware
    /// use first.
    pub fn deinit<A: PageAllocator>(&mut self, alloc: &mut A) {
        if !self.root_pa.is_null() {
            self.free_subtree(self.root_pa, 0, alloc);
            self.root_pa = PhysAddr::null();
        }
    }

    /// Map `[a, a + size)` to `[pa, pa + size)` with protections `p`.
    ///
    /// The covered size is rounded up to the granule. The largest
    /// feasible leaf level is used per chunk, allocating intermediate
    /// tables as needed.
    ///
    /// # Errors
    ///
    /// - [`Error::Invalid`]: `a` or `pa` not page-aligned, or the range
    ///   overlaps an existing valid mapping.
    /// - [`Error::Overflow`]: `a + size` or `pa + size` wraps.
    /// - [`Error::NoMem`]: a table allocation failed.
    ///
    /// Not atomic: on error a prefix may already be mapped.
    pub fn map_range<A: PageAllocator>(
        &mut self,
        a: S::Addr,
        pa: PhysAddr,
        size: usize,
        p: Prot,
        alloc: &mut A,
    ) -> Result<()> {
        if size == 0 {
            return Ok(());
        }

        let g = PAGE_SIZE as u64;
        if S::addr_value(a) & (g - 1) != 0 || !pa.is_aligned(g) {
            return Err(Error::Invalid);
        }

        if S::addr_value(a).checked_add(size as u64).is_none()
            || pa.checked_add(size as u64).is_none()
        {
            return Err(Error::Overflow);
        }

        let mut a = a;
        let mut pa = pa;
        let mut size = size;
        while size > 0 {
            // Largest level whose span fits and whose alignment both
            // addresses satisfy.
            let leaf = self.choose_leaf_level(a, pa, size);
            let map_sz = self.level_size(leaf);

            self.map_one(a, pa, p, leaf, alloc)?;

            a = S::addr_add(a, map_sz as u64);
            pa = pa.wrapping_add(map_sz as u64);
            size = size.saturating_sub(map_sz);
        }

        Ok(())
    }

    /// Replace the protections of `[a, a + size)` with `p`.
    ///
    /// Works at page granularity, splitting larger blocks as needed;
    /// mapped physical addresses are preserved, attribute bits replaced
    /// through the stage encoder.
    ///
    /// # Errors
    ///
    /// - [`Error::Invalid`]: `a` not page-aligned, or a covered entry is
    ///   unmapped.
    /// - [`Error::Overflow`]: `a + size` wraps.
    /// - [`Error::NoMem`]: a block split could not allocate its table.
    ///
    /// Not atomic: on error a prefix may already be updated.
    pub fn protect_range<A: PageAllocator>(
        &mut self,
        a: S::Addr,
        size: usize,
        p: Prot,
        alloc: &mut A,
    ) -> Result<()> {
        if size == 0 {
            return Ok(());
        }

        if S::addr_value(a) & (PAGE_SIZE as u64 - 1) != 0 {
            return Err(Error::Invalid);
        }

        if S::addr_value(a).checked_add(size as u64).is_none() {
            return Err(Error::Overflow);
        }

        // Page granularity is the safe choice for permission changes.
        let leaf = self.levels() - 1;
        let chunk = self.level_size(leaf);

        let mut a = a;
        let mut size = size;
        while size > 0 {
            self.protect_one(a, p, leaf, alloc)?;
            a = S::addr_add(a, chunk as u64);
            size = size.saturating_sub(chunk);
        }

        Ok(())
    }

    /// Unmap `[a, a + size)`.
    ///
    /// Works at page granularity, splitting larger blocks as needed.
    /// Already-unmapped pages are a no-op.
    ///
    /// # Errors
    ///
    /// - [`Error::Invalid`]: `a` not page-aligned.
    /// - [`Error::Overflow`]: `a + size` wraps.
    /// - [`Error::NoMem`]: a block split could not allocate its table.
    ///
    /// Not atomic: on error a prefix may already be unmapped.
    pub fn unmap_range<A: PageAllocator>(
        &mut self,
        a: S::Addr,
        size: usize,
        alloc: &mut A,
    ) -> Result<()> {
        if size == 0 {
            return Ok(());
        }

        if S::addr_value(a) & (PAGE_SIZE as u64 - 1) != 0 {
            return Err(Error::Invalid);
        }

        if S::addr_value(a).checked_add(size as u64).is_none() {
            return Err(Error::Overflow);
        }

        let leaf = self.levels() - 1;
        let chunk = self.level_size(leaf);

        let mut a = a;
        let mut size = size;
        while size > 0 {
            self.unmap_one(a, leaf, alloc)?;
            a = S::addr_add(a, chunk as u64);
            size = size.saturating_sub(chunk);
        }

        Ok(())
    }

    // Geometry, resolved against this table's input-address width.

    #[inline]
    fn levels(&self) -> u32 {
        levels_for_bits(self.ia_bits)
    }

    #[inline]
    fn level_shift(&self, level: u32) -> u32 {
        level_shift_for_bits(self.ia_bits, level)
    }

    #[inline]
    fn level_size(&self, level: u32) -> usize {
        level_size_for_bits(self.ia_bits, level)
    }

    // Table access through the current translation policy.

    #[inline]
    fn table_ptr(&self, pa: PhysAddr) -> *mut Pte {
        layout::phys_to_virt(pa, translation_enabled()).as_mut_ptr()
    }

    /// Allocate one table page and initialize every entry to FAULT,
    /// fencing the stores so a subsequent table-descriptor install
    /// publishes a fully faulted table.
    fn alloc_single_pt<A: PageAllocator>(&self, alloc: &mut A) -> Option<PhysAddr> {
        let pa = alloc.alloc_pages(0)?;

        let t = self.table_ptr(pa);
        for i in 0..entries_per_table() {
            // SAFETY: the allocator handed us a writable page; `i` stays
            // inside it.
            unsafe { ptr::write_volatile(t.add(i), PTE_TYPE_FAULT) };
        }
        dmb_ishst();

        Some(pa)
    }

    /// Both addresses aligned to the mapping granularity of `level`?
    fn addr_suitable_for_level(&self, a: S::Addr, pa: PhysAddr, level: u32) -> bool {
        let size = self.level_size(level) as u64;
        (S::addr_value(a) | pa.value()) & (size - 1) == 0
    }

    /// Largest level whose span fits in `size` with both addresses
    /// aligned; the last level (page) when none does.
    fn choose_leaf_level(&self, a: S::Addr, pa: PhysAddr, size: usize) -> u32 {
        let lvls = self.levels();
        for level in 0..lvls {
            if size >= self.level_size(level) && self.addr_suitable_for_level(a, pa, level) {
                return level;
            }
        }
        lvls - 1
    }

    #[inline]
    fn table_index_at_level(&self, a: S::Addr, level: u32) -> usize {
        ((S::addr_value(a) >> self.level_shift(level)) & (entries_per_table() as u64 - 1)) as usize
    }

    /// The input address aligned down to `level`'s granularity.
    #[inline]
    fn addr_at_level(&self, a: S::Addr, level: u32) -> S::Addr {
        S::addr_align_down(a, self.level_size(level) as u64)
    }

    /// A valid descriptor at `level` is a table pointer only above the
    /// last level; at the last level bits `11` mean PAGE.
    #[inline]
    fn entry_is_table(&self, level: u32, pte: Pte) -> bool {
        pte_is_table_or_page(pte) && level + 1 < self.levels()
    }

    /// Leaf descriptor for `pa` at `level`: BLOCK above the last level,
    /// PAGE at it.
    fn entry_at_level(&self, pa: PhysAddr, p: Prot, level: u32) -> Pte {
        let device = p.has(Prot::DEVICE);
        let attr = S::encode_attrs(p, device);
        if level + 1 < self.levels() {
            make_leaf_block_attr(pa, attr, self.pa_bits)
        } else {
            make_leaf_page_attr(pa, attr, self.pa_bits)
        }
    }

    /// Write `value` into `slot` with the required TLB maintenance.
    ///
    /// MMU off: a bare descriptor store. MMU on: `REMOVE` and `UPDATE`
    /// first break the entry (write FAULT, `dsb ishst`, invalidate the
    /// range, `dsb ish`, `isb`), then every kind installs the final
    /// descriptor and invalidates again the same way. `a` must be
    /// aligned for `size`.
    ///
    /// # Safety
    ///
    /// `slot` must point into a live table page of this tree.
    unsafe fn write_pte_and_sync(&self, k: Kind, a: S::Addr, size: usize, slot: *mut Pte, value: Pte) {
        if !translation_enabled() {
            // SAFETY: forwarded caller contract.
            unsafe { ptr::write_volatile(slot, value) };
            return;
        }

        if k == Kind::Update || k == Kind::Remove {
            // Break before make.
            // SAFETY: forwarded caller contract.
            unsafe { ptr::write_volatile(slot, PTE_TYPE_FAULT) };
            dsb_ishst();
            S::invalidate_range(a, size);
            dsb_ish();
            isb();
        }

        // SAFETY: forwarded caller contract.
        unsafe { ptr::write_volatile(slot, value) };
        dsb_ishst();
        S::invalidate_range(a, size);
        dsb_ish();
        isb();
    }

    /// Allocate a child table for a FAULT `slot` and link it.
    ///
    /// FAULT → valid needs no break; `alloc_single_pt` already fenced
    /// the child's FAULT initialization.
    fn alloc_and_link_table<A: PageAllocator>(
        &self,
        slot: *mut Pte,
        alloc: &mut A,
    ) -> Result<PhysAddr> {
        // SAFETY: `slot` points into a live table of this tree.
        if !pte_is_fault(unsafe { ptr::read_volatile(slot) }) {
            return Err(Error::Invalid);
        }

        let pa = self.alloc_single_pt(alloc).ok_or(Error::NoMem)?;

        // SAFETY: as above.
        unsafe { ptr::write_volatile(slot, make_table(pa, self.pa_bits)) };

        Ok(pa)
    }

    /// Split a block at `level` into a child table of next-level leaves
    /// carrying the block's attribute bits verbatim, then swap the block
    /// descriptor for a table descriptor under break-before-make.
    ///
    /// No-op if `slot` does not hold a block. `a` must be aligned to the
    /// block.
    fn split_block<A: PageAllocator>(
        &self,
        a: S::Addr,
        slot: *mut Pte,
        level: u32,
        alloc: &mut A,
    ) -> Result<()> {
        // SAFETY: `slot` points into a live table of this tree.
        let entry = unsafe { ptr::read_volatile(slot) };
        if !pte_is_block(entry) {
            return Ok(());
        }

        let ls = self.level_size(level) as u64;
        if S::addr_value(a) & (ls - 1) != 0 {
            return Err(Error::Invalid);
        }

        let pa = self.alloc_single_pt(alloc).ok_or(Error::NoMem)?;
        let t = self.table_ptr(pa);

        let block_pa = pte_to_phys(entry, self.pa_bits);
        let block_attr = entry & attr_field_mask(self.pa_bits);
        let sub_sz = self.level_size(level + 1);

        for i in 0..entries_per_table() {
            let next = block_pa + sub_sz * i;
            let leaf = if level + 2 < self.levels() {
                make_leaf_block_attr(next, block_attr, self.pa_bits)
            } else {
                make_leaf_page_attr(next, block_attr, self.pa_bits)
            };
            // SAFETY: `t` is the fresh table page; `i` stays inside it.
            unsafe { ptr::write_volatile(t.add(i), leaf) };
        }

        // Publish the child before it becomes reachable.
        dmb_ishst();

        // SAFETY: forwarded to write_pte_and_sync's contract.
        unsafe {
            self.write_pte_and_sync(
                Kind::Update,
                a,
                self.level_size(level),
                slot,
                make_table(pa, self.pa_bits),
            );
        }

        Ok(())
    }

    /// Install exactly one leaf for `a` → `pa` at `leaf_level`.
    ///
    /// Walks root → parent of `leaf_level`, allocating tables through
    /// FAULT entries and descending through table descriptors; any other
    /// valid intermediate means the range overlaps an existing mapping.
    /// The target slot itself must be FAULT.
    fn map_one<A: PageAllocator>(
        &mut self,
        a: S::Addr,
        pa: PhysAddr,
        p: Prot,
        leaf_level: u32,
        alloc: &mut A,
    ) -> Result<()> {
        let mut t = self.table_ptr(self.root_pa);

        for level in 0..leaf_level {
            let idx = self.table_index_at_level(a, level);
            // SAFETY: `t` is a live table page; `idx < entries_per_table()`.
            let slot = unsafe { t.add(idx) };
            let entry = unsafe { ptr::read_volatile(slot) };

            if !pte_is_fault(entry) {
                // Overlaps an existing mapping unless it is a table.
                if !self.entry_is_table(level, entry) {
                    return Err(Error::Invalid);
                }
                t = self.table_ptr(pte_to_phys(entry, self.pa_bits));
                continue;
            }

            let child = self.alloc_and_link_table(slot, alloc)?;
            t = self.table_ptr(child);
        }

        let idx = self.table_index_at_level(a, leaf_level);
        // SAFETY: as above.
        let slot = unsafe { t.add(idx) };
        if !pte_is_fault(unsafe { ptr::read_volatile(slot) }) {
            return Err(Error::Invalid);
        }

        let pte = self.entry_at_level(pa, p, leaf_level);
        // SAFETY: `slot` points into a live table of this tree, and the
        // aligned address matches the invalidation span.
        unsafe {
            self.write_pte_and_sync(
                Kind::Install,
                self.addr_at_level(a, leaf_level),
                self.level_size(leaf_level),
                slot,
                pte,
            );
        }

        Ok(())
    }

    /// Remove the translation for `a` at `leaf_level`.
    ///
    /// Blocks on the way down are split; a table descriptor at the leaf
    /// slot is detached first and its subtree freed afterwards.
    fn unmap_one<A: PageAllocator>(&mut self, a: S::Addr, leaf_level: u32, alloc: &mut A) -> Result<()> {
        let mut t = self.table_ptr(self.root_pa);

        for level in 0..leaf_level {
            let idx = self.table_index_at_level(a, level);
            // SAFETY: `t` is a live table page; `idx < entries_per_table()`.
            let slot = unsafe { t.add(idx) };

            if pte_is_fault(unsafe { ptr::read_volatile(slot) }) {
                // Nothing mapped here.
                return Ok(());
            }

            self.split_block(self.addr_at_level(a, level), slot, level, alloc)?;

            // Re-read: a split rewrote the slot.
            let entry = unsafe { ptr::read_volatile(slot) };
            if !self.entry_is_table(level, entry) {
                return Ok(());
            }

            t = self.table_ptr(pte_to_phys(entry, self.pa_bits));
        }

        let idx = self.table_index_at_level(a, leaf_level);
        // SAFETY: as above.
        let slot = unsafe { t.add(idx) };
        let entry = unsafe { ptr::read_volatile(slot) };

        if pte_is_fault(entry) {
            return Ok(());
        }

        if self.entry_is_table(leaf_level, entry) {
            let child = pte_to_phys(entry, self.pa_bits);

            // Detach the subtree, then free it.
            // SAFETY: live slot, aligned address.
            unsafe {
                self.write_pte_and_sync(
                    Kind::Remove,
                    self.addr_at_level(a, leaf_level),
                    self.level_size(leaf_level),
                    slot,
                    PTE_TYPE_FAULT,
                );
            }
            self.free_subtree(child, leaf_level + 1, alloc);
        } else {
            // SAFETY: live slot, aligned address.
            unsafe {
                self.write_pte_and_sync(
                    Kind::Remove,
                    self.addr_at_level(a, leaf_level),
                    self.level_size(leaf_level),
                    slot,
                    PTE_TYPE_FAULT,
                );
            }
        }

        Ok(())
    }

    /// Update the attributes of the translation covering `a` at
    /// `leaf_level`, preserving the mapped physical base.
    ///
    /// A table descriptor at the leaf slot means the mapping is finer
    /// than `leaf_level`; all reachable leaves below it are retargeted.
    fn protect_one<A: PageAllocator>(
        &mut self,
        a: S::Addr,
        p: Prot,
        leaf_level: u32,
        alloc: &mut A,
    ) -> Result<()> {
        let mut t = self.table_ptr(self.root_pa);

        for level in 0..leaf_level {
            let idx = self.table_index_at_level(a, level);
            // SAFETY: `t` is a live table page; `idx < entries_per_table()`.
            let slot = unsafe { t.add(idx) };

            if pte_is_fault(unsafe { ptr::read_volatile(slot) }) {
                // Unmapped: nothing whose permissions could change.
                return Err(Error::Invalid);
            }

            self.split_block(self.addr_at_level(a, level), slot, level, alloc)?;

            let entry = unsafe { ptr::read_volatile(slot) };
            if !self.entry_is_table(level, entry) {
                return Err(Error::Invalid);
            }

            t = self.table_ptr(pte_to_phys(entry, self.pa_bits));
        }

        let idx = self.table_index_at_level(a, leaf_level);
        // SAFETY: as above.
        let slot = unsafe { t.add(idx) };
        let entry = unsafe { ptr::read_volatile(slot) };

        if pte_is_fault(entry) {
            return Err(Error::Invalid);
        }

        let pa = pte_to_phys(entry, self.pa_bits);

        if self.entry_is_table(leaf_level, entry) {
            self.protect_subtree(self.addr_at_level(a, leaf_level), pa, leaf_level + 1, p);
        } else {
            let pte = self.entry_at_level(pa, p, leaf_level);
            // SAFETY: live slot, aligned address.
            unsafe {
                self.write_pte_and_sync(
                    Kind::Update,
                    self.addr_at_level(a, leaf_level),
                    self.level_size(leaf_level),
                    slot,
                    pte,
                );
            }
        }

        Ok(())
    }

    /// Clear and free every table page reachable from `table_pa`,
    /// including `table_pa` itself.
    fn free_subtree<A: PageAllocator>(&self, table_pa: PhysAddr, level: u32, alloc: &mut A) {
        let t = self.table_ptr(table_pa);

        for i in 0..entries_per_table() {
            // SAFETY: `t` is a live table page; `i` stays inside it.
            let slot = unsafe { t.add(i) };
            let entry = unsafe { ptr::read_volatile(slot) };

            if pte_is_fault(entry) {
                continue;
            }

            if self.entry_is_table(level, entry) {
                self.free_subtree(pte_to_phys(entry, self.pa_bits), level + 1, alloc);
            }

            // SAFETY: as above.
            unsafe { ptr::write_volatile(slot, PTE_TYPE_FAULT) };
        }

        alloc.free_pages(table_pa, 0);
    }

    /// Retarget every reachable leaf under `table_pa` to protections `p`.
    ///
    /// Entry `i` of a table at `level` covers
    /// `[a + i * level_size(level), a + (i+1) * level_size(level))`, so
    /// `a` must be (and stays, through recursion) aligned to
    /// `level_size(level)`.
    fn protect_subtree(&self, a: S::Addr, table_pa: PhysAddr, level: u32, p: Prot) {
        let t = self.table_ptr(table_pa);
        let stride = self.level_size(level);

        for i in 0..entries_per_table() {
            // SAFETY: `t` is a live table page; `i` stays inside it.
            let slot = unsafe { t.add(i) };
            let entry = unsafe { ptr::read_volatile(slot) };

            if pte_is_fault(entry) {
                continue;
            }

            let at = S::addr_add(a, (stride * i) as u64);
            let pa = pte_to_phys(entry, self.pa_bits);

            if self.entry_is_table(level, entry) {
                self.protect_subtree(at, pa, level + 1, p);
            } else {
                // SAFETY: live slot, `at` aligned to this level.
                unsafe {
                    self.write_pte_and_sync(
                        Kind::Update,
                        at,
                        stride,
                        slot,
                        self.entry_at_level(pa, p, level),
                    );
                }
            }
        }
    }
}

impl<S: TranslationStage> Default for PageTable<S> {
    fn default() -> Self {
        Self::new()
    }
}

// Tests drive the engine on the host: the translation latch stays off,
// so table walks use identity addressing straight into heap pages.
#[cfg(test)]
#[cfg(not(feature = "granule-16k"))]
mod tests {
    use super::*;
    use crate::pte::{
        PTE_AF, PTE_PXN, PTE_S2_AP_SHIFT, PTE_S2_XN, PTE_SH_INNER_SHAREABLE, PTE_SH_SHIFT,
        PTE_UXN,
    };
    use crate::stage::{Stage1, Stage1Addr, Stage2};
    use xino_common::config::PAGE_SHIFT;
    use xino_common::{IpaAddr, VirtAddr};

    const VA_BITS: u32 = 39;
    const PA_BITS: u32 = 48;

    const GIB: usize = 1 << 30;
    const MIB2: usize = 2 << 20;

    #[repr(align(4096))]
    struct TablePage([u8; PAGE_SIZE]);

    /// Heap-backed page source. With translation off, the "physical"
    /// address of a table is its host pointer, so walks just work.
    struct TestAlloc {
        allocated: usize,
        freed: usize,
        limit: Option<usize>,
    }

    impl TestAlloc {
        fn new() -> Self {
            Self {
                allocated: 0,
                freed: 0,
                limit: None,
            }
        }

        fn limited(limit: usize) -> Self {
            Self {
                allocated: 0,
                freed: 0,
                limit: Some(limit),
            }
        }
    }

    impl PageAllocator for TestAlloc {
        fn alloc_pages(&mut self, order: u32) -> Option<PhysAddr> {
            assert_eq!(order, 0, "engine must allocate single table pages");
            if let Some(limit) = self.limit {
                if self.allocated >= limit {
                    return None;
                }
            }
            self.allocated += 1;
            let page = Box::leak(Box::new(TablePage([0u8; PAGE_SIZE])));
            Some(PhysAddr::new(page as *mut TablePage as u64))
        }

        fn free_pages(&mut self, pa: PhysAddr, order: u32) {
            assert_eq!(order, 0);
            self.freed += 1;
            // SAFETY: every PA we hand out is a leaked Box<TablePage>.
            unsafe { drop(Box::from_raw(pa.value() as *mut TablePage)) };
        }
    }

    fn st1(va: u64) -> Stage1Addr {
        Stage1Addr::new(VirtAddr::new(va), 1)
    }

    fn read_pte(table: PhysAddr, idx: usize) -> Pte {
        // SAFETY: test tables are live heap pages.
        unsafe { ptr::read_volatile((table.value() as *const Pte).add(idx)) }
    }

    fn walk_entry(pt: &PageTable<Stage1>, va: u64, level: u32) -> Pte {
        let mut table = pt.root();
        for l in 0..=level {
            let shift = level_shift_for_bits(VA_BITS, l);
            let idx = ((va >> shift) & (entries_per_table() as u64 - 1)) as usize;
            let e = read_pte(table, idx);
            if l == level {
                return e;
            }
            table = pte_to_phys(e, PA_BITS);
        }
        unreachable!()
    }

    const TEST_VA: u64 = 0xffff_ffc0_0000_0000;

    #[test]
    fn init_rejects_double_init() {
        let mut alloc = TestAlloc::new();
        let mut pt = PageTable::<Stage1>::new();
        assert!(pt.root().is_null());
        pt.init(VA_BITS, PA_BITS, &mut alloc).unwrap();
        assert!(!pt.root().is_null());
        assert_eq!(pt.init(VA_BITS, PA_BITS, &mut alloc), Err(Error::Invalid));
        pt.deinit(&mut alloc);
        assert_eq!(alloc.allocated, alloc.freed);
    }

    #[test]
    fn map_2m_uses_a_block() {
        let mut alloc = TestAlloc::new();
        let mut pt = PageTable::<Stage1>::new();
        pt.init(VA_BITS, PA_BITS, &mut alloc).unwrap();

        pt.map_range(
            st1(TEST_VA),
            PhysAddr::new(0x8000_0000),
            MIB2,
            Prot::KERNEL_RW,
            &mut alloc,
        )
        .unwrap();

        // Root entry is a table, level-1 entry the 2 MiB block.
        let l0 = walk_entry(&pt, TEST_VA, 0);
        assert!(pt.entry_is_table(0, l0));

        let block = walk_entry(&pt, TEST_VA, 1);
        assert!(pte_is_block(block));
        assert_eq!(pte_to_phys(block, PA_BITS).value(), 0x8000_0000);
        assert_eq!(block & PTE_AF, PTE_AF);
        assert_eq!(block & (3 << PTE_SH_SHIFT), PTE_SH_INNER_SHAREABLE);
        assert_eq!(block & (3 << 6), 0); // AP = RW at EL2
        assert_eq!(block & (PTE_PXN | PTE_UXN), PTE_PXN | PTE_UXN);

        pt.deinit(&mut alloc);
        assert_eq!(alloc.allocated, alloc.freed);
    }

    #[test]
    fn protect_splits_block_and_updates_one_page() {
        let mut alloc = TestAlloc::new();
        let mut pt = PageTable::<Stage1>::new();
        pt.init(VA_BITS, PA_BITS, &mut alloc).unwrap();

        pt.map_range(
            st1(TEST_VA),
            PhysAddr::new(0x8000_0000),
            MIB2,
            Prot::KERNEL_RW,
            &mut alloc,
        )
        .unwrap();

        pt.protect_range(st1(TEST_VA), PAGE_SIZE, Prot::KERNEL_RWX, &mut alloc)
            .unwrap();

        // The block became a table of 512 pages sharing the original
        // contiguous PA; only page 0 gained execute.
        let l1 = walk_entry(&pt, TEST_VA, 1);
        assert!(pt.entry_is_table(1, l1));

        let l2_table = pte_to_phys(l1, PA_BITS);
        for i in 0..entries_per_table() {
            let e = read_pte(l2_table, i);
            assert!(pte_is_table_or_page(e), "page {i} must stay mapped");
            assert_eq!(
                pte_to_phys(e, PA_BITS).value(),
                0x8000_0000 + (i * PAGE_SIZE) as u64
            );
            if i == 0 {
                assert_eq!(e & (PTE_PXN | PTE_UXN), 0, "page 0 is executable");
            } else {
                assert_eq!(e & (PTE_PXN | PTE_UXN), PTE_PXN | PTE_UXN);
            }
        }

        pt.deinit(&mut alloc);
        assert_eq!(alloc.allocated, alloc.freed);
    }

    #[test]
    fn protect_whole_range_covers_blocks_and_pages() {
        let mut alloc = TestAlloc::new();
        let mut pt = PageTable::<Stage1>::new();
        pt.init(VA_BITS, PA_BITS, &mut alloc).unwrap();

        // 2 MiB + 1 page: a block plus a page leaf.
        pt.map_range(
            st1(TEST_VA),
            PhysAddr::new(0x8000_0000),
            MIB2 + PAGE_SIZE,
            Prot::KERNEL_RW,
            &mut alloc,
        )
        .unwrap();

        pt.protect_range(st1(TEST_VA), MIB2 + PAGE_SIZE, Prot::KERNEL_RWX, &mut alloc)
            .unwrap();

        for page in 0..(MIB2 / PAGE_SIZE + 1) {
            let va = TEST_VA + (page * PAGE_SIZE) as u64;
            let e = walk_entry(&pt, va, 2);
            assert_eq!(e & (PTE_PXN | PTE_UXN), 0, "page {page}");
            assert_eq!(
                pte_to_phys(e, PA_BITS).value(),
                0x8000_0000 + (page * PAGE_SIZE) as u64
            );
        }

        pt.deinit(&mut alloc);
        assert_eq!(alloc.allocated, alloc.freed);
    }

    #[test]
    fn protect_unmapped_is_invalid() {
        let mut alloc = TestAlloc::new();
        let mut pt = PageTable::<Stage1>::new();
        pt.init(VA_BITS, PA_BITS, &mut alloc).unwrap();

        assert_eq!(
            pt.protect_range(st1(TEST_VA), PAGE_SIZE, Prot::KERNEL_RW, &mut alloc),
            Err(Error::Invalid)
        );

        pt.deinit(&mut alloc);
    }

    #[test]
    fn unmap_one_page_of_a_1g_block() {
        let mut alloc = TestAlloc::new();
        let mut pt = PageTable::<Stage1>::new();
        pt.init(VA_BITS, PA_BITS, &mut alloc).unwrap();

        // 1 GiB aligned both ways: a single level-0 block leaf.
        pt.map_range(
            st1(TEST_VA),
            PhysAddr::new(0x4000_0000),
            GIB,
            Prot::KERNEL_RW,
            &mut alloc,
        )
        .unwrap();
        assert!(pte_is_block(walk_entry(&pt, TEST_VA, 0)));

        pt.unmap_range(st1(TEST_VA), PAGE_SIZE, &mut alloc).unwrap();

        // Split into a level-1 table: entry 0 further split into a page
        // table with its first slot faulted, the rest 2 MiB blocks with
        // the original attributes.
        let l0 = walk_entry(&pt, TEST_VA, 0);
        assert!(pt.entry_is_table(0, l0));

        let l1_table = pte_to_phys(l0, PA_BITS);
        let l1e0 = read_pte(l1_table, 0);
        assert!(pt.entry_is_table(1, l1e0));
        for i in 1..entries_per_table() {
            let e = read_pte(l1_table, i);
            assert!(pte_is_block(e));
            assert_eq!(
                pte_to_phys(e, PA_BITS).value(),
                0x4000_0000 + (i * MIB2) as u64
            );
            assert_eq!(e & (PTE_PXN | PTE_UXN), PTE_PXN | PTE_UXN);
        }

        let l2_table = pte_to_phys(l1e0, PA_BITS);
        assert!(pte_is_fault(read_pte(l2_table, 0)));
        for i in 1..entries_per_table() {
            let e = read_pte(l2_table, i);
            assert!(pte_is_table_or_page(e));
            assert_eq!(
                pte_to_phys(e, PA_BITS).value(),
                0x4000_0000 + (i * PAGE_SIZE) as u64
            );
        }

        pt.deinit(&mut alloc);
        assert_eq!(alloc.allocated, alloc.freed);
    }

    #[test]
    fn unmap_of_unmapped_range_is_a_no_op() {
        let mut alloc = TestAlloc::new();
        let mut pt = PageTable::<Stage1>::new();
        pt.init(VA_BITS, PA_BITS, &mut alloc).unwrap();
        pt.unmap_range(st1(TEST_VA), 64 * PAGE_SIZE, &mut alloc).unwrap();
        pt.deinit(&mut alloc);
        assert_eq!(alloc.allocated, alloc.freed);
    }

    #[test]
    fn map_unmap_releases_every_table_on_deinit() {
        let mut alloc = TestAlloc::new();
        let mut pt = PageTable::<Stage1>::new();
        pt.init(VA_BITS, PA_BITS, &mut alloc).unwrap();

        pt.map_range(
            st1(TEST_VA),
            PhysAddr::new(0x8000_0000),
            8 * PAGE_SIZE,
            Prot::KERNEL_RW,
            &mut alloc,
        )
        .unwrap();
        pt.unmap_range(st1(TEST_VA), 8 * PAGE_SIZE, &mut alloc).unwrap();

        pt.deinit(&mut alloc);
        assert_eq!(alloc.allocated, alloc.freed);
        assert!(pt.root().is_null());
    }

    #[test]
    fn overlap_is_rejected_without_mutation() {
        let mut alloc = TestAlloc::new();
        let mut pt = PageTable::<Stage1>::new();
        pt.init(VA_BITS, PA_BITS, &mut alloc).unwrap();

        pt.map_range(
            st1(TEST_VA),
            PhysAddr::new(0x8000_0000),
            PAGE_SIZE,
            Prot::KERNEL_RW,
            &mut alloc,
        )
        .unwrap();
        let before = walk_entry(&pt, TEST_VA, 2);

        assert_eq!(
            pt.map_range(
                st1(TEST_VA),
                PhysAddr::new(0x9000_0000),
                PAGE_SIZE,
                Prot::KERNEL_RW,
                &mut alloc,
            ),
            Err(Error::Invalid)
        );
        assert_eq!(walk_entry(&pt, TEST_VA, 2), before);

        // A 2 MiB mapping overlapping the existing page table must also
        // be rejected (block would shadow the finer mapping).
        assert_eq!(
            pt.map_range(
                st1(TEST_VA),
                PhysAddr::new(0x9000_0000),
                MIB2,
                Prot::KERNEL_RW,
                &mut alloc,
            ),
            Err(Error::Invalid)
        );

        pt.deinit(&mut alloc);
        assert_eq!(alloc.allocated, alloc.freed);
    }

    #[test]
    fn argument_validation() {
        let mut alloc = TestAlloc::new();
        let mut pt = PageTable::<Stage1>::new();
        pt.init(VA_BITS, PA_BITS, &mut alloc).unwrap();

        // Zero size is a success no-op everywhere.
        pt.map_range(st1(TEST_VA), PhysAddr::new(0), 0, Prot::KERNEL_RW, &mut alloc)
            .unwrap();
        pt.protect_range(st1(TEST_VA), 0, Prot::KERNEL_RW, &mut alloc).unwrap();
        pt.unmap_range(st1(TEST_VA), 0, &mut alloc).unwrap();

        // Misalignment.
        assert_eq!(
            pt.map_range(
                st1(TEST_VA + 0x10),
                PhysAddr::new(0x8000_0000),
                PAGE_SIZE,
                Prot::KERNEL_RW,
                &mut alloc,
            ),
            Err(Error::Invalid)
        );
        assert_eq!(
            pt.map_range(
                st1(TEST_VA),
                PhysAddr::new(0x8000_0010),
                PAGE_SIZE,
                Prot::KERNEL_RW,
                &mut alloc,
            ),
            Err(Error::Invalid)
        );

        // Wraparound.
        assert_eq!(
            pt.map_range(
                st1(!0u64 - PAGE_SIZE as u64 + 1),
                PhysAddr::new(0x8000_0000),
                2 * PAGE_SIZE,
                Prot::KERNEL_RW,
                &mut alloc,
            ),
            Err(Error::Overflow)
        );
        assert_eq!(
            pt.unmap_range(st1(!0u64 - PAGE_SIZE as u64 + 1), 2 * PAGE_SIZE, &mut alloc),
            Err(Error::Overflow)
        );

        pt.deinit(&mut alloc);
        assert_eq!(alloc.allocated, alloc.freed);
    }

    #[test]
    fn allocation_failure_is_nomem() {
        // Room for the root only.
        let mut alloc = TestAlloc::limited(1);
        let mut pt = PageTable::<Stage1>::new();
        pt.init(VA_BITS, PA_BITS, &mut alloc).unwrap();

        assert_eq!(
            pt.map_range(
                st1(TEST_VA),
                PhysAddr::new(0x8000_0000),
                PAGE_SIZE,
                Prot::KERNEL_RW,
                &mut alloc,
            ),
            Err(Error::NoMem)
        );

        pt.deinit(&mut alloc);
        assert_eq!(alloc.allocated, alloc.freed);
    }

    #[test]
    fn stage2_exec_only_page() {
        let mut alloc = TestAlloc::new();
        let mut pt = PageTable::<Stage2>::new();
        // ipa_bits = min(va_bits, pa_bits) on the 39-bit configuration.
        pt.init(VA_BITS, PA_BITS, &mut alloc).unwrap();

        pt.map_range(
            IpaAddr::new(0x4000_0000),
            PhysAddr::new(0x4000_0000),
            PAGE_SIZE,
            Prot::EXECUTE,
            &mut alloc,
        )
        .unwrap();

        let mut table = pt.root();
        for l in 0..2 {
            let shift = level_shift_for_bits(VA_BITS, l);
            let idx = ((0x4000_0000u64 >> shift) & (entries_per_table() as u64 - 1)) as usize;
            table = pte_to_phys(read_pte(table, idx), PA_BITS);
        }
        let idx = ((0x4000_0000u64 >> PAGE_SHIFT) & (entries_per_table() as u64 - 1)) as usize;
        let e = read_pte(table, idx);

        assert!(pte_is_table_or_page(e));
        assert_eq!(pte_to_phys(e, PA_BITS).value(), 0x4000_0000);
        assert_eq!(e & (3 << PTE_S2_AP_SHIFT), 0); // no read, no write
        assert_eq!(e & PTE_S2_XN, 0); // executable

        pt.deinit(&mut alloc);
        assert_eq!(alloc.allocated, alloc.freed);
    }
}
