//! UEFI stub
//!
//! The EFI application that carries the gzip-compressed µkernel image as
//! an embedded payload and launches it:
//!
//! 1. Allocate `MIN_UKERNEL_ALIGN`-aligned loader pages sized from the
//!    payload's recorded uncompressed size.
//! 2. Decompress the payload into them.
//! 3. Clean the instruction cache over the fresh code.
//! 4. Find the device-tree blob in the configuration table.
//! 5. Exit boot services and jump to the image base with the FDT
//!    pointer in `x0`.
//!
//! On failure before `exit_boot_services`, the status propagates back
//! to firmware.

#![no_std]
#![no_main]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

mod payload;

use core::ptr::NonNull;

use uefi::boot::{self, AllocateType, MemoryType};
use uefi::prelude::*;
use uefi::system;

use xino_common::config::MIN_UKERNEL_ALIGN;

/// FDT (flattened device tree) GUID in the UEFI configuration table.
/// See: https://uefi.org/specs/UEFI/2.10/04_EFI_System_Table.html
const FDT_GUID: uefi::Guid = uefi::guid!("b1b621d5-f19c-41a5-830b-d9152c69aae0");

/// UEFI allocation granule; fixed by the specification, independent of
/// the µkernel granule.
const EFI_PAGE_SIZE: usize = 4096;

#[entry]
fn efi_main() -> Status {
    uefi::helpers::init().unwrap();

    log::info!("xino stub starting at EL{}", xino_arch::cpu::current_el());
    log::info!("UEFI firmware vendor: {}", system::firmware_vendor());

    let gzdata = payload::gzdata();
    let image_size = payload::image_size();
    log::info!(
        "payload: {} bytes compressed, {} bytes uncompressed",
        gzdata.len(),
        image_size
    );

    let image_base = match allocate_aligned(image_size, MIN_UKERNEL_ALIGN, MemoryType::LOADER_CODE)
    {
        Ok(base) => base,
        Err(e) => {
            log::error!("image allocation failed: {:?}", e);
            return Status::OUT_OF_RESOURCES;
        }
    };

    // SAFETY: we own `[image_base, image_base + image_size)`.
    let dest =
        unsafe { core::slice::from_raw_parts_mut(image_base as *mut u8, image_size) };

    let n = match xino_inflate::gzip_decompress(dest, gzdata) {
        Ok(n) => n,
        Err(e) => {
            log::error!("payload decompression failed: {}", e);
            return Status::LOAD_ERROR;
        }
    };
    log::info!("µkernel image at {:#x} ({} bytes)", image_base, n);

    // The freshly written range is about to be executed.
    // SAFETY: the range was just allocated and written.
    unsafe { xino_arch::cache::clean_code_range(image_base, n) };

    // A missing DTB is handed through as null; the µkernel treats that
    // as "no device tree".
    let fdt = find_dtb();
    if fdt == 0 {
        log::warn!("no device tree in the configuration table");
    } else {
        log::info!("device tree at {:#x}", fdt);
    }

    // µkernel entry: the image base, taking the FDT pointer in x0.
    // SAFETY: the decompressed image starts with the boot entry.
    let uk_entry: extern "C" fn(u64) -> ! =
        unsafe { core::mem::transmute(image_base as *const ()) };

    // The uefi crate refetches the map and retries on
    // EFI_INVALID_PARAMETER, per the GetMemoryMap/ExitBootServices
    // contract.
    // SAFETY: no boot-services pointers are used past this call.
    let _mmap = unsafe { boot::exit_boot_services(Some(MemoryType::LOADER_DATA)) };

    uk_entry(fdt);
}

/// Allocate `size` bytes of `memory_type` pages aligned to `align`.
///
/// UEFI's page allocator only guarantees 4 KiB alignment, so
/// `align / 4 KiB - 1` extra pages are requested and the unused leading
/// and trailing runs are handed back.
fn allocate_aligned(size: usize, align: usize, memory_type: MemoryType) -> uefi::Result<u64> {
    let align = align.max(EFI_PAGE_SIZE);
    let size = size.div_ceil(EFI_PAGE_SIZE) * EFI_PAGE_SIZE;
    let pad_pages = align / EFI_PAGE_SIZE - 1;

    let raw = boot::allocate_pages(
        AllocateType::AnyPages,
        memory_type,
        size / EFI_PAGE_SIZE + pad_pages,
    )?;
    let raw_addr = raw.as_ptr() as u64;

    let aligned = (raw_addr + align as u64 - 1) & !(align as u64 - 1);

    let leading = ((aligned - raw_addr) as usize) / EFI_PAGE_SIZE;
    if leading > 0 {
        // SAFETY: `[raw_addr, aligned)` came from allocate_pages above
        // and is not part of the returned span.
        unsafe { boot::free_pages(raw, leading)? };
    }

    let trailing = pad_pages - leading;
    if trailing > 0 {
        let tail = (aligned + size as u64) as *mut u8;
        // SAFETY: the trailing run came from allocate_pages above and is
        // not part of the returned span.
        unsafe { boot::free_pages(NonNull::new_unchecked(tail), trailing)? };
    }

    Ok(aligned)
}

/// Device-tree blob address from the configuration table, or 0.
fn find_dtb() -> u64 {
    for entry in system::with_config_table(|table| table.to_vec()) {
        if entry.guid == FDT_GUID {
            return entry.address as u64;
        }
    }
    0
}
