//! Physical memory manager: re-adopts the bootstrapper's page freelist into
//! HHDM addressing and folds in any `Available` kernel memory map entries
//! the bootstrapper's own freelist doesn't already cover.

use spin::Mutex;

use bootinfo::{BootMeta, MemMapEntry, MemRegionKind, PhysAddr};

use crate::mm::freelist::Freelist;
use crate::mm::MemError;

const PAGE_SIZE: usize = 0x1000;

static PMM: Mutex<Option<Freelist>> = Mutex::new(None);

/// Rebuilds the bootstrapper's page freelist in HHDM addressing and links
/// in any `Available` memory map regions it doesn't already span.
///
/// # Safety
/// Must run exactly once, after the HHDM is live, with `meta` describing
/// the freelist and memory map the bootstrapper actually produced.
pub unsafe fn init(meta: &BootMeta) {
    let head_phys = PhysAddr::new(meta.pmm_head);
    let mut list = Freelist::adopt_hhdm(head_phys);

    let mmap_ptr = meta.mmap_ptr as *const MemMapEntry;
    let mmap_count = meta.mmap_count.max(0) as usize;
    let entries = core::slice::from_raw_parts(mmap_ptr, mmap_count);

    for entry in entries.iter().skip(1) {
        if entry.kind() != Some(MemRegionKind::Available) {
            continue;
        }

        let region_base = entry.base;
        let region_ceil = entry.end();

        if list.covers(region_base, region_ceil) {
            continue;
        }
        if list.overlaps_base(region_base, region_ceil) {
            continue;
        }

        let base_virt = PhysAddr::new(region_base).to_hhdm().0 as *mut u8;
        let ceil_virt = PhysAddr::new(region_ceil).to_hhdm().0 as *mut u8;
        let extra = unsafe { Freelist::new(base_virt, ceil_virt, PAGE_SIZE) };

        match Freelist::link(&list, &extra) {
            Ok(combined) => list = combined,
            Err(_) => continue,
        }
    }

    *PMM.lock() = Some(list);
}

pub fn alloc() -> Result<PhysAddr, MemError> {
    let mut guard = PMM.lock();
    let list = guard.as_mut().ok_or(MemError::NotInitialized)?;
    let ptr = list.alloc()?;
    Ok(hhdm_ptr_to_phys(ptr))
}

pub fn alloc_contiguous(pages: usize) -> Result<PhysAddr, MemError> {
    let mut guard = PMM.lock();
    let list = guard.as_mut().ok_or(MemError::NotInitialized)?;
    let ptr = list.alloc_contiguous(pages)?;
    Ok(hhdm_ptr_to_phys(ptr))
}

pub fn free(addr: PhysAddr) -> Result<(), MemError> {
    let mut guard = PMM.lock();
    let list = guard.as_mut().ok_or(MemError::NotInitialized)?;
    list.free(addr.to_hhdm().0 as *mut u8)
}

pub fn free_contiguous(addr: PhysAddr, pages: usize) -> Result<(), MemError> {
    let mut guard = PMM.lock();
    let list = guard.as_mut().ok_or(MemError::NotInitialized)?;
    list.free_contiguous(addr.to_hhdm().0 as *mut u8, pages)
}

fn hhdm_ptr_to_phys(ptr: *mut u8) -> PhysAddr {
    bootinfo::VirtAddr::new(ptr as u64).to_phys_via_hhdm()
}
