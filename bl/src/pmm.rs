//! Bootstrap-stage physical memory manager. Builds one freelist per
//! usable memory-map entry and links them together, exactly the way the
//! kernel-side PMM re-adopts the result later — except here there is no
//! HHDM yet, so every pointer stays physical (and, per the handoff
//! convention the kernel's `Freelist::adopt_hhdm` expects, 32-bit only).

use multiboot2::{MemoryAreaType, MemoryMapTag};
use spin::Mutex;

use crate::error::MemError;
use crate::freelist::Freelist;

const PAGE_SIZE: usize = 0x1000;

static PMM: Mutex<Option<Freelist>> = Mutex::new(None);

fn align_up(addr: u64, align: u64) -> u64 {
    (addr + align - 1) & !(align - 1)
}

/// Seeds the freelist from every `Available` entry that doesn't overlap
/// `[0, bootstrap_end)`, clipping anything above the 32-bit boundary
/// since the handoff record only ever carries a 32-bit physical base.
pub fn init(mmap: &MemoryMapTag, bootstrap_end: u64) {
    let mut built: Option<Freelist> = None;

    for entry in mmap.memory_areas() {
        if entry.typ() != MemoryAreaType::Available {
            continue;
        }

        let entry_start = entry.start_address();
        let entry_end = entry.end_address();

        if entry_end < bootstrap_end {
            continue;
        }
        if entry_start >> 32 != 0 {
            continue;
        }

        let mut base = entry_start as u32 as u64;
        let ceil = (entry_end as u32 as u64).saturating_sub(PAGE_SIZE as u64);

        if entry_start < bootstrap_end && entry_end > bootstrap_end {
            base = align_up(bootstrap_end, PAGE_SIZE as u64);
        }

        if base >= ceil {
            continue;
        }

        let list = unsafe { Freelist::new(base as *mut u8, ceil as *mut u8, PAGE_SIZE) };

        built = Some(match built {
            None => list,
            Some(existing) => Freelist::link(&existing, &list).unwrap_or(existing),
        });
    }

    *PMM.lock() = built;
}

pub fn alloc() -> Result<u64, MemError> {
    let mut guard = PMM.lock();
    let list = guard.as_mut().ok_or(MemError::NotInitialized)?;
    list.alloc().map(|p| p as u64)
}

pub fn alloc_contiguous(pages: usize, max_restarts: usize) -> Result<u64, MemError> {
    let mut guard = PMM.lock();
    let list = guard.as_mut().ok_or(MemError::NotInitialized)?;
    list.alloc_contiguous(pages, max_restarts).map(|p| p as u64)
}

pub fn free(addr: u64) -> Result<(), MemError> {
    let mut guard = PMM.lock();
    let list = guard.as_mut().ok_or(MemError::NotInitialized)?;
    list.free(addr as *mut u8)
}

/// Hands the live freelist's header fields to the caller so they can be
/// written into the handoff record for the kernel to re-adopt.
pub fn header() -> Result<bootinfo::SerializedFreelistHeader, MemError> {
    let guard = PMM.lock();
    let list = guard.as_ref().ok_or(MemError::NotInitialized)?;
    Ok(bootinfo::SerializedFreelistHeader {
        head: list.head() as u64,
        base: list.base() as u64,
        ceil: list.ceil() as u64,
        object_size: list.object_size() as u64,
    })
}
