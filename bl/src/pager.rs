//! Bootstrap-stage pager. Builds the PML4 the kernel will inherit, one
//! page at a time, using raw physical pointers throughout — paging isn't
//! enabled yet when this runs, so a physical address and a usable
//! pointer are the same thing for any identity-reachable page.

use amd64::paging::{self, PTE};

use crate::error::MemError;
use crate::pmm;

const PAGE_SIZE: u64 = 0x1000;

fn table_ptr(phys: u64) -> *mut u64 {
    phys as *mut u64
}

/// Descends from `root` to the level-1 (page table) entry covering
/// `vaddr`, allocating and zeroing any missing intermediate table.
unsafe fn descend(root: u64, vaddr: u64) -> Result<(*mut u64, usize), MemError> {
    let mut table = table_ptr(root);

    for level in (2..=4).rev() {
        let idx = paging::table_index(vaddr, level);
        let entry = PTE::from_bits_truncate(*table.add(idx));

        let child_phys = if entry.contains(PTE::PRESENT) {
            entry.get_paddr()
        } else {
            let new_table = pmm::alloc()?;
            core::ptr::write_bytes(table_ptr(new_table), 0, paging::ENTRIES_PER_TABLE);
            *table.add(idx) = new_table | (PTE::PRESENT | PTE::WRITE).bits();
            new_table
        };

        table = table_ptr(child_phys);
    }

    Ok((table, paging::table_index(vaddr, 1)))
}

/// Maps one 4 KiB page, allocating a fresh PML4 if `root` is zero.
/// Refuses to overwrite an already-present leaf unless `overwrite` is set.
pub fn map_page(root: u64, vaddr: u64, paddr: u64, overwrite: bool) -> Result<u64, MemError> {
    let root = if root == 0 {
        let new_root = pmm::alloc()?;
        unsafe { core::ptr::write_bytes(table_ptr(new_root), 0, paging::ENTRIES_PER_TABLE) };
        new_root
    } else {
        root
    };

    unsafe {
        let (table, idx) = descend(root, vaddr)?;
        let existing = PTE::from_bits_truncate(*table.add(idx));
        if existing.contains(PTE::PRESENT) && !overwrite {
            return Err(MemError::AlreadyMapped);
        }
        *table.add(idx) = (paddr & PTE::BASE_MASK.bits()) | (PTE::PRESENT | PTE::WRITE).bits();
    }

    Ok(root)
}

/// Identity-maps `[0, pages * 4 KiB)`, used for the first few megabytes
/// so the bootstrapper's own code and stack stay reachable once paging
/// is switched on.
pub fn identity_map(root: u64, pages: u64) -> Result<u64, MemError> {
    let mut root = root;
    for i in 0..pages {
        let addr = i * PAGE_SIZE;
        root = map_page(root, addr, addr, true)?;
    }
    Ok(root)
}

/// Maps every byte of `[phys_base, phys_base + len)` at `phys_base + hhdm_base`.
pub fn hhdm_map(root: u64, phys_base: u64, len: u64, hhdm_base: u64) -> Result<u64, MemError> {
    let mut root = root;
    let mut off = 0u64;
    while off < len {
        let phys = phys_base + off;
        root = map_page(root, phys + hhdm_base, phys, true)?;
        off += PAGE_SIZE;
    }
    Ok(root)
}
