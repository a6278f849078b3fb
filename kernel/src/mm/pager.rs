//! HHDM-resident 4-level pager. Page tables are addressed exclusively
//! through the HHDM once installed, so a table pointer is never more
//! than a physical-to-virtual add away from being walkable.

use core::arch::asm;
use core::sync::atomic::{AtomicBool, Ordering};

use amd64::paging::{self, PageSize, PTE};
use bootinfo::PhysAddr;
use spin::Mutex;

use crate::mm::{pmm, MemError};

bitflags::bitflags! {
    /// Mapping attributes requested by a caller. Deliberately narrower
    /// than raw `PTE` bits: callers describe intent, the pager decides
    /// the encoding and the page size.
    pub struct MapAttrs: u32 {
        const WRITABLE   = 1 << 0;
        const USERLAND   = 1 << 1;
        /// Forbid execution. Only takes effect if the CPU reported NX
        /// support in the boot-meta feature field; silently ignored
        /// otherwise, since setting the bit without `EFER::NXE` faults.
        const NO_EXECUTE = 1 << 2;

        /// PAT selector bit 0 (write-through).
        const PAT_PWT = 1 << 3;
        /// PAT selector bit 1 (cache-disable).
        const PAT_PCD = 1 << 4;
        /// PAT selector bit 2 (the high-order index bit into the
        /// MSR-indexed PAT table; lands at a different physical bit
        /// position depending on leaf level).
        const PAT_HIGH = 1 << 5;

        /// Force the smallest page size; disable 2 MiB/1 GiB folding
        /// even if `CAN_2M`/`CAN_1G` are also set.
        const FORCE_4K = 1 << 6;
        /// This call may fold into a 2 MiB leaf where alignment and
        /// remaining size allow it.
        const CAN_2M = 1 << 7;
        /// This call may fold into a 1 GiB leaf where alignment and
        /// remaining size allow it.
        const CAN_1G = 1 << 8;

        /// Overwrite an already-present leaf instead of failing.
        const OVW = 1 << 9;
        /// Traversal must not allocate a missing intermediate table;
        /// fail with `TableMissing` instead.
        const NO_CREATE = 1 << 10;
    }
}

static ROOT: Mutex<Option<PhysAddr>> = Mutex::new(None);
static NX_AVAILABLE: AtomicBool = AtomicBool::new(false);

/// Adopts the page table root already loaded in `CR3` at boot handoff,
/// and records whether the CPU reported NX support so `NO_EXECUTE` can
/// be gated on it for the lifetime of the pager.
pub fn init(meta: &bootinfo::BootMeta) {
    let cr3 = amd64::registers::CR3::read();
    *ROOT.lock() = Some(PhysAddr::new(cr3.paddr as u64));

    let features = bootinfo::PagingFeatures::from_bits_truncate(meta.paging_features);
    NX_AVAILABLE.store(features.contains(bootinfo::PagingFeatures::NX_AVAILABLE), Ordering::Release);
}

fn root() -> Result<PhysAddr, MemError> {
    ROOT.lock().ok_or(MemError::NotInitialized)
}

fn table_ptr(phys: PhysAddr) -> *mut u64 {
    phys.to_hhdm().0 as *mut u64
}

/// Materializes the leaf bits for an entry terminating at `level`
/// (1 = PT/4 KiB, 2 = PD/2 MiB, 3 = PDPT/1 GiB). `NX` only takes effect
/// if the CPU reported support via [`init`]; the PAT high-order index
/// bit lands at bit 7 for a 4 KiB leaf and bit 12 for a large-page leaf,
/// since bit 7 means huge-page at those levels instead.
fn leaf_bits(level: usize, attrs: MapAttrs) -> PTE {
    let mut bits = PTE::PRESENT;
    if attrs.contains(MapAttrs::WRITABLE) {
        bits |= PTE::WRITE;
    }
    if attrs.contains(MapAttrs::USERLAND) {
        bits |= PTE::USERLAND;
    }
    if attrs.contains(MapAttrs::PAT_PWT) {
        bits |= PTE::PAGE_WRITE_THROUGH;
    }
    if attrs.contains(MapAttrs::PAT_PCD) {
        bits |= PTE::PAGE_CACHE_DISABLE;
    }
    if attrs.contains(MapAttrs::PAT_HIGH) {
        bits |= if level == 1 { PTE::PAT } else { PTE::PAT_PS };
    }
    if level != 1 {
        bits |= PTE::HUGE_PAGE;
    }
    if attrs.contains(MapAttrs::NO_EXECUTE) && NX_AVAILABLE.load(Ordering::Acquire) {
        bits |= PTE::NO_EXECUTE;
    }
    bits
}

/// Picks the largest page size `map` may use for this step: 1 GiB or
/// 2 MiB only if the matching `CAN_*` hint is set and both addresses
/// and the remaining size align to it; 4 KiB otherwise. `FORCE_4K`
/// overrides either hint.
fn choose_page_size(v: u64, p: u64, remaining: u64, attrs: MapAttrs) -> PageSize {
    if !attrs.contains(MapAttrs::FORCE_4K) {
        let gib = PageSize::OneGiB.bytes();
        if attrs.contains(MapAttrs::CAN_1G) && remaining >= gib && v % gib == 0 && p % gib == 0 {
            return PageSize::OneGiB;
        }
        let mib = PageSize::TwoMiB.bytes();
        if attrs.contains(MapAttrs::CAN_2M) && remaining >= mib && v % mib == 0 && p % mib == 0 {
            return PageSize::TwoMiB;
        }
    }
    PageSize::FourKiB
}

/// Walks (and, where `create` is set, builds) the table chain down to the
/// entry at `to_level`, returning a pointer to that table and the index
/// within it. Interior entries created along the way carry `USERLAND`
/// when `userland` is set, so a user-accessible leaf underneath a
/// freshly built table chain stays reachable from CPL3 — x86-64 ANDs the
/// `US` bit across every level of the walk.
unsafe fn descend(root: PhysAddr, vaddr: u64, to_level: usize, create: bool, userland: bool) -> Result<(*mut u64, usize), MemError> {
    let mut table = table_ptr(root);

    for level in (to_level + 1..=4).rev() {
        let idx = paging::table_index(vaddr, level);
        let entry = PTE::from_bits_truncate(*table.add(idx));

        let child_phys = if entry.contains(PTE::PRESENT) {
            PhysAddr::new(entry.get_paddr())
        } else {
            if !create {
                return Err(MemError::TableMissing);
            }
            let new_table = pmm::alloc()?;
            core::ptr::write_bytes(table_ptr(new_table), 0, paging::ENTRIES_PER_TABLE);
            let mut interior = PTE::PRESENT | PTE::WRITE;
            if userland {
                interior |= PTE::USERLAND;
            }
            *table.add(idx) = new_table.0 | interior.bits();
            new_table
        };

        table = table_ptr(child_phys);
    }

    Ok((table, paging::table_index(vaddr, to_level)))
}

/// Walks from the PML4 down to wherever the mapping covering `vaddr`
/// actually terminates — a 4 KiB leaf in a PT, or a large-page leaf
/// found present at level 2 or 3 along the way. Never creates a missing
/// table; used by operations on an already-established mapping, which
/// have no business building new tables.
unsafe fn find_leaf(root: PhysAddr, vaddr: u64) -> Result<(*mut u64, usize, usize), MemError> {
    let mut table = table_ptr(root);

    for level in (2..=4).rev() {
        let idx = paging::table_index(vaddr, level);
        let entry = PTE::from_bits_truncate(*table.add(idx));

        if !entry.contains(PTE::PRESENT) {
            return Err(MemError::TableMissing);
        }
        if entry.contains(PTE::HUGE_PAGE) {
            return Ok((table, idx, level));
        }

        table = table_ptr(PhysAddr::new(entry.get_paddr()));
    }

    let idx = paging::table_index(vaddr, 1);
    let entry = PTE::from_bits_truncate(*table.add(idx));
    if !entry.contains(PTE::PRESENT) {
        return Err(MemError::TableMissing);
    }
    Ok((table, idx, 1))
}

unsafe fn invlpg(vaddr: u64) {
    asm!("invlpg [{}]", in(reg) vaddr, options(nostack, preserves_flags));
}

/// Maps `size` bytes of `physical` at `virtual_`, choosing the largest
/// leaf size alignment, remaining size, and `attrs` allow (see
/// [`choose_page_size`]). Allocates any intermediate tables that don't
/// yet exist unless `NO_CREATE` is set. Refuses to overwrite a present
/// leaf unless `OVW` is set.
pub fn map(virtual_: u64, physical: u64, size: u64, attrs: MapAttrs) -> Result<(), MemError> {
    let root = root()?;
    let mut v = virtual_;
    let mut p = physical;
    let mut remaining = size;

    while remaining > 0 {
        let page_size = choose_page_size(v, p, remaining, attrs);
        let level = page_size.level();

        unsafe {
            let (table, idx) = descend(root, v, level, !attrs.contains(MapAttrs::NO_CREATE), attrs.contains(MapAttrs::USERLAND))?;
            let existing = PTE::from_bits_truncate(*table.add(idx));
            if existing.contains(PTE::PRESENT) && !attrs.contains(MapAttrs::OVW) {
                return Err(MemError::AlreadyMapped);
            }
            *table.add(idx) = p | leaf_bits(level, attrs).bits();
            invlpg(v);
        }

        let step = page_size.bytes();
        v += step;
        p += step;
        remaining = remaining.saturating_sub(step);
    }
    Ok(())
}

pub fn unmap(virtual_: u64, size: u64) -> Result<(), MemError> {
    let root = root()?;
    let mut v = virtual_;
    let mut remaining = size;

    while remaining > 0 {
        unsafe {
            let (table, idx, level) = find_leaf(root, v)?;
            *table.add(idx) = 0;
            invlpg(v);

            let step = paging::level_span(level);
            v += step;
            remaining = remaining.saturating_sub(step);
        }
    }
    Ok(())
}

/// Maps `size` bytes of freshly allocated, zeroed physical memory at
/// `virtual_`, without the caller supplying a backing address. Always
/// forces 4 KiB leaves, since anonymous memory has no reason to commit
/// to a large contiguous physical run up front.
pub fn fly_map(virtual_: u64, size: u64, attrs: MapAttrs) -> Result<(), MemError> {
    let root = root()?;
    let page = PageSize::FourKiB.bytes();
    let mut v = virtual_;
    let mut remaining = size;
    let userland = attrs.contains(MapAttrs::USERLAND);

    while remaining > 0 {
        let phys = pmm::alloc()?;
        unsafe {
            core::ptr::write_bytes(table_ptr(phys), 0, paging::ENTRIES_PER_TABLE);
            let (table, idx) = descend(root, v, 1, true, userland)?;
            *table.add(idx) = phys.0 | leaf_bits(1, attrs).bits();
            invlpg(v);
        }
        v += page;
        remaining = remaining.saturating_sub(page);
    }
    Ok(())
}

pub fn fly_unmap(virtual_: u64, size: u64) -> Result<(), MemError> {
    let root = root()?;
    let page = PageSize::FourKiB.bytes();
    let mut v = virtual_;
    let mut remaining = size;

    while remaining > 0 {
        unsafe {
            let (table, idx) = descend(root, v, 1, false, false)?;
            let entry = PTE::from_bits_truncate(*table.add(idx));
            if entry.contains(PTE::PRESENT) {
                pmm::free(PhysAddr::new(entry.get_paddr()))?;
            }
            *table.add(idx) = 0;
            invlpg(v);
        }
        v += page;
        remaining = remaining.saturating_sub(page);
    }
    Ok(())
}

pub fn set_attr(virtual_: u64, size: u64, attrs: MapAttrs) -> Result<(), MemError> {
    let root = root()?;
    let mut v = virtual_;
    let mut remaining = size;

    while remaining > 0 {
        unsafe {
            let (table, idx, level) = find_leaf(root, v)?;
            let phys = PTE::from_bits_truncate(*table.add(idx)).get_paddr();
            *table.add(idx) = phys | leaf_bits(level, attrs).bits();
            invlpg(v);

            let step = paging::level_span(level);
            v += step;
            remaining = remaining.saturating_sub(step);
        }
    }
    Ok(())
}

/// Switches the active PML4 root. Callers are responsible for ensuring
/// `new_root` maps this function's own code and stack identically.
///
/// # Safety
/// `new_root` must be a valid, fully-populated PML4 physical address.
pub unsafe fn switch_root(new_root: PhysAddr) {
    amd64::registers::CR3 {
        data: amd64::registers::CR3Data::Flags(amd64::registers::CR3Flags::empty()),
        paddr: new_root.0 as usize,
    }
    .write();
    *ROOT.lock() = Some(new_root);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_attrs_leaf_bits_set_expected_flags() {
        let bits = leaf_bits(PageSize::FourKiB.level(), MapAttrs::WRITABLE | MapAttrs::USERLAND);
        assert!(bits.contains(PTE::PRESENT));
        assert!(bits.contains(PTE::WRITE));
        assert!(bits.contains(PTE::USERLAND));
        assert!(!bits.contains(PTE::HUGE_PAGE));
    }

    #[test]
    fn huge_page_sets_huge_bit() {
        let bits = leaf_bits(PageSize::TwoMiB.level(), MapAttrs::empty());
        assert!(bits.contains(PTE::HUGE_PAGE));
    }

    #[test]
    fn pat_high_bit_lands_differently_by_level() {
        let pt_bits = leaf_bits(PageSize::FourKiB.level(), MapAttrs::PAT_HIGH);
        assert!(pt_bits.contains(PTE::PAT));
        assert!(!pt_bits.contains(PTE::PAT_PS));

        let pd_bits = leaf_bits(PageSize::TwoMiB.level(), MapAttrs::PAT_HIGH);
        assert!(pd_bits.contains(PTE::PAT_PS));
    }

    #[test]
    fn nx_bit_is_gated_on_cpu_support() {
        NX_AVAILABLE.store(false, Ordering::Release);
        let bits = leaf_bits(PageSize::FourKiB.level(), MapAttrs::NO_EXECUTE);
        assert!(!bits.contains(PTE::NO_EXECUTE));

        NX_AVAILABLE.store(true, Ordering::Release);
        let bits = leaf_bits(PageSize::FourKiB.level(), MapAttrs::NO_EXECUTE);
        assert!(bits.contains(PTE::NO_EXECUTE));
        NX_AVAILABLE.store(false, Ordering::Release);
    }

    #[test]
    fn two_mib_aligned_range_folds_to_one_leaf_with_can_2m() {
        let mib = PageSize::TwoMiB.bytes();
        let size = choose_page_size(mib, mib, mib, MapAttrs::CAN_2M);
        assert_eq!(size, PageSize::TwoMiB);
    }

    #[test]
    fn force_4k_overrides_can_2m() {
        let mib = PageSize::TwoMiB.bytes();
        let size = choose_page_size(mib, mib, mib, MapAttrs::CAN_2M | MapAttrs::FORCE_4K);
        assert_eq!(size, PageSize::FourKiB);
    }

    #[test]
    fn misaligned_range_never_folds_even_with_can_2m() {
        let size = choose_page_size(0x1000, 0x1000, PageSize::TwoMiB.bytes(), MapAttrs::CAN_2M);
        assert_eq!(size, PageSize::FourKiB);
    }

    #[test]
    fn without_can_flags_stays_4k_even_when_aligned() {
        let mib = PageSize::TwoMiB.bytes();
        let size = choose_page_size(mib, mib, mib, MapAttrs::empty());
        assert_eq!(size, PageSize::FourKiB);
    }
}
