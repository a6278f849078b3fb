//! Physical and virtual memory management: the freelist allocator (C1),
//! the PMM (C2), the 4-level pager (C3), the slab heap (C4), and the ELF
//! loader (C6). The HHDM invariant (C7) is realized by [`bootinfo`]'s
//! `PhysAddr`/`VirtAddr` and the free functions below.

pub mod elf;
pub mod freelist;
pub mod heap;
pub mod pager;
pub mod pmm;

use core::fmt;

use bootinfo::{PhysAddr, VirtAddr};

/// The one error type every fallible core operation returns. One variant
/// per failure mode named across the freelist, PMM, pager, and ELF
/// loader; no payload beyond what a log line needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemError {
    OutOfMemory,
    NoContiguousRun,
    ObjectSizeMismatch,
    AlreadyMapped,
    TableMissing,
    OverlapsKernel,
    NotElf64,
    UnsupportedCpu,
    /// Freelist `link` was asked to merge two lists that have both
    /// already been allocated out of.
    FreelistsDirty,
    /// An address fell outside a freelist's `[base, ceil)` span.
    OutOfBounds,
    /// A global (PMM, pager root) was used before its `init` ran.
    NotInitialized,
}

impl fmt::Display for MemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemError::OutOfMemory => write!(f, "out of memory"),
            MemError::NoContiguousRun => write!(f, "no contiguous run of the requested length"),
            MemError::ObjectSizeMismatch => write!(f, "freelist object size mismatch"),
            MemError::AlreadyMapped => write!(f, "virtual address already mapped"),
            MemError::TableMissing => write!(f, "interior page table missing"),
            MemError::OverlapsKernel => write!(f, "section would overlap the HHDM window"),
            MemError::NotElf64 => write!(f, "not a 64-bit ELF image"),
            MemError::UnsupportedCpu => write!(f, "CPU lacks required paging features"),
            MemError::FreelistsDirty => write!(f, "cannot link two already-allocated freelists"),
            MemError::OutOfBounds => write!(f, "address outside freelist bounds"),
            MemError::NotInitialized => write!(f, "memory subsystem not yet initialized"),
        }
    }
}

#[inline]
pub fn phys_to_hhdm(phys: PhysAddr) -> VirtAddr {
    phys.to_hhdm()
}

#[inline]
pub fn hhdm_to_phys(virt: VirtAddr) -> PhysAddr {
    virt.to_phys_via_hhdm()
}
