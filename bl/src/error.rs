//! Error type for the bootstrap stage's own memory subsystem. `bl` and
//! `kernel` never link together, so each side of the boot handoff owns
//! its own copy of this enum rather than sharing one through `bootinfo`.

use core::fmt;

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
    FreelistsDirty,
    OutOfBounds,
    NotInitialized,
}

impl fmt::Display for MemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemError::OutOfMemory => write!(f, "out of memory"),
            MemError::NoContiguousRun => write!(f, "no contiguous run of the requested length"),
            MemError::ObjectSizeMismatch => write!(f, "freelists have mismatched object sizes"),
            MemError::AlreadyMapped => write!(f, "virtual address already mapped"),
            MemError::TableMissing => write!(f, "intermediate page table missing"),
            MemError::OverlapsKernel => write!(f, "image section overlaps the higher half"),
            MemError::NotElf64 => write!(f, "image is not a 64-bit ELF"),
            MemError::UnsupportedCpu => write!(f, "CPU is missing a required feature"),
            MemError::FreelistsDirty => write!(f, "cannot link freelists that have already been allocated from"),
            MemError::OutOfBounds => write!(f, "address outside freelist bounds"),
            MemError::NotInitialized => write!(f, "subsystem not yet initialized"),
        }
    }
}
