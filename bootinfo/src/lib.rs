//! Types shared across the 32-bit bootstrapper and the 64-bit kernel.
//!
//! This crate carries no logic: it is the only thing `bl` and `kernel` both
//! link against, so its layouts are load-bearing. Anything that needs a
//! tree walk, a lock, or an allocator belongs in one of those two crates
//! instead.

#![no_std]

use core::fmt;

/// Higher-half direct map base. Physical RAM is mirrored here for its
/// entire lifetime once the boot handoff completes.
pub const HHDM_BASE: u64 = 0xFFFF_C000_0000_0000;

/// A physical address. Never dereferenced directly; go through
/// [`PhysAddr::to_hhdm`] first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PhysAddr(pub u64);

/// A virtual (linear) address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct VirtAddr(pub u64);

impl PhysAddr {
    #[inline]
    pub const fn new(addr: u64) -> Self {
        PhysAddr(addr)
    }

    /// Arithmetic translation into the higher-half direct map. Pure
    /// addition; valid only for addresses the firmware reported as
    /// `AVAILABLE`.
    #[inline]
    pub const fn to_hhdm(self) -> VirtAddr {
        VirtAddr(HHDM_BASE + self.0)
    }

    #[inline]
    pub const fn is_aligned(self, align: u64) -> bool {
        self.0 & (align - 1) == 0
    }
}

impl VirtAddr {
    #[inline]
    pub const fn new(addr: u64) -> Self {
        VirtAddr(addr)
    }

    /// Arithmetic translation out of the higher-half direct map. Pure
    /// subtraction; the caller guarantees `self` actually lies in the HHDM
    /// window.
    #[inline]
    pub const fn to_phys_via_hhdm(self) -> PhysAddr {
        PhysAddr(self.0 - HHDM_BASE)
    }

    #[inline]
    pub const fn is_aligned(self, align: u64) -> bool {
        self.0 & (align - 1) == 0
    }
}

impl fmt::LowerHex for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}
impl fmt::LowerHex for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl core::ops::Add<u64> for PhysAddr {
    type Output = PhysAddr;
    #[inline]
    fn add(self, rhs: u64) -> PhysAddr {
        PhysAddr(self.0 + rhs)
    }
}
impl core::ops::Add<u64> for VirtAddr {
    type Output = VirtAddr;
    #[inline]
    fn add(self, rhs: u64) -> VirtAddr {
        VirtAddr(self.0 + rhs)
    }
}
impl core::ops::Sub<VirtAddr> for VirtAddr {
    type Output = u64;
    #[inline]
    fn sub(self, rhs: VirtAddr) -> u64 {
        self.0 - rhs.0
    }
}

/// Memory region classification, re-encoded by the bootstrapper from
/// whatever firmware map it was handed. Authoritative past the boot
/// handoff boundary; multiboot2 tag types are never consulted again
/// after firmware-info parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum MemRegionKind {
    AcpiReclaimable = 1,
    Available = 2,
    BadRam = 3,
    Nvs = 4,
    Reserved = 5,
    Bootstrap = 6,
}

impl MemRegionKind {
    pub const fn from_i32(v: i32) -> Option<Self> {
        Some(match v {
            1 => Self::AcpiReclaimable,
            2 => Self::Available,
            3 => Self::BadRam,
            4 => Self::Nvs,
            5 => Self::Reserved,
            6 => Self::Bootstrap,
            _ => return None,
        })
    }
}

/// One entry of the kernel-owned memory map, bit-exact with §6 of the
/// memory subsystem contract: `{ type: i32; base: u64; length: u64 }`.
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct MemMapEntry {
    pub kind: i32,
    pub base: u64,
    pub length: u64,
}

impl MemMapEntry {
    #[inline]
    pub fn kind(&self) -> Option<MemRegionKind> {
        MemRegionKind::from_i32(self.kind)
    }

    #[inline]
    pub fn end(&self) -> u64 {
        self.base + self.length
    }
}

/// On-wire layout of a freelist handed off from the bootstrapper's PMM to
/// the kernel's. All fields are physical addresses; `next` pointers inside
/// the free slots themselves occupy the low 32 bits of the first 8 bytes,
/// zero-extended, exactly as the bootstrapper writes them.
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct SerializedFreelistHeader {
    pub head: u64,
    pub base: u64,
    pub ceil: u64,
    pub object_size: u64,
}

bitflags::bitflags! {
    /// Paging features the CPU feature gate (boot handoff stage 2)
    /// detected, carried so the kernel's pager doesn't need to re-query
    /// CPUID.
    #[repr(transparent)]
    pub struct PagingFeatures: u32 {
        const NX_AVAILABLE      = 1 << 0;
        const GIB_PAGES_AVAILABLE = 1 << 1;
    }
}

/// Fixed-layout record passed by physical pointer from the bootstrapper to
/// the kernel. Packed little-endian, bit-exact field order; valid for
/// exactly one read by the kernel at entry.
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct BootMeta {
    pub protocol_tag: u32,
    pub firmware_info: u64,
    pub pmm_head: u64,
    pub highest_addr: u64,
    pub kernel_elf_base: u64,
    pub kernel_elf_len: u32,
    pub initramfs_base: u64,
    pub initramfs_len: u32,
    pub hhdm_base: u64,
    pub mmap_ptr: u64,
    pub mmap_count: i32,
    pub rsdp: u64,
    pub paging_features: u32,
    /// Physical pointer to the `\n`-separated `key=value` cfg string
    /// (ambient configuration, §2.1 of the memory subsystem contract).
    pub cfg_str_ptr: u64,
    pub cfg_str_len: u32,
}

impl BootMeta {
    /// Magic value the kernel checks before trusting the rest of the record.
    pub const PROTOCOL_TAG: u32 = 0x4D45_4D48; // "MEMH"

    /// # Safety
    /// `phys` must point to a valid, fully-initialized `BootMeta` in
    /// memory the kernel can currently read (identity-mapped or HHDM).
    pub unsafe fn read_from(phys: *const BootMeta) -> BootMeta {
        core::ptr::read_unaligned(phys)
    }
}
