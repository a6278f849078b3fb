//! Segment selectors, code/data descriptors, and GDT load/store.
//!
//! Task-switching and interrupt-gate descriptors are not part of this
//! crate: the boot handoff only ever needs a flat long-mode GDT to
//! legitimize the far jump into 64-bit code, not a TSS or an IDT.

use core::{arch::asm, mem::{size_of, MaybeUninit}};

use super::PrivLvl;



#[repr(transparent)]
#[derive(Clone, Copy)]
pub struct SegSel(pub u16);

impl SegSel {
    /// Requested Privilege Level mask
    pub const RPL_MASK: u16 = 0b11;
    /// Table index (selector): not set = GDT, set = LDT
    pub const TABLE_SELECTOR_BIT: u16 = 0b100;

    /// Descriptor Table index mask
    pub const INDEX_MASK: u16 = 0b11111111_11111000;

    pub const fn new_gdt(rpl: PrivLvl, index: u16) -> Self {
        SegSel((rpl as u16) & Self::RPL_MASK | index << Self::INDEX_MASK.trailing_zeros())
    }

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }
    pub const fn to_bits(self) -> u16 {
        self.0
    }

    #[inline]
    pub const fn get_rpl(&self) -> PrivLvl {
        PrivLvl::from_bits((self.0 & Self::RPL_MASK) as u8)
    }

    #[inline]
    pub const fn get_index(&self) -> u16 {
        self.0 >> Self::INDEX_MASK.trailing_zeros()
    }
}
impl core::fmt::Debug for SegSel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SegmentSelector")
            .field("required priveledge level", &self.get_rpl())
            .field("table index", &self.get_index())
            .finish()
    }
}


bitflags::bitflags! {
    /// Code segment descriptor. Limit, base, and various flags are ignored
    /// in long mode.
    pub struct CodeSegDesc: u64 {
        const CONFORMING = 1 << 42;
        const EXECUTABLE = 1 << 43;
        const TYPE = 1 << 44;

        const DPL_MASK = 0b11 << 45;
        const DPL_RING0 = 0b00 << 45;
        const DPL_RING3 = 0b11 << 45;

        const PRESENT = 1 << 47;

        /// If set, descriptor defines a long mode code segment.
        const LONG_MODE = 1 << 53;
        const SIZE = 1 << 54;
    }

    /// Data segment descriptor. Limit, base, and various flags are ignored
    /// in long mode.
    pub struct DataSegDesc: u64 {
        const EXECUTABLE = 1 << 43;
        const TYPE = 1 << 44;
        const PRESENT = 1 << 47;
    }
}

impl Default for CodeSegDesc {
    /// Ring 0 64-bit code segment: `CONFORMING | EXECUTABLE | TYPE | PRESENT | LONG_MODE`.
    fn default() -> Self {
        Self {
            bits: (CodeSegDesc::CONFORMING
                | CodeSegDesc::EXECUTABLE
                | CodeSegDesc::TYPE
                | CodeSegDesc::PRESENT
                | CodeSegDesc::LONG_MODE
            ).bits
        }
    }
}
impl Default for DataSegDesc {
    /// Ring 0 data segment: `TYPE | PRESENT`.
    fn default() -> Self {
        Self {
            bits: (DataSegDesc::TYPE | DataSegDesc::PRESENT).bits
        }
    }
}



#[repr(C, packed)]
pub(crate) struct DescriptorTableOp {
    pub limit: u16,
    pub base: u64,
}

/// Load Global Descriptor Table (write to GDTR).
///
/// *Does not refresh segment registers.*
/// # Safety
/// Caller must ensure that:
/// * `gdt` points to the base of a valid GDT in memory.
/// * Setting GDTR using `gdt` won't cause memory safety violations.
/// * `gdt` remains in memory at least as long as it is loaded in the GDTR.
pub unsafe fn lgdt(gdt: &[u64]) {
    lgdt_raw((gdt.len() * size_of::<u64>() - 1) as u16, gdt.as_ptr() as *mut u64);
}
/// # Safety
/// See [`lgdt`].
pub unsafe fn lgdt_raw(limit: u16, base: *mut u64) {
    let dto = DescriptorTableOp { limit, base: base as u64 };
    asm!("lgdt [{}]", in(reg) &dto, options(readonly, nostack, preserves_flags));
}

/// Store Global Descriptor Table (read from GDTR).
pub fn sgdt_raw() -> (u16, *mut u64) {
    let mut dto: MaybeUninit<DescriptorTableOp> = MaybeUninit::uninit();

    unsafe {
        asm!("sgdt [{}]", in(reg) &mut dto, options(nostack, preserves_flags));
    }

    let dto = unsafe { dto.assume_init() };
    (dto.limit, dto.base as *mut _)
}

pub fn cs_read() -> u16 {
    let cs: u16;
    unsafe {
        asm!("mov {:x}, cs", out(reg) cs, options(nomem, nostack, preserves_flags));
    }
    cs
}
/// Performs a far return to reload `cs` with `selector`, landing back at the
/// next instruction. The standard trick for loading `cs` without a jump
/// target known ahead of time.
/// # Safety
/// `selector` must be a valid, correctly privileged code segment in the
/// currently loaded GDT.
pub unsafe fn cs_write(selector: SegSel) {
    asm!(
        "push {0}",
        "lea {1}, [rip + 2f]",
        "push {1}",
        "retfq",
        "2:",
        in(reg) selector.0 as u64,
        lateout(reg) _,
        options(preserves_flags)
    )
}

pub unsafe fn ds_write(selector: SegSel) {
    asm!("mov ds, {0:x}", "mov es, {0:x}", "mov ss, {0:x}", in(reg) selector.0, options(nostack, preserves_flags));
}
