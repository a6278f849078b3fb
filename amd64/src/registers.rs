//! Interaction and access to the x86-64 control registers the pager and
//! boot handoff actually touch. CR3 is the only register either side
//! reads or writes; everything else here previously defined CR0/CR4/EFER/
//! RFLAGS/MSR access that no path in this tree reaches.

use core::arch::asm;

bitflags::bitflags! {
    pub struct CR3Flags: usize {
        /// PML4 Page Write Through.
        const PWT = 1 << 3;
        /// PML4 Page Cache-Disable.
        const PCD = 1 << 4;
    }
}
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CR3Data {
    /// Page Write Through (PWT) and Page Cache-Disable (PCD) flags.
    Flags(CR3Flags),
}
/// Control Register 3 (CR3) contains the Page Map Level 4 (PML4)
/// physical address when paging is enabled, alongside the PML4 Page
/// Write-Through (PWT) and Page Cache-Disable (PCD) flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CR3 {
    pub data: CR3Data,
    pub paddr: usize,
}

impl CR3 {
    /// Sets CR3 given the given physical address and no flags set.
    /// ### Safety:
    /// See `CR3::write`.
    pub unsafe fn set_nflags(pml4_paddr: usize) {
        CR3 { data: CR3Data::Flags(CR3Flags::empty()), paddr: pml4_paddr }.write()
    }

    /// Reads the CR3.
    pub fn read() -> Self {
        let paddr_mask = crate::paging::PTE::BASE_MASK.bits() as usize;

        let cr3: usize;
        unsafe {
            asm!(
                "mov {}, cr3",
                out(reg) cr3,
                options(nomem, nostack, preserves_flags)
            );
        }

        Self {
            data: unsafe { CR3Data::Flags(CR3Flags::from_bits_unchecked(cr3 & !paddr_mask)) },
            paddr: cr3 & paddr_mask,
        }
    }

    /// Writes to the CR3 register.
    /// # Safety:
    /// Caller must gurantee that the new system behaviour as a consequence after
    /// setting CR3 will not violate memory safety, or otherwise cause erroneous/
    /// undefined behaviour.
    pub unsafe fn write(self) {
        let CR3Data::Flags(flags) = self.data;
        let cr3 = self.paddr | flags.bits();

        asm!(
            "mov cr3, {}",
            in(reg) cr3,
            options(nostack, preserves_flags)
        );
    }

    /// Reload the CR3, wiping the local TLB cache.
    pub fn reload() {
        unsafe {
            core::arch::asm!(
                "mov rax, cr3",
                "mov cr3, rax",
                options(nomem, nostack, preserves_flags)
            );
        }
    }

    /// Return a linear address to the PML4.
    /// ### Safety:
    /// This function assumes identity-offset mapping.
    #[inline]
    pub unsafe fn get_laddr_offset(&self, offset: isize) -> *mut [crate::paging::PTE] {
        core::ptr::slice_from_raw_parts_mut(
            (self.paddr as isize + offset) as *mut _,
            512
        )
    }
}
