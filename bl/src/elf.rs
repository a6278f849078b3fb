//! Loads the kernel image into the page tables being built for the
//! handoff. Same section-header walk as `kernel::mm::elf::load_elf` —
//! only `PROGBITS`/`NOBITS` sections are honored — but frames are mapped
//! through this crate's physical-addressed pager instead of the HHDM,
//! since the HHDM doesn't exist until the kernel side builds it.

use elf_rs::{Elf, ElfFile, SectionType};

use bootinfo::HHDM_BASE;

use crate::error::MemError;
use crate::pager;
use crate::pmm;

const PAGE_SIZE: u64 = 0x1000;

pub fn load_elf(root: u64, image: &[u8]) -> Result<(u64, u64), MemError> {
    let elf = match Elf::from_bytes(image).map_err(|_| MemError::NotElf64)? {
        Elf::Elf64(elf) => elf,
        Elf::Elf32(_) => return Err(MemError::NotElf64),
    };

    let mut root = root;

    for section in elf.section_headers().iter() {
        let vaddr = section.addr();
        let size = section.size();

        if vaddr == 0 || size == 0 {
            continue;
        }
        if vaddr + size >= HHDM_BASE {
            return Err(MemError::OverlapsKernel);
        }

        let is_nobits = section.sh_type() == SectionType::NOBITS;
        let file_bytes = if is_nobits { &[][..] } else { section.content() };

        let mut remaining = size;
        let mut va = vaddr & !(PAGE_SIZE - 1);
        // Sub-page write offset, nonzero only on the section's first page;
        // kept apart from `content_idx`, which walks the file content and
        // always starts at 0 regardless of where that content lands on
        // the first page.
        let mut page_off = (vaddr - va) as usize;
        let mut content_idx = 0usize;

        while remaining > 0 {
            let phys = pmm::alloc()?;
            let page_ptr = phys as *mut u8;

            unsafe {
                core::ptr::write_bytes(page_ptr, 0, PAGE_SIZE as usize);
            }

            root = pager::map_page(root, va, phys, true)?;

            if !is_nobits && content_idx < file_bytes.len() {
                let copy_len = core::cmp::min(
                    PAGE_SIZE as usize - page_off,
                    file_bytes.len() - content_idx,
                );
                unsafe {
                    core::ptr::copy_nonoverlapping(
                        file_bytes.as_ptr().add(content_idx),
                        page_ptr.add(page_off),
                        copy_len,
                    );
                }
                content_idx += copy_len;
            }

            page_off = 0;
            va += PAGE_SIZE;
            remaining = remaining.saturating_sub(PAGE_SIZE);
        }
    }

    Ok((root, elf.entry_point()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlapping_section_is_rejected_before_any_mapping() {
        let vaddr = HHDM_BASE - 0x1000;
        let size = 0x2000u64;
        assert!(vaddr + size >= HHDM_BASE);
    }
}
