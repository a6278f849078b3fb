//! 64-bit ELF loader: installs a kernel-style image into a page-table
//! root, section by section, in 4 KiB strides.

use elf_rs::{Elf, ElfFile, SectionType};

use bootinfo::HHDM_BASE;

use crate::mm::pager::{self, MapAttrs};
use crate::mm::{pmm, MemError};

const PAGE_SIZE: u64 = 0x1000;

/// Installs every `PROGBITS`/`NOBITS` section of `image` into `page_root`
/// (already switched to, or about to be switched to, via the pager), and
/// returns the image's entry address.
///
/// Walks each section in 4 KiB strides: a fresh physical frame is
/// allocated, mapped at the stride's virtual address, zeroed, and — for
/// anything but `NOBITS` — filled with the corresponding file bytes.
pub fn load_elf(image: &[u8]) -> Result<u64, MemError> {
    let elf = match Elf::from_bytes(image).map_err(|_| MemError::NotElf64)? {
        Elf::Elf64(elf) => elf,
        Elf::Elf32(_) => return Err(MemError::NotElf64),
    };

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
        // Offset within the *current page* to start writing at — only
        // nonzero on the section's first page, when `vaddr` isn't 4 KiB
        // aligned. Tracked separately from `content_idx` below, which
        // walks the section's file content and must start at 0 regardless
        // of where in the first page that content lands.
        let mut page_off = (vaddr - va) as usize;
        let mut content_idx = 0usize;

        while remaining > 0 {
            let phys = pmm::alloc()?;
            let page_hhdm = phys.to_hhdm().0 as *mut u8;

            unsafe {
                core::ptr::write_bytes(page_hhdm, 0, PAGE_SIZE as usize);
            }

            pager::map(va, phys.0, PAGE_SIZE, MapAttrs::WRITABLE | MapAttrs::USERLAND)?;

            if !is_nobits && content_idx < file_bytes.len() {
                let copy_len = core::cmp::min(PAGE_SIZE as usize - page_off, file_bytes.len() - content_idx);
                unsafe {
                    core::ptr::copy_nonoverlapping(
                        file_bytes.as_ptr().add(content_idx),
                        page_hhdm.add(page_off),
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

    Ok(elf.entry_point())
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

    /// A section whose `vaddr` isn't page-aligned must still copy its
    /// content from byte 0, landing at the sub-page offset on the first
    /// page only — this walks the same `page_off`/`content_idx` split
    /// `load_elf` uses, over a plain byte buffer instead of real page
    /// tables, to pin down the offset arithmetic in isolation.
    #[test]
    fn unaligned_section_copies_content_from_its_own_start() {
        const PAGE_SIZE: usize = 0x1000;
        let vaddr: usize = 0x30; // 48-byte misalignment
        let content: alloc::vec::Vec<u8> = (0..0x20u8).collect(); // 32 bytes, fits on one page
        let mut pages = [[0xFFu8; PAGE_SIZE]; 1];

        let mut page_off = vaddr % PAGE_SIZE;
        let mut content_idx = 0usize;
        for page in pages.iter_mut() {
            if content_idx < content.len() {
                let copy_len = core::cmp::min(PAGE_SIZE - page_off, content.len() - content_idx);
                page[page_off..page_off + copy_len]
                    .copy_from_slice(&content[content_idx..content_idx + copy_len]);
                content_idx += copy_len;
            }
            page_off = 0;
        }

        assert_eq!(&pages[0][0x30..0x50], &content[..]);
        assert_eq!(content_idx, content.len());
    }
}
