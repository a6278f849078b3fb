//! Reads the multiboot2 information structure the loader hands off:
//! the memory map, the kernel and initramfs module images, and the
//! highest physical address present, so the rest of the bootstrap can
//! size its freelist and HHDM without a second pass over firmware data.

use multiboot2::{BootInformation, MemoryMapTag};

/// Modules are matched by their cmdline tag rather than a filename —
/// the loader's command line for each `module2` entry is just this word.
const MODULE_KERNEL: &str = "kernel";
const MODULE_INITRAMFS: &str = "initramfs";

pub struct ParsedBootInfo<'a> {
    pub mmap: &'a MemoryMapTag,
    pub kernel_image: Option<(u32, u32)>,
    pub initramfs: Option<(u32, u32)>,
    pub highest_address: u64,
    pub bootstrap_end: u32,
}

/// Walks every tag in `info`, returning the pieces later stages need.
/// `bootstrap_end` starts at the caller-supplied link-time end of the
/// bootstrapper's own image and is pushed forward past any module that
/// extends beyond it, mirroring how the loader packs modules right
/// after the bootstrapper in physical memory.
pub fn read<'a>(info: &'a BootInformation, link_time_end: u32) -> ParsedBootInfo<'a> {
    let mmap = info
        .memory_map_tag()
        .expect("multiboot2 info missing a memory map tag");

    let mut highest_address = 0u64;
    for area in mmap.memory_areas() {
        let end = area.end_address();
        if end > highest_address {
            highest_address = end;
        }
    }

    let mut kernel_image = None;
    let mut initramfs = None;
    let mut bootstrap_end = link_time_end;

    for module in info.module_tags() {
        let start = module.start_address();
        let end = module.end_address();
        let name = module.cmdline().unwrap_or("");

        if name == MODULE_KERNEL {
            kernel_image = Some((start, end));
        } else if name == MODULE_INITRAMFS {
            initramfs = Some((start, end));
        }

        if end > bootstrap_end {
            bootstrap_end = end;
        }
    }

    ParsedBootInfo {
        mmap,
        kernel_image,
        initramfs,
        highest_address,
        bootstrap_end,
    }
}
