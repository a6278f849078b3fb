//! Bootstrap entry. Runs in 32-bit protected mode after the multiboot2
//! loader hands control over; builds the PML4 the kernel will inherit,
//! loads the kernel image into it, and writes the handoff record before
//! deferring to the long-mode entry stub for the actual mode switch.

#![no_std]
#![no_main]

use bootinfo::{BootMeta, PagingFeatures, HHDM_BASE};

use libbl::{cpu, elf, log_backend, mbparse, pager, pmm, uart};

const IDENTITY_MAP_PAGES: u64 = 4 * 512; // first 4 MiB, one PT's worth of 2 MiB strides

#[no_mangle]
pub extern "C" fn bootstrap_main(mb2_info_phys: u32) -> ! {
    uart::init();
    log_backend::init();

    if cpu::check_features().is_err() {
        log::error!("CPU is missing a feature this handoff requires");
        halt();
    }

    let info = unsafe {
        multiboot2::load(mb2_info_phys as usize).unwrap_or_else(|_| {
            log::error!("malformed multiboot2 information structure");
            halt();
        })
    };

    extern "C" {
        static __bootstrap_end: u8;
    }
    let link_time_end = unsafe { &__bootstrap_end as *const u8 as u32 };

    let parsed = mbparse::read(&info, link_time_end);
    log::info!("highest physical address: {:#x}", parsed.highest_address);

    pmm::init(parsed.mmap, parsed.bootstrap_end as u64);

    let mut root = 0u64;
    root = match pager::identity_map(root, IDENTITY_MAP_PAGES) {
        Ok(r) => r,
        Err(e) => {
            log::error!("identity map failed: {}", e);
            halt();
        }
    };

    for area in parsed.mmap.memory_areas() {
        if area.typ() != multiboot2::MemoryAreaType::Available {
            continue;
        }
        root = match pager::hhdm_map(root, area.start_address(), area.end_address() - area.start_address(), HHDM_BASE) {
            Ok(r) => r,
            Err(e) => {
                log::error!("hhdm map failed: {}", e);
                halt();
            }
        };
    }

    let (kernel_base, kernel_end) = match parsed.kernel_image {
        Some(range) => range,
        None => {
            log::error!("no kernel module present in boot information");
            halt();
        }
    };
    let kernel_image = unsafe {
        core::slice::from_raw_parts(kernel_base as *const u8, (kernel_end - kernel_base) as usize)
    };

    let (new_root, entry) = match elf::load_elf(root, kernel_image) {
        Ok(r) => r,
        Err(e) => {
            log::error!("kernel image load failed: {}", e);
            halt();
        }
    };
    root = new_root;

    let header = match pmm::header() {
        Ok(h) => h,
        Err(e) => {
            log::error!("pmm not initialized: {}", e);
            halt();
        }
    };
    let header_phys = match pmm::alloc() {
        Ok(p) => p,
        Err(e) => {
            log::error!("failed to reserve page for pmm handoff header: {}", e);
            halt();
        }
    };
    unsafe {
        core::ptr::write_unaligned(header_phys as *mut bootinfo::SerializedFreelistHeader, header);
    }

    let cfg_str = "contig_alloc_restarts=16\n";
    let cfg_phys = match pmm::alloc() {
        Ok(p) => p,
        Err(e) => {
            log::error!("failed to reserve page for boot cfg string: {}", e);
            halt();
        }
    };
    unsafe {
        core::ptr::copy_nonoverlapping(cfg_str.as_ptr(), cfg_phys as *mut u8, cfg_str.len());
    }

    let (initramfs_base, initramfs_len) = parsed
        .initramfs
        .map(|(b, e)| (b as u64, e - b))
        .unwrap_or((0, 0));

    // Re-encode the firmware's memory map into the kernel-owned
    // MemMapEntry layout rather than handing over the raw multiboot2 tag,
    // so the kernel never has to understand a loader-specific format.
    let entry_count = parsed.mmap.memory_areas().count();
    let entry_bytes = core::mem::size_of::<bootinfo::MemMapEntry>();
    let mmap_pages = (entry_count * entry_bytes + 0xFFF) / 0x1000;
    let mmap_phys = match pmm::alloc_contiguous(mmap_pages.max(1), 16) {
        Ok(p) => p,
        Err(e) => {
            log::error!("failed to reserve pages for re-encoded memory map: {}", e);
            halt();
        }
    };
    for (i, area) in parsed.mmap.memory_areas().enumerate() {
        let kind = if area.typ() == multiboot2::MemoryAreaType::Available {
            bootinfo::MemRegionKind::Available
        } else {
            bootinfo::MemRegionKind::Reserved
        };
        let entry = bootinfo::MemMapEntry {
            kind: kind as i32,
            base: area.start_address(),
            length: area.end_address() - area.start_address(),
        };
        unsafe {
            let dst = (mmap_phys as *mut bootinfo::MemMapEntry).add(i);
            core::ptr::write_unaligned(dst, entry);
        }
    }

    let meta = BootMeta {
        protocol_tag: BootMeta::PROTOCOL_TAG,
        firmware_info: mb2_info_phys as u64,
        pmm_head: header_phys,
        highest_addr: parsed.highest_address,
        kernel_elf_base: kernel_base as u64,
        kernel_elf_len: (kernel_end - kernel_base),
        initramfs_base,
        initramfs_len: initramfs_len as u32,
        hhdm_base: HHDM_BASE,
        mmap_ptr: mmap_phys,
        mmap_count: entry_count as i32,
        rsdp: 0,
        paging_features: PagingFeatures::NX_AVAILABLE.bits(),
        cfg_str_ptr: cfg_phys,
        cfg_str_len: cfg_str.len() as u32,
    };

    let meta_phys = match pmm::alloc() {
        Ok(p) => p,
        Err(e) => {
            log::error!("failed to reserve page for boot meta record: {}", e);
            halt();
        }
    };
    unsafe {
        core::ptr::write_unaligned(meta_phys as *mut BootMeta, meta);
    }

    log::info!("handing off to kernel at entry {:#x}, pml4 {:#x}", entry, root);

    extern "C" {
        /// Enables long mode, loads `pml4` into CR3, and far-jumps to
        /// `entry` with `boot_meta` left for the kernel to read back out
        /// at the agreed stack slot. Implemented in hand-written asm
        /// outside this crate's build.
        fn enter_long_mode(pml4: u64, entry: u64, boot_meta: u64) -> !;
    }
    unsafe { enter_long_mode(root, entry, meta_phys) }
}

fn halt() -> ! {
    loop {
        unsafe { core::arch::asm!("hlt", options(nomem, nostack)) };
    }
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    log::error!("panic: {}", info);
    halt()
}
