//! Kernel entry point: the far end of the boot handoff. `bl` jumps here
//! in 64-bit long mode with the PML4 it built still loaded and a
//! physical pointer to a [`bootinfo::BootMeta`] record in a register
//! the linker-level glue moves into the stack slot this reads from.

#![no_std]
#![no_main]

extern crate alloc;

use bootinfo::BootMeta;

use libkernel::{cfg, log_backend, mm, out};

#[no_mangle]
pub extern "C" fn kernel_main(boot_meta_phys: u64) -> ! {
    let meta = unsafe { BootMeta::read_from(boot_meta_phys as *const BootMeta) };

    if meta.protocol_tag != BootMeta::PROTOCOL_TAG {
        amd64::hlt_loop();
    }

    let cfg_str = unsafe {
        let ptr = bootinfo::PhysAddr::new(meta.cfg_str_ptr).to_hhdm().0 as *const u8;
        let bytes = core::slice::from_raw_parts(ptr, meta.cfg_str_len as usize);
        core::str::from_utf8_unchecked(bytes)
    };
    cfg::init_boot_cfg(cfg_str);

    log_backend::init();
    mm::pager::init(&meta);
    unsafe { mm::pmm::init(&meta) };

    if libkernel::HEAP.init().is_err() {
        log::error!("failed to seed kernel heap");
        amd64::hlt_loop();
    }

    log::info!("kernel entered, hhdm base = {:#x}", meta.hhdm_base);

    out::println!("kernel alive");

    amd64::hlt_loop();
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    log::error!("panic: {}", info);
    amd64::hlt_loop();
}
