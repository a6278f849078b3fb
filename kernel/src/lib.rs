#![no_std]

#![feature(allocator_api)]
#![feature(const_mut_refs)]
#![feature(slice_ptr_get)]

extern crate alloc;

pub mod cfg;
pub mod log_backend;
pub mod mm;
pub mod out;

use mm::heap::SlabHeap;

#[global_allocator]
pub static HEAP: SlabHeap = SlabHeap::new();
