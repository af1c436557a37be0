//! Kernel heap (ungrouped in the spec's component list, but load-bearing
//! for every other component here: `alloc::vec::Vec`/`Box`/`String` back
//! the arena-with-stable-ids pattern used throughout `vmm`, `sched`,
//! and `fkx`).
//!
//! Grounded directly on the teacher's `memory::heap`: a
//! [`linked_list_allocator::LockedHeap`] installed as the
//! `#[global_allocator]`, backed by a fixed virtual range the
//! bootloader is assumed to have already mapped (spec §1's "bootloader
//! handoff past the point `boot::entry` is called" is out of scope, so
//! this crate does not walk page tables to map its own heap — see
//! `vmm::fault`'s identical assumption for fault-time mappings).
//! Unlike the teacher's `DummyAllocator` fallback that returns null
//! before the heap is enabled, any allocation attempted before
//! [`init`] runs simply has undefined behavior, since `init` is always
//! the first thing [`crate::boot::entry`] calls.

use linked_list_allocator::LockedHeap;

use crate::vmm::layout::{KERNEL_HEAP_SIZE, KERNEL_HEAP_START};

#[cfg(not(test))]
#[global_allocator]
static KERNEL_HEAP: LockedHeap = LockedHeap::empty();

/// Initialize the global allocator over `[KERNEL_HEAP_START,
/// KERNEL_HEAP_START + KERNEL_HEAP_SIZE)`. Must be the first thing
/// [`crate::boot::entry`] does; everything after it may allocate.
///
/// # Safety
/// `KERNEL_HEAP_START..+KERNEL_HEAP_SIZE` must already be mapped
/// read/write and not otherwise in use.
#[cfg(not(test))]
pub unsafe fn init() {
    KERNEL_HEAP.lock().init(KERNEL_HEAP_START as *mut u8, KERNEL_HEAP_SIZE);
}

/// Host-side unit tests run under `std`, which supplies its own global
/// allocator; this crate's heap is never installed under `#[cfg(test)]`.
#[cfg(test)]
pub unsafe fn init() {}
