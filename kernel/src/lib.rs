//! Core x86-64 kernel substrate.
//!
//! This crate is the runtime substrate device drivers, filesystems, and
//! user processes execute on: per-address-space virtual memory management
//! and reclaim, a class-dispatched scheduler, SMP concurrency primitives,
//! a load-time module linker (FKX), and the kernel symbol table.
//!
//! Out of scope, and deliberately not implemented here: bootloader
//! handoff past the point `boot::entry` is called, the ELF file format
//! itself, the block/VFS layer, filesystem implementations, device
//! drivers beyond a timer tick and a serial console, and the user-space
//! ABI.
#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(test), no_main)]
#![cfg_attr(not(test), feature(alloc_error_handler))]

extern crate alloc;

pub mod arch;
pub mod boot;
pub mod fkx;
pub mod heap;
pub mod log;
pub mod panic;
pub mod sched;
pub mod sync;
pub mod symtab;
pub mod vmm;

pub use boot::BootInfo;
