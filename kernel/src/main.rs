//! Binary entry point. The architecture-specific trampoline that lands
//! here (multiboot2/limine stub, outside this crate's scope per spec
//! §1) is expected to provide a `_start` that sets up an initial stack
//! and calls [`kernel::boot::entry`] with a populated
//! [`kernel::BootInfo`]; this binary target exists so the crate
//! produces a linkable kernel image at all; the real handoff glue
//! (assembly preamble, linker script, multiboot header) lives outside
//! this crate's scope and is not reproduced here.
#![no_std]
#![no_main]

extern crate kernel;
