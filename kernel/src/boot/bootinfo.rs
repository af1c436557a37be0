//! Bootloader-to-kernel handoff ABI (spec §6, "Boot interface").
//!
//! `repr(C)` so the bootloader and this kernel, potentially built by
//! different compiler versions, agree on layout without either side
//! depending on the other's crate internals.

/// Everything the bootloader hands off before jumping to
/// [`crate::boot::entry`]: the HHDM offset, the usable-memory map, ACPI
/// root pointer, kernel command line, and where the kernel's own image
/// sits in physical memory.
#[repr(C)]
pub struct BootInfo<'a> {
    /// Offset at which physical address 0 is mapped into the higher
    /// half (spec: "HHDM offset"); every `phys_to_virt` in
    /// [`crate::vmm::layout`] is relative to this.
    pub phys_memory_offset: u64,

    /// The firmware memory map, already copied out of bootloader-owned
    /// memory into space this kernel controls.
    pub memory_map: &'a [MemoryRegion],

    /// ACPI 2+ Root System Description Pointer, if firmware provided
    /// one.
    pub rsdp_addr: Option<u64>,

    /// Raw kernel command line, as given to the bootloader.
    pub cmdline: &'a str,

    /// Where the kernel's own ELF image lives in physical memory, for
    /// symbol-table slide computation and kexec/debugging.
    pub kernel_load_start: u64,
    pub kernel_load_size: u64,
}

/// Firmware-agnostic mirror of a UEFI/Multiboot2 memory descriptor.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct MemoryRegion {
    pub start: u64,
    pub len: u64,
    pub ty: MemoryRegionType,
}

#[repr(u32)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum MemoryRegionType {
    Usable = 1,
    Reserved = 2,
    AcpiReclaimable = 3,
    AcpiNvs = 4,
    Mmio = 5,
    BadMemory = 0xFFFF_FFFF,
}

impl<'a> BootInfo<'a> {
    /// The subset of `memory_map` the physical frame allocator may hand
    /// out (spec §4.1 "Physical frame allocator": seeded "from the
    /// bootloader's memory map").
    pub fn usable_ranges(&self) -> alloc::vec::Vec<crate::vmm::phys::UsableRange> {
        self.memory_map
            .iter()
            .filter(|r| r.ty == MemoryRegionType::Usable)
            .map(|r| crate::vmm::phys::UsableRange { start: r.start, end: r.start + r.len })
            .collect()
    }
}
