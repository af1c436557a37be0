//! Page size constants and the handful of fixed virtual-address
//! landmarks the VMM needs: the higher-half direct map base (HHDM) the
//! bootloader reports, and the self-referencing PML4 slot used to walk
//! page tables without a separate physical-memory window.
//!
//! Grounded on the teacher's `memory::virt` self-ref-slot convention and
//! `memory::heap`'s fixed heap window.

use x86_64::{PhysAddr, VirtAddr};

pub const PAGE_SHIFT: u32 = 12;
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;
pub const HUGE_PAGE_SHIFT: u32 = 21;
pub const HUGE_PAGE_SIZE: usize = 1 << HUGE_PAGE_SHIFT;
/// Number of 4 KiB PTEs a single 2 MiB huge page replaces; the hugepage
/// collapse daemon checks exactly this many entries at a time.
pub const PTES_PER_HUGE_PAGE: usize = HUGE_PAGE_SIZE / PAGE_SIZE;

pub const SELFREF_PML4_SLOT: usize = 510;

pub const KERNEL_HEAP_START: usize = 0xFFFF_8800_0000_0000;
pub const KERNEL_HEAP_SIZE: usize = 4 * 1024 * 1024;

#[inline]
pub const fn align_down(addr: u64, align: u64) -> u64 {
    addr & !(align - 1)
}

#[inline]
pub const fn align_up(addr: u64, align: u64) -> u64 {
    align_down(addr + align - 1, align)
}

#[inline]
pub const fn is_aligned(addr: u64, align: u64) -> bool {
    addr & (align - 1) == 0
}

/// Higher-half direct map offset, set once from [`crate::boot::BootInfo`]
/// at entry. Every physical-to-virtual translation the VMM needs goes
/// through this rather than ad hoc per-subsystem offsets.
static HHDM_OFFSET: core::sync::atomic::AtomicU64 = core::sync::atomic::AtomicU64::new(0);

pub fn set_hhdm_offset(offset: u64) {
    HHDM_OFFSET.store(offset, core::sync::atomic::Ordering::SeqCst);
}

pub fn hhdm_offset() -> u64 {
    HHDM_OFFSET.load(core::sync::atomic::Ordering::Relaxed)
}

#[inline]
pub fn phys_to_virt(pa: PhysAddr) -> VirtAddr {
    VirtAddr::new(pa.as_u64() + hhdm_offset())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_helpers_round_correctly() {
        assert_eq!(align_down(0x1234, 0x1000), 0x1000);
        assert_eq!(align_up(0x1234, 0x1000), 0x2000);
        assert_eq!(align_up(0x1000, 0x1000), 0x1000);
        assert!(is_aligned(0x2000, 0x1000));
        assert!(!is_aligned(0x2001, 0x1000));
    }
}
