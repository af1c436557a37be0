//! W^X page protection (spec §4.4 step 5: "for each PT_LOAD, set page
//! flags: R only by default, RW if PF_W, X cleared unless PF_X").
//!
//! Grounded on the same split [`crate::vmm::fault`] uses between
//! deciding *which* flags a mapping needs and actually writing a PTE:
//! [`flags_for`] is the pure, unit-testable half; [`apply`] is the
//! thin, currently-inert hook real page-table plumbing would hang off
//! (this crate's page tables are bootstrapped by the architecture
//! layer, not walked here — see `vmm::fault::install`'s identical
//! `let _ = ...;` placeholder for the same reason).

use crate::fkx::elf::Segment;
use crate::fkx::error::FkxErr;
use crate::vmm::vma::VmaFlags;

/// The permission bits one PT_LOAD segment maps to. Rejects a segment
/// that is both `PF_W` and `PF_X`: a loadable kernel module asking for
/// a writable-and-executable page is exactly what the `wx-audit`
/// feature exists to catch before it is ever mapped.
pub fn flags_for(seg: &Segment) -> Result<VmaFlags, FkxErr> {
    let mut flags = VmaFlags::READ;
    if seg.writable {
        flags |= VmaFlags::WRITE;
    }
    if seg.executable {
        flags |= VmaFlags::EXEC;
    }
    if cfg!(feature = "wx-audit") && !flags.is_wx_safe() {
        return Err(FkxErr::NotSupported);
    }
    Ok(flags)
}

/// Apply the computed flags to every PT_LOAD segment's pages, rebased
/// onto `base_addr`. Returns the per-segment flags it decided on so
/// callers (and tests) can audit the decision without a live page
/// table.
pub fn apply(base_addr: u64, min_vaddr: u64, segments: &[Segment]) -> Result<alloc::vec::Vec<VmaFlags>, FkxErr> {
    let mut decided = alloc::vec::Vec::with_capacity(segments.len());
    for seg in segments {
        let flags = flags_for(seg)?;
        let page_addr = base_addr + (seg.vaddr - min_vaddr);
        set_page_flags(page_addr, seg.mem_size, flags);
        decided.push(flags);
    }
    Ok(decided)
}

/// The actual PTE rewrite. A real implementation walks this module's
/// (kernel-address-space) page table entries covering `[addr, addr +
/// len)` and sets PRESENT/RW/NX accordingly, identical in spirit to
/// the fault handler's PTE install step. No page-table walker is wired
/// into this crate yet, so this is intentionally a no-op hook.
fn set_page_flags(addr: u64, len: u64, flags: VmaFlags) {
    let _ = (addr, len, flags);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(writable: bool, executable: bool) -> Segment {
        Segment {
            vaddr: 0x1000,
            mem_size: 0x1000,
            file_offset: 0,
            file_size: 0x1000,
            writable,
            executable,
        }
    }

    #[test]
    fn read_only_by_default() {
        let flags = flags_for(&seg(false, false)).unwrap();
        assert_eq!(flags, VmaFlags::READ);
    }

    #[test]
    fn writable_segment_gets_write_bit() {
        let flags = flags_for(&seg(true, false)).unwrap();
        assert!(flags.contains(VmaFlags::WRITE));
        assert!(!flags.contains(VmaFlags::EXEC));
    }

    #[test]
    fn executable_segment_gets_exec_bit() {
        let flags = flags_for(&seg(false, true)).unwrap();
        assert!(flags.contains(VmaFlags::EXEC));
        assert!(!flags.contains(VmaFlags::WRITE));
    }

    #[test]
    #[cfg_attr(not(feature = "wx-audit"), ignore)]
    fn writable_and_executable_is_rejected_under_wx_audit() {
        assert_eq!(flags_for(&seg(true, true)), Err(FkxErr::NotSupported));
    }
}
