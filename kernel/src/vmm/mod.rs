//! Virtual Memory Manager and page reclaim (spec component C1, §4.1).
//!
//! Submodules map directly onto the data model in spec §3: address
//! spaces own VMAs, VMAs map vm_objects, vm_objects and anon_vmas own
//! folios, folios live on the global LRU and (optionally) the dirty
//! writeback list. `hugepage` and `ksm` are the two background daemons
//! described in §4.1 beyond plain fault/reclaim/writeback.

pub mod address_space;
pub mod anon_vma;
pub mod error;
pub mod fault;
pub mod folio;
pub mod hugepage;
#[cfg(feature = "ksm")]
pub mod ksm;
pub mod layout;
pub mod object;
pub mod phys;
pub mod reclaim;
pub mod rmap;
pub mod vma;
pub mod writeback;

/// Bring up the VMM: seed the physical allocator from the bootloader's
/// memory map and record the HHDM offset every physical-to-virtual
/// translation in this module depends on. Must run once, early in
/// [`crate::boot::entry`], before any fault can occur.
pub fn init(hhdm_offset: u64, usable: &[phys::UsableRange]) {
    layout::set_hhdm_offset(hhdm_offset);
    phys::init(usable);
}
