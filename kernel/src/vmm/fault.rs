//! Page fault handling: the five-step algorithm from spec §4.1 — find
//! the VMA, check permissions, consult the backing object (or zero-fill
//! for anonymous memory), resolve copy-on-write, and install the
//! mapping.

use x86_64::structures::idt::PageFaultErrorCode;
use x86_64::VirtAddr;

use crate::vmm::error::FaultOutcome;
use crate::vmm::folio::{self, FolioId, Mapping};
use crate::vmm::layout::PAGE_SIZE;
use crate::vmm::vma::VmaFlags;

/// Entry point called from `arch::x86_64::idt`'s `#PF` handler. Returns
/// `true` if the fault was resolved and execution may resume, `false`
/// if it must escalate to a fatal fault (unmapped address, permission
/// violation with no COW to perform, or allocation failure).
pub fn handle_page_fault(addr: VirtAddr, code: PageFaultErrorCode) -> bool {
    resolve(addr.as_u64(), code) == FaultOutcome::Handled
}

fn resolve(addr: u64, code: PageFaultErrorCode) -> FaultOutcome {
    let Some(mm) = crate::sched::current_address_space() else {
        return FaultOutcome::BadAddress;
    };

    let Some(vma_id) = crate::vmm::address_space::with(mm, |a| a.find_vma(addr)).flatten() else {
        return FaultOutcome::BadAddress;
    };

    let is_write = code.contains(PageFaultErrorCode::CAUSED_BY_WRITE);
    let is_exec = code.contains(PageFaultErrorCode::INSTRUCTION_FETCH);

    let (flags, anon_vma, object, page_offset) = match crate::vmm::vma::with(vma_id, |v| {
        (v.flags, v.anon_vma, v.object, v.page_offset_for(addr))
    }) {
        Some(t) => t,
        None => return FaultOutcome::BadAddress,
    };

    if is_write && !flags.contains(VmaFlags::WRITE) {
        return FaultOutcome::BadAddress;
    }
    if is_exec && !flags.contains(VmaFlags::EXEC) {
        return FaultOutcome::BadAddress;
    }

    let page_present = code.contains(PageFaultErrorCode::PROTECTION_VIOLATION);
    if page_present && is_write {
        return resolve_cow(vma_id, addr);
    }

    let folio = if let Some(obj_id) = object {
        match crate::vmm::object::with_mut(obj_id, |o| {
            if let Some(existing) = o.lookup(page_offset) {
                Ok(existing)
            } else {
                let f = o.populate(page_offset)?;
                o.insert_folio(page_offset, f);
                Ok(f)
            }
        }) {
            Some(Ok(f)) => f,
            _ => return FaultOutcome::Oom,
        }
    } else {
        match folio::alloc_anonymous_zeroed() {
            Some(f) => {
                let av = ensure_anon_vma(vma_id, anon_vma, mm);
                folio::with_mut(f, |folio| {
                    folio.mapping = Mapping::Anonymous(av);
                    folio.index = page_offset;
                });
                f
            }
            None => return FaultOutcome::Oom,
        }
    };

    install(vma_id, page_offset, folio);
    FaultOutcome::Handled
}

/// Every anonymous VMA that has faulted in must have an anon_vma (spec
/// §3 invariant); the first anonymous fault through a VMA creates and
/// links one lazily rather than requiring `mmap` to pre-allocate one
/// that might never be needed.
fn ensure_anon_vma(
    vma_id: crate::vmm::vma::VmaId,
    existing: Option<crate::vmm::anon_vma::AnonVmaId>,
    mm: crate::vmm::address_space::AddressSpaceId,
) -> crate::vmm::anon_vma::AnonVmaId {
    if let Some(av) = existing {
        return av;
    }
    let av = crate::vmm::anon_vma::create();
    crate::vmm::anon_vma::link(av, mm);
    crate::vmm::vma::with_mut(vma_id, |v| v.anon_vma = Some(av));
    av
}

/// Copy-on-write: the faulting write hit a read-only-mapped shared
/// folio. If this mapper is its only owner, simply upgrade the mapping;
/// otherwise duplicate the folio's contents into a fresh private one,
/// rewire the mapping onto it, and drop the old folio's reference (spec
/// §4.1 step 5; end-to-end scenario 1).
fn resolve_cow(vma_id: crate::vmm::vma::VmaId, addr: u64) -> FaultOutcome {
    let Some((page_offset, object, anon_vma)) = crate::vmm::vma::with(vma_id, |v| {
        (v.page_offset_for(addr), v.object, v.anon_vma)
    }) else {
        return FaultOutcome::BadAddress;
    };

    let old_folio = if let Some(obj_id) = object {
        crate::vmm::object::with(obj_id, |o| o.lookup(page_offset)).flatten()
    } else {
        crate::vmm::vma::with(vma_id, |v| v.anon_pages.get(&page_offset).copied()).flatten()
    };

    // A write-protection fault implies some folio is already mapped
    // here; with none to copy from there is nothing to resolve.
    let Some(old) = old_folio else {
        return FaultOutcome::BadAddress;
    };

    let shared = folio::with(old, |f| f.refcount).unwrap_or(1) > 1;
    if !shared {
        install(vma_id, page_offset, old);
        return FaultOutcome::Handled;
    }

    let Some(new_folio) = folio::alloc_anonymous_zeroed() else {
        return FaultOutcome::Oom;
    };
    folio::copy_contents(old, new_folio);
    if let Some(av) = anon_vma {
        folio::with_mut(new_folio, |f| {
            f.mapping = Mapping::Anonymous(av);
            f.index = page_offset;
        });
    }
    if let Some(obj_id) = object {
        crate::vmm::object::with_mut(obj_id, |o| o.insert_folio(page_offset, new_folio));
    }

    install(vma_id, page_offset, new_folio);
    folio::put(old);
    FaultOutcome::Handled
}

/// Install `folio` as the mapping for `page_offset` within `vma_id`.
/// Object-backed VMAs already recorded this in the object's own folio
/// collection (the only place file/device RMAP looks); VMAs with no
/// backing object record it in the VMA's own `anon_pages` table instead.
fn install(vma_id: crate::vmm::vma::VmaId, page_offset: u64, folio: FolioId) {
    let object_backed = crate::vmm::vma::with(vma_id, |v| v.object.is_some()).unwrap_or(false);
    if !object_backed {
        crate::vmm::vma::with_mut(vma_id, |v| {
            v.anon_pages.insert(page_offset, folio);
        });
    }
    folio::with_mut(folio, |f| {
        if f.mapping == Mapping::None {
            f.index = page_offset;
        }
    });
    let _ = PAGE_SIZE;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vmm::address_space;
    use crate::vmm::object::create_anonymous;
    use crate::vmm::vma::Vma;

    #[test]
    fn object_backed_fault_populates_and_caches() {
        let mm = address_space::create();
        crate::sched::test_set_current_address_space(Some(mm));
        let obj = create_anonymous();
        address_space::with(mm, |a| {
            let mut vma = Vma::new(0x10_0000, 0x10_0000 + PAGE_SIZE as u64, VmaFlags::READ);
            vma.object = Some(obj);
            a.map(vma).unwrap();
        });

        let outcome = resolve(0x10_0000, PageFaultErrorCode::empty());
        assert_eq!(outcome, FaultOutcome::Handled);
        assert!(crate::vmm::object::with(obj, |o| o.lookup(0)).flatten().is_some());
    }

    #[test]
    fn unmapped_address_is_bad_address() {
        let mm = address_space::create();
        crate::sched::test_set_current_address_space(Some(mm));
        let outcome = resolve(0xdead_0000, PageFaultErrorCode::empty());
        assert_eq!(outcome, FaultOutcome::BadAddress);
    }

    #[test]
    fn write_to_read_only_vma_is_rejected() {
        let mm = address_space::create();
        crate::sched::test_set_current_address_space(Some(mm));
        address_space::with(mm, |a| {
            a.map(Vma::new(0x20_0000, 0x20_0000 + PAGE_SIZE as u64, VmaFlags::READ))
                .unwrap();
        });
        let outcome = resolve(0x20_0000, PageFaultErrorCode::CAUSED_BY_WRITE);
        assert_eq!(outcome, FaultOutcome::BadAddress);
    }

    #[test]
    fn anon_fault_links_folio_through_anon_vma() {
        let mm = address_space::create();
        crate::sched::test_set_current_address_space(Some(mm));
        address_space::with(mm, |a| {
            a.map(Vma::new(0x50_0000, 0x50_0000 + PAGE_SIZE as u64, VmaFlags::READ))
                .unwrap();
        });

        resolve(0x50_0000, PageFaultErrorCode::empty());

        let vma_id = address_space::with(mm, |a| a.find_vma(0x50_0000)).flatten().unwrap();
        let av = crate::vmm::vma::with(vma_id, |v| v.anon_vma).unwrap();
        assert!(av.is_some());
        let folio = crate::vmm::vma::with(vma_id, |v| *v.anon_pages.get(&0).unwrap()).unwrap();
        assert_eq!(
            crate::vmm::folio::with(folio, |f| f.mapping),
            Some(Mapping::Anonymous(av.unwrap()))
        );
    }

    #[test]
    fn sole_owner_write_fault_upgrades_in_place() {
        let mm = address_space::create();
        crate::sched::test_set_current_address_space(Some(mm));
        address_space::with(mm, |a| {
            a.map(Vma::new(0x40_0000, 0x40_0000 + PAGE_SIZE as u64, VmaFlags::READ | VmaFlags::WRITE))
                .unwrap();
        });
        resolve(0x40_0000, PageFaultErrorCode::empty());

        let vma_id = address_space::with(mm, |a| a.find_vma(0x40_0000)).flatten().unwrap();
        let original = crate::vmm::vma::with(vma_id, |v| *v.anon_pages.get(&0).unwrap()).unwrap();

        let outcome = resolve(
            0x40_0000,
            PageFaultErrorCode::CAUSED_BY_WRITE | PageFaultErrorCode::PROTECTION_VIOLATION,
        );
        assert_eq!(outcome, FaultOutcome::Handled);

        let after = crate::vmm::vma::with(vma_id, |v| *v.anon_pages.get(&0).unwrap()).unwrap();
        assert_eq!(after, original, "sole owner upgrades in place, no copy needed");
    }

    #[test]
    fn shared_write_fault_copies_and_drops_old_reference() {
        // End-to-end scenario 1: a write to a folio shared by more than
        // one mapper copies rather than mutating in place, and the old
        // folio's refcount falls back to what only the other mapper holds.
        let mm = address_space::create();
        crate::sched::test_set_current_address_space(Some(mm));
        address_space::with(mm, |a| {
            a.map(Vma::new(0x30_0000, 0x30_0000 + PAGE_SIZE as u64, VmaFlags::READ | VmaFlags::WRITE))
                .unwrap();
        });
        resolve(0x30_0000, PageFaultErrorCode::empty());

        let vma_id = address_space::with(mm, |a| a.find_vma(0x30_0000)).flatten().unwrap();
        let original = crate::vmm::vma::with(vma_id, |v| *v.anon_pages.get(&0).unwrap()).unwrap();

        // Simulate a second mapper (e.g. a forked child) sharing the folio.
        crate::vmm::folio::get(original);
        assert_eq!(crate::vmm::folio::with(original, |f| f.refcount), Some(2));

        let outcome = resolve(
            0x30_0000,
            PageFaultErrorCode::CAUSED_BY_WRITE | PageFaultErrorCode::PROTECTION_VIOLATION,
        );
        assert_eq!(outcome, FaultOutcome::Handled);

        let after = crate::vmm::vma::with(vma_id, |v| *v.anon_pages.get(&0).unwrap()).unwrap();
        assert_ne!(after, original, "COW must install a fresh folio");
        assert_eq!(crate::vmm::folio::with(original, |f| f.refcount), Some(1));
        assert_eq!(crate::vmm::folio::with(after, |f| f.refcount), Some(1));
    }
}
