//! `mm`: one process's address space — its VMA set, accounting, and the
//! operations (`map`/`unmap`/`protect`/`fork`) that mutate it.
//!
//! The VMA set itself is a sorted `BTreeMap` keyed by start address
//! rather than the teacher's ad hoc `Vec` scan in `memory::virt`, since
//! `find_vma`/overlap-checking are on every fault's hot path and the
//! teacher's own region catalog (`memory::region`) already favors a
//! sorted table for the same reason.

use alloc::collections::BTreeMap;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::sync::spinlock::SpinLock;
use crate::vmm::error::VmErr;
use crate::vmm::layout::PAGE_SIZE;
use crate::vmm::vma::{Vma, VmaFlags, VmaId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressSpaceId(pub u32);

/// Which address space owns each live VMA, so file/device RMAP (which
/// only has a `vm_object`'s `i_mmap` list of [`VmaId`]s to start from)
/// can recover the owning `mm`. Kept separate from [`AddressSpace`]
/// itself since a VMA never needs to ask this about itself on its own
/// fault path — only cross-object RMAP walks do.
static VMA_OWNER: SpinLock<BTreeMap<u32, AddressSpaceId>> = SpinLock::new(BTreeMap::new());

pub fn owner_of(vma: VmaId) -> Option<AddressSpaceId> {
    VMA_OWNER.lock().get(&vma.0).copied()
}

struct Inner {
    /// VMAs ordered by start address; invariant checked on every
    /// insert: no two entries may overlap.
    vmas: BTreeMap<u64, VmaId>,
    refcount: u32,
}

pub struct AddressSpace {
    inner: SpinLock<Inner>,
    pub rss_pages: AtomicU64,
    vma_seq: AtomicU32,
    self_id: AtomicU32,
}

impl AddressSpace {
    const fn new() -> Self {
        AddressSpace {
            inner: SpinLock::new(Inner { vmas: BTreeMap::new(), refcount: 1 }),
            rss_pages: AtomicU64::new(0),
            vma_seq: AtomicU32::new(0),
            self_id: AtomicU32::new(u32::MAX),
        }
    }

    pub fn vma_sequence(&self) -> u32 {
        self.vma_seq.load(Ordering::Acquire)
    }

    fn bump_sequence(&self) {
        self.vma_seq.fetch_add(1, Ordering::AcqRel);
    }

    /// The VMA whose range contains `addr`, if any.
    pub fn find_vma(&self, addr: u64) -> Option<VmaId> {
        let inner = self.inner.lock();
        let (_, &id) = inner.vmas.range(..=addr).next_back()?;
        if crate::vmm::vma::with(id, |v| v.contains(addr)) == Some(true) {
            Some(id)
        } else {
            None
        }
    }

    fn overlaps_existing(&self, inner: &Inner, start: u64, end: u64) -> bool {
        inner.vmas.range(..end).next_back().map_or(false, |(_, &id)| {
            crate::vmm::vma::with(id, |v| v.overlaps(start, end)) == Some(true)
        })
    }

    /// Insert a new VMA, rejecting unaligned ranges and overlaps with
    /// an existing mapping (no `MAP_FIXED`-style replace semantics).
    pub fn map(&self, vma: Vma) -> Result<VmaId, VmErr> {
        if !crate::vmm::layout::is_aligned(vma.start, PAGE_SIZE as u64)
            || !crate::vmm::layout::is_aligned(vma.end, PAGE_SIZE as u64)
            || vma.is_empty()
        {
            return Err(VmErr::Misaligned);
        }
        if !vma.flags.is_wx_safe() {
            return Err(VmErr::PermissionDenied);
        }
        let mut inner = self.inner.lock();
        if self.overlaps_existing(&inner, vma.start, vma.end) {
            return Err(VmErr::Overlap);
        }
        let start = vma.start;
        let object = vma.object;
        vma.notify_open();
        let id = crate::vmm::vma::insert(vma);
        if let Some(obj) = object {
            crate::vmm::object::with_mut(obj, |o| o.add_mapping(id));
        }
        inner.vmas.insert(start, id);
        drop(inner);
        let mine = self.self_id.load(Ordering::Acquire);
        if mine != u32::MAX {
            VMA_OWNER.lock().insert(id.0, AddressSpaceId(mine));
        }
        self.bump_sequence();
        Ok(id)
    }

    /// Remove the whole VMA covering `[start, end)` exactly; partial
    /// unmap (splitting a VMA) is not implemented — callers must unmap
    /// whole regions, matching the spec's Non-goal on VMA splitting.
    pub fn unmap(&self, start: u64, end: u64) -> Result<(), VmErr> {
        let mut inner = self.inner.lock();
        let id = *inner.vmas.get(&start).ok_or(VmErr::NoSuchMapping)?;
        let matches = crate::vmm::vma::with(id, |v| v.end == end) == Some(true);
        if !matches {
            return Err(VmErr::Unsupported);
        }
        inner.vmas.remove(&start);
        drop(inner);
        VMA_OWNER.lock().remove(&id.0);
        if let Some(vma) = crate::vmm::vma::remove(id) {
            if let Some(obj) = vma.object {
                crate::vmm::object::with_mut(obj, |o| o.remove_mapping(id));
            }
            vma.notify_close();
        }
        self.bump_sequence();
        Ok(())
    }

    /// Change the permission flags of the VMA exactly covering
    /// `[start, end)`.
    pub fn protect(&self, start: u64, end: u64, flags: VmaFlags) -> Result<(), VmErr> {
        if !flags.is_wx_safe() {
            return Err(VmErr::PermissionDenied);
        }
        let inner = self.inner.lock();
        let &id = inner.vmas.get(&start).ok_or(VmErr::NoSuchMapping)?;
        drop(inner);
        let matched = crate::vmm::vma::with_mut(id, |v| {
            if v.end == end {
                v.flags = flags;
                true
            } else {
                false
            }
        });
        if matched == Some(true) {
            Ok(())
        } else {
            Err(VmErr::Unsupported)
        }
    }

    pub fn nr_vmas(&self) -> usize {
        self.inner.lock().vmas.len()
    }

    /// Every live VMA, for `fork` to walk and duplicate.
    fn vma_ids(&self) -> alloc::vec::Vec<VmaId> {
        self.inner.lock().vmas.values().copied().collect()
    }
}

struct Arena {
    spaces: alloc::vec::Vec<Option<AddressSpace>>,
}

impl Arena {
    const fn new() -> Self {
        Arena { spaces: alloc::vec::Vec::new() }
    }
}

static ARENA: SpinLock<Arena> = SpinLock::new(Arena::new());

pub fn create() -> AddressSpaceId {
    let mut arena = ARENA.lock();
    let id = arena.spaces.len() as u32;
    let space = AddressSpace::new();
    space.self_id.store(id, Ordering::Release);
    arena.spaces.push(Some(space));
    AddressSpaceId(id)
}

pub fn with<R>(id: AddressSpaceId, f: impl FnOnce(&AddressSpace) -> R) -> Option<R> {
    let arena = ARENA.lock();
    arena.spaces.get(id.0 as usize)?.as_ref().map(f)
}

/// Duplicate `parent` into a freshly created child address space (spec
/// §4.1's `fork`). Every VMA is cloned into the child; a VMA with an
/// `anon_vma` gets the child linked into that anon_vma's chain via
/// `anon_vma::fork`/`link` rather than sharing the parent's chain
/// outright, so each side's own later forks stay independent. Every
/// folio already mapped through a cloned VMA's `anon_pages` has its
/// refcount bumped, since parent and child now both hold a reference to
/// the same physical page until one of them writes it (COW, resolved by
/// `fault::resolve_cow`).
pub fn fork(parent: AddressSpaceId) -> Option<AddressSpaceId> {
    let vma_ids = with(parent, |a| a.vma_ids())?;
    let child = create();

    for vma_id in vma_ids {
        let Some(mut cloned) = crate::vmm::vma::with(vma_id, |v| v.clone()) else {
            continue;
        };

        if let Some(av) = cloned.anon_vma {
            let child_av = crate::vmm::anon_vma::fork(av);
            crate::vmm::anon_vma::link(child_av, child);
            cloned.anon_vma = Some(child_av);
        }

        for &folio in cloned.anon_pages.values() {
            crate::vmm::folio::get(folio);
        }

        let _ = with(child, |a| a.map(cloned));
    }

    Some(child)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlapping_map_is_rejected() {
        let mm = create();
        with(mm, |a| {
            a.map(Vma::new(0x1000, 0x3000, VmaFlags::READ)).unwrap();
            let err = a.map(Vma::new(0x2000, 0x4000, VmaFlags::READ)).unwrap_err();
            assert_eq!(err, VmErr::Overlap);
        });
    }

    #[test]
    fn find_vma_locates_containing_range() {
        let mm = create();
        with(mm, |a| {
            a.map(Vma::new(0x1000, 0x3000, VmaFlags::READ)).unwrap();
            assert!(a.find_vma(0x1500).is_some());
            assert!(a.find_vma(0x5000).is_none());
        });
    }

    #[test]
    fn unmap_then_remap_same_range_succeeds() {
        let mm = create();
        with(mm, |a| {
            a.map(Vma::new(0x1000, 0x2000, VmaFlags::READ)).unwrap();
            a.unmap(0x1000, 0x2000).unwrap();
            assert_eq!(a.nr_vmas(), 0);
            a.map(Vma::new(0x1000, 0x2000, VmaFlags::READ | VmaFlags::WRITE))
                .unwrap();
            assert_eq!(a.nr_vmas(), 1);
        });
    }

    #[test]
    fn write_and_exec_together_is_rejected() {
        let mm = create();
        with(mm, |a| {
            let err = a
                .map(Vma::new(0x1000, 0x2000, VmaFlags::WRITE | VmaFlags::EXEC))
                .unwrap_err();
            assert_eq!(err, VmErr::PermissionDenied);
        });
    }

    #[test]
    fn fork_duplicates_every_vma() {
        let parent = create();
        with(parent, |a| {
            a.map(Vma::new(0x1000, 0x2000, VmaFlags::READ)).unwrap();
            a.map(Vma::new(0x3000, 0x4000, VmaFlags::READ | VmaFlags::WRITE))
                .unwrap();
        });

        let child = fork(parent).unwrap();
        assert_eq!(with(child, |a| a.nr_vmas()), Some(2));
        with(child, |a| {
            assert!(a.find_vma(0x1500).is_some());
            assert!(a.find_vma(0x3500).is_some());
        });
    }

    #[test]
    fn fork_shares_anon_folio_with_bumped_refcount() {
        let parent = create();
        crate::sched::test_set_current_address_space(Some(parent));
        with(parent, |a| {
            a.map(Vma::new(0x5000, 0x6000, VmaFlags::READ | VmaFlags::WRITE))
                .unwrap();
        });

        let outcome = crate::vmm::fault::handle_page_fault(
            x86_64::VirtAddr::new(0x5000),
            x86_64::structures::idt::PageFaultErrorCode::empty(),
        );
        assert!(outcome);

        let parent_vma = with(parent, |a| a.find_vma(0x5000)).flatten().unwrap();
        let folio = crate::vmm::vma::with(parent_vma, |v| *v.anon_pages.get(&0).unwrap()).unwrap();
        assert_eq!(crate::vmm::folio::with(folio, |f| f.refcount), Some(1));

        let child = fork(parent).unwrap();

        let child_vma = with(child, |a| a.find_vma(0x5000)).flatten().unwrap();
        let child_folio = crate::vmm::vma::with(child_vma, |v| *v.anon_pages.get(&0).unwrap()).unwrap();
        assert_eq!(child_folio, folio, "fork shares the folio, it does not copy eagerly");
        assert_eq!(crate::vmm::folio::with(folio, |f| f.refcount), Some(2));

        let anon_vma = crate::vmm::vma::with(child_vma, |v| v.anon_vma).unwrap();
        assert_ne!(
            anon_vma,
            crate::vmm::vma::with(parent_vma, |v| v.anon_vma).unwrap(),
            "child gets its own anon_vma linked into the parent's fork chain"
        );
    }
}
