//! Folios: the head "page" of a `2^order` run of physically contiguous
//! frames, and the global arena they live in.
//!
//! Per the design notes on cyclic RMAP graphs, folios are not referenced
//! by raw pointer: every owner (a VMA's page table entry, a vm_object's
//! page collection, an LRU list) holds a [`FolioId`], a stable index into
//! a single arena ([`FOLIOS`]) guarded by one lock. This sidesteps the
//! aliasing problems a pointer-linked LRU/RMAP graph would otherwise
//! raise in safe Rust.

use alloc::vec::Vec;

use bitflags::bitflags;

use crate::sync::spinlock::SpinLock;
use crate::vmm::anon_vma::AnonVmaId;
use crate::vmm::object::VmObjectId;
use crate::vmm::phys::Frame;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct FolioFlags: u32 {
        const RESERVED   = 1 << 0;
        const SLAB       = 1 << 1;
        const HEAD       = 1 << 2;
        const TAIL       = 1 << 3;
        const DIRTY      = 1 << 4;
        const ACTIVE     = 1 << 5;
        const REFERENCED = 1 << 6;
        const LRU        = 1 << 7;
        const LOCKED     = 1 << 8;
    }
}

/// What a folio's `mapping` field points at — an anonymous fold (COW
/// group) or the vm_object it backs a page of. `None` for a folio that
/// has been allocated but not yet linked to either (e.g. fresh from the
/// allocator, about to be installed by the fault handler).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mapping {
    None,
    Anonymous(AnonVmaId),
    Object(VmObjectId),
}

/// An eviction record left behind when a folio is reclaimed, so a
/// subsequent refault can measure how cold the working set got. Encoded
/// as a plain struct rather than a bit-tagged integer (the teacher's
/// sources never reached this far) since the arena already gives every
/// value a stable, typed home.
#[derive(Clone, Copy, Debug)]
pub struct ShadowEntry {
    pub evicted_at_generation: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub struct FolioId(pub u32);

pub struct Folio {
    pub order: u8,
    pub flags: FolioFlags,
    pub refcount: u32,
    pub frame: Frame,
    pub mapping: Mapping,
    /// Page-offset index within the owning object/anon_vma's first VMA.
    pub index: u64,
    pub numa_node: u8,
}

impl Folio {
    pub fn is_anonymous(&self) -> bool {
        matches!(self.mapping, Mapping::Anonymous(_))
    }

    pub fn nr_pages(&self) -> usize {
        1usize << self.order
    }
}

struct Arena {
    folios: Vec<Option<Folio>>,
    free_slots: Vec<u32>,
}

impl Arena {
    const fn new() -> Self {
        Arena {
            folios: Vec::new(),
            free_slots: Vec::new(),
        }
    }

    fn insert(&mut self, folio: Folio) -> FolioId {
        if let Some(slot) = self.free_slots.pop() {
            self.folios[slot as usize] = Some(folio);
            FolioId(slot)
        } else {
            let id = self.folios.len() as u32;
            self.folios.push(Some(folio));
            FolioId(id)
        }
    }

    fn remove(&mut self, id: FolioId) -> Option<Folio> {
        let slot = self.folios.get_mut(id.0 as usize)?;
        let folio = slot.take();
        if folio.is_some() {
            self.free_slots.push(id.0);
        }
        folio
    }
}

static FOLIOS: SpinLock<Arena> = SpinLock::new(Arena::new());

/// Allocate a fresh order-0 anonymous folio backed by a zeroed frame.
pub fn alloc_anonymous_zeroed() -> Option<FolioId> {
    let frame = crate::vmm::phys::alloc_zeroed()?;
    Some(insert(Folio {
        order: 0,
        flags: FolioFlags::HEAD,
        refcount: 1,
        frame,
        mapping: Mapping::None,
        index: 0,
        numa_node: 0,
    }))
}

pub fn insert(folio: Folio) -> FolioId {
    FOLIOS.lock().insert(folio)
}

pub fn with<R>(id: FolioId, f: impl FnOnce(&Folio) -> R) -> Option<R> {
    let arena = FOLIOS.lock();
    arena.folios.get(id.0 as usize)?.as_ref().map(f)
}

pub fn with_mut<R>(id: FolioId, f: impl FnOnce(&mut Folio) -> R) -> Option<R> {
    let mut arena = FOLIOS.lock();
    arena.folios.get_mut(id.0 as usize)?.as_mut().map(f)
}

/// Increment refcount, returning the new count.
pub fn get(id: FolioId) -> u32 {
    with_mut(id, |f| {
        f.refcount += 1;
        f.refcount
    })
    .unwrap_or(0)
}

/// Copy `src`'s frame contents into `dst`'s frame, for COW duplication
/// (spec §4.1 step 5: "copy the folio").
pub fn copy_contents(src: FolioId, dst: FolioId) {
    let frames = with(src, |s| s.frame).zip(with(dst, |d| d.frame));
    if let Some((src_frame, dst_frame)) = frames {
        crate::vmm::phys::copy(src_frame, dst_frame);
    }
}

/// Decrement refcount; if it reaches zero, the folio is removed from the
/// arena and its frame returned to the physical allocator.
pub fn put(id: FolioId) {
    let should_free = with_mut(id, |f| {
        f.refcount = f.refcount.saturating_sub(1);
        f.refcount == 0
    });
    if should_free == Some(true) {
        if let Some(folio) = FOLIOS.lock().remove(id) {
            crate::vmm::phys::free(folio.frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refcount_reaching_zero_removes_from_arena() {
        let id = insert(Folio {
            order: 0,
            flags: FolioFlags::HEAD,
            refcount: 1,
            frame: Frame(0x2000),
            mapping: Mapping::None,
            index: 0,
            numa_node: 0,
        });
        assert!(with(id, |_| ()).is_some());
        put(id);
        assert!(with(id, |_| ()).is_none());
    }

    #[test]
    fn get_increments_and_put_decrements() {
        let id = insert(Folio {
            order: 0,
            flags: FolioFlags::HEAD,
            refcount: 1,
            frame: Frame(0x3000),
            mapping: Mapping::None,
            index: 0,
            numa_node: 0,
        });
        assert_eq!(get(id), 2);
        put(id);
        assert!(with(id, |_| ()).is_some());
        put(id);
        assert!(with(id, |_| ()).is_none());
    }

    #[test]
    fn freed_slots_are_reused() {
        let a = insert(Folio {
            order: 0,
            flags: FolioFlags::HEAD,
            refcount: 1,
            frame: Frame(0x4000),
            mapping: Mapping::None,
            index: 0,
            numa_node: 0,
        });
        put(a);
        let b = insert(Folio {
            order: 0,
            flags: FolioFlags::HEAD,
            refcount: 1,
            frame: Frame(0x5000),
            mapping: Mapping::None,
            index: 0,
            numa_node: 0,
        });
        assert_eq!(a, b);
        put(b);
    }
}
