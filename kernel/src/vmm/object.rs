//! `vm_object`: the thing a VMA maps pages *of* — anonymous memory, a
//! file, or a device's MMIO region. Owns the folio collection keyed by
//! page offset and the list of VMAs mapping it (`i_mmap`), for RMAP
//! walks over file-backed (as opposed to anonymous) memory.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::sync::spinlock::SpinLock;
use crate::vmm::error::VmErr;
use crate::vmm::folio::FolioId;
use crate::vmm::vma::VmaId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VmObjectId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Anonymous,
    File,
    Device,
}

/// Vtable for the operations a backing object must support, mirroring
/// the teacher's `VmFlags`-adjacent trait-object pattern for per-kind
/// behavior (see `memory::virt`'s permission checks) generalized to
/// per-kind I/O.
pub trait ObjectOps: Send + Sync {
    /// Materialize the folio for `offset` (page index), reading it in
    /// from backing storage. Anonymous objects never need this — their
    /// folios are zero-filled on first fault and never have the
    /// corresponding vm_object populated ahead of time.
    fn populate(&self, offset: u64) -> Result<FolioId, VmErr>;

    /// Flush one dirty folio back to backing storage.
    fn write_folio(&self, offset: u64, folio: FolioId) -> Result<(), VmErr>;

    /// Flush up to `folios.len()` adjacent dirty folios in one batch, for
    /// the writeback daemon's clustering.
    fn write_folios(&self, folios: &[(u64, FolioId)]) -> Result<(), VmErr> {
        for &(off, id) in folios {
            self.write_folio(off, id)?;
        }
        Ok(())
    }
}

struct AnonymousOps;
impl ObjectOps for AnonymousOps {
    fn populate(&self, _offset: u64) -> Result<FolioId, VmErr> {
        crate::vmm::folio::alloc_anonymous_zeroed().ok_or(VmErr::NoMemory)
    }

    fn write_folio(&self, _offset: u64, _folio: FolioId) -> Result<(), VmErr> {
        Ok(())
    }
}

pub struct VmObject {
    pub kind: ObjectKind,
    ops: alloc::sync::Arc<dyn ObjectOps>,
    /// Folios already materialized, keyed by page offset.
    folios: BTreeMap<u64, FolioId>,
    /// Shadow entries for recently evicted offsets (refault detection).
    shadows: BTreeMap<u64, crate::vmm::folio::ShadowEntry>,
    /// VMAs mapping this object (`i_mmap`), for file-backed RMAP.
    i_mmap: Vec<VmaId>,
    pub dirty: bool,
    refcount: u32,
}

impl VmObject {
    fn new(kind: ObjectKind, ops: alloc::sync::Arc<dyn ObjectOps>) -> Self {
        VmObject {
            kind,
            ops,
            folios: BTreeMap::new(),
            shadows: BTreeMap::new(),
            i_mmap: Vec::new(),
            dirty: false,
            refcount: 1,
        }
    }

    pub fn lookup(&self, offset: u64) -> Option<FolioId> {
        self.folios.get(&offset).copied()
    }

    pub fn insert_folio(&mut self, offset: u64, folio: FolioId) {
        self.folios.insert(offset, folio);
        self.shadows.remove(&offset);
    }

    pub fn record_eviction(&mut self, offset: u64, generation: u64) {
        self.folios.remove(&offset);
        self.shadows
            .insert(offset, crate::vmm::folio::ShadowEntry { evicted_at_generation: generation });
    }

    pub fn shadow(&self, offset: u64) -> Option<crate::vmm::folio::ShadowEntry> {
        self.shadows.get(&offset).copied()
    }

    pub fn populate(&self, offset: u64) -> Result<FolioId, VmErr> {
        self.ops.populate(offset)
    }

    pub fn write_folio(&self, offset: u64, folio: FolioId) -> Result<(), VmErr> {
        self.ops.write_folio(offset, folio)
    }

    pub fn add_mapping(&mut self, vma: VmaId) {
        if !self.i_mmap.contains(&vma) {
            self.i_mmap.push(vma);
        }
    }

    pub fn remove_mapping(&mut self, vma: VmaId) {
        self.i_mmap.retain(|&v| v != vma);
    }

    pub fn mappings(&self) -> &[VmaId] {
        &self.i_mmap
    }

    pub fn dirty_offsets(&self) -> impl Iterator<Item = (u64, FolioId)> + '_ {
        self.folios.iter().map(|(&o, &f)| (o, f))
    }
}

struct Arena {
    objects: Vec<Option<VmObject>>,
}

impl Arena {
    const fn new() -> Self {
        Arena { objects: Vec::new() }
    }

    fn insert(&mut self, obj: VmObject) -> VmObjectId {
        let id = self.objects.len() as u32;
        self.objects.push(Some(obj));
        VmObjectId(id)
    }
}

static ARENA: SpinLock<Arena> = SpinLock::new(Arena::new());

pub fn create_anonymous() -> VmObjectId {
    ARENA
        .lock()
        .insert(VmObject::new(ObjectKind::Anonymous, alloc::sync::Arc::new(AnonymousOps)))
}

pub fn create_with_ops(kind: ObjectKind, ops: alloc::sync::Arc<dyn ObjectOps>) -> VmObjectId {
    ARENA.lock().insert(VmObject::new(kind, ops))
}

pub fn with<R>(id: VmObjectId, f: impl FnOnce(&VmObject) -> R) -> Option<R> {
    let arena = ARENA.lock();
    arena.objects.get(id.0 as usize)?.as_ref().map(f)
}

pub fn with_mut<R>(id: VmObjectId, f: impl FnOnce(&mut VmObject) -> R) -> Option<R> {
    let mut arena = ARENA.lock();
    arena.objects.get_mut(id.0 as usize)?.as_mut().map(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_populate_yields_distinct_zeroed_folios() {
        let id = create_anonymous();
        let f1 = with(id, |o| o.populate(0)).unwrap().unwrap();
        let f2 = with(id, |o| o.populate(1)).unwrap().unwrap();
        assert_ne!(f1, f2);
    }

    #[test]
    fn insert_then_lookup_round_trips() {
        let id = create_anonymous();
        let folio = crate::vmm::folio::alloc_anonymous_zeroed().unwrap();
        with_mut(id, |o| o.insert_folio(3, folio)).unwrap();
        assert_eq!(with(id, |o| o.lookup(3)).unwrap(), Some(folio));
        assert_eq!(with(id, |o| o.lookup(4)).unwrap(), None);
    }

    #[test]
    fn eviction_leaves_a_shadow_entry() {
        let id = create_anonymous();
        let folio = crate::vmm::folio::alloc_anonymous_zeroed().unwrap();
        with_mut(id, |o| o.insert_folio(5, folio)).unwrap();
        with_mut(id, |o| o.record_eviction(5, 42)).unwrap();
        assert_eq!(with(id, |o| o.lookup(5)).unwrap(), None);
        assert_eq!(
            with(id, |o| o.shadow(5)).unwrap().map(|s| s.evicted_at_generation),
            Some(42)
        );
    }
}
