//! Virtual memory areas: one contiguous, uniformly-permissioned range of
//! an address space, per spec §3's VMA data model.

use alloc::collections::BTreeMap;

use bitflags::bitflags;

use crate::vmm::anon_vma::AnonVmaId;
use crate::vmm::folio::FolioId;
use crate::vmm::object::VmObjectId;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct VmaFlags: u32 {
        const READ        = 1 << 0;
        const WRITE       = 1 << 1;
        const EXEC        = 1 << 2;
        const SHARED      = 1 << 3;
        const LOCKED      = 1 << 4;
        const HUGEPAGE    = 1 << 5;
        const NO_HUGEPAGE = 1 << 6;
        const STACK       = 1 << 7;
        const GROWSDOWN   = 1 << 8;
    }
}

impl VmaFlags {
    /// W^X: a VMA may never be simultaneously writable and executable.
    pub fn is_wx_safe(self) -> bool {
        !(self.contains(VmaFlags::WRITE) && self.contains(VmaFlags::EXEC))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VmaId(pub u32);

/// Per-VMA callbacks a specialized mapping (e.g. a device region, or a
/// future stack-guard VMA) can override; the default set treats the VMA
/// as an ordinary object-backed or anonymous mapping.
pub trait VmaOps: Send + Sync {
    fn open(&self, _vma: &Vma) {}
    fn close(&self, _vma: &Vma) {}
    /// Called after the generic fault path decides a new folio is
    /// needed but before it is installed, letting specialized VMAs
    /// (e.g. `mmap`ed devices) supply something other than the default
    /// zero/`populate()` folio. `None` defers to the generic path.
    fn fault(&self, _vma: &Vma, _page_offset: u64) -> Option<crate::vmm::folio::FolioId> {
        None
    }
    fn page_mkwrite(&self, _vma: &Vma, _page_offset: u64) {}
}

struct DefaultVmaOps;
impl VmaOps for DefaultVmaOps {}

#[derive(Clone)]
pub struct Vma {
    pub start: u64,
    pub end: u64,
    pub flags: VmaFlags,
    pub object: Option<VmObjectId>,
    /// Offset into `object`, in pages, of `start`.
    pub pgoff: u64,
    pub anon_vma: Option<AnonVmaId>,
    /// The folio currently installed at each page offset of a VMA with
    /// no backing `object` (object-backed VMAs keep this in the
    /// object's own folio collection instead). Stands in for the page
    /// table's PTEs, which this crate does not walk or write (spec §1's
    /// "architecture-specific trampoline" boundary) — this is the
    /// in-crate bookkeeping the fault handler and `fork` need to find
    /// "what's mapped here right now" without one.
    pub anon_pages: BTreeMap<u64, FolioId>,
    ops: alloc::sync::Arc<dyn VmaOps>,
}

impl Vma {
    pub fn new(start: u64, end: u64, flags: VmaFlags) -> Self {
        debug_assert!(start < end);
        Vma {
            start,
            end,
            flags,
            object: None,
            pgoff: 0,
            anon_vma: None,
            anon_pages: BTreeMap::new(),
            ops: alloc::sync::Arc::new(DefaultVmaOps),
        }
    }

    pub fn with_ops(mut self, ops: alloc::sync::Arc<dyn VmaOps>) -> Self {
        self.ops = ops;
        self
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }

    pub fn overlaps(&self, start: u64, end: u64) -> bool {
        self.start < end && start < self.end
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Page offset (within the backing object) for a fault address
    /// known to lie inside this VMA.
    pub fn page_offset_for(&self, addr: u64) -> u64 {
        self.pgoff + (addr - self.start) / crate::vmm::layout::PAGE_SIZE as u64
    }

    pub fn fault_hook(&self, page_offset: u64) -> Option<crate::vmm::folio::FolioId> {
        self.ops.fault(self, page_offset)
    }

    pub fn notify_open(&self) {
        self.ops.open(self);
    }

    pub fn notify_close(&self) {
        self.ops.close(self);
    }
}

struct Arena {
    vmas: alloc::vec::Vec<Option<Vma>>,
    free_slots: alloc::vec::Vec<u32>,
}

impl Arena {
    const fn new() -> Self {
        Arena {
            vmas: alloc::vec::Vec::new(),
            free_slots: alloc::vec::Vec::new(),
        }
    }

    fn insert(&mut self, vma: Vma) -> VmaId {
        if let Some(slot) = self.free_slots.pop() {
            self.vmas[slot as usize] = Some(vma);
            VmaId(slot)
        } else {
            let id = self.vmas.len() as u32;
            self.vmas.push(Some(vma));
            VmaId(id)
        }
    }

    fn remove(&mut self, id: VmaId) -> Option<Vma> {
        let slot = self.vmas.get_mut(id.0 as usize)?;
        let vma = slot.take();
        if vma.is_some() {
            self.free_slots.push(id.0);
        }
        vma
    }
}

static ARENA: crate::sync::spinlock::SpinLock<Arena> =
    crate::sync::spinlock::SpinLock::new(Arena::new());

pub fn insert(vma: Vma) -> VmaId {
    ARENA.lock().insert(vma)
}

pub fn remove(id: VmaId) -> Option<Vma> {
    ARENA.lock().remove(id)
}

pub fn with<R>(id: VmaId, f: impl FnOnce(&Vma) -> R) -> Option<R> {
    let arena = ARENA.lock();
    arena.vmas.get(id.0 as usize)?.as_ref().map(f)
}

pub fn with_mut<R>(id: VmaId, f: impl FnOnce(&mut Vma) -> R) -> Option<R> {
    let mut arena = ARENA.lock();
    arena.vmas.get_mut(id.0 as usize)?.as_mut().map(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wx_safe_rejects_write_and_exec_together() {
        let rx = VmaFlags::READ | VmaFlags::EXEC;
        let rw = VmaFlags::READ | VmaFlags::WRITE;
        let rwx = VmaFlags::READ | VmaFlags::WRITE | VmaFlags::EXEC;
        assert!(rx.is_wx_safe());
        assert!(rw.is_wx_safe());
        assert!(!rwx.is_wx_safe());
    }

    #[test]
    fn contains_and_overlaps() {
        let vma = Vma::new(0x1000, 0x3000, VmaFlags::READ);
        assert!(vma.contains(0x1000));
        assert!(vma.contains(0x2fff));
        assert!(!vma.contains(0x3000));
        assert!(vma.overlaps(0x2000, 0x4000));
        assert!(!vma.overlaps(0x3000, 0x4000));
    }

    #[test]
    fn page_offset_advances_with_address() {
        let mut vma = Vma::new(0x1000, 0x5000, VmaFlags::READ);
        vma.pgoff = 10;
        assert_eq!(vma.page_offset_for(0x1000), 10);
        assert_eq!(
            vma.page_offset_for(0x1000 + crate::vmm::layout::PAGE_SIZE as u64),
            11
        );
    }
}
