//! Anonymous reverse-mapping groups.
//!
//! An `anon_vma` is the root of the set of VMAs (across possibly several
//! address spaces, after `fork`) that may contain a mapping of a given
//! anonymous folio; an `anon_vma_chain` is one VMA's membership link into
//! that set. The textbook implementation links these with raw pointers
//! in both directions, which is exactly the kind of cyclic, aliased
//! graph safe Rust cannot express without `unsafe`. Per the design
//! notes, both are modeled here as arena indices instead: an
//! [`AnonVmaId`]/[`AnonVmaChainId`] is as stable as a pointer but carries
//! no lifetime or aliasing claim, so the graph can be walked and mutated
//! through an ordinary lock.

use alloc::vec::Vec;

use crate::sync::spinlock::SpinLock;
use crate::vmm::address_space::AddressSpaceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnonVmaId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnonVmaChainId(pub u32);

struct AnonVma {
    /// Root of a fork()'d family shares one id; children point back here.
    parent: Option<AnonVmaId>,
    refcount: u32,
    chains: Vec<AnonVmaChainId>,
}

struct AnonVmaChain {
    anon_vma: AnonVmaId,
    mm: AddressSpaceId,
}

struct Arena {
    vmas: Vec<Option<AnonVma>>,
    chains: Vec<Option<AnonVmaChain>>,
}

impl Arena {
    const fn new() -> Self {
        Arena {
            vmas: Vec::new(),
            chains: Vec::new(),
        }
    }

    fn new_anon_vma(&mut self, parent: Option<AnonVmaId>) -> AnonVmaId {
        let id = self.vmas.len() as u32;
        self.vmas.push(Some(AnonVma {
            parent,
            refcount: 1,
            chains: Vec::new(),
        }));
        AnonVmaId(id)
    }

    fn link(&mut self, anon_vma: AnonVmaId, mm: AddressSpaceId) -> AnonVmaChainId {
        let chain_id = AnonVmaChainId(self.chains.len() as u32);
        self.chains.push(Some(AnonVmaChain { anon_vma, mm }));
        if let Some(Some(v)) = self.vmas.get_mut(anon_vma.0 as usize) {
            v.chains.push(chain_id);
        }
        chain_id
    }

    fn unlink(&mut self, chain: AnonVmaChainId) {
        if let Some(slot) = self.chains.get_mut(chain.0 as usize) {
            if let Some(c) = slot.take() {
                if let Some(Some(v)) = self.vmas.get_mut(c.anon_vma.0 as usize) {
                    v.chains.retain(|&id| id != chain);
                }
            }
        }
    }
}

static ARENA: SpinLock<Arena> = SpinLock::new(Arena::new());

/// Create a fresh anon_vma for a newly anonymous-mapped VMA, with no
/// parent (not yet shared by a fork).
pub fn create() -> AnonVmaId {
    ARENA.lock().new_anon_vma(None)
}

/// Fork: create a child anon_vma that records `parent` for RMAP walks to
/// climb, per the "every parent in the fork chain must be walked" COW
/// invariant.
pub fn fork(parent: AnonVmaId) -> AnonVmaId {
    ARENA.lock().new_anon_vma(Some(parent))
}

pub fn link(anon_vma: AnonVmaId, mm: AddressSpaceId) -> AnonVmaChainId {
    ARENA.lock().link(anon_vma, mm)
}

pub fn unlink(chain: AnonVmaChainId) {
    ARENA.lock().unlink(chain)
}

/// Walk this anon_vma and every ancestor in its fork chain, calling `f`
/// with each chain's owning address space. Used by `rmap` to enumerate
/// every VMA that might map a given anonymous folio.
pub fn for_each_chain(anon_vma: AnonVmaId, mut f: impl FnMut(AddressSpaceId)) {
    let arena = ARENA.lock();
    let mut cur = Some(anon_vma);
    while let Some(id) = cur {
        let Some(Some(v)) = arena.vmas.get(id.0 as usize) else {
            break;
        };
        for &chain_id in &v.chains {
            if let Some(Some(c)) = arena.chains.get(chain_id.0 as usize) {
                f(c.mm);
            }
        }
        cur = v.parent;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fork_chain_is_walked_to_the_root() {
        let root = create();
        let child = fork(root);
        let mm_root = AddressSpaceId(1);
        let mm_child = AddressSpaceId(2);
        link(root, mm_root);
        link(child, mm_child);

        let mut seen = Vec::new();
        for_each_chain(child, |mm| seen.push(mm));
        assert_eq!(seen, alloc::vec![mm_child, mm_root]);
    }

    #[test]
    fn unlink_removes_from_parent_chain_list() {
        let root = create();
        let mm = AddressSpaceId(7);
        let chain = link(root, mm);
        unlink(chain);
        let mut seen = Vec::new();
        for_each_chain(root, |m| seen.push(m));
        assert!(seen.is_empty());
    }
}
