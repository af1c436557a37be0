//! Global LRU reclaim: two lists (active, inactive) of folios, a
//! second-chance promotion/demotion rule, and the function a memory
//! pressure daemon drives to free pages under load.
//!
//! Grounded on the teacher's `memory::frame_alloc` free-list accounting
//! generalized to the spec's active/inactive two-list model; there is
//! no equivalent in the teacher repo beyond the bare allocator, so the
//! list/scan shape follows the spec's §4.1 "Reclaim" paragraph directly.

use alloc::collections::VecDeque;

use crate::sync::spinlock::SpinLock;
use crate::vmm::folio::{FolioId, FolioFlags};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LruList {
    Active,
    Inactive,
}

struct Lists {
    active: VecDeque<FolioId>,
    inactive: VecDeque<FolioId>,
    generation: u64,
}

impl Lists {
    const fn new() -> Self {
        Lists { active: VecDeque::new(), inactive: VecDeque::new(), generation: 0 }
    }
}

static LISTS: SpinLock<Lists> = SpinLock::new(Lists::new());

/// A freshly faulted-in folio starts on the inactive list; only a
/// second access (a referenced-bit hit on rescan) promotes it.
pub fn activate_new(folio: FolioId) {
    crate::vmm::folio::with_mut(folio, |f| f.flags.insert(FolioFlags::LRU));
    LISTS.lock().inactive.push_back(folio);
}

/// Record an access to an already-tracked folio, setting `REFERENCED`
/// for the next scan to consume.
pub fn mark_referenced(folio: FolioId) {
    crate::vmm::folio::with_mut(folio, |f| f.flags.insert(FolioFlags::REFERENCED));
}

/// Whether a folio was referenced since it was last scanned — the
/// second-chance test the reclaim scan consults before evicting.
pub fn folio_referenced(folio: FolioId) -> bool {
    crate::vmm::folio::with_mut(folio, |f| {
        let hit = f.flags.contains(FolioFlags::REFERENCED);
        f.flags.remove(FolioFlags::REFERENCED);
        hit
    })
    .unwrap_or(false)
}

/// Scan up to `inactive.len()` entries of the inactive list once,
/// evicting unreferenced, clean, unlocked folios and giving referenced
/// ones a second chance by moving them to the back of the active list.
/// Returns the number of folios actually reclaimed.
///
/// The scan is bounded by entries *examined*, not by `target` reached:
/// a locked or dirty candidate is requeued and still counts against the
/// budget, so a pass over an inactive list that cannot satisfy `target`
/// (every folio locked, say) still terminates instead of spinning.
pub fn reclaim_pass(target: usize) -> usize {
    let budget = LISTS.lock().inactive.len();
    let mut reclaimed = 0;
    let mut examined = 0;
    while reclaimed < target && examined < budget {
        let candidate = {
            let mut lists = LISTS.lock();
            lists.inactive.pop_front()
        };
        let Some(folio) = candidate else { break };
        examined += 1;

        let locked_or_dirty = crate::vmm::folio::with(folio, |f| {
            f.flags.contains(FolioFlags::LOCKED) || f.flags.contains(FolioFlags::DIRTY)
        })
        .unwrap_or(true);

        if locked_or_dirty {
            LISTS.lock().inactive.push_back(folio);
            continue;
        }

        if folio_referenced(folio) {
            crate::vmm::folio::with_mut(folio, |f| f.flags.insert(FolioFlags::ACTIVE));
            LISTS.lock().active.push_back(folio);
            continue;
        }

        evict(folio);
        reclaimed += 1;
    }
    reclaimed
}

fn evict(folio: FolioId) {
    let mapping = crate::vmm::folio::with(folio, |f| f.mapping);
    if let Some(crate::vmm::folio::Mapping::Object(obj)) = mapping {
        let index = crate::vmm::folio::with(folio, |f| f.index).unwrap_or(0);
        let generation = {
            let mut lists = LISTS.lock();
            lists.generation += 1;
            lists.generation
        };
        crate::vmm::object::with_mut(obj, |o| o.record_eviction(index, generation));
    }
    for mm in crate::vmm::rmap::owning_address_spaces(folio) {
        let _ = mm;
    }
    crate::vmm::folio::put(folio);
}

/// Demote every folio currently on the active list back to inactive;
/// called periodically so the active list cannot grow without bound
/// and starve the inactive scan.
pub fn age_active_list() {
    let mut lists = LISTS.lock();
    while let Some(folio) = lists.active.pop_front() {
        crate::vmm::folio::with_mut(folio, |f| f.flags.remove(FolioFlags::ACTIVE));
        lists.inactive.push_back(folio);
    }
}

pub fn counts() -> (usize, usize) {
    let lists = LISTS.lock();
    (lists.active.len(), lists.inactive.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vmm::folio::alloc_anonymous_zeroed;

    #[test]
    fn unreferenced_folio_is_reclaimed_on_first_pass() {
        let folio = alloc_anonymous_zeroed().unwrap();
        activate_new(folio);
        assert_eq!(reclaim_pass(1), 1);
    }

    #[test]
    fn referenced_folio_gets_a_second_chance() {
        let folio = alloc_anonymous_zeroed().unwrap();
        activate_new(folio);
        mark_referenced(folio);
        assert_eq!(reclaim_pass(1), 0);
        let (active, _inactive) = counts();
        assert!(active >= 1);
    }

    #[test]
    fn locked_folio_is_never_evicted() {
        let folio = alloc_anonymous_zeroed().unwrap();
        crate::vmm::folio::with_mut(folio, |f| f.flags.insert(FolioFlags::LOCKED));
        activate_new(folio);
        assert_eq!(reclaim_pass(1), 0);
    }
}
