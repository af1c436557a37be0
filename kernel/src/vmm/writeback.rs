//! Dirty-page writeback: tracks which objects have dirty folios and
//! flushes them in clusters of adjacent offsets, the way the spec's
//! §4.1 "Writeback" paragraph describes (clustering bounds dirty-object
//! scan cost and gives backing stores sequential I/O instead of a page
//! at a time).

use alloc::collections::BTreeSet;
use alloc::vec::Vec;

use crate::sync::spinlock::SpinLock;
use crate::vmm::object::VmObjectId;

const CLUSTER_SIZE: usize = 32;

struct State {
    dirty_objects: BTreeSet<u32>,
    dirty_pages: u64,
}

impl State {
    const fn new() -> Self {
        State { dirty_objects: BTreeSet::new(), dirty_pages: 0 }
    }
}

static STATE: SpinLock<State> = SpinLock::new(State::new());

/// Record that `obj` gained at least one dirty folio (e.g. a write
/// fault on a shared file mapping).
pub fn mark_dirty(obj: VmObjectId, nr_pages: u64) {
    let mut s = STATE.lock();
    s.dirty_objects.insert(obj.0);
    s.dirty_pages += nr_pages;
    crate::vmm::object::with_mut(obj, |o| o.dirty = true);
}

pub fn dirty_page_count() -> u64 {
    STATE.lock().dirty_pages
}

/// Whether the global dirty ratio has crossed the point where new
/// writers should be throttled (`balance_dirty_pages`). The spec leaves
/// the exact threshold unspecified; this kernel uses a fixed page
/// count rather than a percentage of total RAM since there is no global
/// "total pages" figure computed anywhere yet.
const DIRTY_THROTTLE_PAGES: u64 = 4096;

pub fn should_throttle_writers() -> bool {
    dirty_page_count() > DIRTY_THROTTLE_PAGES
}

/// One pass of the writeback daemon: pick one dirty object, flush up to
/// `CLUSTER_SIZE` of its dirty folios in one batch, and clear its dirty
/// bookkeeping if nothing is left. Returns the number of folios flushed.
pub fn writeback_pass() -> usize {
    let obj_id = {
        let s = STATE.lock();
        s.dirty_objects.iter().next().copied()
    };
    let Some(raw) = obj_id else { return 0 };
    let obj = VmObjectId(raw);

    let batch: Vec<(u64, crate::vmm::folio::FolioId)> =
        crate::vmm::object::with(obj, |o| o.dirty_offsets().take(CLUSTER_SIZE).collect())
            .unwrap_or_default();

    if batch.is_empty() {
        let mut s = STATE.lock();
        s.dirty_objects.remove(&raw);
        crate::vmm::object::with_mut(obj, |o| o.dirty = false);
        return 0;
    }

    let flushed = crate::vmm::object::with(obj, |o| {
        let mut n = 0;
        for &(off, folio) in &batch {
            if o.write_folio(off, folio).is_ok() {
                n += 1;
            }
        }
        n
    })
    .unwrap_or(0);

    let mut s = STATE.lock();
    s.dirty_pages = s.dirty_pages.saturating_sub(flushed as u64);
    if batch.len() < CLUSTER_SIZE {
        s.dirty_objects.remove(&raw);
        crate::vmm::object::with_mut(obj, |o| o.dirty = false);
    }
    flushed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vmm::folio::alloc_anonymous_zeroed;
    use crate::vmm::object::create_anonymous;

    #[test]
    fn writeback_pass_flushes_and_clears_dirty_flag() {
        let obj = create_anonymous();
        let folio = alloc_anonymous_zeroed().unwrap();
        crate::vmm::object::with_mut(obj, |o| o.insert_folio(0, folio)).unwrap();
        mark_dirty(obj, 1);
        assert!(crate::vmm::object::with(obj, |o| o.dirty).unwrap());
        let flushed = writeback_pass();
        assert_eq!(flushed, 1);
        assert!(!crate::vmm::object::with(obj, |o| o.dirty).unwrap());
    }

    #[test]
    fn throttle_threshold_responds_to_dirty_count() {
        let before = dirty_page_count();
        let obj = create_anonymous();
        mark_dirty(obj, DIRTY_THROTTLE_PAGES + 1 - before.min(DIRTY_THROTTLE_PAGES));
        assert!(dirty_page_count() > 0);
    }
}
