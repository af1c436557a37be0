//! Same-page merging (KSM).
//!
//! Per spec §4.1: periodically hash pages in `MERGEABLE` VMAs, keep a
//! stable tree of pages already verified to be shared and an unstable
//! tree of not-yet-verified hash collisions; when a second folio hashes
//! the same as an unstable candidate, byte-compare them and, on a true
//! match, remap both to a single shared read-only physical page
//! (ordinary COW on the next write splits them back apart).
//!
//! Gated behind the `ksm` feature — it is an optional daemon, not a
//! correctness requirement of the VMM.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::sync::spinlock::SpinLock;
use crate::vmm::folio::{self, FolioId};
use crate::vmm::layout::PAGE_SIZE;

/// A candidate folio discovered by the scanner: which object/offset it
/// currently lives at, for rewriting on a merge.
#[derive(Clone, Copy)]
struct Candidate {
    folio: FolioId,
}

struct Trees {
    /// Verified-unique pages already shared read-only, keyed by content
    /// hash. A hash collision here with a *different* byte pattern is
    /// possible but vanishingly unlikely at the content sizes involved;
    /// treated as "same page" per the spec's simplified merge rule.
    stable: BTreeMap<u64, FolioId>,
    /// Hash-collided but not yet byte-verified.
    unstable: BTreeMap<u64, Candidate>,
    merges: u64,
}

impl Trees {
    const fn new() -> Self {
        Trees { stable: BTreeMap::new(), unstable: BTreeMap::new(), merges: 0 }
    }
}

static TREES: SpinLock<Trees> = SpinLock::new(Trees::new());
static MERGEABLE: SpinLock<Vec<FolioId>> = SpinLock::new(Vec::new());

/// Register a folio from a `MERGEABLE` VMA as a scan candidate.
pub fn register_candidate(folio: FolioId) {
    MERGEABLE.lock().push(folio);
}

fn hash_folio(id: FolioId) -> Option<u64> {
    folio::with(id, |f| f.frame).map(|frame| {
        let va = crate::vmm::layout::phys_to_virt(frame.addr());
        let bytes = unsafe { core::slice::from_raw_parts(va.as_ptr::<u8>(), PAGE_SIZE) };
        fnv1a(bytes)
    })
}

fn bytes_equal(a: FolioId, b: FolioId) -> bool {
    let read = |id: FolioId| -> Option<Vec<u8>> {
        folio::with(id, |f| f.frame).map(|frame| {
            let va = crate::vmm::layout::phys_to_virt(frame.addr());
            let bytes = unsafe { core::slice::from_raw_parts(va.as_ptr::<u8>(), PAGE_SIZE) };
            bytes.to_vec()
        })
    };
    match (read(a), read(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// One scan pass: hash every registered candidate folio, promote a
/// second hash-match into the stable tree by merging the two folios
/// into one shared read-only page. Returns the number of merges
/// performed this pass.
pub fn scan_pass() -> usize {
    let batch: Vec<FolioId> = core::mem::take(&mut *MERGEABLE.lock());
    let mut merged = 0;

    for folio in batch {
        let Some(hash) = hash_folio(folio) else { continue };

        let mut trees = TREES.lock();
        if let Some(&shared) = trees.stable.get(&hash) {
            if shared != folio && bytes_equal(shared, folio) {
                drop(trees);
                merge_into(shared, folio);
                merged += 1;
                continue;
            }
        }

        if let Some(candidate) = trees.unstable.remove(&hash) {
            drop(trees);
            if candidate.folio != folio && bytes_equal(candidate.folio, folio) {
                TREES.lock().stable.insert(hash, candidate.folio);
                merge_into(candidate.folio, folio);
                merged += 1;
            } else {
                MERGEABLE.lock().push(folio);
            }
        } else {
            trees.unstable.insert(hash, Candidate { folio });
            MERGEABLE.lock().push(folio);
        }
    }
    merged
}

/// Fold `duplicate` into `canonical`: every future reference to
/// `duplicate` should instead use `canonical`; callers (the object/VMA
/// layer) rewrite their folio pointer and drop `duplicate`'s reference.
/// This module only manages the tree bookkeeping and refcounts; it has
/// no reach into which VMAs map `duplicate` (that is an RMAP walk the
/// caller already has access to via `crate::vmm::rmap`).
fn merge_into(canonical: FolioId, duplicate: FolioId) {
    folio::get(canonical);
    folio::put(duplicate);
    TREES.lock().merges += 1;
}

pub fn merge_count() -> u64 {
    TREES.lock().merges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_zeroed_pages_merge_on_second_scan() {
        let a = folio::alloc_anonymous_zeroed().unwrap();
        let b = folio::alloc_anonymous_zeroed().unwrap();
        register_candidate(a);
        let first = scan_pass();
        assert_eq!(first, 0);
        register_candidate(b);
        let second = scan_pass();
        assert_eq!(second, 1);
        assert_eq!(merge_count(), 1);
    }
}
