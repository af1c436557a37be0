//! Reverse mapping: given a folio, find every address space that maps
//! it. Anonymous folios are enumerated via their `anon_vma`'s fork
//! chain; file/device folios via the backing object's `i_mmap` list.

use alloc::vec::Vec;

use crate::vmm::address_space::AddressSpaceId;
use crate::vmm::folio::{FolioId, Mapping};

/// Every address space that might hold a mapping of `folio`, deduped.
/// Used by reclaim (to unmap before eviction) and by `munmap`'s
/// COW-unshare path.
pub fn owning_address_spaces(folio: FolioId) -> Vec<AddressSpaceId> {
    let mapping = match crate::vmm::folio::with(folio, |f| f.mapping) {
        Some(m) => m,
        None => return Vec::new(),
    };

    let mut out = Vec::new();
    match mapping {
        Mapping::None => {}
        Mapping::Anonymous(anon_vma) => {
            crate::vmm::anon_vma::for_each_chain(anon_vma, |mm| {
                if !out.contains(&mm) {
                    out.push(mm);
                }
            });
        }
        Mapping::Object(obj) => {
            let vmas = crate::vmm::object::with(obj, |o| o.mappings().to_vec()).unwrap_or_default();
            for vma_id in vmas {
                if let Some(mm) = crate::vmm::address_space::owner_of(vma_id) {
                    if !out.contains(&mm) {
                        out.push(mm);
                    }
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vmm::folio::{alloc_anonymous_zeroed, with_mut, Mapping};

    #[test]
    fn anonymous_folio_resolves_to_its_forked_address_spaces() {
        let root = crate::vmm::anon_vma::create();
        let child = crate::vmm::anon_vma::fork(root);
        let mm_a = AddressSpaceId(11);
        let mm_b = AddressSpaceId(12);
        crate::vmm::anon_vma::link(root, mm_a);
        crate::vmm::anon_vma::link(child, mm_b);

        let folio = alloc_anonymous_zeroed().unwrap();
        with_mut(folio, |f| f.mapping = Mapping::Anonymous(child));

        let mut spaces = owning_address_spaces(folio);
        spaces.sort_by_key(|a| a.0);
        assert_eq!(spaces, alloc::vec![mm_a, mm_b]);
    }

    #[test]
    fn unmapped_folio_has_no_owners() {
        let folio = alloc_anonymous_zeroed().unwrap();
        assert!(owning_address_spaces(folio).is_empty());
    }

    #[test]
    fn object_backed_folio_resolves_via_i_mmap_and_vma_owner() {
        use crate::vmm::address_space;
        use crate::vmm::object::create_anonymous;
        use crate::vmm::vma::{Vma, VmaFlags};

        let mm = address_space::create();
        let obj = create_anonymous();
        let vma_id = address_space::with(mm, |a| {
            let mut vma = Vma::new(0x4000, 0x5000, VmaFlags::READ);
            vma.object = Some(obj);
            a.map(vma).unwrap()
        })
        .unwrap();

        let folio = alloc_anonymous_zeroed().unwrap();
        with_mut(folio, |f| f.mapping = Mapping::Object(obj));

        let spaces = owning_address_spaces(folio);
        assert_eq!(spaces, alloc::vec![mm]);
        let _ = vma_id;
    }
}
