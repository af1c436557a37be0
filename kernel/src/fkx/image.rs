//! Loaded module images and their lists (spec §3 "Loaded module
//! image"): one unlinked list plus one list per [`ModuleClass`], same
//! arena-with-stable-ids pattern as [`crate::vmm::object`]'s
//! `vm_object`s — a `Vec`-backed list rather than the source's
//! intrusive list, per the "prefer a library abstraction" design note.

use alloc::vec::Vec;

use crate::fkx::info::{ModuleClass, ModuleInfo};
use crate::sync::spinlock::SpinLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleImageId(pub u32);

/// `{info_pointer, base_addr, size, class, flags, linked, initialized,
/// raw_data_ptr, min_vaddr}` (spec §3). `info.class`/`info.flags`
/// already carry `class`/`flags`, so they are not duplicated here.
#[derive(Debug, Clone)]
pub struct LoadedModule {
    pub info: ModuleInfo,
    pub base_addr: u64,
    pub size: u64,
    pub min_vaddr: u64,
    pub linked: bool,
    pub initialized: bool,
    /// Set if `init()` failed and the module was not `REQUIRED` (spec
    /// §4.4 "Failure model"); such a module stays on its class list
    /// (it IS linked) but is skipped by further init passes.
    pub error: bool,
}

impl LoadedModule {
    /// Invariant from spec §3: `linked ⇒ relocations applied and
    /// symbols registered`; `initialized ⇒ linked`.
    #[cfg(test)]
    fn invariant_holds(&self) -> bool {
        !self.initialized || self.linked
    }
}

struct Lists {
    images: Vec<Option<LoadedModule>>,
    unlinked: Vec<ModuleImageId>,
    /// Indexed by `ModuleClass as usize`.
    linked_by_class: [Vec<ModuleImageId>; 5],
}

impl Lists {
    const fn new() -> Self {
        Lists {
            images: Vec::new(),
            unlinked: Vec::new(),
            linked_by_class: [Vec::new(), Vec::new(), Vec::new(), Vec::new(), Vec::new()],
        }
    }
}

static LISTS: SpinLock<Lists> = SpinLock::new(Lists::new());

/// Register a freshly mapped module on the unlinked list (spec §4.4
/// step 3, "Register unlinked").
pub fn register_unlinked(module: LoadedModule) -> ModuleImageId {
    let mut l = LISTS.lock();
    let id = ModuleImageId(l.images.len() as u32);
    l.images.push(Some(module));
    l.unlinked.push(id);
    id
}

pub fn unlinked_ids() -> Vec<ModuleImageId> {
    LISTS.lock().unlinked.clone()
}

/// Move `id` from the unlinked list onto its class's linked list (spec
/// §4.4 step 4: "relocate it, register its exported symbols, and move
/// it to its class list").
pub fn mark_linked(id: ModuleImageId) {
    let mut l = LISTS.lock();
    l.unlinked.retain(|&u| u != id);
    let class = l.images[id.0 as usize].as_ref().map(|m| m.info.class);
    if let Some(class) = class {
        if let Some(m) = l.images[id.0 as usize].as_mut() {
            m.linked = true;
        }
        l.linked_by_class[class as usize].push(id);
    }
}

pub fn linked_ids_in_class(class: ModuleClass) -> Vec<ModuleImageId> {
    LISTS.lock().linked_by_class[class as usize].clone()
}

/// The union of `subclass_bitmask` over every currently linked module
/// (spec §4.4 "Dependency resolution": `union_of_subclasses_provided_
/// by_linked_modules`).
pub fn linked_subclass_union() -> u64 {
    let l = LISTS.lock();
    l.linked_by_class
        .iter()
        .flatten()
        .filter_map(|id| l.images[id.0 as usize].as_ref())
        .fold(0u64, |acc, m| acc | m.info.subclass_bitmask)
}

/// The union of `subclass_bitmask` over modules that are linked AND
/// initialized (spec §4.4 step 6's init-order gating uses this, not
/// the plain linked union, so a module cannot initialize ahead of a
/// dependency that is merely linked but not yet run).
pub fn initialized_subclass_union() -> u64 {
    let l = LISTS.lock();
    l.linked_by_class
        .iter()
        .flatten()
        .filter_map(|id| l.images[id.0 as usize].as_ref())
        .filter(|m| m.initialized)
        .fold(0u64, |acc, m| acc | m.info.subclass_bitmask)
}

pub fn with<R>(id: ModuleImageId, f: impl FnOnce(&LoadedModule) -> R) -> Option<R> {
    LISTS.lock().images[id.0 as usize].as_ref().map(f)
}

pub fn with_mut<R>(id: ModuleImageId, f: impl FnOnce(&mut LoadedModule) -> R) -> Option<R> {
    LISTS.lock().images[id.0 as usize].as_mut().map(f)
}

#[cfg(test)]
pub fn clear() {
    let mut l = LISTS.lock();
    l.images.clear();
    l.unlinked.clear();
    for v in l.linked_by_class.iter_mut() {
        v.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    static TEST_LOCK: StdMutex<()> = StdMutex::new(());

    fn module(class: ModuleClass, subclass: u64, requirements: u64) -> LoadedModule {
        LoadedModule {
            info: ModuleInfo {
                magic: crate::fkx::info::FKX_MAGIC,
                api_version: crate::fkx::info::FKX_API_VERSION,
                name: "m",
                version: "0",
                author: "",
                description: "",
                flags: crate::fkx::info::ModuleFlags::empty(),
                class,
                subclass_bitmask: subclass,
                requirements_bitmask: requirements,
                depends: &[],
                init_fn_raw_addr: 0,
            },
            base_addr: 0x1000,
            size: 0x1000,
            min_vaddr: 0,
            linked: false,
            initialized: false,
            error: false,
        }
    }

    #[test]
    fn register_then_link_moves_between_lists() {
        let _g = TEST_LOCK.lock().unwrap();
        clear();
        let id = register_unlinked(module(ModuleClass::Driver, 1 << 3, 0));
        assert_eq!(unlinked_ids(), alloc::vec![id]);
        mark_linked(id);
        assert!(unlinked_ids().is_empty());
        assert_eq!(linked_ids_in_class(ModuleClass::Driver), alloc::vec![id]);
        assert_eq!(linked_subclass_union(), 1 << 3);
        clear();
    }

    #[test]
    fn invariant_holds_before_init() {
        let m = module(ModuleClass::Core, 0, 0);
        assert!(m.invariant_holds());
    }
}
