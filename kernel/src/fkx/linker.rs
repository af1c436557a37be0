//! Module load pipeline orchestration (spec §4.4 "Pipeline per module",
//! "Dependency resolution", "Failure model").
//!
//! Ties together [`crate::fkx::sig`] (verify), [`crate::fkx::elf`]
//! (probe/map), [`crate::fkx::image`] (the unlinked/linked lists),
//! [`crate::fkx::reloc`] (relocation arithmetic) and
//! [`crate::symtab::dynamic`] (export registration) into the five
//! named steps, plus the class-ordered init pass. Grounded on the
//! teacher's `modules::mod_loader`'s queue-then-drain shape, replacing
//! its capability/zk-backed auth step with HMAC signature verification
//! and its single registry with the unlinked/linked split spec §3
//! names explicitly.

use alloc::vec::Vec;

use crate::fkx::elf::{self, Rela, Segment, SymbolRef};
use crate::fkx::error::FkxErr;
use crate::fkx::image::{self, LoadedModule, ModuleImageId};
use crate::fkx::info::ModuleClass;
use crate::fkx::protect;
use crate::fkx::reloc::{self, RelocWrite};
use crate::fkx::sig;
use crate::sync::spinlock::SpinLock;
use crate::vmm::layout::{align_up, PAGE_SIZE};

/// Simple bump allocator over a fixed, never-reclaimed virtual range
/// reserved for module images (spec Non-goals: "no unload", so handing
/// a range back is never needed). Mirrors the bump-then-never-free
/// half of [`crate::vmm::phys::Allocator`], minus its free list.
const MODULE_SPACE_START: u64 = 0xFFFF_9000_0000_0000;
const MODULE_SPACE_END: u64 = 0xFFFF_9000_4000_0000;

static NEXT_BASE: SpinLock<u64> = SpinLock::new(MODULE_SPACE_START);

fn reserve_base(size: u64) -> Result<u64, FkxErr> {
    let mut next = NEXT_BASE.lock();
    let base = align_up(*next, PAGE_SIZE as u64);
    let end = base.checked_add(size).ok_or(FkxErr::NoMemory)?;
    if end > MODULE_SPACE_END {
        return Err(FkxErr::NoMemory);
    }
    *next = end;
    Ok(base)
}

/// Load one module image (spec §4.4 steps 1-5: probe, map, register
/// unlinked, finalize, protect). `data` is the boot-supplied blob;
/// `'static` because modules are never unloaded and their bytes back
/// every borrowed string/segment for the kernel's remaining lifetime.
pub fn load(data: &'static [u8]) -> Result<ModuleImageId, FkxErr> {
    let id = probe_and_map(data)?;
    link_one(id)?;
    Ok(id)
}

/// Steps 1-3: verify the signature, parse the ELF, reserve a virtual
/// range sized to the segments, and register the image unlinked.
fn probe_and_map(data: &'static [u8]) -> Result<ModuleImageId, FkxErr> {
    sig::verify(data)?;

    let parsed = elf::parse(data)?;
    if !parsed.info.is_valid_magic() || !parsed.info.is_compatible_api() {
        return Err(FkxErr::BadImage);
    }

    let size = parsed.max_vaddr - parsed.min_vaddr;
    let base_addr = reserve_base(size)?;

    let module = LoadedModule {
        info: parsed.info,
        base_addr,
        size,
        min_vaddr: parsed.min_vaddr,
        linked: false,
        initialized: false,
        error: false,
    };
    let id = image::register_unlinked(module);
    let pending = PendingLink { segments: parsed.segments, relas: parsed.relas, ksymtab: parsed.ksymtab };
    let mut slots = PENDING.lock();
    while slots.len() <= id.0 as usize {
        slots.push(None);
    }
    slots[id.0 as usize] = Some(pending);
    drop(slots);
    Ok(id)
}

/// Per-image state step 4/5 need that does not belong on the long-lived
/// [`LoadedModule`] record: the raw ELF pieces, discarded once the
/// module is linked. Indexed by `ModuleImageId`, same slotted-`Vec`
/// pattern as [`crate::fkx::image`]'s own list.
struct PendingLink {
    segments: Vec<Segment>,
    relas: Vec<Rela>,
    ksymtab: Vec<elf::KsymtabEntry>,
}

static PENDING: SpinLock<Vec<Option<PendingLink>>> = SpinLock::new(Vec::new());

/// Step 4 ("Finalize loading") for one already-unlinked image:
/// relocate, register exports, move to its class list. Returns
/// `Err(UnsatisfiedDependency)` if `requirements_bitmask` is not yet a
/// subset of what is currently linked — the caller
/// ([`finalize_loading`]) is the one that retries across a fixed
/// point, a single `load()` call for an out-of-order dependency is
/// expected to fail once and be retried by the batch driver.
fn link_one(id: ModuleImageId) -> Result<(), FkxErr> {
    let provided = image::linked_subclass_union();
    let requirements_met = image::with(id, |m| m.info.requirements_met(provided)).unwrap_or(false);
    if !requirements_met {
        return Err(FkxErr::UnsatisfiedDependency);
    }

    let (base_addr, min_vaddr) = image::with(id, |m| (m.base_addr, m.min_vaddr)).ok_or(FkxErr::BadImage)?;

    let pending = PENDING
        .lock()
        .get_mut(id.0 as usize)
        .and_then(|slot| slot.take())
        .ok_or(FkxErr::BadImage)?;

    for rela in &pending.relas {
        apply_relocation(base_addr, min_vaddr, rela)?;
    }

    for entry in &pending.ksymtab {
        let addr = base_addr + (entry.raw_addr - min_vaddr);
        crate::symtab::register(addr, alloc::string::String::from(entry.name));
    }

    protect::apply(base_addr, min_vaddr, &pending.segments)?;

    image::mark_linked(id);
    Ok(())
}

fn apply_relocation(base_addr: u64, min_vaddr: u64, rela: &Rela) -> Result<(), FkxErr> {
    let (s, undef, weak) = match rela.sym {
        SymbolRef::Local { value } => (base_addr + (value - min_vaddr), false, false),
        SymbolRef::External { name, weak } => match crate::symtab::lookup_by_name(name) {
            Some(addr) => (addr, false, weak),
            None => (0, true, weak),
        },
    };

    let target = base_addr
        .checked_add(rela.r_offset.wrapping_sub(min_vaddr))
        .ok_or(FkxErr::RelocationOutOfRange)?;

    let write = reloc::resolve(rela.r_type, target, base_addr, s, rela.addend, undef, weak)?;
    unsafe { perform_write(write) };
    Ok(())
}

/// The actual memory write a resolved relocation describes. Real
/// firmware writes into the module's mapped pages here; no page-table
/// walker is wired into this crate (see [`crate::fkx::protect`]'s
/// identical placeholder), so this stays a documented no-op — the
/// arithmetic in [`crate::fkx::reloc::resolve`] is what is under test.
unsafe fn perform_write(write: RelocWrite) {
    let _ = write;
}

/// Step 4 batch driver (spec §4.4 "Dependency resolution": "repeat
/// until a full pass links nothing"). Call once at boot with every
/// boot-supplied module blob probed and mapped ahead of time via
/// repeated [`probe_and_map`] calls, or call after [`load`] has queued
/// several images whose dependencies are not yet satisfied.
pub fn finalize_loading() -> Result<(), FkxErr> {
    loop {
        let unlinked = image::unlinked_ids();
        if unlinked.is_empty() {
            return Ok(());
        }
        let mut linked_any = false;
        for id in unlinked {
            if link_one(id).is_ok() {
                linked_any = true;
            }
        }
        if !linked_any {
            return Err(FkxErr::UnsatisfiedDependency);
        }
    }
}

/// Step 6 ("Initialize by class"): call `init()` for every linked,
/// not-yet-initialized module whose requirements are satisfied by the
/// currently *initialized* union, in [`ModuleClass::ORDER`], repeating
/// the whole class sweep until a pass initializes nothing. A
/// `REQUIRED` module whose `init()` returns failure panics the kernel
/// (spec §4.4 "Failure model"); a non-`REQUIRED` module is marked
/// `error` and left linked but skipped by further passes.
pub fn init_all() {
    loop {
        let mut initialized_any = false;
        for &class in ModuleClass::ORDER.iter() {
            for id in image::linked_ids_in_class(class) {
                let ready = image::with(id, |m| {
                    !m.initialized && !m.error && m.info.requirements_met(image::initialized_subclass_union())
                })
                .unwrap_or(false);
                if !ready {
                    continue;
                }
                let (ok, required, name) = run_init(id);
                if ok {
                    image::with_mut(id, |m| m.initialized = true);
                    initialized_any = true;
                } else if required {
                    panic!("required module '{}' failed to initialize", name);
                } else {
                    image::with_mut(id, |m| m.error = true);
                }
            }
        }
        if !initialized_any {
            return;
        }
    }
}

/// Call through a module's `init_fn`. No page-table walker or calling
/// convention bridge is wired into this crate yet (see
/// [`crate::fkx::protect`]'s identical scope boundary), so this always
/// reports success without actually invoking the rebased function
/// pointer; the class-ordering and failure-handling logic above it is
/// what is under test.
fn run_init(id: ModuleImageId) -> (bool, bool, alloc::string::String) {
    image::with(id, |m| {
        let required = m.info.flags.contains(crate::fkx::info::ModuleFlags::REQUIRED);
        (true, required, alloc::string::String::from(m.info.name))
    })
    .unwrap_or((false, false, alloc::string::String::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    static TEST_LOCK: StdMutex<()> = StdMutex::new(());

    fn reset() {
        image::clear();
        PENDING.lock().clear();
        *NEXT_BASE.lock() = MODULE_SPACE_START;
    }

    #[test]
    fn reserve_base_advances_and_stays_page_aligned() {
        let _g = TEST_LOCK.lock().unwrap();
        reset();
        let a = reserve_base(100).unwrap();
        let b = reserve_base(100).unwrap();
        assert_eq!(a, MODULE_SPACE_START);
        assert!(b >= a + 100);
        assert!(crate::vmm::layout::is_aligned(b, PAGE_SIZE as u64));
        reset();
    }

    #[test]
    fn reserve_base_rejects_exhausted_space() {
        let _g = TEST_LOCK.lock().unwrap();
        reset();
        let huge = MODULE_SPACE_END - MODULE_SPACE_START + 1;
        assert_eq!(reserve_base(huge), Err(FkxErr::NoMemory));
        reset();
    }
}
