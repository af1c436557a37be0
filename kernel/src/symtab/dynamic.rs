//! Dynamic symbol registry: exports contributed by linked [`crate::fkx`]
//! modules.
//!
//! The source models this as a singly-linked list so entries can be
//! spliced in without an allocation per insert; under the "prefer a
//! library abstraction" design note (`SPEC_FULL.md` §A / spec's design
//! notes on intrusive lists) this is a plain growable `Vec` instead,
//! which gives the same O(1)-amortized insert with none of the raw
//! pointer bookkeeping. Guarded by the global IRQ-safe spinlock spec §5
//! calls out explicitly ("The symbol dynamic list uses a global
//! IRQ-safe spinlock"), since a stack trace printed from inside an
//! interrupt handler may need to read it.

use alloc::string::String;
use alloc::vec::Vec;

use crate::sync::spinlock::SpinLock;

#[derive(Debug, Clone)]
pub struct DynamicSymbol {
    pub addr: u64,
    pub name: String,
}

static REGISTRY: SpinLock<Vec<DynamicSymbol>> = SpinLock::new(Vec::new());

/// Add one module-exported symbol (spec §4.4 "Symbol export
/// registration"). Called once per `.fkx_ksymtab` entry, after
/// relocation has fixed up `addr` to the module's actual load address.
pub fn register(addr: u64, name: String) {
    let (mut guard, state) = REGISTRY.lock_irqsave();
    guard.push(DynamicSymbol { addr, name });
    REGISTRY.unlock_irqrestore(guard, state);
}

/// `unregister_ksymbols_in_range`: named in the source but never called
/// by any core path, per spec §9's open question ("modules cannot be
/// unloaded", so nothing retracts a dangling range). Kept as a public
/// function for a future unload path; harmless to call today since
/// modules are load-once and permanent.
pub fn unregister_in_range(start: u64, end: u64) {
    let (mut guard, state) = REGISTRY.lock_irqsave();
    guard.retain(|s| !(s.addr >= start && s.addr < end));
    REGISTRY.unlock_irqrestore(guard, state);
}

pub fn lookup_by_name(name: &str) -> Option<u64> {
    let (guard, state) = REGISTRY.lock_irqsave();
    let hit = guard.iter().find(|s| s.name == name).map(|s| s.addr);
    REGISTRY.unlock_irqrestore(guard, state);
    hit
}

/// Linear-scan fallback (spec §4.5 "Operations": "fall back to linear
/// scan of the dynamic registry"): the largest entry address `<= addr`.
/// Returns a leaked `&'static str` copy of the name since callers
/// (stack traces, `lookup_by_addr`'s public signature) expect a
/// `'static` lifetime the way the static table's compiled-in names are;
/// dynamic symbol names are rare enough on the lookup path (panic/trace
/// only) that this one-time leak per distinct name is an acceptable
/// trade against threading a borrow through the spinlock guard.
pub fn lookup_by_addr(addr: u64) -> Option<(&'static str, u64)> {
    let (guard, state) = REGISTRY.lock_irqsave();
    let hit = guard
        .iter()
        .filter(|s| s.addr <= addr)
        .max_by_key(|s| s.addr)
        .map(|s| (s.name.clone(), s.addr));
    REGISTRY.unlock_irqrestore(guard, state);
    hit.map(|(name, base)| (leak_name(name), addr - base))
}

fn leak_name(name: String) -> &'static str {
    alloc::boxed::Box::leak(name.into_boxed_str())
}

#[cfg(test)]
pub fn clear() {
    let (mut guard, state) = REGISTRY.lock_irqsave();
    guard.clear();
    REGISTRY.unlock_irqrestore(guard, state);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    // The registry is a single process-wide `static`; serialize tests
    // that touch it the same way `sched::tests` serializes its own
    // global per-CPU state.
    static TEST_LOCK: StdMutex<()> = StdMutex::new(());

    #[test]
    fn register_then_lookup_by_name() {
        let _g = TEST_LOCK.lock().unwrap();
        clear();
        register(0x4000, String::from("my_export"));
        assert_eq!(lookup_by_name("my_export"), Some(0x4000));
        clear();
    }

    #[test]
    fn unregister_in_range_removes_matching_entries() {
        let _g = TEST_LOCK.lock().unwrap();
        clear();
        register(0x5000, String::from("dropped"));
        register(0x9000, String::from("kept"));
        unregister_in_range(0x4000, 0x6000);
        assert_eq!(lookup_by_name("dropped"), None);
        assert_eq!(lookup_by_name("kept"), Some(0x9000));
        clear();
    }

    #[test]
    fn lookup_by_addr_returns_largest_le() {
        let _g = TEST_LOCK.lock().unwrap();
        clear();
        register(0x1000, String::from("a"));
        register(0x2000, String::from("b"));
        let (name, off) = lookup_by_addr(0x2050).unwrap();
        assert_eq!(name, "b");
        assert_eq!(off, 0x50);
        clear();
    }
}
