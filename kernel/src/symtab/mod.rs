//! Kernel symbol table (spec component C5, §4.5).
//!
//! A dual registry: [`static_table`] is the read-only export list baked
//! into the kernel image between two linker-visible markers, and
//! [`dynamic`] is the lock-protected list of symbols modules export at
//! link time via [`crate::fkx`]. After boot, [`finalize`] flattens both
//! into a single address-sorted [`index`] for O(log N)
//! address-to-name lookups (stack traces, relocation diagnostics).
//!
//! Concurrency: the static range never changes after link, so reads of
//! it are lockless. The dynamic list and the sorted index are each
//! behind their own IRQ-safe spinlock (spec §4.5 "Concurrency";
//! §5 "Shared resources": "The symbol dynamic list uses a global
//! IRQ-safe spinlock").

pub mod dynamic;
pub mod index;
pub mod static_table;

/// Register one of the running kernel's own exports. Call sites are the
/// small number of `#[no_mangle]` functions the kernel itself wants
/// resolvable by stack traces and by [`crate::fkx`] relocation; modules'
/// own exports go through [`dynamic::register`] instead, called from
/// the linker's "Symbol export registration" phase.
pub use dynamic::register;

/// `lookup_by_name` (spec §4.5 "Operations"): scan static exports, then
/// the dynamic registry. Returns 0 if neither has it, matching the
/// source's `addr|0` convention re-expressed as `Option`.
pub fn lookup_by_name(name: &str) -> Option<u64> {
    static_table::lookup_by_name(name).or_else(|| dynamic::lookup_by_name(name))
}

/// `lookup_by_addr` (spec §4.5 "Operations"): binary search the sorted
/// index for the largest entry whose address is `<= addr`; if the
/// index has not been built yet (pre-[`finalize`]), fall back to a
/// linear scan of the static table, then the dynamic registry. Returns
/// `(name, offset)` where `offset = addr - entry.addr`.
pub fn lookup_by_addr(addr: u64) -> Option<(&'static str, u64)> {
    if let Some(hit) = index::lookup_by_addr(addr) {
        return Some(hit);
    }
    if let Some(hit) = static_table::lookup_by_addr(addr) {
        return Some(hit);
    }
    dynamic::lookup_by_addr(addr)
}

/// One-shot post-boot step (spec §4.5 "Structure"): build the sorted
/// address index over the static export table, with every address
/// adjusted by `slide` (spec: "the slide is computed by matching a
/// well-known function's link-time address to its runtime address").
/// Idempotent: a second call rebuilds the index from the then-current
/// static table, which is harmless since the static table itself never
/// changes after link.
pub fn finalize(slide: u64) {
    index::build(static_table::entries(), slide);
}

/// `compute_slide` (spec §4.5): given a well-known symbol's address as
/// recorded at link time and its actual address at runtime, return the
/// offset every other link-time address must be adjusted by. Wrapping,
/// since KASLR slides are applied and removed modulo 2^64.
pub fn compute_slide(link_time_addr: u64, runtime_addr: u64) -> u64 {
    runtime_addr.wrapping_sub(link_time_addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_slide_round_trips() {
        let slide = compute_slide(0x1000, 0x8000_1000);
        assert_eq!(0x1000u64.wrapping_add(slide), 0x8000_1000);
    }
}
