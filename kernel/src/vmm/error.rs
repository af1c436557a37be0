//! VMM error taxonomy (spec §7: resource exhaustion / invalid argument /
//! fatal). Grounded on the teacher's `memory::virt::VmErr` pattern: one
//! flat `Copy` enum with a `Display` impl, rather than a crate-wide error
//! type.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmErr {
    /// No VMA covers the faulting or requested address.
    NoSuchMapping,
    /// The VMA exists but denies the requested access.
    PermissionDenied,
    /// Physical or folio allocation failed.
    NoMemory,
    /// Address/length was not page-aligned, or zero-length.
    Misaligned,
    /// The requested range overlaps an existing VMA where that is
    /// disallowed (e.g. a fixed `map` without `MAP_FIXED` semantics).
    Overlap,
    /// A 2 MiB collapse or map was attempted where 4 KiB mappings
    /// already exist and cannot be unified.
    HugeConflict,
    /// The backing vm_object does not support the requested operation
    /// (e.g. `write_folios` on a device object).
    Unsupported,
    /// Page-table walk hit a level that was not present.
    NotMapped,
}

impl fmt::Display for VmErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// What the page fault handler decided: a `Result` would force a caller
/// to invent errors for "this was an expected SIGSEGV", so this is its
/// own small enum as the teacher does for unusual-return functions (see
/// `fkx::loader`'s phase outcomes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOutcome {
    Handled,
    BadAddress,
    Oom,
}
