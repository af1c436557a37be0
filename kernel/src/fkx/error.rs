//! FKX error taxonomy (spec §7; same one-flat-enum pattern as
//! [`crate::vmm::error::VmErr`]).

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FkxErr {
    /// Not a valid ET_DYN x86-64 ELF, or missing `.fkx_info`/bad magic.
    BadImage,
    /// HMAC-SHA512 footer did not verify.
    PermissionDenied,
    /// Allocation of the module's virtual/physical range failed.
    NoMemory,
    /// An undefined, non-weak symbol did not resolve.
    UnresolvedSymbol,
    /// A relocation type this linker does not implement.
    NotSupported,
    /// `finalize_loading` completed a full pass linking nothing, and
    /// unlinked images remain.
    UnsatisfiedDependency,
    /// A relocation's computed target fell outside the module's own
    /// mapped range.
    RelocationOutOfRange,
}

impl fmt::Display for FkxErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
