//! Module info record and identity constants (spec §3 "Module info
//! record", §6 "Module binary format").

use bitflags::bitflags;

/// `magic = 0x31584B46` ("FKX1" little-endian), identifying a valid
/// `.fkx_info` section.
pub const FKX_MAGIC: u32 = 0x3158_4B46;

/// Trailing footer magic `0x21474953` ("SIG!").
pub const SIG_MAGIC: u32 = 0x2147_4953;

/// The ABI version this linker understands; `probe` rejects any module
/// whose `api_version` differs, since a mismatch means the relocation
/// table layout or vtable shape may not agree.
pub const FKX_API_VERSION: u32 = 1;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ModuleFlags: u32 {
        /// A failed `init()` panics the kernel rather than marking the
        /// module `ERROR` and continuing (spec §4.4 "Failure model").
        const REQUIRED = 1 << 0;
    }
}

/// The init-order tier a module belongs to (spec §4.4 step 6: "for each
/// class in a defined order"). Distinct from the finer-grained
/// subclass bitmask, which expresses *what a module provides/needs*;
/// this expresses *when in boot it is allowed to initialize*.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ModuleClass {
    Core = 0,
    Driver = 1,
    Filesystem = 2,
    Network = 3,
    Misc = 4,
}

impl ModuleClass {
    /// Init order, leaves (spec's dependency order, §2: "leaves
    /// first") before the classes that build on them.
    pub const ORDER: [ModuleClass; 5] = [
        ModuleClass::Core,
        ModuleClass::Driver,
        ModuleClass::Filesystem,
        ModuleClass::Network,
        ModuleClass::Misc,
    ];

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(ModuleClass::Core),
            1 => Some(ModuleClass::Driver),
            2 => Some(ModuleClass::Filesystem),
            3 => Some(ModuleClass::Network),
            4 => Some(ModuleClass::Misc),
            _ => None,
        }
    }
}

/// `fkx_module_info`: embedded in every module image's `.fkx_info`
/// section (spec §3, §6). Parsed out of the raw section bytes by
/// [`crate::fkx::elf::parse_info`]; strings are borrowed from the
/// module's own mapped image, so they live as long as the image does.
#[derive(Debug, Clone, Copy)]
pub struct ModuleInfo {
    pub magic: u32,
    pub api_version: u32,
    pub name: &'static str,
    pub version: &'static str,
    pub author: &'static str,
    pub description: &'static str,
    pub flags: ModuleFlags,
    pub class: ModuleClass,
    /// Subclasses (subsystem capabilities) this module provides once
    /// linked, e.g. "I am a block-device driver", "I am a netfilter
    /// hook". Other modules' `requirements` are checked against the
    /// union of every *linked* module's `subclass_bitmask`.
    pub subclass_bitmask: u64,
    /// Subclasses this module needs present before it can link/init.
    pub requirements_bitmask: u64,
    /// Informational dependency names (error messages only — actual
    /// gating is the bitmask, per spec §4.4 "Dependency resolution").
    pub depends: &'static [&'static str],
    /// The raw (pre-relocation) link-time virtual address of `init()`,
    /// same convention as [`crate::fkx::elf::KsymtabEntry::raw_addr`]:
    /// [`crate::fkx::linker`] rebases it to `base_addr + (raw -
    /// min_vaddr)` before calling through it.
    pub init_fn_raw_addr: u64,
}

impl ModuleInfo {
    pub fn is_valid_magic(&self) -> bool {
        self.magic == FKX_MAGIC
    }

    pub fn is_compatible_api(&self) -> bool {
        self.api_version == FKX_API_VERSION
    }

    pub fn requirements_met(&self, provided: u64) -> bool {
        self.requirements_bitmask & provided == self.requirements_bitmask
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(requirements: u64) -> ModuleInfo {
        ModuleInfo {
            magic: FKX_MAGIC,
            api_version: FKX_API_VERSION,
            name: "test",
            version: "0.1",
            author: "",
            description: "",
            flags: ModuleFlags::empty(),
            class: ModuleClass::Driver,
            subclass_bitmask: 0,
            requirements_bitmask: requirements,
            depends: &[],
            init_fn_raw_addr: 0,
        }
    }

    #[test]
    fn requirements_met_is_a_subset_check() {
        let m = info(0b0101);
        assert!(m.requirements_met(0b1111));
        assert!(m.requirements_met(0b0101));
        assert!(!m.requirements_met(0b0100));
        assert!(!m.requirements_met(0));
    }

    #[test]
    fn no_requirements_always_met() {
        assert!(info(0).requirements_met(0));
    }
}
