//! Relocation arithmetic (spec §4.4 "Relocation" table).
//!
//! Pure functions over already-resolved operands (`target`, `S`,
//! `addend`) so the relocation-type table can be unit tested without a
//! real mapped module image; [`crate::fkx::linker`] is the only caller
//! that actually performs the unsafe write the result describes.

use crate::fkx::error::FkxErr;

/// The x86-64 relocation type codes named in spec §4.4's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RelocType {
    None = 0,
    X64 = 1,
    Pc32 = 2,
    GotPcRel = 9,
    GlobDat = 6,
    JumpSlot = 7,
    Relative = 8,
    Plt32 = 4,
    X32 = 10,
    X32S = 11,
}

impl RelocType {
    pub fn from_r_type(r_type: u32) -> Option<Self> {
        Some(match r_type {
            0 => RelocType::None,
            1 => RelocType::X64,
            2 => RelocType::Pc32,
            4 => RelocType::Plt32,
            6 => RelocType::GlobDat,
            7 => RelocType::JumpSlot,
            8 => RelocType::Relative,
            9 => RelocType::GotPcRel,
            10 => RelocType::X32,
            11 => RelocType::X32S,
            _ => return None,
        })
    }
}

/// What a relocation resolves to: either nothing (R_X86_64_NONE), or a
/// write of a given width at `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocWrite {
    Skip,
    Write64(u64, u64),
    Write32(u64, u32),
}

/// Compute the write `apply_relocation` should perform for one RELA
/// entry, per spec §4.4's table. `target` is `base_addr + (r_offset -
/// min_vaddr)`; `s` is the resolved symbol value (0 if undefined);
/// `undef`/`weak` describe the symbol's binding, needed to tell an
/// acceptable zero-valued weak reference from a hard failure.
pub fn resolve(
    r_type: u32,
    target: u64,
    base_addr: u64,
    s: u64,
    addend: i64,
    undef: bool,
    weak: bool,
) -> Result<RelocWrite, FkxErr> {
    let ty = RelocType::from_r_type(r_type).ok_or(FkxErr::NotSupported)?;
    match ty {
        RelocType::None => Ok(RelocWrite::Skip),
        RelocType::Relative => {
            let value = (base_addr as i64).wrapping_add(addend) as u64;
            Ok(RelocWrite::Write64(target, value))
        }
        RelocType::X64 => {
            if s == 0 && undef {
                return Err(FkxErr::UnresolvedSymbol);
            }
            let value = (s as i64).wrapping_add(addend) as u64;
            Ok(RelocWrite::Write64(target, value))
        }
        RelocType::GlobDat | RelocType::JumpSlot => {
            if s == 0 && undef && !weak {
                return Err(FkxErr::UnresolvedSymbol);
            }
            Ok(RelocWrite::Write64(target, s))
        }
        RelocType::Pc32 | RelocType::Plt32 | RelocType::GotPcRel => {
            let value = (s as i64).wrapping_add(addend).wrapping_sub(target as i64);
            Ok(RelocWrite::Write32(target, value as i32 as u32))
        }
        RelocType::X32 => {
            let value = (s as i64).wrapping_add(addend) as u64;
            Ok(RelocWrite::Write32(target, value as u32))
        }
        RelocType::X32S => {
            let value = (s as i64).wrapping_add(addend);
            Ok(RelocWrite::Write32(target, value as i32 as u32))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_is_skipped() {
        assert_eq!(resolve(0, 0x1000, 0x4000, 0, 0, false, false), Ok(RelocWrite::Skip));
    }

    #[test]
    fn relative_adds_base_and_addend() {
        let r = resolve(8, 0x1000, 0x4000, 0, 0x10, false, false).unwrap();
        assert_eq!(r, RelocWrite::Write64(0x1000, 0x4010));
    }

    #[test]
    fn x64_writes_symbol_plus_addend() {
        let r = resolve(1, 0x1000, 0x4000, 0x5000, 4, false, false).unwrap();
        assert_eq!(r, RelocWrite::Write64(0x1000, 0x5004));
    }

    #[test]
    fn x64_undefined_symbol_fails() {
        let r = resolve(1, 0x1000, 0x4000, 0, 0, true, false);
        assert_eq!(r, Err(FkxErr::UnresolvedSymbol));
    }

    #[test]
    fn glob_dat_writes_bare_symbol_value() {
        let r = resolve(6, 0x1000, 0x4000, 0x7000, 0, false, false).unwrap();
        assert_eq!(r, RelocWrite::Write64(0x1000, 0x7000));
    }

    #[test]
    fn jump_slot_weak_undefined_zero_is_allowed() {
        let r = resolve(7, 0x1000, 0x4000, 0, 0, true, true).unwrap();
        assert_eq!(r, RelocWrite::Write64(0x1000, 0));
    }

    #[test]
    fn jump_slot_strong_undefined_zero_fails() {
        let r = resolve(7, 0x1000, 0x4000, 0, 0, true, false);
        assert_eq!(r, Err(FkxErr::UnresolvedSymbol));
    }

    #[test]
    fn pc32_is_symbol_plus_addend_minus_target() {
        let r = resolve(2, 0x2000, 0x4000, 0x2100, 0, false, false).unwrap();
        assert_eq!(r, RelocWrite::Write32(0x2000, 0x100));
    }

    #[test]
    fn x32_truncates_to_32_bits() {
        let r = resolve(10, 0x2000, 0x4000, 0x1_0000_1234, 0, false, false).unwrap();
        assert_eq!(r, RelocWrite::Write32(0x2000, 0x1234));
    }

    #[test]
    fn x32s_sign_extends() {
        let r = resolve(11, 0x2000, 0x4000, 0, -1, false, false).unwrap();
        assert_eq!(r, RelocWrite::Write32(0x2000, 0xFFFF_FFFF));
    }

    #[test]
    fn unknown_type_is_not_supported() {
        assert_eq!(
            resolve(999, 0x1000, 0x4000, 0, 0, false, false),
            Err(FkxErr::NotSupported)
        );
    }
}
