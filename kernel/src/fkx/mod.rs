//! FKX: the load-time dynamic module linker (spec component C4, §4.4).
//!
//! A module is a signed, position-independent ELF64 `ET_DYN` image
//! (spec §6 "Module binary format") carrying a `.fkx_info` descriptor
//! and an optional `.fkx_ksymtab` export table. [`linker::load`] runs
//! one image through probe → map → register unlinked →
//! finalize-loading → protect; [`linker::finalize_loading`] drains the
//! unlinked list to a fixed point across however many images boot
//! handed over; [`linker::init_all`] then runs `init()` in class order.
//!
//! Grounded on the teacher's `modules::mod_loader`/`manifest`/
//! `registry` trio: same probe-then-register shape, the zk/vault-backed
//! trust step replaced by [`sig`]'s HMAC-SHA512 footer check and the
//! capability-class registry replaced by [`image`]'s unlinked/linked
//! lists, which match spec §3's data model directly.

pub mod elf;
pub mod error;
pub mod image;
pub mod info;
pub mod linker;
pub mod protect;
pub mod reloc;
pub mod sig;

pub use error::FkxErr;
pub use image::ModuleImageId;
pub use linker::{finalize_loading, init_all, load};
