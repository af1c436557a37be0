//! Module signature verification (spec §4.4 "Signature verification",
//! §6 "Module binary format" footer layout).
//!
//! The last 68 bytes of every module image are `{signature[64],
//! magic: u32 LE}`. The core HMAC-SHA512s everything before the
//! footer with a compiled-in root key and compares the result to
//! `signature`; [`hmac::Mac::verify_slice`] does the constant-time
//! compare itself, so no separate timing-safe-equals helper is needed
//! here.

use hmac::{Hmac, Mac};
use sha2::Sha512;

use crate::fkx::error::FkxErr;
use crate::fkx::info::SIG_MAGIC;

type HmacSha512 = Hmac<Sha512>;

pub const SIGNATURE_LEN: usize = 64;
pub const FOOTER_LEN: usize = SIGNATURE_LEN + 4;

/// The compiled-in HMAC root key. A real boot image would have this
/// injected by the build (e.g. baked in from a provisioning step
/// outside this crate, per spec §1's "security policy beyond
/// module-signature verification" being a non-goal); a fixed
/// placeholder key here keeps the verification path exercisable
/// end-to-end without a build-time secret-injection mechanism this
/// spec does not define.
const ROOT_KEY: &[u8] = b"fkx-core-module-signing-root-key-v1";

/// Split `image` into `(body, signature, magic)`, or `None` if it is
/// too short to carry a footer at all.
pub fn split_footer(image: &[u8]) -> Option<(&[u8], &[u8], u32)> {
    if image.len() < FOOTER_LEN {
        return None;
    }
    let (body, footer) = image.split_at(image.len() - FOOTER_LEN);
    let (sig, magic_bytes) = footer.split_at(SIGNATURE_LEN);
    let magic = u32::from_le_bytes(magic_bytes.try_into().ok()?);
    Some((body, sig, magic))
}

/// Verify `image`'s trailing signature. Fails probe/load with
/// [`FkxErr::PermissionDenied`] on any mismatch (too short, bad footer
/// magic, or bad HMAC), matching spec §4.4's single failure mode for
/// this step.
pub fn verify(image: &[u8]) -> Result<(), FkxErr> {
    verify_with_key(image, ROOT_KEY)
}

fn verify_with_key(image: &[u8], key: &[u8]) -> Result<(), FkxErr> {
    let (body, sig, magic) = split_footer(image).ok_or(FkxErr::PermissionDenied)?;
    if magic != SIG_MAGIC {
        return Err(FkxErr::PermissionDenied);
    }
    let mut mac = HmacSha512::new_from_slice(key).map_err(|_| FkxErr::PermissionDenied)?;
    mac.update(body);
    mac.verify_slice(sig).map_err(|_| FkxErr::PermissionDenied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    fn signed_image(body: &[u8], key: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha512::new_from_slice(key).unwrap();
        mac.update(body);
        let sig = mac.finalize().into_bytes();

        let mut image = Vec::new();
        image.extend_from_slice(body);
        image.extend_from_slice(&sig);
        image.extend_from_slice(&SIG_MAGIC.to_le_bytes());
        image
    }

    #[test]
    fn valid_signature_verifies() {
        let image = signed_image(b"module bytes go here", ROOT_KEY);
        assert!(verify(&image).is_ok());
    }

    #[test]
    fn wrong_key_is_rejected() {
        let image = signed_image(b"module bytes go here", b"wrong-key");
        assert_eq!(verify(&image), Err(FkxErr::PermissionDenied));
    }

    #[test]
    fn corrupted_body_is_rejected() {
        let mut image = signed_image(b"module bytes go here", ROOT_KEY);
        let n = image.len();
        image[0] ^= 0xFF;
        let _ = n;
        assert_eq!(verify(&image), Err(FkxErr::PermissionDenied));
    }

    #[test]
    fn bad_footer_magic_is_rejected() {
        let mut image = signed_image(b"module bytes go here", ROOT_KEY);
        let len = image.len();
        image[len - 1] ^= 0xFF;
        assert_eq!(verify(&image), Err(FkxErr::PermissionDenied));
    }

    #[test]
    fn truncated_image_is_rejected() {
        assert_eq!(verify(&[0u8; 10]), Err(FkxErr::PermissionDenied));
    }
}
