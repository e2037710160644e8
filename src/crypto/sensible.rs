//! Recommended cryptographic parameters.
//!
//! - HMAC: HMAC-SHA-256
//! - Encryption: AES-256-GCM with a random 96-bit nonce
//! - Bind-for-request: `sig = HMAC(target.sig, sig)`

use aes_gcm::aead::AeadInPlace;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce, Tag};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::crypto::{BindForRequestScheme, EncryptionScheme, HmacScheme, OsRandom};
use crate::error::Error;
use crate::macaroon::Macaroon;
use crate::scheme::{Scheme, SchemeConfig};
use crate::Result;

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;

/// HMAC key under which root keys are conventionally derived from
/// lower-entropy secrets, for compatibility with libmacaroons.
const KEY_GENERATOR: &[u8; 32] = b"macaroons-key-generator\0\0\0\0\0\0\0\0\0";

type HmacSha256 = Hmac<Sha256>;

/// The sensible parameter bundle. Implements all three scheme capabilities.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sensible;

impl HmacScheme for Sensible {
    fn key_size(&self) -> usize {
        KEY_SIZE
    }

    fn hmac(&self, key_out: &mut [u8], data: &[u8]) -> Result<()> {
        if key_out.len() != KEY_SIZE {
            return Err(Error::InvalidArgument(format!(
                "hmac buffer size: need={}, got={}",
                KEY_SIZE,
                key_out.len()
            )));
        }
        let mut mac = <HmacSha256 as Mac>::new_from_slice(key_out)
            .map_err(|e| Error::Crypto(format!("hmac init: {e}")))?;
        mac.update(data);
        key_out.copy_from_slice(&mac.finalize().into_bytes());
        Ok(())
    }
}

impl EncryptionScheme for Sensible {
    fn key_size(&self) -> usize {
        KEY_SIZE
    }

    fn nonce_size(&self) -> usize {
        NONCE_SIZE
    }

    fn overhead(&self) -> usize {
        TAG_SIZE
    }

    fn encrypt(&self, out: &mut [u8], plaintext: &[u8], nonce: &[u8], key: &[u8]) -> Result<()> {
        if out.len() != plaintext.len() + TAG_SIZE {
            return Err(Error::InvalidArgument(format!(
                "encrypt output size: need={}, got={}",
                plaintext.len() + TAG_SIZE,
                out.len()
            )));
        }
        if nonce.len() != NONCE_SIZE {
            return Err(Error::InvalidArgument(format!(
                "nonce size: need={NONCE_SIZE}, got={}",
                nonce.len()
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| Error::Crypto(format!("aes-gcm key: {e}")))?;
        let (ct, tag_out) = out.split_at_mut(plaintext.len());
        ct.copy_from_slice(plaintext);
        let tag = cipher
            .encrypt_in_place_detached(Nonce::from_slice(nonce), b"", ct)
            .map_err(|_| Error::Crypto("aes-gcm encrypt failed".to_string()))?;
        tag_out.copy_from_slice(&tag);
        Ok(())
    }

    fn decrypt(&self, out: &mut [u8], ciphertext: &[u8], nonce: &[u8], key: &[u8]) -> Result<()> {
        if ciphertext.len() < TAG_SIZE {
            return Err(Error::InvalidArgument(format!(
                "ciphertext too short: need>={TAG_SIZE}, got={}",
                ciphertext.len()
            )));
        }
        let pt_len = ciphertext.len() - TAG_SIZE;
        if out.len() != pt_len {
            return Err(Error::InvalidArgument(format!(
                "decrypt output size: need={pt_len}, got={}",
                out.len()
            )));
        }
        if nonce.len() != NONCE_SIZE {
            return Err(Error::InvalidArgument(format!(
                "nonce size: need={NONCE_SIZE}, got={}",
                nonce.len()
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| Error::Crypto(format!("aes-gcm key: {e}")))?;
        out.copy_from_slice(&ciphertext[..pt_len]);
        cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(nonce),
                b"",
                out,
                Tag::from_slice(&ciphertext[pt_len..]),
            )
            .map_err(|_| Error::Crypto("aes-gcm decrypt failed".to_string()))?;
        Ok(())
    }
}

impl BindForRequestScheme for Sensible {
    fn bind_for_request(&self, target: &Macaroon, sig: &mut [u8]) -> Result<()> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(target.signature())
            .map_err(|e| Error::Crypto(format!("hmac init: {e}")))?;
        mac.update(sig);
        let bound = mac.finalize().into_bytes();
        if sig.len() != bound.len() {
            return Err(Error::InvalidArgument(format!(
                "signature size: need={}, got={}",
                bound.len(),
                sig.len()
            )));
        }
        sig.copy_from_slice(&bound);
        Ok(())
    }
}

/// Constructs a [`Scheme`] with the sensible parameters and the OS CSPRNG.
pub fn scheme() -> Scheme {
    match Scheme::new(SchemeConfig {
        hmac: Box::new(Sensible),
        encryption: Box::new(Sensible),
        bind_for_request: Box::new(Sensible),
        random: Some(Box::new(OsRandom)),
    }) {
        Ok(s) => s,
        // Key sizes are constants here, construction cannot fail.
        Err(e) => unreachable!("sensible scheme construction failed: {e}"),
    }
}

/// Derives a 32-byte root key from arbitrary seed bytes via
/// `HMAC(KEY_GENERATOR, seed)`, the libmacaroons convention.
pub fn derive_root_key(seed: &[u8]) -> [u8; KEY_SIZE] {
    let mut out = [0u8; KEY_SIZE];
    out.copy_from_slice(KEY_GENERATOR);
    // HMAC with a fixed-size buffer never fails.
    if let Err(e) = Sensible.hmac(&mut out, seed) {
        unreachable!("derive_root_key: {e}");
    }
    out
}
