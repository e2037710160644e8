//! Cryptographic capability traits and their default implementations.
//!
//! A [`crate::Scheme`] is assembled from three algorithm capabilities plus a
//! randomness source. [`sensible`] provides the recommended bundle
//! (HMAC-SHA-256, AES-256-GCM, HMAC bind-for-request); [`chacha`] offers an
//! alternate AEAD with the same shape.

use rand::rngs::OsRng;
use rand::RngCore;
use subtle::ConstantTimeEq;

use crate::error::Error;
use crate::macaroon::Macaroon;
use crate::Result;

pub mod chacha;
pub mod sensible;

/// Keyed-hash capability used for signature chaining.
pub trait HmacScheme: Send + Sync {
    /// Number of bytes in both the MAC key and the MAC output.
    fn key_size(&self) -> usize;

    /// Computes `HMAC(key, data)` in place: `key_out` holds the key on entry
    /// and receives the MAC on exit. The buffer is exactly
    /// [`key_size`](HmacScheme::key_size) bytes.
    ///
    /// Chaining a caveat is `hmac(sig, vid || cid)` with the running
    /// signature as both key and destination.
    fn hmac(&self, key_out: &mut [u8], data: &[u8]) -> Result<()>;
}

/// Authenticated encryption capability used to seal third-party caveat keys.
///
/// The nonce is supplied by the caller so the scheme owns all CSPRNG draws.
pub trait EncryptionScheme: Send + Sync {
    /// Number of bytes in the encryption key. Must equal the HMAC key size.
    fn key_size(&self) -> usize;

    /// Number of bytes in the nonce.
    fn nonce_size(&self) -> usize;

    /// Additional bytes the ciphertext carries beyond the plaintext.
    fn overhead(&self) -> usize;

    /// Encrypts `plaintext` into `out`, which must be exactly
    /// `plaintext.len() + overhead()` bytes.
    fn encrypt(&self, out: &mut [u8], plaintext: &[u8], nonce: &[u8], key: &[u8]) -> Result<()>;

    /// Decrypts `ciphertext` into `out`, which must be exactly
    /// `ciphertext.len() - overhead()` bytes.
    fn decrypt(&self, out: &mut [u8], ciphertext: &[u8], nonce: &[u8], key: &[u8]) -> Result<()>;
}

/// Deterministic transform that ties a discharge macaroon's signature to the
/// authorizing macaroon, preventing reuse against other targets.
pub trait BindForRequestScheme: Send + Sync {
    /// `sig` holds the discharge's current signature on entry and the bound
    /// signature on exit.
    fn bind_for_request(&self, target: &Macaroon, sig: &mut [u8]) -> Result<()>;
}

/// Source of cryptographically secure randomness.
///
/// The default is the operating system CSPRNG. Deterministic sources may be
/// substituted in tests through [`crate::SchemeConfig`].
pub trait SecureRandom: Send + Sync {
    fn fill(&self, buf: &mut [u8]) -> Result<()>;
}

/// [`SecureRandom`] backed by the platform CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandom;

impl SecureRandom for OsRandom {
    fn fill(&self, buf: &mut [u8]) -> Result<()> {
        OsRng
            .try_fill_bytes(buf)
            .map_err(|e| Error::Crypto(format!("os rng: {e}")))
    }
}

/// Constant-time byte equality. Differing lengths compare unequal without
/// inspecting content.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_basic() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn os_random_fills() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        OsRandom.fill(&mut a).unwrap();
        OsRandom.fill(&mut b).unwrap();
        assert_ne!(a, b);
    }
}
