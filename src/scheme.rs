//! The [`Scheme`]: the cryptographic context that constructs, attenuates,
//! and verifies macaroons.
//!
//! A macaroon carries no record of the algorithms that produced it, so every
//! operation goes through a scheme holding the HMAC, encryption, and
//! bind-for-request capabilities plus a randomness source. A scheme is safe
//! for concurrent use; its only mutable state is a zeroizing pool of
//! key-sized buffers shared across verifications.

use std::ops::{Deref, DerefMut};
use std::sync::Mutex;

use zeroize::Zeroize;

use crate::crypto::{
    BindForRequestScheme, EncryptionScheme, HmacScheme, OsRandom, SecureRandom,
};
use crate::error::Error;
use crate::macaroon::Macaroon;
use crate::verify::Stack;
use crate::Result;

/// Configuration for [`Scheme::new`]: the set of algorithms used in
/// constructing and verifying macaroons.
pub struct SchemeConfig {
    /// HMAC implementation used for signature chaining.
    pub hmac: Box<dyn HmacScheme>,
    /// Authenticated encryption for third-party caveat keys. Its key size
    /// must match the HMAC key size.
    pub encryption: Box<dyn EncryptionScheme>,
    /// Transform binding discharge macaroons to an authorizing macaroon.
    pub bind_for_request: Box<dyn BindForRequestScheme>,
    /// Randomness source for nonces. Defaults to the OS CSPRNG.
    pub random: Option<Box<dyn SecureRandom>>,
}

/// Cryptographic context for macaroon operations. See the module docs.
pub struct Scheme {
    pub(crate) hmac: Box<dyn HmacScheme>,
    pub(crate) enc: Box<dyn EncryptionScheme>,
    pub(crate) bfr: Box<dyn BindForRequestScheme>,
    pub(crate) random: Box<dyn SecureRandom>,
    pub(crate) key_size: usize,
    pub(crate) nonce_size: usize,
    pub(crate) overhead: usize,
    key_pool: KeyPool,
}

impl std::fmt::Debug for Scheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheme")
            .field("key_size", &self.key_size)
            .field("nonce_size", &self.nonce_size)
            .field("overhead", &self.overhead)
            .finish()
    }
}

impl Scheme {
    /// Builds a scheme from the given capabilities. Fails if the HMAC and
    /// encryption key sizes differ: decrypted caveat keys are reused as
    /// chain keys during verification.
    pub fn new(cfg: SchemeConfig) -> Result<Scheme> {
        if cfg.hmac.key_size() != cfg.encryption.key_size() {
            return Err(Error::InvalidArgument(format!(
                "key size mismatch: hmac={}, encryption={}",
                cfg.hmac.key_size(),
                cfg.encryption.key_size()
            )));
        }
        let key_size = cfg.hmac.key_size();
        if key_size == 0 {
            return Err(Error::InvalidArgument("zero key size".to_string()));
        }
        Ok(Scheme {
            key_size,
            nonce_size: cfg.encryption.nonce_size(),
            overhead: cfg.encryption.overhead(),
            hmac: cfg.hmac,
            enc: cfg.encryption,
            bfr: cfg.bind_for_request,
            random: cfg.random.unwrap_or_else(|| Box::new(OsRandom)),
            key_pool: KeyPool::new(key_size),
        })
    }

    /// The length of macaroon HMAC and encryption keys in bytes.
    pub fn key_size(&self) -> usize {
        self.key_size
    }

    /// Creates a root macaroon with no caveats. A caveat-less macaroon
    /// authorizes anything, hence the name; prefer
    /// [`Scheme::new_macaroon`]. Dischargers legitimately use this to mint
    /// discharge macaroons.
    pub fn unsafe_root_macaroon(&self, location: &str, id: &[u8], key: &[u8]) -> Result<Macaroon> {
        self.root_macaroon(location, id, key)
    }

    /// Creates a macaroon with at least one first-party caveat.
    pub fn new_macaroon(
        &self,
        location: &str,
        id: &[u8],
        key: &[u8],
        caveats: &[&[u8]],
    ) -> Result<Macaroon> {
        if caveats.is_empty() {
            return Err(Error::InvalidArgument(
                "at least one caveat must be provided".to_string(),
            ));
        }
        if caveats.iter().any(|c| c.is_empty()) {
            return Err(Error::InvalidArgument(
                "empty caveats are invalid".to_string(),
            ));
        }
        let mut m = self.root_macaroon(location, id, key)?;
        for cid in caveats {
            m = m.append_caveat(self.hmac.as_ref(), b"", cid, "")?;
        }
        Ok(m)
    }

    fn root_macaroon(&self, location: &str, id: &[u8], key: &[u8]) -> Result<Macaroon> {
        if key.len() != self.key_size {
            return Err(Error::InvalidArgument(format!(
                "invalid key size: need={}, got={}",
                self.key_size,
                key.len()
            )));
        }
        if id.is_empty() {
            return Err(Error::InvalidArgument(
                "macaroon id cannot be empty".to_string(),
            ));
        }
        Macaroon::new_signed(location, id, key, self.hmac.as_ref())
    }

    /// Returns a new macaroon whose caveat chain ends with the given
    /// first-party predicate.
    pub fn add_first_party_caveat(&self, m: &Macaroon, cid: &[u8]) -> Result<Macaroon> {
        if cid.is_empty() {
            return Err(Error::InvalidArgument(
                "add_first_party_caveat: empty predicate".to_string(),
            ));
        }
        m.append_caveat(self.hmac.as_ref(), b"", cid, "")
    }

    /// Returns a new macaroon carrying a third-party caveat. The caveat key
    /// is sealed under the current signature into the VID; coordinating the
    /// link between `caveat_key` and `cid` is the caller's concern (see
    /// [`crate::thirdparty::Attenuator`]).
    pub fn add_third_party_caveat(
        &self,
        m: &Macaroon,
        caveat_key: &[u8],
        cid: &[u8],
        location: &str,
    ) -> Result<Macaroon> {
        if caveat_key.len() != self.key_size {
            return Err(Error::InvalidArgument(format!(
                "add_third_party_caveat: invalid caveat key size: need={}, got={}",
                self.key_size,
                caveat_key.len()
            )));
        }
        if cid.is_empty() {
            return Err(Error::InvalidArgument(
                "add_third_party_caveat: empty caveat id".to_string(),
            ));
        }
        let vid = self.encrypt_key(m.signature(), caveat_key)?;
        m.append_caveat(self.hmac.as_ref(), &vid, cid, location)
    }

    /// Binds a discharge macaroon to the target, returning the bound copy.
    pub fn bind_for_request(&self, target: &Macaroon, discharge: &Macaroon) -> Result<Macaroon> {
        let mut bound = discharge.clone();
        self.bfr.bind_for_request(target, bound.signature_mut())?;
        Ok(bound)
    }

    /// Assembles `[target, bound discharges...]` for presentation to the
    /// verifying service, binding every discharge to the target.
    pub fn prepare_stack(&self, target: &Macaroon, discharges: &[Macaroon]) -> Result<Stack> {
        let mut macaroons = Vec::with_capacity(1 + discharges.len());
        macaroons.push(target.clone());
        for d in discharges {
            macaroons.push(self.bind_for_request(target, d)?);
        }
        Ok(Stack::from(macaroons))
    }

    /// Seals `plaintext` under `key`: draws a fresh nonce and returns
    /// `nonce || ciphertext || tag`.
    pub(crate) fn encrypt_key(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut out = vec![0u8; self.nonce_size + plaintext.len() + self.overhead];
        let (nonce, ct) = out.split_at_mut(self.nonce_size);
        self.random.fill(nonce)?;
        self.enc.encrypt(ct, plaintext, nonce, key)?;
        Ok(out)
    }

    /// Opens a VID produced by [`Scheme::encrypt_key`] into `out`, which
    /// must be exactly the plaintext size.
    pub(crate) fn decrypt_key(&self, out: &mut [u8], vid: &[u8], key: &[u8]) -> Result<()> {
        if vid.len() < self.nonce_size + self.overhead {
            return Err(Error::InvalidArgument(format!(
                "vid too short: need>={}, got={}",
                self.nonce_size + self.overhead,
                vid.len()
            )));
        }
        let (nonce, ct) = vid.split_at(self.nonce_size);
        self.enc.decrypt(out, ct, nonce, key)
    }

    /// Borrows a zeroed key-sized buffer from the pool. The buffer is
    /// zeroized when the guard drops, on every exit path.
    pub(crate) fn acquire_key(&self) -> KeyGuard<'_> {
        self.key_pool.acquire()
    }
}

/// Free-list of key-sized buffers. Buffers are scrubbed before they return
/// to the list; a fresh buffer is zero-initialized. Shared across all
/// verifications on one scheme so concurrent use allocates O(threads)
/// buffers.
struct KeyPool {
    size: usize,
    free: Mutex<Vec<Box<[u8]>>>,
}

impl KeyPool {
    fn new(size: usize) -> KeyPool {
        KeyPool {
            size,
            free: Mutex::new(Vec::new()),
        }
    }

    fn acquire(&self) -> KeyGuard<'_> {
        let buf = self
            .free
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop()
            .unwrap_or_else(|| vec![0u8; self.size].into_boxed_slice());
        KeyGuard {
            pool: self,
            buf: Some(buf),
        }
    }
}

/// RAII guard over a pooled key buffer.
pub(crate) struct KeyGuard<'p> {
    pool: &'p KeyPool,
    buf: Option<Box<[u8]>>,
}

impl Deref for KeyGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for KeyGuard<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        if let Some(mut buf) = self.buf.take() {
            buf.zeroize();
            self.pool
                .free
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::sensible;

    #[test]
    fn new_macaroon_requires_a_caveat() {
        let s = sensible::scheme();
        let key = [1u8; 32];
        let err = s.new_macaroon("loc", b"id", &key, &[]).unwrap_err();
        assert!(err.is_invalid_argument());
        let err = s.new_macaroon("loc", b"id", &key, &[b""]).unwrap_err();
        assert!(err.is_invalid_argument());
        assert!(s.new_macaroon("loc", b"id", &key, &[b"a > 1"]).is_ok());
    }

    #[test]
    fn root_macaroon_validates_arguments() {
        let s = sensible::scheme();
        assert!(s
            .unsafe_root_macaroon("loc", b"id", &[1u8; 16])
            .unwrap_err()
            .is_invalid_argument());
        assert!(s
            .unsafe_root_macaroon("loc", b"", &[1u8; 32])
            .unwrap_err()
            .is_invalid_argument());
    }

    #[test]
    fn third_party_caveat_vid_layout() {
        let s = sensible::scheme();
        let key = [1u8; 32];
        let ckey = [2u8; 32];
        let m = s.unsafe_root_macaroon("loc", b"id", &key).unwrap();
        let m = s
            .add_third_party_caveat(&m, &ckey, b"cid", "https://other.example.org")
            .unwrap();
        let c = m.caveats().next().unwrap();
        assert!(c.is_third_party());
        // nonce || ciphertext || tag
        assert_eq!(c.vid().len(), s.nonce_size + 32 + s.overhead);
        // The sealed key opens under the signature current at attenuation,
        // which is the root signature here.
        let root = s.unsafe_root_macaroon("loc", b"id", &key).unwrap();
        let mut out = [0u8; 32];
        s.decrypt_key(&mut out, c.vid(), root.signature()).unwrap();
        assert_eq!(out, ckey);
    }

    #[test]
    fn key_size_mismatch_rejected() {
        use crate::crypto::chacha::ChaCha;
        use crate::crypto::HmacScheme;
        use crate::macaroon::Macaroon;

        struct ShortHmac;
        impl HmacScheme for ShortHmac {
            fn key_size(&self) -> usize {
                16
            }
            fn hmac(&self, _key_out: &mut [u8], _data: &[u8]) -> crate::Result<()> {
                Ok(())
            }
        }
        struct NoBind;
        impl crate::crypto::BindForRequestScheme for NoBind {
            fn bind_for_request(&self, _t: &Macaroon, _sig: &mut [u8]) -> crate::Result<()> {
                Ok(())
            }
        }
        let err = Scheme::new(SchemeConfig {
            hmac: Box::new(ShortHmac),
            encryption: Box::new(ChaCha),
            bind_for_request: Box::new(NoBind),
            random: None,
        })
        .unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn key_pool_reuses_and_zeroes() {
        let s = sensible::scheme();
        {
            let mut k = s.acquire_key();
            assert!(k.iter().all(|&b| b == 0));
            k[0] = 0xFF;
        }
        let k = s.acquire_key();
        assert!(k.iter().all(|&b| b == 0));
    }

    #[test]
    fn prepare_stack_binds_discharges() {
        let s = sensible::scheme();
        let key = [1u8; 32];
        let ckey = [2u8; 32];
        let m = s.new_macaroon("loc", b"id", &key, &[b"a > 1"]).unwrap();
        let m = s
            .add_third_party_caveat(&m, &ckey, b"cid", "https://other.example.org")
            .unwrap();
        let d = s
            .unsafe_root_macaroon("https://other.example.org", b"cid", &ckey)
            .unwrap();
        let stack = s.prepare_stack(&m, &[d.clone()]).unwrap();
        assert_eq!(stack.len(), 2);
        assert!(stack.target().equal(&m));
        assert!(!stack.discharges()[0].equal(&d));
        assert_eq!(stack.discharges()[0].id(), d.id());
    }
}
