//! Alternate encryption scheme: ChaCha20-Poly1305.
//!
//! Same key size, nonce size, and overhead as the AES-256-GCM default, so it
//! can be swapped into a [`crate::SchemeConfig`] without other changes.

use chacha20poly1305::aead::AeadInPlace;
use chacha20poly1305::{ChaCha20Poly1305, KeyInit, Nonce, Tag};

use crate::crypto::EncryptionScheme;
use crate::error::Error;
use crate::Result;

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;

/// [`EncryptionScheme`] backed by ChaCha20-Poly1305.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChaCha;

impl EncryptionScheme for ChaCha {
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
        let cipher = ChaCha20Poly1305::new_from_slice(key)
            .map_err(|e| Error::Crypto(format!("chacha20-poly1305 key: {e}")))?;
        let (ct, tag_out) = out.split_at_mut(plaintext.len());
        ct.copy_from_slice(plaintext);
        let tag = cipher
            .encrypt_in_place_detached(Nonce::from_slice(nonce), b"", ct)
            .map_err(|_| Error::Crypto("chacha20-poly1305 encrypt failed".to_string()))?;
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
        let cipher = ChaCha20Poly1305::new_from_slice(key)
            .map_err(|e| Error::Crypto(format!("chacha20-poly1305 key: {e}")))?;
        out.copy_from_slice(&ciphertext[..pt_len]);
        cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(nonce),
                b"",
                out,
                Tag::from_slice(&ciphertext[pt_len..]),
            )
            .map_err(|_| Error::Crypto("chacha20-poly1305 decrypt failed".to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = [11u8; KEY_SIZE];
        let nonce = [13u8; NONCE_SIZE];
        let plaintext = [5u8; KEY_SIZE];
        let mut ct = vec![0u8; plaintext.len() + TAG_SIZE];
        ChaCha.encrypt(&mut ct, &plaintext, &nonce, &key).unwrap();
        let mut pt = vec![0u8; plaintext.len()];
        ChaCha.decrypt(&mut pt, &ct, &nonce, &key).unwrap();
        assert_eq!(plaintext.as_slice(), pt.as_slice());
    }

    #[test]
    fn distinct_from_aes() {
        use crate::crypto::sensible::Sensible;
        use crate::crypto::EncryptionScheme as _;
        let key = [11u8; KEY_SIZE];
        let nonce = [13u8; NONCE_SIZE];
        let plaintext = [5u8; KEY_SIZE];
        let mut a = vec![0u8; plaintext.len() + TAG_SIZE];
        let mut b = vec![0u8; plaintext.len() + TAG_SIZE];
        ChaCha.encrypt(&mut a, &plaintext, &nonce, &key).unwrap();
        Sensible.encrypt(&mut b, &plaintext, &nonce, &key).unwrap();
        assert_ne!(a, b);
    }
}
