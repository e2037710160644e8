use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::exchange::{EncryptedMessage, MessageDecryptor, MessageEncryptor};
use crate::BoxError;

const NONCE_SIZE: usize = 12;
const MESSAGE_KIND: &str = "aes256-gcm";

/// Reference sealer: AES-256-GCM under a static third-party key.
///
/// The attenuating side holds the same key as the discharging side (or, in
/// a public-key deployment, this is replaced by an asymmetric
/// implementation of the same traits). The payload layout is
/// `nonce || ciphertext || tag`.
pub struct KeySealer {
    key_id: String,
    key: Zeroizing<[u8; 32]>,
}

impl KeySealer {
    pub fn new(key_id: impl Into<String>, key: [u8; 32]) -> KeySealer {
        KeySealer {
            key_id: key_id.into(),
            key: Zeroizing::new(key),
        }
    }
}

impl MessageEncryptor for KeySealer {
    fn encrypt_message(&self, plaintext: &[u8]) -> Result<EncryptedMessage, BoxError> {
        let cipher = Aes256Gcm::new_from_slice(&self.key[..])
            .map_err(|e| format!("aes-gcm key: {e}"))?;
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng
            .try_fill_bytes(&mut nonce)
            .map_err(|e| format!("os rng: {e}"))?;
        let sealed = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: self.key_id.as_bytes(),
                },
            )
            .map_err(|_| "aes-gcm encrypt failed".to_string())?;
        let mut payload = Vec::with_capacity(NONCE_SIZE + sealed.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&sealed);
        Ok(EncryptedMessage {
            kind: MESSAGE_KIND.to_string(),
            key_id: self.key_id.clone(),
            payload,
        })
    }
}

impl MessageDecryptor for KeySealer {
    fn decrypt_message(&self, message: &EncryptedMessage) -> Result<Vec<u8>, BoxError> {
        if message.kind != MESSAGE_KIND {
            return Err(format!("unexpected message kind: {}", message.kind).into());
        }
        if message.payload.len() < NONCE_SIZE {
            return Err("payload too short".to_string().into());
        }
        let cipher = Aes256Gcm::new_from_slice(&self.key[..])
            .map_err(|e| format!("aes-gcm key: {e}"))?;
        let (nonce, sealed) = message.payload.split_at(NONCE_SIZE);
        cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: sealed,
                    aad: message.key_id.as_bytes(),
                },
            )
            .map_err(|_| "aes-gcm decrypt failed".to_string().into())
    }
}
