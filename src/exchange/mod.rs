//! The caveat-id exchange envelope.
//!
//! A third-party caveat id must let the third party — and nobody else —
//! recover the [`Ticket`] it was minted over. This module composes that out
//! of two pluggable halves:
//!
//! - an encoding turning tickets and [`EncryptedMessage`]s into
//!   self-describing bytes ([`TicketEncoding`]; [`JsonEncoding`] is the
//!   in-crate reference, msgpack or protobuf bindings slot in the same
//!   way);
//! - an encryptor/decryptor pair sealing the encoded ticket for the third
//!   party ([`MessageEncryptor`] / [`MessageDecryptor`]; [`KeySealer`] is
//!   an AEAD reference under a static third-party key).
//!
//! [`Issuer`] runs `encode(encrypt(encode_ticket(t)))` to produce a caveat
//! id; [`Extractor`] inverts it. No state is shared between the two sides
//! beyond the third party's key material.

use crate::thirdparty::{CaveatIdIssuer, Ticket, TicketExtractor};
use crate::BoxError;

mod json;
mod sealer;

pub use json::JsonEncoding;
pub use sealer::KeySealer;

/// An encrypted, self-describing payload. `kind` and `key_id` are routing
/// hints only; they carry no authority.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EncryptedMessage {
    pub kind: String,
    pub key_id: String,
    pub payload: Vec<u8>,
}

/// Encodes tickets and encrypted messages into bytes and back.
pub trait TicketEncoding {
    fn encode_ticket(&self, ticket: &Ticket) -> Result<Vec<u8>, BoxError>;
    fn decode_ticket(&self, bytes: &[u8]) -> Result<Ticket, BoxError>;
    fn encode_message(&self, message: &EncryptedMessage) -> Result<Vec<u8>, BoxError>;
    fn decode_message(&self, bytes: &[u8]) -> Result<EncryptedMessage, BoxError>;
}

/// Seals plaintext bytes for the third party.
pub trait MessageEncryptor {
    fn encrypt_message(&self, plaintext: &[u8]) -> Result<EncryptedMessage, BoxError>;
}

/// Opens an [`EncryptedMessage`]. The dual of [`MessageEncryptor`].
pub trait MessageDecryptor {
    fn decrypt_message(&self, message: &EncryptedMessage) -> Result<Vec<u8>, BoxError>;
}

/// [`CaveatIdIssuer`] assembled from an encoding and an encryptor: the
/// caveat id is the encoded encrypted encoded ticket, fully opaque to the
/// bearer.
pub struct Issuer {
    pub encoding: Box<dyn TicketEncoding + Send + Sync>,
    pub encryptor: Box<dyn MessageEncryptor + Send + Sync>,
}

impl CaveatIdIssuer for Issuer {
    fn issue_caveat_id(&self, ticket: &Ticket) -> Result<Vec<u8>, BoxError> {
        let plain = self.encoding.encode_ticket(ticket)?;
        let sealed = self.encryptor.encrypt_message(&plain)?;
        self.encoding.encode_message(&sealed)
    }
}

/// [`TicketExtractor`] inverting [`Issuer`].
pub struct Extractor {
    pub encoding: Box<dyn TicketEncoding + Send + Sync>,
    pub decryptor: Box<dyn MessageDecryptor + Send + Sync>,
}

impl TicketExtractor for Extractor {
    fn extract_ticket(&self, cid: &[u8]) -> Result<Ticket, BoxError> {
        let sealed = self.encoding.decode_message(cid)?;
        let plain = self.decryptor.decrypt_message(&sealed)?;
        self.encoding.decode_ticket(&plain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thirdparty::{CaveatIdIssuer, TicketExtractor};

    #[test]
    fn issue_extract_roundtrip() {
        let key = [42u8; 32];
        let issuer = Issuer {
            encoding: Box::new(JsonEncoding),
            encryptor: Box::new(KeySealer::new("key-1", key)),
        };
        let extractor = Extractor {
            encoding: Box::new(JsonEncoding),
            decryptor: Box::new(KeySealer::new("key-1", key)),
        };
        let ticket = Ticket {
            caveat_key: vec![7u8; 32],
            predicate: b"userid == foo".to_vec(),
        };
        let cid = issuer.issue_caveat_id(&ticket).unwrap();
        let recovered = extractor.extract_ticket(&cid).unwrap();
        assert_eq!(recovered, ticket);
    }

    #[test]
    fn extraction_fails_under_wrong_key() {
        let issuer = Issuer {
            encoding: Box::new(JsonEncoding),
            encryptor: Box::new(KeySealer::new("key-1", [42u8; 32])),
        };
        let extractor = Extractor {
            encoding: Box::new(JsonEncoding),
            decryptor: Box::new(KeySealer::new("key-1", [43u8; 32])),
        };
        let ticket = Ticket {
            caveat_key: vec![7u8; 32],
            predicate: b"userid == foo".to_vec(),
        };
        let cid = issuer.issue_caveat_id(&ticket).unwrap();
        assert!(extractor.extract_ticket(&cid).is_err());
    }

    #[test]
    fn caveat_id_is_opaque() {
        let issuer = Issuer {
            encoding: Box::new(JsonEncoding),
            encryptor: Box::new(KeySealer::new("key-1", [42u8; 32])),
        };
        let ticket = Ticket {
            caveat_key: vec![7u8; 32],
            predicate: b"userid == foo".to_vec(),
        };
        let cid = issuer.issue_caveat_id(&ticket).unwrap();
        let text = String::from_utf8_lossy(&cid);
        assert!(!text.contains("userid == foo"));
    }
}
