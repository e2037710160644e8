use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::exchange::{EncryptedMessage, TicketEncoding};
use crate::thirdparty::Ticket;
use crate::BoxError;

/// Reference [`TicketEncoding`] over JSON. Byte fields are base64url to
/// keep the encoding compact and self-describing.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonEncoding;

#[derive(Serialize, Deserialize)]
struct TicketJson {
    k: String,
    p: String,
}

#[derive(Serialize, Deserialize)]
struct MessageJson {
    t: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    kid: String,
    msg: String,
}

impl TicketEncoding for JsonEncoding {
    fn encode_ticket(&self, ticket: &Ticket) -> Result<Vec<u8>, BoxError> {
        let js = TicketJson {
            k: URL_SAFE_NO_PAD.encode(&ticket.caveat_key),
            p: URL_SAFE_NO_PAD.encode(&ticket.predicate),
        };
        Ok(serde_json::to_vec(&js)?)
    }

    fn decode_ticket(&self, bytes: &[u8]) -> Result<Ticket, BoxError> {
        let js: TicketJson = serde_json::from_slice(bytes)?;
        Ok(Ticket {
            caveat_key: URL_SAFE_NO_PAD.decode(js.k)?,
            predicate: URL_SAFE_NO_PAD.decode(js.p)?,
        })
    }

    fn encode_message(&self, message: &EncryptedMessage) -> Result<Vec<u8>, BoxError> {
        let js = MessageJson {
            t: message.kind.clone(),
            kid: message.key_id.clone(),
            msg: URL_SAFE_NO_PAD.encode(&message.payload),
        };
        Ok(serde_json::to_vec(&js)?)
    }

    fn decode_message(&self, bytes: &[u8]) -> Result<EncryptedMessage, BoxError> {
        let js: MessageJson = serde_json::from_slice(bytes)?;
        Ok(EncryptedMessage {
            kind: js.t,
            key_id: js.kid,
            payload: URL_SAFE_NO_PAD.decode(js.msg)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_roundtrip() {
        let ticket = Ticket {
            caveat_key: vec![0, 1, 2, 255],
            predicate: b"a > 1".to_vec(),
        };
        let bytes = JsonEncoding.encode_ticket(&ticket).unwrap();
        assert_eq!(JsonEncoding.decode_ticket(&bytes).unwrap(), ticket);
    }

    #[test]
    fn message_roundtrip_preserves_hints() {
        let msg = EncryptedMessage {
            kind: "aes256-gcm".to_string(),
            key_id: "key-1".to_string(),
            payload: vec![9, 8, 7],
        };
        let bytes = JsonEncoding.encode_message(&msg).unwrap();
        assert_eq!(JsonEncoding.decode_message(&bytes).unwrap(), msg);
    }

    #[test]
    fn empty_key_id_is_absent() {
        let msg = EncryptedMessage {
            kind: "aes256-gcm".to_string(),
            key_id: String::new(),
            payload: vec![1],
        };
        let bytes = JsonEncoding.encode_message(&msg).unwrap();
        assert!(!String::from_utf8(bytes.clone()).unwrap().contains("kid"));
        assert_eq!(JsonEncoding.decode_message(&bytes).unwrap(), msg);
    }
}
