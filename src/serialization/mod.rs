//! The libmacaroon wire formats.
//!
//! Four codecs with identical surfaces (`encode_macaroon`,
//! `decode_macaroon`, `encode_stack`, `decode_stack`):
//!
//! - [`v1`]: length-prefixed ASCII packets, canonically transported as
//!   URL-safe base64;
//! - [`v1json`]: the v1 JSON object form;
//! - [`v2`]: the TLV binary form introduced by libmacaroons v2;
//! - [`v2json`]: the v2 JSON object form.
//!
//! [`Macaroon::deserialize`] and [`Stack::deserialize`] auto-detect the
//! format: a leading `0x02` byte is v2 binary, `{`/`[` is JSON (v2-json
//! tried first, then v1-json), anything else is treated as base64-encoded
//! v1.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;

use crate::error::Error;
use crate::macaroon::Macaroon;
use crate::verify::Stack;
use crate::Result;

pub mod v1;
pub mod v1json;
pub mod v2;
pub mod v2json;

/// Wire format selector for [`Macaroon::serialize`] and
/// [`Stack::serialize`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    V1,
    V1Json,
    V2,
    V2Json,
}

impl Macaroon {
    /// Encodes the macaroon in the chosen wire format.
    pub fn serialize(&self, format: Format) -> Result<Vec<u8>> {
        match format {
            Format::V1 => v1::encode_macaroon(self),
            Format::V1Json => v1json::encode_macaroon(self),
            Format::V2 => v2::encode_macaroon(self),
            Format::V2Json => v2json::encode_macaroon(self),
        }
    }

    /// Decodes a macaroon, auto-detecting the wire format.
    pub fn deserialize(data: &[u8]) -> Result<Macaroon> {
        match data.first() {
            None => Err(Error::Deserialization("no macaroon data".to_string())),
            Some(2) => v2::decode_macaroon(data),
            Some(b'{') => v2json::decode_macaroon(data).or_else(|_| v1json::decode_macaroon(data)),
            Some(b) if is_base64_byte(*b) => v1::decode_macaroon(data),
            Some(_) => Err(Error::UnknownFormat),
        }
    }
}

impl Stack {
    /// Encodes the whole stack in the chosen wire format.
    pub fn serialize(&self, format: Format) -> Result<Vec<u8>> {
        match format {
            Format::V1 => v1::encode_stack(self),
            Format::V1Json => v1json::encode_stack(self),
            Format::V2 => v2::encode_stack(self),
            Format::V2Json => v2json::encode_stack(self),
        }
    }

    /// Decodes a stack, auto-detecting the wire format.
    pub fn deserialize(data: &[u8]) -> Result<Stack> {
        match data.first() {
            None => Err(Error::Deserialization("no macaroon data".to_string())),
            Some(2) => v2::decode_stack(data),
            Some(b'[') => v2json::decode_stack(data).or_else(|_| v1json::decode_stack(data)),
            Some(b) if is_base64_byte(*b) => v1::decode_stack(data),
            Some(_) => Err(Error::UnknownFormat),
        }
    }
}

fn is_base64_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'+' | b'-' | b'/' | b'_' | b'=')
}

/// Decodes base64 of any common variant, picking the alphabet by inspecting
/// the input for `-`/`_` and a trailing `=`.
pub(crate) fn base64_decode_loose(data: &[u8]) -> Result<Vec<u8>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let padded = data.last() == Some(&b'=');
    let url = data.iter().any(|&b| b == b'-' || b == b'_');
    let decoded = match (padded, url) {
        (true, true) => URL_SAFE.decode(data),
        (false, true) => URL_SAFE_NO_PAD.decode(data),
        (true, false) => STANDARD.decode(data),
        (false, false) => STANDARD_NO_PAD.decode(data),
    }?;
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::sensible;

    fn sample() -> Macaroon {
        let s = sensible::scheme();
        let key = sensible::derive_root_key(b"my key");
        let m = s
            .new_macaroon(
                "http://example.org/",
                b"keyid",
                &key,
                &[b"account = 3735928559", b"user = alice"],
            )
            .unwrap();
        let ckey = [9u8; 32];
        s.add_third_party_caveat(&m, &ckey, b"caveat", "https://auth.mybank.com")
            .unwrap()
    }

    #[test]
    fn every_format_roundtrips() {
        let m = sample();
        for format in [Format::V1, Format::V1Json, Format::V2, Format::V2Json] {
            let encoded = m.serialize(format).unwrap();
            let decoded = Macaroon::deserialize(&encoded).unwrap();
            assert!(m.equal(&decoded), "format {format:?}");
        }
    }

    #[test]
    fn cross_format_decodes_are_pairwise_equal() {
        let m = sample();
        let via_v1 = Macaroon::deserialize(&m.serialize(Format::V1).unwrap()).unwrap();
        let via_v2 = Macaroon::deserialize(&m.serialize(Format::V2).unwrap()).unwrap();
        let via_v2j = Macaroon::deserialize(&m.serialize(Format::V2Json).unwrap()).unwrap();
        assert!(via_v1.equal(&via_v2));
        assert!(via_v2.equal(&via_v2j));
    }

    #[test]
    fn stack_roundtrips_in_every_format() {
        let s = sensible::scheme();
        let key = sensible::derive_root_key(b"stack key");
        let ckey = [4u8; 32];
        let m = s.new_macaroon("loc", b"root", &key, &[b"a > 1"]).unwrap();
        let m = s
            .add_third_party_caveat(&m, &ckey, b"cid", "https://other.example.org")
            .unwrap();
        let d = s
            .unsafe_root_macaroon("https://other.example.org", b"cid", &ckey)
            .unwrap();
        let stack = s.prepare_stack(&m, &[d]).unwrap();
        for format in [Format::V1, Format::V1Json, Format::V2, Format::V2Json] {
            let encoded = stack.serialize(format).unwrap();
            let decoded = Stack::deserialize(&encoded).unwrap();
            assert_eq!(stack, decoded, "format {format:?}");
        }
    }

    #[test]
    fn loose_base64_accepts_all_variants() {
        let raw = vec![0xFBu8, 0xEF, 0xBE, 0x00, 0x01];
        for encoded in [
            STANDARD.encode(&raw),
            STANDARD_NO_PAD.encode(&raw),
            URL_SAFE.encode(&raw),
            URL_SAFE_NO_PAD.encode(&raw),
        ] {
            assert_eq!(base64_decode_loose(encoded.as_bytes()).unwrap(), raw);
        }
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(Macaroon::deserialize(&[0x07, 0x01]).is_err());
        assert!(Macaroon::deserialize(b"").is_err());
    }
}
