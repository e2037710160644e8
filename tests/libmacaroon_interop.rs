//! Compatibility with tokens minted by libmacaroons and its ports.

use bearclaw::crypto::sensible;
use bearclaw::{Error, Format, Macaroon, PredicateSet, Stack};

/// base64 of a v2 binary token for location `http://example.org/`, id
/// `keyid`, one first-party caveat `account = 3735928559`, minted under
/// the key derived from "this is the key".
const V2_TOKEN: &str = "AgETaHR0cDovL2V4YW1wbGUub3JnLwIFa2V5aWQAAhRhY2NvdW50ID0gMzczNTkyODU1OQAABiD1SAf23G7fiL8PcwazgiVio2JTPb9zObphdl2kvSWdhw==";

fn decode_v2_token() -> Macaroon {
    let raw = base64_decode(V2_TOKEN);
    Macaroon::deserialize(&raw).expect("decode v2 token")
}

fn base64_decode(s: &str) -> Vec<u8> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    STANDARD.decode(s).expect("valid base64")
}

#[test]
fn verify_and_clear_interop_token() {
    let scheme = sensible::scheme();
    let key = sensible::derive_root_key(b"this is the key");
    let m = decode_v2_token();
    assert_eq!(m.location(), "http://example.org/");
    assert_eq!(m.id(), b"keyid");
    assert_eq!(m.caveat_count(), 1);

    let stack = scheme.prepare_stack(&m, &[]).unwrap();
    let verified = scheme.verify(&key, stack).expect("interop token verifies");

    let mut checker = PredicateSet::new();
    checker.satisfy(&b"account = 3735928559"[..]);
    verified.clear(&checker).expect("predicate clears");
}

#[test]
fn wrong_key_fails_verification() {
    let scheme = sensible::scheme();
    let key = sensible::derive_root_key(b"this is not the key");
    let m = decode_v2_token();
    let stack = scheme.prepare_stack(&m, &[]).unwrap();
    let err = scheme.verify(&key, stack).unwrap_err();
    assert!(matches!(err, Error::VerificationFailed(_)));
}

#[test]
fn reencode_matches_original_bytes() {
    let raw = base64_decode(V2_TOKEN);
    let m = Macaroon::deserialize(&raw).unwrap();
    assert_eq!(m.serialize(Format::V2).unwrap(), raw);
}

#[test]
fn cross_format_reencoding_is_equal() {
    let m = decode_v2_token();
    for format in [Format::V1, Format::V1Json, Format::V2, Format::V2Json] {
        let reencoded = m.serialize(format).unwrap();
        let decoded = Macaroon::deserialize(&reencoded).unwrap();
        assert!(m.equal(&decoded), "format {format:?}");
    }
}

#[test]
fn signature_still_verifies_after_reencoding() {
    let scheme = sensible::scheme();
    let key = sensible::derive_root_key(b"this is the key");
    let m = decode_v2_token();
    for format in [Format::V1, Format::V1Json, Format::V2, Format::V2Json] {
        let decoded = Macaroon::deserialize(&m.serialize(format).unwrap()).unwrap();
        let stack = Stack::from(vec![decoded]);
        assert!(scheme.verify(&key, stack).is_ok(), "format {format:?}");
    }
}

#[test]
fn attenuated_interop_token_chains_correctly() {
    let scheme = sensible::scheme();
    let key = sensible::derive_root_key(b"this is the key");
    let m = decode_v2_token();
    let m = scheme.add_first_party_caveat(&m, b"user = alice").unwrap();
    let stack = scheme.prepare_stack(&m, &[]).unwrap();
    let verified = scheme.verify(&key, stack).unwrap();
    let mut checker = PredicateSet::new();
    checker
        .satisfy(&b"account = 3735928559"[..])
        .satisfy(&b"user = alice"[..]);
    verified.clear(&checker).unwrap();
}
