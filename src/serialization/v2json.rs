//! libmacaroon v2 JSON format.
//!
//! `{v: 2, l?, i|i64, c: [{l?, i|i64, v|v64?}], s|s64}`. Unsuffixed fields
//! carry UTF-8 text; `64`-suffixed fields carry base64url of arbitrary
//! bytes. The two are mutually exclusive per field, and an absent field is
//! distinct from an empty one. The version may be a JSON number or a string
//! containing a number.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;
use crate::macaroon::{Macaroon, Raw, RawCaveat};
use crate::serialization::base64_decode_loose;
use crate::verify::Stack;
use crate::Result;

#[derive(Debug, Default, Serialize, Deserialize)]
struct MacaroonJson {
    v: Version,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    l: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    i: Option<String>,
    #[serde(rename = "i64", default, skip_serializing_if = "Option::is_none")]
    i_b64: Option<String>,
    #[serde(default)]
    c: Vec<CaveatJson>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    s: Option<String>,
    #[serde(rename = "s64", default, skip_serializing_if = "Option::is_none")]
    s_b64: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CaveatJson {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    l: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    i: Option<String>,
    #[serde(rename = "i64", default, skip_serializing_if = "Option::is_none")]
    i_b64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    v: Option<String>,
    #[serde(rename = "v64", default, skip_serializing_if = "Option::is_none")]
    v_b64: Option<String>,
}

/// The `v` field: a JSON number, or a string containing one.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Version(u32);

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.0)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Version, D::Error> {
        struct VersionVisitor;

        impl Visitor<'_> for VersionVisitor {
            type Value = Version;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a version number or numeric string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Version, E> {
                u32::try_from(v)
                    .map(Version)
                    .map_err(|_| E::custom("version out of range"))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Version, E> {
                u32::try_from(v)
                    .map(Version)
                    .map_err(|_| E::custom("version out of range"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Version, E> {
                v.parse::<u32>()
                    .map(Version)
                    .map_err(|e| E::custom(format!("version: {e}")))
            }
        }

        deserializer.deserialize_any(VersionVisitor)
    }
}

pub fn encode_macaroon(m: &Macaroon) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&to_json(m))?)
}

pub fn encode_stack(stack: &Stack) -> Result<Vec<u8>> {
    let js: Vec<MacaroonJson> = stack.iter().map(to_json).collect();
    Ok(serde_json::to_vec(&js)?)
}

pub fn decode_macaroon(data: &[u8]) -> Result<Macaroon> {
    let js: MacaroonJson = serde_json::from_slice(data)?;
    from_json(&js)
}

pub fn decode_stack(data: &[u8]) -> Result<Stack> {
    let js: Vec<MacaroonJson> = serde_json::from_slice(data)?;
    let macaroons: Vec<Macaroon> = js.iter().map(from_json).collect::<Result<_>>()?;
    Ok(Stack::from(macaroons))
}

fn to_json(m: &Macaroon) -> MacaroonJson {
    let (i, i_b64) = split_field(m.id());
    let (s, s_b64) = split_field(m.signature());
    MacaroonJson {
        v: Version(2),
        l: (!m.location().is_empty()).then(|| m.location().to_string()),
        i,
        i_b64,
        c: m
            .caveats()
            .map(|c| {
                let (i, i_b64) = split_field(c.id());
                let (v, v_b64) = split_field(c.vid());
                CaveatJson {
                    l: (!c.location().is_empty()).then(|| c.location().to_string()),
                    i,
                    i_b64,
                    v,
                    v_b64,
                }
            })
            .collect(),
        s,
        s_b64,
    }
}

fn from_json(js: &MacaroonJson) -> Result<Macaroon> {
    if js.v != Version(2) {
        return Err(Error::Deserialization(format!(
            "unsupported version: {}",
            js.v.0
        )));
    }
    let mut raw = Raw {
        id: join_field("i", &js.i, &js.i_b64)?,
        location: js.l.clone().unwrap_or_default(),
        caveats: Vec::with_capacity(js.c.len()),
        signature: join_field("s", &js.s, &js.s_b64)?,
    };
    for c in &js.c {
        raw.caveats.push(RawCaveat {
            cid: join_field("i", &c.i, &c.i_b64)?,
            vid: join_field("v", &c.v, &c.v_b64)?,
            location: c.l.clone().unwrap_or_default(),
        });
    }
    Macaroon::from_raw(&raw)
}

/// Splits bytes into the unsuffixed UTF-8 field or the base64 `64` field.
/// Empty bytes produce neither.
fn split_field(data: &[u8]) -> (Option<String>, Option<String>) {
    if data.is_empty() {
        return (None, None);
    }
    match std::str::from_utf8(data) {
        Ok(s) => (Some(s.to_string()), None),
        Err(_) => (None, Some(URL_SAFE_NO_PAD.encode(data))),
    }
}

fn join_field(name: &str, text: &Option<String>, b64: &Option<String>) -> Result<Vec<u8>> {
    match (text, b64) {
        (Some(_), Some(_)) => Err(Error::Deserialization(format!(
            "fields '{name}' and '{name}64' are mutually exclusive"
        ))),
        (Some(t), None) => Ok(t.clone().into_bytes()),
        (None, Some(b)) => base64_decode_loose(b.as_bytes()),
        (None, None) => Ok(Vec::new()),
    }
}
