//! libmacaroon v1 JSON format.
//!
//! `{location, identifier, caveats: [{cid, vid?, cl?}], signature}` with a
//! lowercase-hex signature and base64url VIDs. Identifiers and caveat ids
//! travel as JSON strings, so encoding fails if they are not valid UTF-8.
//! Stacks are JSON arrays.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::macaroon::{Macaroon, Raw, RawCaveat};
use crate::serialization::base64_decode_loose;
use crate::verify::Stack;
use crate::Result;

#[derive(Debug, Default, Serialize, Deserialize)]
struct MacaroonJson {
    #[serde(default)]
    location: String,
    identifier: String,
    #[serde(default)]
    caveats: Vec<CaveatJson>,
    /// Lowercase hex.
    signature: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CaveatJson {
    cid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    vid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cl: Option<String>,
}

pub fn encode_macaroon(m: &Macaroon) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&to_json(m)?)?)
}

pub fn encode_stack(stack: &Stack) -> Result<Vec<u8>> {
    let js: Vec<MacaroonJson> = stack.iter().map(to_json).collect::<Result<_>>()?;
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

fn to_json(m: &Macaroon) -> Result<MacaroonJson> {
    let identifier = std::str::from_utf8(m.id())
        .map_err(|_| Error::InvalidArgument("macaroon id is not valid UTF-8".to_string()))?
        .to_string();
    let mut js = MacaroonJson {
        location: m.location().to_string(),
        identifier,
        caveats: Vec::with_capacity(m.caveat_count()),
        signature: hex::encode(m.signature()),
    };
    for c in m.caveats() {
        let cid = std::str::from_utf8(c.id())
            .map_err(|_| Error::InvalidArgument("caveat id is not valid UTF-8".to_string()))?
            .to_string();
        js.caveats.push(CaveatJson {
            cid,
            vid: (!c.vid().is_empty()).then(|| URL_SAFE_NO_PAD.encode(c.vid())),
            cl: (!c.location().is_empty()).then(|| c.location().to_string()),
        });
    }
    Ok(js)
}

fn from_json(js: &MacaroonJson) -> Result<Macaroon> {
    let mut raw = Raw {
        id: js.identifier.clone().into_bytes(),
        location: js.location.clone(),
        caveats: Vec::with_capacity(js.caveats.len()),
        signature: hex::decode(&js.signature)?,
    };
    for c in &js.caveats {
        let vid = match &c.vid {
            Some(v) => base64_decode_loose(v.as_bytes())?,
            None => Vec::new(),
        };
        raw.caveats.push(RawCaveat {
            cid: c.cid.clone().into_bytes(),
            vid,
            location: c.cl.clone().unwrap_or_default(),
        });
    }
    Macaroon::from_raw(&raw)
}
