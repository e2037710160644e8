//! The macaroon value and its compact byte layout.
//!
//! A macaroon's essential data lives in one contiguous buffer:
//!
//! ```text
//! location || id || caveat* || signature
//! ```
//!
//! where each caveat is self-delimited as a six-byte header carrying three
//! little-endian u16 lengths followed by `vid || cid || cl`. Field lengths
//! are capped at 65 535 bytes. The layout makes cloning a single buffer
//! copy, appending a caveat a single allocation plus one HMAC, and every
//! accessor a zero-allocation slice into the buffer.

use std::fmt;

use crate::crypto::HmacScheme;
use crate::error::Error;
use crate::Result;

/// Upper bound on the size of any single macaroon field.
pub const MAX_FIELD_LEN: usize = u16::MAX as usize;

const CAVEAT_HEADER: usize = 6;

/// An immutable macaroon. Attenuation produces a new value; the original is
/// untouched and remains safe to share.
#[derive(Clone, PartialEq, Eq)]
pub struct Macaroon {
    buf: Vec<u8>,
    loc_len: u16,
    id_len: u16,
    sig_len: u16,
    caveat_count: u16,
}

impl Macaroon {
    /// Location hint. Informational only; never part of signature inputs.
    pub fn location(&self) -> &str {
        // Locations enter through &str or String, so this is always UTF-8.
        std::str::from_utf8(&self.buf[..self.loc_len as usize]).unwrap_or("")
    }

    /// The macaroon id: the initial HMAC input, unique per root key.
    pub fn id(&self) -> &[u8] {
        let start = self.loc_len as usize;
        &self.buf[start..start + self.id_len as usize]
    }

    /// The running MAC over the caveat chain.
    pub fn signature(&self) -> &[u8] {
        &self.buf[self.buf.len() - self.sig_len as usize..]
    }

    pub(crate) fn signature_mut(&mut self) -> &mut [u8] {
        let start = self.buf.len() - self.sig_len as usize;
        &mut self.buf[start..]
    }

    pub fn caveat_count(&self) -> usize {
        self.caveat_count as usize
    }

    /// Iterates over all caveats in declaration order without allocating.
    pub fn caveats(&self) -> Caveats<'_> {
        Caveats {
            rest: self.caveat_region(),
            remaining: self.caveat_count as usize,
        }
    }

    /// Caveats evaluated by the target service (empty VID).
    pub fn first_party_caveats(&self) -> impl Iterator<Item = Caveat<'_>> {
        self.caveats().filter(|c| !c.is_third_party())
    }

    /// Caveats requiring a discharge macaroon from a third party.
    pub fn third_party_caveats(&self) -> impl Iterator<Item = Caveat<'_>> {
        self.caveats().filter(|c| c.is_third_party())
    }

    /// Byte-equality of the full macaroon content.
    pub fn equal(&self, other: &Macaroon) -> bool {
        self == other
    }

    fn caveat_region(&self) -> &[u8] {
        let start = self.loc_len as usize + self.id_len as usize;
        let end = self.buf.len() - self.sig_len as usize;
        &self.buf[start..end]
    }

    /// Builds a macaroon from raw parts without validation beyond size caps.
    /// Intended for wire-format decoders; the result carries whatever
    /// signature the input claims.
    pub fn from_raw(raw: &Raw) -> Result<Macaroon> {
        check_field_len("location", raw.location.len())?;
        check_field_len("id", raw.id.len())?;
        check_field_len("signature", raw.signature.len())?;
        if raw.caveats.len() > u16::MAX as usize {
            return Err(Error::InvalidArgument(format!(
                "too many caveats: {}",
                raw.caveats.len()
            )));
        }
        let mut caveat_size = 0usize;
        for c in &raw.caveats {
            check_field_len("caveat id", c.cid.len())?;
            check_field_len("caveat vid", c.vid.len())?;
            check_field_len("caveat location", c.location.len())?;
            caveat_size += CAVEAT_HEADER + c.vid.len() + c.cid.len() + c.location.len();
        }
        let total = raw.location.len() + raw.id.len() + caveat_size + raw.signature.len();
        let mut buf = Vec::with_capacity(total);
        buf.extend_from_slice(raw.location.as_bytes());
        buf.extend_from_slice(&raw.id);
        for c in &raw.caveats {
            push_caveat(&mut buf, &c.vid, &c.cid, &c.location);
        }
        buf.extend_from_slice(&raw.signature);
        Ok(Macaroon {
            buf,
            loc_len: raw.location.len() as u16,
            id_len: raw.id.len() as u16,
            sig_len: raw.signature.len() as u16,
            caveat_count: raw.caveats.len() as u16,
        })
    }

    /// Owned mirror of the macaroon's content.
    pub fn to_raw(&self) -> Raw {
        Raw {
            id: self.id().to_vec(),
            location: self.location().to_string(),
            caveats: self.caveats().map(|c| c.to_raw()).collect(),
            signature: self.signature().to_vec(),
        }
    }

    /// Builds a bare macaroon and signs it: `sig = HMAC(key, id)`.
    pub(crate) fn new_signed(
        location: &str,
        id: &[u8],
        key: &[u8],
        hmac: &dyn HmacScheme,
    ) -> Result<Macaroon> {
        check_field_len("location", location.len())?;
        check_field_len("id", id.len())?;
        let sig_len = hmac.key_size();
        check_field_len("signature", sig_len)?;
        if key.len() != sig_len {
            return Err(Error::InvalidArgument(format!(
                "invalid key size: need={sig_len}, got={}",
                key.len()
            )));
        }
        let mut buf = Vec::with_capacity(location.len() + id.len() + sig_len);
        buf.extend_from_slice(location.as_bytes());
        buf.extend_from_slice(id);
        buf.extend_from_slice(key);
        let mut m = Macaroon {
            buf,
            loc_len: location.len() as u16,
            id_len: id.len() as u16,
            sig_len: sig_len as u16,
            caveat_count: 0,
        };
        let id_start = m.loc_len as usize;
        let id_end = id_start + m.id_len as usize;
        let (head, sig) = m.buf.split_at_mut(id_end);
        hmac.hmac(sig, &head[id_start..id_end])?;
        Ok(m)
    }

    /// Appends one caveat, advancing the signature by
    /// `sig = HMAC(sig, vid || cid)`. One allocation, one bulk copy, one
    /// HMAC.
    pub(crate) fn append_caveat(
        &self,
        hmac: &dyn HmacScheme,
        vid: &[u8],
        cid: &[u8],
        location: &str,
    ) -> Result<Macaroon> {
        check_field_len("caveat id", cid.len())?;
        check_field_len("caveat vid", vid.len())?;
        check_field_len("caveat location", location.len())?;
        if self.caveat_count == u16::MAX {
            return Err(Error::InvalidArgument("too many caveats".to_string()));
        }
        let delta = CAVEAT_HEADER + vid.len() + cid.len() + location.len();
        let sig_start = self.buf.len() - self.sig_len as usize;
        let mut buf = Vec::with_capacity(self.buf.len() + delta);
        buf.extend_from_slice(&self.buf[..sig_start]);
        push_caveat(&mut buf, vid, cid, location);
        buf.extend_from_slice(&self.buf[sig_start..]);
        let mut m = Macaroon {
            buf,
            loc_len: self.loc_len,
            id_len: self.id_len,
            sig_len: self.sig_len,
            caveat_count: self.caveat_count + 1,
        };
        let chain_start = sig_start + CAVEAT_HEADER;
        let chain_end = chain_start + vid.len() + cid.len();
        let new_sig_start = m.buf.len() - m.sig_len as usize;
        let (head, sig) = m.buf.split_at_mut(new_sig_start);
        hmac.hmac(sig, &head[chain_start..chain_end])?;
        Ok(m)
    }
}

fn push_caveat(buf: &mut Vec<u8>, vid: &[u8], cid: &[u8], location: &str) {
    buf.extend_from_slice(&(vid.len() as u16).to_le_bytes());
    buf.extend_from_slice(&(cid.len() as u16).to_le_bytes());
    buf.extend_from_slice(&(location.len() as u16).to_le_bytes());
    buf.extend_from_slice(vid);
    buf.extend_from_slice(cid);
    buf.extend_from_slice(location.as_bytes());
}

fn check_field_len(what: &str, len: usize) -> Result<()> {
    if len > MAX_FIELD_LEN {
        return Err(Error::InvalidArgument(format!(
            "{what} too long: {len} > {MAX_FIELD_LEN}"
        )));
    }
    Ok(())
}

/// One link in the chain, borrowed from its macaroon's buffer.
#[derive(Clone, Copy, Debug)]
pub struct Caveat<'m> {
    vid: &'m [u8],
    cid: &'m [u8],
    loc: &'m [u8],
    chain: &'m [u8],
}

impl<'m> Caveat<'m> {
    /// The caveat id. For first-party caveats this is the predicate.
    pub fn id(&self) -> &'m [u8] {
        self.cid
    }

    /// The verification id: empty for first-party caveats, otherwise the
    /// caveat root key sealed under the signature current at attenuation.
    pub fn vid(&self) -> &'m [u8] {
        self.vid
    }

    /// Location hint of the discharging third party. Empty for first-party.
    pub fn location(&self) -> &'m str {
        std::str::from_utf8(self.loc).unwrap_or("")
    }

    pub fn is_third_party(&self) -> bool {
        !self.vid.is_empty()
    }

    /// The bytes folded into the signature chain: `vid || cid`, contiguous
    /// in the macaroon buffer.
    pub(crate) fn chain_data(&self) -> &'m [u8] {
        self.chain
    }

    pub fn to_raw(&self) -> RawCaveat {
        RawCaveat {
            cid: self.cid.to_vec(),
            vid: self.vid.to_vec(),
            location: self.location().to_string(),
        }
    }
}

/// Zero-allocation iterator over a macaroon's caveats.
pub struct Caveats<'m> {
    rest: &'m [u8],
    remaining: usize,
}

impl<'m> Iterator for Caveats<'m> {
    type Item = Caveat<'m>;

    fn next(&mut self) -> Option<Caveat<'m>> {
        if self.remaining == 0 || self.rest.len() < CAVEAT_HEADER {
            return None;
        }
        let vid_len = u16::from_le_bytes([self.rest[0], self.rest[1]]) as usize;
        let cid_len = u16::from_le_bytes([self.rest[2], self.rest[3]]) as usize;
        let loc_len = u16::from_le_bytes([self.rest[4], self.rest[5]]) as usize;
        let total = CAVEAT_HEADER + vid_len + cid_len + loc_len;
        if self.rest.len() < total {
            // Construction keeps the region well-formed.
            self.remaining = 0;
            return None;
        }
        let body = &self.rest[CAVEAT_HEADER..total];
        let caveat = Caveat {
            vid: &body[..vid_len],
            cid: &body[vid_len..vid_len + cid_len],
            loc: &body[vid_len + cid_len..],
            chain: &body[..vid_len + cid_len],
        };
        self.rest = &self.rest[total..];
        self.remaining -= 1;
        Some(caveat)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Caveats<'_> {}

/// Raw macaroon content, used by wire-format decoders to assemble a
/// [`Macaroon`] via [`Macaroon::from_raw`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Raw {
    pub id: Vec<u8>,
    pub location: String,
    pub caveats: Vec<RawCaveat>,
    pub signature: Vec<u8>,
}

/// Raw caveat content.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawCaveat {
    pub cid: Vec<u8>,
    pub vid: Vec<u8>,
    pub location: String,
}

impl RawCaveat {
    pub fn is_third_party(&self) -> bool {
        !self.vid.is_empty()
    }
}

impl fmt::Display for Macaroon {
    /// Renders a human-readable JSON form with non-printable bytes
    /// hex-escaped. Debugging aid, not a wire format.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let caveats: Vec<serde_json::Value> = self
            .caveats()
            .map(|c| {
                let mut obj = serde_json::Map::new();
                if !c.location().is_empty() {
                    obj.insert("location".to_string(), c.location().into());
                }
                if !c.vid().is_empty() {
                    obj.insert("vid".to_string(), printable_bytes(c.vid()).into());
                }
                obj.insert("cid".to_string(), printable_bytes(c.id()).into());
                serde_json::Value::Object(obj)
            })
            .collect();
        let value = serde_json::json!({
            "location": self.location(),
            "id": printable_bytes(self.id()),
            "caveats": caveats,
            "sig": printable_bytes(self.signature()),
        });
        match serde_json::to_string_pretty(&value) {
            Ok(js) => f.write_str(&js),
            Err(_) => Err(fmt::Error),
        }
    }
}

impl fmt::Debug for Macaroon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Macaroon")
            .field("location", &self.location())
            .field("id", &printable_bytes(self.id()))
            .field("caveats", &self.caveat_count)
            .field("sig", &printable_bytes(self.signature()))
            .finish()
    }
}

/// Printable representation of a byte string: the text itself when every
/// byte is printable ASCII, otherwise `0x`-prefixed hex.
pub(crate) fn printable_bytes(bs: &[u8]) -> String {
    if bs.is_empty() {
        return String::new();
    }
    if bs.iter().all(|&b| (32..=126).contains(&b)) {
        match std::str::from_utf8(bs) {
            Ok(s) => return s.to_string(),
            Err(_) => {}
        }
    }
    format!("0x{}", hex::encode(bs))
}
