//! libmacaroon v2 binary format: a TLV stream headed by a version byte.
//!
//! Layout: `0x02`, a header section (optional location, then the mandatory
//! id) closed by a zero byte, a caveats section (each caveat `cl? cid vid?`
//! closed by a zero byte) closed by a zero byte, and the signature field.
//! Field lengths are unsigned LEB128 varints. Stacks are concatenations.

use crate::error::Error;
use crate::macaroon::{Macaroon, Raw, RawCaveat};
use crate::verify::Stack;
use crate::Result;

const VERSION: u8 = 0x02;

const FIELD_EOS: u8 = 0;
const FIELD_LOCATION: u8 = 1;
const FIELD_ID: u8 = 2;
const FIELD_VID: u8 = 4;
const FIELD_SIG: u8 = 6;

pub fn encode_macaroon(m: &Macaroon) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(encoded_size(m));
    encode_raw(m, &mut out);
    Ok(out)
}

pub fn encode_stack(stack: &Stack) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(stack.iter().map(encoded_size).sum());
    for m in stack {
        encode_raw(m, &mut out);
    }
    Ok(out)
}

pub fn decode_macaroon(data: &[u8]) -> Result<Macaroon> {
    let mut reader = Reader { data, pos: 0 };
    let m = decode_one(&mut reader)?;
    if reader.pos != data.len() {
        return Err(Error::Deserialization(
            "trailing data after macaroon".to_string(),
        ));
    }
    Ok(m)
}

pub fn decode_stack(data: &[u8]) -> Result<Stack> {
    let mut reader = Reader { data, pos: 0 };
    let mut macaroons = Vec::new();
    while reader.pos != data.len() {
        macaroons.push(decode_one(&mut reader)?);
    }
    Ok(Stack::from(macaroons))
}

fn encode_raw(m: &Macaroon, out: &mut Vec<u8>) {
    out.push(VERSION);
    if !m.location().is_empty() {
        write_field(out, FIELD_LOCATION, m.location().as_bytes());
    }
    write_field(out, FIELD_ID, m.id());
    out.push(FIELD_EOS);
    for c in m.caveats() {
        if !c.location().is_empty() {
            write_field(out, FIELD_LOCATION, c.location().as_bytes());
        }
        write_field(out, FIELD_ID, c.id());
        if !c.vid().is_empty() {
            write_field(out, FIELD_VID, c.vid());
        }
        out.push(FIELD_EOS);
    }
    out.push(FIELD_EOS);
    write_field(out, FIELD_SIG, m.signature());
}

fn write_field(out: &mut Vec<u8>, tag: u8, value: &[u8]) {
    out.push(tag);
    write_varint(out, value.len() as u64);
    out.extend_from_slice(value);
}

fn write_varint(out: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        out.push((v as u8 & 0x7F) | 0x80);
        v >>= 7;
    }
    out.push(v as u8);
}

fn varint_len(v: u64) -> usize {
    let mut n = 1;
    let mut v = v >> 7;
    while v > 0 {
        n += 1;
        v >>= 7;
    }
    n
}

fn encoded_size(m: &Macaroon) -> usize {
    let field = |len: usize| 1 + varint_len(len as u64) + len;
    let mut sz = 1; // version byte
    if !m.location().is_empty() {
        sz += field(m.location().len());
    }
    sz += field(m.id().len()) + 1;
    for c in m.caveats() {
        if !c.location().is_empty() {
            sz += field(c.location().len());
        }
        sz += field(c.id().len());
        if !c.vid().is_empty() {
            sz += field(c.vid().len());
        }
        sz += 1;
    }
    sz + 1 + field(m.signature().len())
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn read_byte(&mut self) -> Result<u8> {
        let b = self
            .data
            .get(self.pos)
            .copied()
            .ok_or_else(|| Error::Deserialization("unexpected end of input".to_string()))?;
        self.pos += 1;
        Ok(b)
    }

    fn read_varint(&mut self) -> Result<u64> {
        let mut value: u64 = 0;
        let mut shift = 0;
        loop {
            if shift > 63 {
                return Err(Error::Deserialization("varint overflow".to_string()));
            }
            let b = self.read_byte()?;
            value |= u64::from(b & 0x7F) << shift;
            if b & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    /// Reads a tagged field. EOS carries no length or value.
    fn read_field(&mut self) -> Result<(u8, &'a [u8])> {
        const EMPTY: &[u8] = &[];
        let tag = self.read_byte()?;
        if tag == FIELD_EOS {
            return Ok((tag, EMPTY));
        }
        let len = self.read_varint()?;
        let len = usize::try_from(len)
            .map_err(|_| Error::Deserialization("field length overflow".to_string()))?;
        if self.pos + len > self.data.len() {
            return Err(Error::Deserialization(format!(
                "field of {len} bytes exceeds input"
            )));
        }
        let value = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok((tag, value))
    }
}

fn decode_one(reader: &mut Reader<'_>) -> Result<Macaroon> {
    if reader.read_byte()? != VERSION {
        return Err(Error::Deserialization("wrong version byte".to_string()));
    }
    let mut raw = Raw::default();

    // Header section: optional location, then the mandatory id.
    let (tag, value) = reader.read_field()?;
    match tag {
        FIELD_LOCATION => {
            raw.location = String::from_utf8(value.to_vec())?;
            let (tag, value) = reader.read_field()?;
            if tag != FIELD_ID {
                return Err(unexpected_tag(tag));
            }
            raw.id = value.to_vec();
        }
        FIELD_ID => raw.id = value.to_vec(),
        _ => return Err(unexpected_tag(tag)),
    }
    let (tag, _) = reader.read_field()?;
    if tag != FIELD_EOS {
        return Err(Error::Deserialization("expected end of header".to_string()));
    }

    // Caveats section, ended by EOS.
    loop {
        let (tag, value) = reader.read_field()?;
        if tag == FIELD_EOS {
            break;
        }
        let mut caveat = RawCaveat::default();
        let mut tag = tag;
        let mut value = value;
        if tag == FIELD_LOCATION {
            caveat.location = String::from_utf8(value.to_vec())?;
            (tag, value) = reader.read_field()?;
        }
        if tag != FIELD_ID {
            return Err(unexpected_tag(tag));
        }
        caveat.cid = value.to_vec();
        let (tag, value) = reader.read_field()?;
        match tag {
            FIELD_EOS => {
                raw.caveats.push(caveat);
                continue;
            }
            FIELD_VID => caveat.vid = value.to_vec(),
            _ => return Err(unexpected_tag(tag)),
        }
        let (tag, _) = reader.read_field()?;
        if tag != FIELD_EOS {
            return Err(Error::Deserialization("expected end of caveat".to_string()));
        }
        raw.caveats.push(caveat);
    }

    let (tag, value) = reader.read_field()?;
    if tag != FIELD_SIG {
        return Err(unexpected_tag(tag));
    }
    raw.signature = value.to_vec();
    Macaroon::from_raw(&raw)
}

fn unexpected_tag(tag: u8) -> Error {
    Error::Deserialization(format!("unexpected field type {tag:#04x}"))
}
