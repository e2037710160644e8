//! libmacaroon v1 binary format: a sequence of length-prefixed ASCII
//! packets, canonically transported as URL-safe base64.
//!
//! Each packet is four lowercase hex digits carrying the total packet
//! length (header included), then `field SP value LF`. A macaroon is
//! `location`, `identifier`, any number of caveats (`cid`, optionally
//! followed by `vid` and `cl`), and a final `signature`. Stacks are plain
//! concatenations.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use log::error;

use crate::error::Error;
use crate::macaroon::{Macaroon, Raw, RawCaveat};
use crate::serialization::base64_decode_loose;
use crate::verify::Stack;
use crate::Result;

const FIELD_LOCATION: &str = "location";
const FIELD_IDENTIFIER: &str = "identifier";
const FIELD_SIGNATURE: &str = "signature";
const FIELD_CID: &str = "cid";
const FIELD_VID: &str = "vid";
const FIELD_CL: &str = "cl";

// 4 hex digits + SP + LF
const PACKET_OVERHEAD: usize = 6;

pub fn encode_macaroon(m: &Macaroon) -> Result<Vec<u8>> {
    let mut raw = Vec::new();
    encode_raw(m, &mut raw)?;
    Ok(URL_SAFE_NO_PAD.encode(raw).into_bytes())
}

pub fn encode_stack(stack: &Stack) -> Result<Vec<u8>> {
    let mut raw = Vec::new();
    for m in stack {
        encode_raw(m, &mut raw)?;
    }
    Ok(URL_SAFE_NO_PAD.encode(raw).into_bytes())
}

pub fn decode_macaroon(data: &[u8]) -> Result<Macaroon> {
    let raw = base64_decode_loose(data)?;
    let mut reader = PacketReader { data: &raw, pos: 0 };
    let m = decode_one(&mut reader)?;
    if reader.pos != raw.len() {
        return Err(Error::Deserialization(
            "trailing data after macaroon".to_string(),
        ));
    }
    Ok(m)
}

pub fn decode_stack(data: &[u8]) -> Result<Stack> {
    let raw = base64_decode_loose(data)?;
    let mut reader = PacketReader { data: &raw, pos: 0 };
    let mut macaroons = Vec::new();
    while reader.pos != raw.len() {
        macaroons.push(decode_one(&mut reader)?);
    }
    Ok(Stack::from(macaroons))
}

fn encode_raw(m: &Macaroon, out: &mut Vec<u8>) -> Result<()> {
    write_packet(out, FIELD_LOCATION, m.location().as_bytes())?;
    write_packet(out, FIELD_IDENTIFIER, m.id())?;
    for c in m.caveats() {
        write_packet(out, FIELD_CID, c.id())?;
        if c.is_third_party() {
            write_packet(out, FIELD_VID, c.vid())?;
            write_packet(out, FIELD_CL, c.location().as_bytes())?;
        }
    }
    write_packet(out, FIELD_SIGNATURE, m.signature())
}

fn write_packet(out: &mut Vec<u8>, field: &str, value: &[u8]) -> Result<()> {
    let size = PACKET_OVERHEAD + field.len() + value.len();
    if size > u16::MAX as usize {
        return Err(Error::InvalidArgument(format!(
            "field '{field}' does not fit a v1 packet: {size} bytes"
        )));
    }
    out.extend_from_slice(format!("{size:04x}").as_bytes());
    out.extend_from_slice(field.as_bytes());
    out.push(b' ');
    out.extend_from_slice(value);
    out.push(b'\n');
    Ok(())
}

struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    fn next_packet(&mut self) -> Result<(&'a str, &'a [u8])> {
        let remaining = &self.data[self.pos..];
        if remaining.len() < 4 {
            return Err(Error::Deserialization(
                "truncated packet header".to_string(),
            ));
        }
        let hex = std::str::from_utf8(&remaining[..4])?;
        let size = usize::from_str_radix(hex, 16)
            .map_err(|e| Error::Deserialization(format!("bad packet length: {e}")))?;
        if size < PACKET_OVERHEAD || size > remaining.len() {
            return Err(Error::Deserialization(format!(
                "bad packet length: {size}"
            )));
        }
        let body = &remaining[4..size];
        let sp = body
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| Error::Deserialization("packet missing separator".to_string()))?;
        if body[body.len() - 1] != b'\n' {
            return Err(Error::Deserialization(
                "packet missing terminator".to_string(),
            ));
        }
        let field = std::str::from_utf8(&body[..sp])?;
        let value = &body[sp + 1..body.len() - 1];
        self.pos += size;
        Ok((field, value))
    }
}

fn decode_one(reader: &mut PacketReader<'_>) -> Result<Macaroon> {
    let mut raw = Raw::default();

    let (field, value) = reader.next_packet()?;
    if field != FIELD_LOCATION {
        return Err(unexpected_field(field));
    }
    raw.location = String::from_utf8(value.to_vec())?;

    let (field, value) = reader.next_packet()?;
    if field != FIELD_IDENTIFIER {
        return Err(unexpected_field(field));
    }
    raw.id = value.to_vec();

    let mut caveat: Option<RawCaveat> = None;
    loop {
        let (field, value) = reader.next_packet()?;
        match field {
            FIELD_CID => {
                if let Some(c) = caveat.take() {
                    raw.caveats.push(c);
                }
                caveat = Some(RawCaveat {
                    cid: value.to_vec(),
                    ..RawCaveat::default()
                });
            }
            FIELD_VID => match caveat.as_mut() {
                Some(c) if c.vid.is_empty() => c.vid = value.to_vec(),
                _ => return Err(Error::Deserialization("stray vid packet".to_string())),
            },
            FIELD_CL => match caveat.as_mut() {
                Some(c) if c.location.is_empty() => {
                    c.location = String::from_utf8(value.to_vec())?;
                }
                _ => return Err(Error::Deserialization("stray cl packet".to_string())),
            },
            FIELD_SIGNATURE => {
                if let Some(c) = caveat.take() {
                    raw.caveats.push(c);
                }
                if value.is_empty() {
                    error!("v1 decode: empty signature packet");
                    return Err(Error::Deserialization("empty signature".to_string()));
                }
                raw.signature = value.to_vec();
                return Macaroon::from_raw(&raw);
            }
            other => return Err(unexpected_field(other)),
        }
    }
}

fn unexpected_field(field: &str) -> Error {
    Error::Deserialization(format!("unexpected field '{field}'"))
}
