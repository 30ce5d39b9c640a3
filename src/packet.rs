//! Checksummed SysEx payload packets.
//!
//! Two encodings share a two byte length header and a trailing checksum:
//!
//! * Type A carries 8-bit data as nibble pairs (low nibble first). The header
//!   counts emitted nibble bytes, i.e. twice the payload length.
//! * Type B carries 7-bit data directly. The header counts payload bytes.
//!
//! The checksum is the two's complement of the sum of the emitted data bytes,
//! masked to 7 bits, so that data plus checksum sums to zero modulo 128.

use crate::error::{Error, Result};
use crate::midi::SYSEX_END;

/// A decoded packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    /// Decoded payload.
    pub data: Vec<u8>,
    /// Whether the received checksum matched.
    pub checksum_ok: bool,
    /// Wire bytes consumed, including header and checksum.
    pub consumed: usize,
}

#[inline]
fn checksum(bytes: &[u8]) -> u8 {
    let sum = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    sum.wrapping_neg() & 0x7F
}

fn header(len: usize) -> [u8; 2] {
    [((len >> 7) & 0x7F) as u8, (len & 0x7F) as u8]
}

fn read_header(bytes: &[u8]) -> Result<usize> {
    match bytes {
        [hi, lo, ..] => Ok(((*hi as usize & 0x7F) << 7) | (*lo as usize & 0x7F)),
        _ => Err(Error::Packet {
            declared: 2,
            available: bytes.len(),
        }),
    }
}

/// Encode 8-bit data as a Type A packet.
pub fn encode_type_a(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() * 2 + 3);
    out.extend_from_slice(&header(data.len() * 2));
    let body_start = out.len();
    for &byte in data {
        out.push(byte & 0x0F);
        out.push(byte >> 4);
    }
    let sum = checksum(&out[body_start..]);
    out.push(sum);
    out
}

/// Encode 7-bit data as a Type B packet. Bit 7 of each byte is dropped.
pub fn encode_type_b(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 3);
    out.extend_from_slice(&header(data.len()));
    out.extend(data.iter().map(|b| b & 0x7F));
    let sum = checksum(&out[2..]);
    out.push(sum);
    out
}

/// Decode one Type A packet from the start of `bytes`.
pub fn decode_type_a(bytes: &[u8]) -> Result<Packet> {
    let nibbles = read_header(bytes)? & !1;
    let needed = 2 + nibbles + 1;
    if bytes.len() < needed {
        return Err(Error::Packet {
            declared: nibbles / 2,
            available: bytes.len().saturating_sub(3) / 2,
        });
    }
    let body = &bytes[2..2 + nibbles];
    let data = body
        .chunks_exact(2)
        .map(|pair| (pair[0] & 0x0F) | (pair[1] & 0x0F) << 4)
        .collect();
    Ok(Packet {
        data,
        checksum_ok: checksum(body) == bytes[2 + nibbles] & 0x7F,
        consumed: needed,
    })
}

/// Decode one Type B packet from the start of `bytes`.
pub fn decode_type_b(bytes: &[u8]) -> Result<Packet> {
    let len = read_header(bytes)?;
    let needed = 2 + len + 1;
    if bytes.len() < needed {
        return Err(Error::Packet {
            declared: len,
            available: bytes.len().saturating_sub(3),
        });
    }
    let body = &bytes[2..2 + len];
    Ok(Packet {
        data: body.iter().map(|b| b & 0x7F).collect(),
        checksum_ok: checksum(body) == bytes[2 + len] & 0x7F,
        consumed: needed,
    })
}

/// Decode consecutive Type A packets until `F7` or the end of input.
///
/// Returns the concatenated payload and whether every checksum passed.
pub fn decode_type_a_stream(mut bytes: &[u8]) -> Result<(Vec<u8>, bool)> {
    let mut data = Vec::new();
    let mut all_ok = true;
    while !bytes.is_empty() && bytes[0] != SYSEX_END {
        let packet = decode_type_a(bytes)?;
        data.extend_from_slice(&packet.data);
        all_ok &= packet.checksum_ok;
        bytes = &bytes[packet.consumed..];
    }
    Ok((data, all_ok))
}
