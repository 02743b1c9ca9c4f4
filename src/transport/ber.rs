// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! BER/DER TLV composition for the handful of SNMP PDU container shapes no
//! general ASN.1 crate models (context-tagged `GetRequest`/`SetRequest`/
//! `GetResponse`, `ScopedPDU`, `msgSecurityParameters`). Leaf ASN.1 value
//! encode/decode (`INTEGER`, `OCTET STRING`, `OBJECT IDENTIFIER`, `NULL`) is
//! delegated to `asn1-rs` rather than hand-rolled, per the Transport wire
//! encoding note — only the generic TLV reader/writer and SNMP's
//! context-tagged composition, which `asn1-rs` has no opinion on, are
//! implemented directly here.

use anyhow::{Result, anyhow, bail, ensure};
use asn1_rs::{FromBer, Integer, Null, OctetString, Oid, ToDer};

pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_OCTET_STRING: u8 = 0x04;
pub const TAG_NULL: u8 = 0x05;
pub const TAG_OID: u8 = 0x06;
pub const TAG_SEQUENCE: u8 = 0x30;

pub const TAG_GET_REQUEST: u8 = 0xA0;
pub const TAG_GET_NEXT_REQUEST: u8 = 0xA1;
pub const TAG_GET_RESPONSE: u8 = 0xA2;
pub const TAG_SET_REQUEST: u8 = 0xA3;
pub const TAG_REPORT: u8 = 0xA8;

fn encode_length(len: usize, out: &mut Vec<u8>) {
    if len < 0x80 {
        out.push(len as u8);
        return;
    }
    let bytes = len.to_be_bytes();
    let first_nonzero = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
    let significant = &bytes[first_nonzero..];
    out.push(0x80 | significant.len() as u8);
    out.extend_from_slice(significant);
}

pub fn encode_tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 4);
    out.push(tag);
    encode_length(content.len(), &mut out);
    out.extend_from_slice(content);
    out
}

/// Canonical (minimal) two's-complement big-endian encoding of `value`, the
/// content `asn1-rs`'s `Integer` expects to wrap.
fn canonical_twos_complement(value: i64) -> Vec<u8> {
    let mut bytes = value.to_be_bytes().to_vec();
    while bytes.len() > 1
        && ((bytes[0] == 0x00 && bytes[1] & 0x80 == 0) || (bytes[0] == 0xFF && bytes[1] & 0x80 != 0))
    {
        bytes.remove(0);
    }
    bytes
}

pub fn encode_integer(value: i64) -> Vec<u8> {
    let content = canonical_twos_complement(value);
    Integer::new(&content).to_der_vec().expect("INTEGER DER encoding cannot fail")
}

pub fn encode_octet_string(bytes: &[u8]) -> Vec<u8> {
    OctetString::new(bytes).to_der_vec().expect("OCTET STRING DER encoding cannot fail")
}

pub fn encode_null() -> Vec<u8> {
    Null.to_der_vec().expect("NULL DER encoding cannot fail")
}

/// Encodes a dotted-decimal OID string (e.g. `"1.3.6.1.2.1.1"`) via
/// `asn1-rs`'s `Oid` rather than a hand-rolled base-128 encoder.
pub fn encode_oid(dotted: &str) -> Result<Vec<u8>> {
    let arcs: Vec<u64> = dotted
        .split('.')
        .map(|s| s.parse::<u64>().map_err(|_| anyhow!("invalid OID arc {s:?} in {dotted:?}")))
        .collect::<Result<_>>()?;
    ensure!(arcs.len() >= 2, "OID {dotted:?} needs at least two arcs");

    let oid = Oid::from(&arcs).map_err(|e| anyhow!("cannot build OID from {dotted:?}: {e:?}"))?;
    oid.to_der_vec().map_err(|e| anyhow!("OID DER encoding failed: {e:?}"))
}

/// Wraps already-encoded child TLVs in a constructed `SEQUENCE` (or, with a
/// different `tag`, a context-tagged PDU — GetRequest/SetRequest/Response
/// all share this shape).
pub fn encode_sequence(tag: u8, children: &[Vec<u8>]) -> Vec<u8> {
    let total: usize = children.iter().map(Vec::len).sum();
    let mut content = Vec::with_capacity(total);
    for c in children {
        content.extend_from_slice(c);
    }
    encode_tlv(tag, &content)
}

/// A decoded TLV: its tag byte and the raw content bytes (not including the
/// tag/length prefix).
#[derive(Debug, Clone, Copy)]
pub struct Tlv<'a> {
    pub tag: u8,
    pub content: &'a [u8],
}

/// Reads one TLV from the front of `bytes`, returning it plus whatever
/// remains.
pub fn read_tlv(bytes: &[u8]) -> Result<(Tlv<'_>, &[u8])> {
    ensure!(!bytes.is_empty(), "unexpected end of BER input");
    let tag = bytes[0];
    let (len, rest) = read_length(&bytes[1..])?;
    ensure!(rest.len() >= len, "BER length {len} exceeds remaining input");
    let (content, tail) = rest.split_at(len);
    Ok((Tlv { tag, content }, tail))
}

fn read_length(bytes: &[u8]) -> Result<(usize, &[u8])> {
    ensure!(!bytes.is_empty(), "unexpected end of BER length");
    let first = bytes[0];
    if first & 0x80 == 0 {
        return Ok((first as usize, &bytes[1..]));
    }
    let n = (first & 0x7F) as usize;
    ensure!(bytes.len() > n, "truncated long-form BER length");
    let mut len = 0usize;
    for &b in &bytes[1..=n] {
        len = (len << 8) | b as usize;
    }
    Ok((len, &bytes[1 + n..]))
}

/// Rebuilds a full tag+length+content buffer around an already-split `.content`
/// slice, so `asn1-rs`'s `FromBer` decoders (which expect a whole TLV, not a
/// pre-split content field) can be handed to them without changing every
/// `decode_*` call site's signature.
fn rewrap_tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut full = Vec::with_capacity(content.len() + 2);
    full.push(tag);
    encode_length(content.len(), &mut full);
    full.extend_from_slice(content);
    full
}

/// Decodes a two's-complement big-endian `INTEGER` content field.
pub fn decode_integer(content: &[u8]) -> Result<i64> {
    ensure!(!content.is_empty(), "empty INTEGER content");
    let full = rewrap_tlv(TAG_INTEGER, content);
    let (_, int) = Integer::from_ber(&full).map_err(|e| anyhow!("BER INTEGER decode error: {e:?}"))?;
    int.as_i64().map_err(|e| anyhow!("INTEGER value out of i64 range: {e:?}"))
}

/// Decodes an `OBJECT IDENTIFIER` content field back to dotted-decimal.
pub fn decode_oid(content: &[u8]) -> Result<String> {
    ensure!(!content.is_empty(), "empty OID content");
    let full = rewrap_tlv(TAG_OID, content);
    let (_, oid) = Oid::from_ber(&full).map_err(|e| anyhow!("BER OID decode error: {e:?}"))?;
    Ok(oid.to_id_string())
}

/// Decodes the BER-typed SNMP value (`INTEGER` or `OCTET STRING`) found in a
/// varbind into a display string for logging.
pub fn decode_value_display(tlv: &Tlv<'_>) -> Result<String> {
    match tlv.tag {
        TAG_INTEGER => Ok(decode_integer(tlv.content)?.to_string()),
        TAG_OCTET_STRING => Ok(String::from_utf8_lossy(tlv.content).into_owned()),
        TAG_NULL => Ok(String::new()),
        other => bail!("unsupported varbind value tag 0x{other:02x}"),
    }
}

/// The outcome of decoding a `GetResponse`-shaped PDU: `(request_id,
/// error_status, error_index, var_binds)`, or `None` if the content cannot
/// be parsed as such a PDU at all (the caller classifies that as an engine
/// error rather than a protocol failure).
pub struct DecodedResponse {
    pub request_id: i64,
    pub error_status: i64,
    pub error_index: i64,
    pub var_binds: Vec<(String, String)>,
}

/// Decodes the content of a `GetResponse` PDU (request-id, error-status,
/// error-index, varbind-list) shared by SNMP v1/v2c and the `ScopedPDU`
/// inside an SNMPv3 message.
pub fn decode_response_pdu(content: &[u8]) -> Result<DecodedResponse> {
    let (request_id_tlv, rest) = read_tlv(content)?;
    let (error_status_tlv, rest) = read_tlv(rest)?;
    let (error_index_tlv, rest) = read_tlv(rest)?;
    let (varbind_list, _) = read_tlv(rest)?;

    let mut var_binds = Vec::new();
    let mut cursor = varbind_list.content;
    while !cursor.is_empty() {
        let (entry, tail) = read_tlv(cursor)?;
        cursor = tail;
        let (oid_tlv, rest) = read_tlv(entry.content)?;
        let (value_tlv, _) = read_tlv(rest)?;
        var_binds.push((decode_oid(oid_tlv.content)?, decode_value_display(&value_tlv)?));
    }

    Ok(DecodedResponse {
        request_id: decode_integer(request_id_tlv.content)?,
        error_status: decode_integer(error_status_tlv.content)?,
        error_index: decode_integer(error_index_tlv.content)?,
        var_binds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oid_round_trips() {
        let encoded = encode_oid("1.3.6.1.2.1.1.3.0").unwrap();
        let (tlv, rest) = read_tlv(&encoded).unwrap();
        assert!(rest.is_empty());
        assert_eq!(tlv.tag, TAG_OID);
        assert_eq!(decode_oid(tlv.content).unwrap(), "1.3.6.1.2.1.1.3.0");
    }

    #[test]
    fn integer_round_trips_negative_and_positive() {
        for v in [-1i64, 0, 1, 127, 128, 255, 256, -129, i32::MAX as i64] {
            let encoded = encode_integer(v);
            let (tlv, rest) = read_tlv(&encoded).unwrap();
            assert!(rest.is_empty());
            assert_eq!(decode_integer(tlv.content).unwrap(), v);
        }
    }

    #[test]
    fn long_form_length_round_trips() {
        let payload = vec![0u8; 200];
        let encoded = encode_octet_string(&payload);
        let (tlv, rest) = read_tlv(&encoded).unwrap();
        assert!(rest.is_empty());
        assert_eq!(tlv.content.len(), 200);
    }
}
