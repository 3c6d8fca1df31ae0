//! Framing for save payloads.
//!
//! Every payload written to disk is preceded by a fixed-size header so a
//! reader can tell a graph snapshot from a registry dump before decoding it,
//! and so several payloads can share one file.

use std::convert::TryFrom;

use bytes::Buf;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use thiserror::Error;

/// Bytes that prefix every save payload ("GSAV").
pub const HEADER_MAGIC: [u8; 4] = *b"GSAV";

/// Envelope revision understood by this crate.
pub const ENVELOPE_VERSION: u16 = 0x0001;

/// Length of the binary header in bytes.
pub const HEADER_LEN: usize = 4 + 2 + 2 + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr, Hash)]
#[repr(u16)]
pub enum PayloadKind {
    /// Output of the object-graph serializer.
    ObjectGraph = 0x0001,
    /// One registry scope encoded with the value codec.
    Registry = 0x0002,
}

impl TryFrom<u16> for PayloadKind {
    type Error = ();

    fn try_from(value: u16) -> std::result::Result<Self, Self::Error> {
        match value {
            0x0001 => Ok(Self::ObjectGraph),
            0x0002 => Ok(Self::Registry),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveHeader {
    pub version: u16,
    pub kind: PayloadKind,
    pub length: u32,
}

impl SaveHeader {
    /// Encode the header as big-endian bytes.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..4].copy_from_slice(&HEADER_MAGIC);
        out[4..6].copy_from_slice(&self.version.to_be_bytes());
        out[6..8].copy_from_slice(&(self.kind as u16).to_be_bytes());
        out[8..12].copy_from_slice(&self.length.to_be_bytes());
        out
    }

    pub fn decode(input: &[u8]) -> Result<Self, EnvelopeError> {
        if input.len() < HEADER_LEN {
            return Err(EnvelopeError::TruncatedHeader);
        }
        if input[..4] != HEADER_MAGIC {
            return Err(EnvelopeError::BadMagic);
        }
        let mut rest = &input[4..HEADER_LEN];
        let version = rest.get_u16();
        if version != ENVELOPE_VERSION {
            return Err(EnvelopeError::UnsupportedVersion(version));
        }
        let kind_raw = rest.get_u16();
        let kind = PayloadKind::try_from(kind_raw)
            .map_err(|_| EnvelopeError::UnknownPayloadKind(kind_raw))?;
        let length = rest.get_u32();
        Ok(Self {
            version,
            kind,
            length,
        })
    }
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("header smaller than {HEADER_LEN} bytes")]
    TruncatedHeader,
    #[error("header magic mismatch")]
    BadMagic,
    #[error("envelope version {0:#06x} is not supported")]
    UnsupportedVersion(u16),
    #[error("payload kind {0:#06x} is unknown")]
    UnknownPayloadKind(u16),
    #[error("payload length mismatch: header declared {expected} bytes but found {actual}")]
    LengthMismatch { expected: u32, actual: usize },
    #[error("payload of {0} bytes does not fit the length field")]
    PayloadTooLarge(usize),
}

/// Prefixes `payload` with a header for `kind`.
pub fn encode_payload(kind: PayloadKind, payload: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    let header = SaveHeader {
        version: ENVELOPE_VERSION,
        kind,
        length: u32::try_from(payload.len())
            .map_err(|_| EnvelopeError::PayloadTooLarge(payload.len()))?,
    };
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Decodes a single framed payload that must span all of `bytes`.
pub fn decode_envelope(bytes: &[u8]) -> Result<(SaveHeader, &[u8]), EnvelopeError> {
    let (header, payload, rest) = take_envelope(bytes)?;
    if !rest.is_empty() {
        return Err(EnvelopeError::LengthMismatch {
            expected: header.length,
            actual: payload.len() + rest.len(),
        });
    }
    Ok((header, payload))
}

/// Splits a file holding several envelopes back to back.
pub fn split_envelopes(mut bytes: &[u8]) -> Result<Vec<(SaveHeader, &[u8])>, EnvelopeError> {
    let mut envelopes = Vec::new();
    while !bytes.is_empty() {
        let (header, payload, rest) = take_envelope(bytes)?;
        envelopes.push((header, payload));
        bytes = rest;
    }
    Ok(envelopes)
}

fn take_envelope(bytes: &[u8]) -> Result<(SaveHeader, &[u8], &[u8]), EnvelopeError> {
    let header = SaveHeader::decode(bytes)?;
    let body = &bytes[HEADER_LEN..];
    let length = header.length as usize;
    if body.len() < length {
        return Err(EnvelopeError::LengthMismatch {
            expected: header.length,
            actual: body.len(),
        });
    }
    let (payload, rest) = body.split_at(length);
    Ok((header, payload, rest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn header_reports_kind_as_its_wire_value() {
        let header = SaveHeader {
            version: ENVELOPE_VERSION,
            kind: PayloadKind::ObjectGraph,
            length: 12,
        };
        let value = serde_json::to_value(&header).unwrap();
        assert_eq!(value, json!({"version": 1, "kind": 1, "length": 12}));
        let back: SaveHeader = serde_json::from_value(value).unwrap();
        assert_eq!(back, header);
        assert!(serde_json::from_value::<PayloadKind>(json!(9)).is_err());
    }

    #[test]
    fn header_is_big_endian() {
        let header = SaveHeader {
            version: ENVELOPE_VERSION,
            kind: PayloadKind::Registry,
            length: 0x0102_0304,
        };
        let encoded = header.encode();
        assert_eq!(&encoded[..4], b"GSAV");
        assert_eq!(&encoded[4..], &[0, 1, 0, 2, 1, 2, 3, 4]);
        assert_eq!(SaveHeader::decode(&encoded).unwrap(), header);
    }

    #[test]
    fn rejects_foreign_and_short_input() {
        assert!(matches!(
            SaveHeader::decode(b"GSA"),
            Err(EnvelopeError::TruncatedHeader)
        ));
        assert!(matches!(
            SaveHeader::decode(b"GRIM\0\x01\0\x01\0\0\0\0"),
            Err(EnvelopeError::BadMagic)
        ));
        assert!(matches!(
            SaveHeader::decode(b"GSAV\0\x01\0\x09\0\0\0\0"),
            Err(EnvelopeError::UnknownPayloadKind(9))
        ));
        assert!(matches!(
            SaveHeader::decode(b"GSAV\0\x02\0\x01\0\0\0\0"),
            Err(EnvelopeError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn payload_length_must_match() {
        let mut framed = encode_payload(PayloadKind::ObjectGraph, &[1, 2, 3]).unwrap();
        let (header, payload) = decode_envelope(&framed).unwrap();
        assert_eq!(header.kind, PayloadKind::ObjectGraph);
        assert_eq!(payload, &[1, 2, 3]);

        framed.push(4);
        assert!(matches!(
            decode_envelope(&framed),
            Err(EnvelopeError::LengthMismatch {
                expected: 3,
                actual: 4
            })
        ));
        framed.truncate(HEADER_LEN + 2);
        assert!(decode_envelope(&framed).is_err());
    }

    #[test]
    fn back_to_back_envelopes_split() {
        let mut file = encode_payload(PayloadKind::ObjectGraph, b"graph").unwrap();
        file.extend(encode_payload(PayloadKind::Registry, b"").unwrap());
        let parts = split_envelopes(&file).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].1, b"graph");
        assert_eq!(parts[1].0.kind, PayloadKind::Registry);
        assert!(parts[1].1.is_empty());
    }
}
