// RFC 6962 log entry decoding
//
// Converts the base64 `leaf_input`/`extra_data` pair of the JSON batch API
// into a RawEntry holding the DER bytes the normalizer works on.

use crate::error::CertstreamError;
use crate::Result;
use base64::Engine;

use super::client::RawApiEntry;

/// Kind of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    X509,
    Precert,
}

/// One decoded log entry.
///
/// For precertificates `leaf_der` holds the submitted precertificate DER
/// (not the TBS from the Merkle leaf); hashes and `as_der` are derived from
/// it downstream.
#[derive(Debug, Clone)]
pub struct RawEntry {
    pub index: u64,
    /// Leaf timestamp in milliseconds since epoch
    pub timestamp: u64,
    pub kind: EntryKind,
    pub leaf_der: Vec<u8>,
    pub chain_der: Vec<Vec<u8>>,
    pub issuer_key_hash: Option<[u8; 32]>,
}

/// Sequential reader over TLS-style length-prefixed binary structures.
pub(crate) struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        let b = *self.buf.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    pub fn read_u16(&mut self) -> Option<u16> {
        let bytes = self.read_bytes(2)?;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u24(&mut self) -> Option<u32> {
        let bytes = self.read_bytes(3)?;
        Some(u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]))
    }

    pub fn read_u64(&mut self) -> Option<u64> {
        let bytes = self.read_bytes(8)?;
        let mut out = [0u8; 8];
        out.copy_from_slice(bytes);
        Some(u64::from_be_bytes(out))
    }

    pub fn read_bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    pub fn read_u16_prefixed(&mut self) -> Option<&'a [u8]> {
        let len = self.read_u16()? as usize;
        self.read_bytes(len)
    }

    pub fn read_u24_prefixed(&mut self) -> Option<&'a [u8]> {
        let len = self.read_u24()? as usize;
        self.read_bytes(len)
    }
}

fn parse_error(message: impl Into<String>) -> CertstreamError {
    CertstreamError::Parse {
        message: message.into(),
    }
}

/// Decode one JSON-API entry into a RawEntry.
pub fn decode_api_entry(entry: &RawApiEntry, index: u64) -> Result<RawEntry> {
    let leaf_bytes = base64::engine::general_purpose::STANDARD
        .decode(&entry.leaf_input)
        .map_err(|e| parse_error(format!("could not decode leaf_input: {}", e)))?;
    let extra_bytes = base64::engine::general_purpose::STANDARD
        .decode(&entry.extra_data)
        .map_err(|e| parse_error(format!("could not decode extra_data: {}", e)))?;

    decode_leaf(&leaf_bytes, &extra_bytes, index)
}

/// Parse a MerkleTreeLeaf plus its extra_data.
///
/// Leaf layout: version (1) | leaf_type (1) | timestamp (8) | entry_type (2)
/// followed by the signed entry and a u16-prefixed extensions blob.
pub fn decode_leaf(leaf: &[u8], extra_data: &[u8], index: u64) -> Result<RawEntry> {
    let mut reader = ByteReader::new(leaf);

    let version = reader
        .read_u8()
        .ok_or_else(|| parse_error("leaf input too short"))?;
    if version != 0 {
        return Err(parse_error(format!("unsupported CT version: {}", version)));
    }

    let leaf_type = reader
        .read_u8()
        .ok_or_else(|| parse_error("leaf input too short"))?;
    if leaf_type != 0 {
        return Err(parse_error(format!("unsupported leaf type: {}", leaf_type)));
    }

    let timestamp = reader
        .read_u64()
        .ok_or_else(|| parse_error("leaf truncated before timestamp"))?;
    let entry_type = reader
        .read_u16()
        .ok_or_else(|| parse_error("leaf truncated before entry type"))?;

    match entry_type {
        0 => {
            let cert = reader
                .read_u24_prefixed()
                .ok_or_else(|| parse_error("leaf truncated inside certificate"))?;
            let chain_der = decode_chain(&mut ByteReader::new(extra_data))?;

            Ok(RawEntry {
                index,
                timestamp,
                kind: EntryKind::X509,
                leaf_der: cert.to_vec(),
                chain_der,
                issuer_key_hash: None,
            })
        }
        1 => {
            let hash_bytes = reader
                .read_bytes(32)
                .ok_or_else(|| parse_error("leaf truncated inside issuer key hash"))?;
            let mut issuer_key_hash = [0u8; 32];
            issuer_key_hash.copy_from_slice(hash_bytes);

            // The TBS in the leaf is not used; the submitted precertificate
            // comes first in extra_data.
            reader
                .read_u24_prefixed()
                .ok_or_else(|| parse_error("leaf truncated inside TBS certificate"))?;

            let mut extra = ByteReader::new(extra_data);
            let submitted = extra
                .read_u24_prefixed()
                .ok_or_else(|| parse_error("extra_data truncated inside precertificate"))?;
            let chain_der = decode_chain(&mut extra)?;

            Ok(RawEntry {
                index,
                timestamp,
                kind: EntryKind::Precert,
                leaf_der: submitted.to_vec(),
                chain_der,
                issuer_key_hash: Some(issuer_key_hash),
            })
        }
        other => Err(parse_error(format!("unknown entry type: {}", other))),
    }
}

/// Decode a u24-prefixed list of u24-prefixed certificates.
fn decode_chain(reader: &mut ByteReader<'_>) -> Result<Vec<Vec<u8>>> {
    if reader.is_empty() {
        return Ok(Vec::new());
    }

    let chain_bytes = reader
        .read_u24_prefixed()
        .ok_or_else(|| parse_error("extra_data truncated inside chain"))?;

    let mut chain = Vec::new();
    let mut chain_reader = ByteReader::new(chain_bytes);
    while !chain_reader.is_empty() {
        let cert = chain_reader
            .read_u24_prefixed()
            .ok_or_else(|| parse_error("chain truncated inside certificate"))?;
        chain.push(cert.to_vec());
    }

    Ok(chain)
}
