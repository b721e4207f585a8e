// Static CT log tiles
//
// Tiled logs serve entries as fixed-size binary tiles of 256 leaves under a
// path that encodes the tile index in 3-digit groups. Partial trailing tiles
// use a `.p/<width>` suffix with 1 <= width <= 255.

use crate::error::CertstreamError;
use crate::Result;

use super::entry::{ByteReader, EntryKind, RawEntry};

/// Number of leaves in a full data tile.
pub const TILE_SIZE: u64 = 256;

/// Parsed checkpoint of a tiled log: origin line, tree size, root hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileCheckpoint {
    pub origin: String,
    pub size: u64,
    pub hash: String,
}

/// Parse the three-line text checkpoint.
pub fn parse_checkpoint(text: &str) -> Result<TileCheckpoint> {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() < 3 {
        return Err(CertstreamError::TileParse {
            message: format!(
                "invalid checkpoint: expected at least 3 lines, got {}",
                lines.len()
            ),
        });
    }

    let size = lines[1]
        .parse::<u64>()
        .map_err(|e| CertstreamError::TileParse {
            message: format!("invalid checkpoint tree size '{}': {}", lines[1], e),
        })?;

    Ok(TileCheckpoint {
        origin: lines[0].to_string(),
        size,
        hash: lines[2].to_string(),
    })
}

/// Encode a tile index into its path form: 3-digit groups joined by `/`,
/// every non-final group prefixed with `x`.
pub fn encode_tile_path(index: u64) -> String {
    if index == 0 {
        return "000".to_string();
    }

    let mut groups = Vec::new();
    let mut n = index;
    while n > 0 {
        groups.push(n % 1000);
        n /= 1000;
    }

    let mut path = String::new();
    for (i, group) in groups.iter().enumerate().rev() {
        if i < groups.len() - 1 {
            path.push('/');
        }
        if i > 0 {
            path.push('x');
        }
        path.push_str(&format!("{:03}", group));
    }

    path
}

/// One leaf from a data tile. For precertificates `leaf_der` is the
/// submitted precertificate DER from the tile entry.
#[derive(Debug, Clone)]
pub struct TileLeaf {
    pub timestamp: u64,
    pub kind: EntryKind,
    pub leaf_der: Vec<u8>,
    pub issuer_key_hash: Option<[u8; 32]>,
}

impl TileLeaf {
    /// Attach a tree index to form the normalizer input. Tiles carry chain
    /// fingerprints rather than chain certificates, so the chain is empty.
    pub fn into_raw_entry(self, index: u64) -> RawEntry {
        RawEntry {
            index,
            timestamp: self.timestamp,
            kind: self.kind,
            leaf_der: self.leaf_der,
            chain_der: Vec::new(),
            issuer_key_hash: self.issuer_key_hash,
        }
    }
}

fn tile_error(message: impl Into<String>) -> CertstreamError {
    CertstreamError::TileParse {
        message: message.into(),
    }
}

/// Parse a binary data tile into its leaves.
///
/// Layout per leaf: u64 timestamp | u16 entry type, then
/// type 0: u24 cert | u16 extensions | u16 fingerprints (32 bytes each)
/// type 1: 32B issuer key hash | u24 tbs | u16 extensions | u24 submitted DER
///         | u16 fingerprints
pub fn parse_tile_data(data: &[u8]) -> Result<Vec<TileLeaf>> {
    let mut reader = ByteReader::new(data);
    let mut leaves = Vec::new();

    while !reader.is_empty() {
        let timestamp = reader
            .read_u64()
            .ok_or_else(|| tile_error("truncated tile header"))?;
        let entry_type = reader
            .read_u16()
            .ok_or_else(|| tile_error("truncated tile header"))?;

        let leaf = match entry_type {
            0 => {
                let cert = reader
                    .read_u24_prefixed()
                    .ok_or_else(|| tile_error("truncated x509 entry"))?;
                reader
                    .read_u16_prefixed()
                    .ok_or_else(|| tile_error("truncated x509 extensions"))?;
                let fingerprints = reader
                    .read_u16_prefixed()
                    .ok_or_else(|| tile_error("truncated x509 fingerprints"))?;
                check_fingerprints(fingerprints)?;

                TileLeaf {
                    timestamp,
                    kind: EntryKind::X509,
                    leaf_der: cert.to_vec(),
                    issuer_key_hash: None,
                }
            }
            1 => {
                let hash_bytes = reader
                    .read_bytes(32)
                    .ok_or_else(|| tile_error("truncated issuer key hash"))?;
                let mut issuer_key_hash = [0u8; 32];
                issuer_key_hash.copy_from_slice(hash_bytes);

                reader
                    .read_u24_prefixed()
                    .ok_or_else(|| tile_error("truncated precert TBS"))?;
                reader
                    .read_u16_prefixed()
                    .ok_or_else(|| tile_error("truncated precert extensions"))?;
                let submitted = reader
                    .read_u24_prefixed()
                    .ok_or_else(|| tile_error("truncated submitted precertificate"))?;
                let fingerprints = reader
                    .read_u16_prefixed()
                    .ok_or_else(|| tile_error("truncated precert fingerprints"))?;
                check_fingerprints(fingerprints)?;

                TileLeaf {
                    timestamp,
                    kind: EntryKind::Precert,
                    leaf_der: submitted.to_vec(),
                    issuer_key_hash: Some(issuer_key_hash),
                }
            }
            other => return Err(tile_error(format!("unknown entry type: {}", other))),
        };

        leaves.push(leaf);
    }

    Ok(leaves)
}

fn check_fingerprints(fingerprints: &[u8]) -> Result<()> {
    if fingerprints.len() % 32 != 0 {
        return Err(tile_error("invalid fingerprints: truncated"));
    }
    Ok(())
}
