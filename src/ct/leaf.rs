//! RFC 6962 `MerkleTreeLeaf` wire codec.
//!
//! The codec parses and re-serializes the TLS-encoded leaf structure
//! bit-exactly. Canonicalization zeroes the timestamp before
//! re-marshalling, so the same certificate reported by multiple logs at
//! different wallclock times collapses to one store key. A precert and
//! its final certificate still hash differently; that duplication is
//! accepted.

use sha2::{Digest, Sha256};
use thiserror::Error;

/// v1 leaf version.
pub const VERSION_V1: u8 = 0;
/// The only defined leaf type: `timestamped_entry`.
pub const LEAF_TYPE_TIMESTAMPED: u8 = 0;

const ENTRY_TYPE_X509: u16 = 0;
const ENTRY_TYPE_PRECERT: u16 = 1;

/// Errors from the wire codec. Unknown leaf and entry types are
/// structural violations; the ingestion job surfaces them as retryable
/// failures rather than swallowing the leaf.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LeafError {
    #[error("truncated leaf input")]
    Truncated,

    #[error("unknown leaf type: {0}")]
    UnknownLeafType(u8),

    #[error("unknown entry type: {0}")]
    UnknownEntryType(u16),

    #[error("length field overflows remaining input")]
    BadLength,
}

/// The certificate payload of a timestamped entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryBody {
    /// A final X.509 certificate (DER).
    X509 { cert: Vec<u8> },
    /// A precertificate: issuer key hash plus the TBS certificate (DER).
    Precert {
        issuer_key_hash: [u8; 32],
        tbs: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampedEntry {
    /// Milliseconds since the epoch; zeroed during canonicalization.
    pub timestamp: u64,
    pub body: EntryBody,
    pub extensions: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTreeLeaf {
    pub version: u8,
    pub entry: TimestampedEntry,
}

impl MerkleTreeLeaf {
    /// Parse a leaf from its TLS wire encoding. Trailing bytes after a
    /// well-formed leaf are tolerated and ignored.
    pub fn parse(input: &[u8]) -> Result<Self, LeafError> {
        let mut r = Reader::new(input);

        let version = r.u8()?;
        let leaf_type = r.u8()?;
        if leaf_type != LEAF_TYPE_TIMESTAMPED {
            return Err(LeafError::UnknownLeafType(leaf_type));
        }

        let timestamp = r.u64()?;
        let entry_type = r.u16()?;
        let body = match entry_type {
            ENTRY_TYPE_X509 => EntryBody::X509 {
                cert: r.opaque_u24()?,
            },
            ENTRY_TYPE_PRECERT => {
                let mut issuer_key_hash = [0u8; 32];
                issuer_key_hash.copy_from_slice(r.take(32)?);
                EntryBody::Precert {
                    issuer_key_hash,
                    tbs: r.opaque_u24()?,
                }
            }
            other => return Err(LeafError::UnknownEntryType(other)),
        };
        let extensions = r.opaque_u16()?;

        Ok(Self {
            version,
            entry: TimestampedEntry {
                timestamp,
                body,
                extensions,
            },
        })
    }

    /// Serialize back to the TLS wire encoding.
    pub fn marshal(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + self.entry_len());

        out.push(self.version);
        out.push(LEAF_TYPE_TIMESTAMPED);
        out.extend_from_slice(&self.entry.timestamp.to_be_bytes());

        match &self.entry.body {
            EntryBody::X509 { cert } => {
                out.extend_from_slice(&ENTRY_TYPE_X509.to_be_bytes());
                push_u24(&mut out, cert.len());
                out.extend_from_slice(cert);
            }
            EntryBody::Precert {
                issuer_key_hash,
                tbs,
            } => {
                out.extend_from_slice(&ENTRY_TYPE_PRECERT.to_be_bytes());
                out.extend_from_slice(issuer_key_hash);
                push_u24(&mut out, tbs.len());
                out.extend_from_slice(tbs);
            }
        }

        out.extend_from_slice(&(self.entry.extensions.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.entry.extensions);
        out
    }

    /// The canonical bytes: the leaf re-marshalled with its timestamp
    /// zeroed. Stable across logs and across repeated canonicalization.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut leaf = self.clone();
        leaf.entry.timestamp = 0;
        leaf.marshal()
    }

    fn entry_len(&self) -> usize {
        match &self.entry.body {
            EntryBody::X509 { cert } => cert.len(),
            EntryBody::Precert { tbs, .. } => tbs.len() + 32,
        }
    }
}

/// The store key for a canonicalized leaf.
pub fn store_key(canonical: &[u8]) -> [u8; 32] {
    Sha256::digest(canonical).into()
}

fn push_u24(out: &mut Vec<u8>, len: usize) {
    debug_assert!(len < 1 << 24);
    out.extend_from_slice(&(len as u32).to_be_bytes()[1..]);
}

struct Reader<'a> {
    input: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self { input }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], LeafError> {
        if self.input.len() < n {
            return Err(LeafError::Truncated);
        }
        let (head, rest) = self.input.split_at(n);
        self.input = rest;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8, LeafError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, LeafError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u64(&mut self) -> Result<u64, LeafError> {
        let b = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(u64::from_be_bytes(buf))
    }

    fn u24_len(&mut self) -> Result<usize, LeafError> {
        let b = self.take(3)?;
        Ok(((b[0] as usize) << 16) | ((b[1] as usize) << 8) | b[2] as usize)
    }

    fn opaque_u24(&mut self) -> Result<Vec<u8>, LeafError> {
        let len = self.u24_len()?;
        if self.input.len() < len {
            return Err(LeafError::BadLength);
        }
        Ok(self.take(len)?.to_vec())
    }

    fn opaque_u16(&mut self) -> Result<Vec<u8>, LeafError> {
        let len = self.u16()? as usize;
        if self.input.len() < len {
            return Err(LeafError::BadLength);
        }
        Ok(self.take(len)?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x509_leaf(timestamp: u64, cert: &[u8]) -> MerkleTreeLeaf {
        MerkleTreeLeaf {
            version: VERSION_V1,
            entry: TimestampedEntry {
                timestamp,
                body: EntryBody::X509 {
                    cert: cert.to_vec(),
                },
                extensions: Vec::new(),
            },
        }
    }

    fn precert_leaf(timestamp: u64, tbs: &[u8]) -> MerkleTreeLeaf {
        MerkleTreeLeaf {
            version: VERSION_V1,
            entry: TimestampedEntry {
                timestamp,
                body: EntryBody::Precert {
                    issuer_key_hash: [0xAB; 32],
                    tbs: tbs.to_vec(),
                },
                extensions: vec![1, 2, 3],
            },
        }
    }

    #[test]
    fn x509_round_trip() {
        let leaf = x509_leaf(1_700_000_000_000, b"not-a-real-cert");
        let parsed = MerkleTreeLeaf::parse(&leaf.marshal()).unwrap();
        assert_eq!(parsed, leaf);
    }

    #[test]
    fn precert_round_trip() {
        let leaf = precert_leaf(1_700_000_000_000, b"tbs-bytes");
        let parsed = MerkleTreeLeaf::parse(&leaf.marshal()).unwrap();
        assert_eq!(parsed, leaf);
    }

    #[test]
    fn wire_layout_is_rfc6962() {
        let leaf = x509_leaf(0x0102030405060708, &[0xDE, 0xAD]);
        let bytes = leaf.marshal();
        assert_eq!(
            bytes,
            vec![
                0x00, // version
                0x00, // leaf_type
                0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, // timestamp
                0x00, 0x00, // entry_type x509
                0x00, 0x00, 0x02, // u24 cert length
                0xDE, 0xAD, // cert
                0x00, 0x00, // empty extensions
            ]
        );
    }

    #[test]
    fn canonicalization_zeroes_timestamp_only() {
        let a = x509_leaf(111, b"same-cert");
        let b = x509_leaf(999, b"same-cert");
        assert_ne!(a.marshal(), b.marshal());
        assert_eq!(a.canonical_bytes(), b.canonical_bytes());
        assert_eq!(store_key(&a.canonical_bytes()), store_key(&b.canonical_bytes()));
    }

    #[test]
    fn canonicalization_is_idempotent() {
        let leaf = precert_leaf(424_242, b"tbs");
        let once = leaf.canonical_bytes();
        let twice = MerkleTreeLeaf::parse(&once).unwrap().canonical_bytes();
        assert_eq!(once, twice);
    }

    #[test]
    fn distinct_certs_get_distinct_keys() {
        let a = x509_leaf(0, b"cert-a");
        let b = x509_leaf(0, b"cert-b");
        assert_ne!(store_key(&a.canonical_bytes()), store_key(&b.canonical_bytes()));
    }

    #[test]
    fn precert_and_final_cert_hash_differently() {
        let a = x509_leaf(0, b"body");
        let b = precert_leaf(0, b"body");
        assert_ne!(store_key(&a.canonical_bytes()), store_key(&b.canonical_bytes()));
    }

    #[test]
    fn unknown_leaf_type_is_rejected() {
        let mut bytes = x509_leaf(0, b"x").marshal();
        bytes[1] = 7;
        assert_eq!(
            MerkleTreeLeaf::parse(&bytes),
            Err(LeafError::UnknownLeafType(7))
        );
    }

    #[test]
    fn unknown_entry_type_is_rejected() {
        let mut bytes = x509_leaf(0, b"x").marshal();
        bytes[11] = 9; // low byte of entry_type
        assert_eq!(
            MerkleTreeLeaf::parse(&bytes),
            Err(LeafError::UnknownEntryType(9))
        );
    }

    #[test]
    fn truncated_input_is_rejected() {
        let bytes = precert_leaf(0, b"tbs-bytes").marshal();
        for cut in [0, 1, 5, 11, 20, bytes.len() - 1] {
            assert!(MerkleTreeLeaf::parse(&bytes[..cut]).is_err());
        }
    }

    #[test]
    fn trailing_bytes_are_tolerated() {
        let leaf = x509_leaf(5, b"cert");
        let mut bytes = leaf.marshal();
        bytes.extend_from_slice(b"garbage");
        assert_eq!(MerkleTreeLeaf::parse(&bytes).unwrap(), leaf);
    }

    #[test]
    fn extensions_survive_round_trip() {
        let leaf = precert_leaf(1, b"tbs");
        let parsed = MerkleTreeLeaf::parse(&leaf.marshal()).unwrap();
        assert_eq!(parsed.entry.extensions, vec![1, 2, 3]);
    }
}
