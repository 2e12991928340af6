//! Identifier filters attached to package references.
//!
//! A dump that depends on a package records a bloom filter over every
//! identifier it references from that package. Reference search uses the
//! filter to skip dumps that certainly never mention the symbol.

use crate::store::PackageReference;
use anyhow::{Result, bail};
use blake3::Hasher;
use serde::{Deserialize, Serialize};

const MIN_BITS: usize = 64;
const MAX_HASHES: u32 = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawFilter", into = "RawFilter")]
pub struct IdentifierFilter {
    num_hashes: u32,
    bits: Vec<u8>,
}

/// Serialized shape; decoding goes through the same checks as `from_bytes`.
#[derive(Serialize, Deserialize)]
struct RawFilter {
    num_hashes: u32,
    bits: Vec<u8>,
}

impl TryFrom<RawFilter> for IdentifierFilter {
    type Error = anyhow::Error;

    fn try_from(raw: RawFilter) -> Result<Self> {
        Self::validated(raw.num_hashes, raw.bits)
    }
}

impl From<IdentifierFilter> for RawFilter {
    fn from(filter: IdentifierFilter) -> Self {
        Self {
            num_hashes: filter.num_hashes,
            bits: filter.bits,
        }
    }
}

impl IdentifierFilter {
    /// Sizes the filter for `expected` identifiers at the given false positive rate.
    pub fn with_capacity(expected: usize, false_positive_rate: f64) -> Self {
        let n = expected.max(1) as f64;
        let p = false_positive_rate.clamp(1e-9, 0.5);
        let ln2 = std::f64::consts::LN_2;
        let m = (-(n * p.ln()) / (ln2 * ln2)).ceil() as usize;
        let m = m.max(MIN_BITS).div_ceil(8) * 8;
        let k = ((m as f64 / n) * ln2).round() as u32;
        Self {
            num_hashes: k.clamp(1, MAX_HASHES),
            bits: vec![0; m / 8],
        }
    }

    pub fn from_identifiers<I, S>(identifiers: I, false_positive_rate: f64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let identifiers: Vec<S> = identifiers.into_iter().collect();
        let mut filter = Self::with_capacity(identifiers.len(), false_positive_rate);
        for identifier in &identifiers {
            filter.insert(identifier.as_ref());
        }
        filter
    }

    pub fn insert(&mut self, identifier: &str) {
        for index in self.bit_indexes(identifier) {
            self.bits[index / 8] |= 1 << (index % 8);
        }
    }

    /// False means the identifier was never inserted; true may be a false positive.
    pub fn may_contain(&self, identifier: &str) -> bool {
        self.bit_indexes(identifier)
            .all(|index| self.bits[index / 8] & (1 << (index % 8)) != 0)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.bits.len() + 1);
        out.push(self.num_hashes as u8);
        out.extend_from_slice(&self.bits);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let Some((&num_hashes, bits)) = bytes.split_first() else {
            bail!("empty identifier filter");
        };
        Self::validated(u32::from(num_hashes), bits.to_vec())
    }

    fn validated(num_hashes: u32, bits: Vec<u8>) -> Result<Self> {
        if num_hashes == 0 || num_hashes > MAX_HASHES {
            bail!("identifier filter has invalid hash count {num_hashes}");
        }
        if bits.is_empty() {
            bail!("identifier filter has no bits");
        }
        Ok(Self { num_hashes, bits })
    }

    /// Bit positions for an identifier. Holds no borrow of the filter, so
    /// `insert` can set bits while iterating.
    fn bit_indexes(&self, identifier: &str) -> impl Iterator<Item = usize> + use<> {
        let mut hasher = Hasher::new();
        hasher.update(identifier.as_bytes());
        let digest = hasher.finalize();
        let bytes = digest.as_bytes();
        let mut first = [0u8; 8];
        let mut second = [0u8; 8];
        first.copy_from_slice(&bytes[0..8]);
        second.copy_from_slice(&bytes[8..16]);
        let h1 = u64::from_le_bytes(first);
        let h2 = u64::from_le_bytes(second) | 1;
        let m = (self.bits.len() * 8) as u64;
        (0..u64::from(self.num_hashes))
            .map(move |i| (h1.wrapping_add(i.wrapping_mul(h2)) % m) as usize)
    }
}

/// Keeps references whose filter may contain `identifier`, stopping once
/// `limit` references are kept. Returns the kept references and how many
/// input references were inspected, so callers can advance their offset.
pub fn apply_bloom_filter(
    references: Vec<PackageReference>,
    identifier: &str,
    limit: usize,
) -> (Vec<PackageReference>, usize) {
    let mut kept = Vec::new();
    let mut scanned = 0;
    for reference in references {
        if kept.len() >= limit {
            break;
        }
        scanned += 1;
        let matches = reference
            .filter
            .as_ref()
            .map(|filter| filter.may_contain(identifier))
            .unwrap_or(true);
        if matches {
            kept.push(reference);
        }
    }
    (kept, scanned)
}
