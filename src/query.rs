//! Query shapes sent to the tracking backend and their canonical fingerprints.
//!
//! Two queries are equivalent when their canonical form matches: filter order
//! and field order/duplicates do not matter. The fingerprint is a SHA-256 over
//! the canonical JSON encoding and is what the cache groups fetches by.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// One record returned by the backend (field name -> value).
pub type Record = serde_json::Map<String, Value>;

/// A single filter clause, e.g. `["project", "is", {"type": "Project", "id": 12}]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: String,
    pub value: Value,
}

impl Filter {
    pub fn new(field: impl Into<String>, op: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op: op.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub entity_type: String,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub fields: Vec<String>,
}

impl Query {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            filters: Vec::new(),
            fields: Vec::new(),
        }
    }

    pub fn filter(mut self, field: impl Into<String>, op: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::new(field, op, value));
        self
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Order-independent representation: filters sorted by their JSON encoding,
    /// fields sorted and deduplicated.
    pub fn canonical(&self) -> Query {
        let mut filters: Vec<(String, Filter)> = self
            .filters
            .iter()
            .map(|f| (serde_json::to_string(f).unwrap_or_default(), f.clone()))
            .collect();
        filters.sort_by(|a, b| a.0.cmp(&b.0));
        filters.dedup_by(|a, b| a.0 == b.0);

        let mut fields = self.fields.clone();
        fields.sort();
        fields.dedup();

        Query {
            entity_type: self.entity_type.clone(),
            filters: filters.into_iter().map(|(_, f)| f).collect(),
            fields,
        }
    }

    pub fn is_equivalent(&self, other: &Query) -> bool {
        self.fingerprint() == other.fingerprint()
    }

    pub fn fingerprint(&self) -> Fingerprint {
        let bytes = serde_json::to_vec(&self.canonical()).unwrap_or_default();
        Fingerprint::hash_with_domain(b"QUERY", &bytes)
    }
}

/// 256-bit digest used both for query dedup and for cache snapshot hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub [u8; 32]);

impl Fingerprint {
    /// SHA-256 over `b"TRACKMENU:<domain>:v1" || len(data) as u64 LE || data`.
    pub fn hash_with_domain(domain: &[u8], data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"TRACKMENU:");
        hasher.update(domain);
        hasher.update(b":v1");
        hasher.update((data.len() as u64).to_le_bytes());
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Incremental builder for digests over several parts.
    pub(crate) fn builder(domain: &[u8]) -> FingerprintBuilder {
        let mut hasher = Sha256::new();
        hasher.update(b"TRACKMENU:");
        hasher.update(domain);
        hasher.update(b":v1");
        FingerprintBuilder { hasher }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First 6 bytes are plenty to tell entries apart in logs
        for b in &self.0[..6] {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

pub(crate) struct FingerprintBuilder {
    hasher: Sha256,
}

impl FingerprintBuilder {
    /// Length-prefixed so adjacent parts cannot run into each other.
    pub(crate) fn part(&mut self, data: &[u8]) -> &mut Self {
        self.hasher.update((data.len() as u64).to_le_bytes());
        self.hasher.update(data);
        self
    }

    pub(crate) fn finish(self) -> Fingerprint {
        Fingerprint(self.hasher.finalize().into())
    }
}
