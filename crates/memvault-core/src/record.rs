use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Metadata as the vector engine stores it: flat string values only. Lists and
/// objects are JSON-encoded into the string.
///
/// Typed values written by other clients (numbers, booleans) are read back as
/// their JSON text, so `{"n": 3}` becomes `"3"`. Writing such a record again,
/// as the distance migration does, stores the string form: the row keeps its
/// value but not its JSON type.
pub type Metadata = BTreeMap<String, String>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

impl VectorRecord {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata: Metadata::new(),
            embedding: None,
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

/// Distance space of a collection. Values follow the engine's definitions:
/// squared euclidean for `L2`, `1 - cos` for `Cosine`, `1 - dot` for
/// `InnerProduct`. Lower is always closer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DistanceMetric {
    #[default]
    #[serde(rename = "l2")]
    L2,
    #[serde(rename = "cosine")]
    Cosine,
    #[serde(rename = "ip")]
    InnerProduct,
}

impl DistanceMetric {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::L2 => "l2",
            Self::Cosine => "cosine",
            Self::InnerProduct => "ip",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "l2" | "euclidean" => Some(Self::L2),
            "cosine" => Some(Self::Cosine),
            "ip" | "inner_product" | "dot" => Some(Self::InnerProduct),
            _ => None,
        }
    }

    /// Returns `None` on a dimension mismatch.
    pub fn distance(self, a: &[f32], b: &[f32]) -> Option<f32> {
        if a.len() != b.len() {
            return None;
        }
        let d = match self {
            Self::L2 => a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum(),
            Self::Cosine => {
                let mut dot = 0.0_f32;
                let mut na = 0.0_f32;
                let mut nb = 0.0_f32;
                for (x, y) in a.iter().zip(b) {
                    dot += x * y;
                    na += x * x;
                    nb += y * y;
                }
                let denom = na.sqrt() * nb.sqrt();
                if denom == 0.0 { 1.0 } else { 1.0 - dot / denom }
            }
            Self::InnerProduct => 1.0 - a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>(),
        };
        Some(d)
    }

    /// Maps a distance back onto a `[0, 1]` relevance score.
    pub fn similarity(self, distance: f32) -> f32 {
        let s = match self {
            Self::Cosine | Self::InnerProduct => 1.0 - distance,
            Self::L2 => 1.0 / (1.0 + distance.max(0.0)),
        };
        if s.is_nan() { 0.0 } else { s.clamp(0.0, 1.0) }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A query hit prepared for budgeting. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub record: VectorRecord,
    pub similarity: f32,
    pub token_cost: usize,
    pub truncated: bool,
}
