use memvault_core::{DistanceMetric, Metadata, VectorRecord};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    pub id: String,
    pub metric: DistanceMetric,
}

/// Metadata equality filter. Every pair must match (logical AND).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter {
    pub equals: Metadata,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.equals.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.equals.is_empty()
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.equals
            .iter()
            .all(|(k, v)| metadata.get(k).is_some_and(|m| m == v))
    }

    /// Engine `where` clause. A single pair is a bare object, more than one is
    /// wrapped in `$and`.
    pub fn to_where(&self) -> Option<Value> {
        let mut clauses: Vec<Value> = self
            .equals
            .iter()
            .map(|(k, v)| {
                let mut clause = Map::new();
                clause.insert(k.clone(), Value::String(v.clone()));
                Value::Object(clause)
            })
            .collect();
        match clauses.len() {
            0 => None,
            1 => clauses.pop(),
            _ => Some(serde_json::json!({ "$and": clauses })),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GetRequest {
    pub ids: Option<Vec<String>>,
    pub filter: Option<MetadataFilter>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub include_embeddings: bool,
}

impl GetRequest {
    pub fn by_ids(ids: Vec<String>) -> Self {
        Self {
            ids: Some(ids),
            ..Self::default()
        }
    }

    pub fn page(offset: usize, limit: usize) -> Self {
        Self {
            offset: Some(offset),
            limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn with_embeddings(mut self) -> Self {
        self.include_embeddings = true;
        self
    }

    pub fn with_filter(mut self, filter: MetadataFilter) -> Self {
        self.filter = Some(filter);
        self
    }
}

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub embedding: Vec<f32>,
    pub n_results: usize,
    pub filter: Option<MetadataFilter>,
}

impl QueryRequest {
    pub fn nearest(embedding: Vec<f32>, n_results: usize) -> Self {
        Self {
            embedding,
            n_results,
            filter: None,
        }
    }
}

/// Nearest-neighbour result, closest first.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryHit {
    pub record: VectorRecord,
    pub distance: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordUpdate {
    pub id: String,
    pub content: Option<String>,
    pub metadata: Option<Metadata>,
}
