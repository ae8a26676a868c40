use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use memvault_core::{DistanceMetric, VectorRecord};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::traits::VectorStore;
use crate::types::{CollectionInfo, GetRequest, QueryHit, QueryRequest, RecordUpdate};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LocalCollection {
    id: String,
    metric: DistanceMetric,
    records: Vec<VectorRecord>,
}

impl LocalCollection {
    fn info(&self, name: &str) -> CollectionInfo {
        CollectionInfo {
            name: name.to_string(),
            id: self.id.clone(),
            metric: self.metric,
        }
    }

    fn dimension(&self) -> Option<usize> {
        self.records
            .iter()
            .find_map(|r| r.embedding.as_ref().map(Vec::len))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Persisted {
    next_id: u64,
    collections: BTreeMap<String, LocalCollection>,
}

/// In-process vector store with brute-force nearest-neighbour search,
/// optionally persisted to a JSON file after every mutation.
pub struct LocalVectorStore {
    path: Option<PathBuf>,
    state: Mutex<Persisted>,
}

impl LocalVectorStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(Persisted::default()),
        }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        if !path.exists() {
            let bytes = serde_json::to_vec_pretty(&Persisted::default())?;
            fs::write(&path, bytes)?;
        }

        let bytes = fs::read(&path)?;
        let persisted: Persisted = serde_json::from_slice(&bytes)?;
        Ok(Self {
            path: Some(path),
            state: Mutex::new(persisted),
        })
    }

    /// Applies `change` and persists the result. A file-backed store edits a
    /// copy that replaces the live state only after the write succeeded.
    /// `change` must validate before it modifies anything.
    fn mutate<T>(
        &self,
        change: impl FnOnce(&mut Persisted) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut state = self.state.lock();
        let Some(path) = &self.path else {
            return change(&mut state);
        };
        let mut next = state.clone();
        let out = change(&mut next)?;
        let bytes = serde_json::to_vec_pretty(&next)?;
        fs::write(path, bytes)?;
        *state = next;
        Ok(out)
    }
}

fn missing(name: &str) -> StorageError {
    StorageError::CollectionNotFound(name.to_string())
}

#[async_trait]
impl VectorStore for LocalVectorStore {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>, StorageError> {
        let state = self.state.lock();
        Ok(state
            .collections
            .iter()
            .map(|(name, c)| c.info(name))
            .collect())
    }

    async fn create_collection(
        &self,
        name: &str,
        metric: DistanceMetric,
    ) -> Result<CollectionInfo, StorageError> {
        if name.trim().is_empty() {
            return Err(StorageError::InvalidInput(
                "collection name cannot be empty".to_string(),
            ));
        }
        self.mutate(|state| {
            if state.collections.contains_key(name) {
                return Err(StorageError::CollectionExists(name.to_string()));
            }
            state.next_id += 1;
            let collection = LocalCollection {
                id: format!("col-{}", state.next_id),
                metric,
                records: Vec::new(),
            };
            let info = collection.info(name);
            state.collections.insert(name.to_string(), collection);
            Ok(info)
        })
    }

    async fn delete_collection(&self, name: &str) -> Result<(), StorageError> {
        self.mutate(|state| {
            state
                .collections
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| missing(name))
        })
    }

    async fn upsert(
        &self,
        collection: &str,
        records: Vec<VectorRecord>,
    ) -> Result<(), StorageError> {
        self.mutate(|state| {
            let target = state
                .collections
                .get_mut(collection)
                .ok_or_else(|| missing(collection))?;

            let mut dimension = target.dimension();
            for record in &records {
                let Some(embedding) = &record.embedding else {
                    return Err(StorageError::InvalidInput(format!(
                        "record {} has no embedding",
                        record.id
                    )));
                };
                match dimension {
                    Some(d) if d != embedding.len() => {
                        return Err(StorageError::InvalidInput(format!(
                            "record {} has dimension {}, collection expects {d}",
                            record.id,
                            embedding.len()
                        )));
                    }
                    Some(_) => {}
                    None => dimension = Some(embedding.len()),
                }
            }

            for record in records {
                match target.records.iter_mut().find(|r| r.id == record.id) {
                    Some(existing) => *existing = record,
                    None => target.records.push(record),
                }
            }
            Ok(())
        })
    }

    async fn get(
        &self,
        collection: &str,
        request: GetRequest,
    ) -> Result<Vec<VectorRecord>, StorageError> {
        let state = self.state.lock();
        let target = state
            .collections
            .get(collection)
            .ok_or_else(|| missing(collection))?;

        let rows = target
            .records
            .iter()
            .filter(|r| {
                request
                    .ids
                    .as_ref()
                    .is_none_or(|ids| ids.iter().any(|id| *id == r.id))
            })
            .filter(|r| {
                request
                    .filter
                    .as_ref()
                    .is_none_or(|f| f.matches(&r.metadata))
            })
            .skip(request.offset.unwrap_or(0))
            .take(request.limit.unwrap_or(usize::MAX))
            .map(|r| {
                let mut row = r.clone();
                if !request.include_embeddings {
                    row.embedding = None;
                }
                row
            })
            .collect();
        Ok(rows)
    }

    async fn query(
        &self,
        collection: &str,
        request: QueryRequest,
    ) -> Result<Vec<QueryHit>, StorageError> {
        let state = self.state.lock();
        let target = state
            .collections
            .get(collection)
            .ok_or_else(|| missing(collection))?;

        if let Some(d) = target.dimension() {
            if d != request.embedding.len() {
                return Err(StorageError::InvalidInput(format!(
                    "query has dimension {}, collection expects {d}",
                    request.embedding.len()
                )));
            }
        }

        let mut hits: Vec<QueryHit> = target
            .records
            .iter()
            .filter(|r| {
                request
                    .filter
                    .as_ref()
                    .is_none_or(|f| f.matches(&r.metadata))
            })
            .filter_map(|r| {
                let embedding = r.embedding.as_ref()?;
                let distance = target.metric.distance(&request.embedding, embedding)?;
                let mut record = r.clone();
                record.embedding = None;
                Some(QueryHit { record, distance })
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(request.n_results);
        Ok(hits)
    }

    async fn update(
        &self,
        collection: &str,
        updates: Vec<RecordUpdate>,
    ) -> Result<(), StorageError> {
        self.mutate(|state| {
            let target = state
                .collections
                .get_mut(collection)
                .ok_or_else(|| missing(collection))?;

            if let Some(unknown) = updates
                .iter()
                .find(|u| !target.records.iter().any(|r| r.id == u.id))
            {
                return Err(StorageError::NotFound(unknown.id.clone()));
            }

            for update in updates {
                if let Some(row) = target.records.iter_mut().find(|r| r.id == update.id) {
                    if let Some(content) = update.content {
                        row.content = content;
                    }
                    if let Some(metadata) = update.metadata {
                        row.metadata.extend(metadata);
                    }
                }
            }
            Ok(())
        })
    }

    async fn delete(&self, collection: &str, ids: Vec<String>) -> Result<(), StorageError> {
        self.mutate(|state| {
            let target = state
                .collections
                .get_mut(collection)
                .ok_or_else(|| missing(collection))?;
            target.records.retain(|r| !ids.contains(&r.id));
            Ok(())
        })
    }

    async fn count(&self, collection: &str) -> Result<usize, StorageError> {
        let state = self.state.lock();
        state
            .collections
            .get(collection)
            .map(|c| c.records.len())
            .ok_or_else(|| missing(collection))
    }
}
