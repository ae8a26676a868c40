use async_trait::async_trait;
use memvault_core::{DistanceMetric, VectorRecord};

use crate::error::StorageError;
use crate::types::{CollectionInfo, GetRequest, QueryHit, QueryRequest, RecordUpdate};

/// Operations memvault needs from a vector engine. Collections are addressed
/// by name; backends resolve engine-side identifiers themselves.
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn name(&self) -> &'static str;

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>, StorageError>;

    async fn create_collection(
        &self,
        name: &str,
        metric: DistanceMetric,
    ) -> Result<CollectionInfo, StorageError>;

    async fn delete_collection(&self, name: &str) -> Result<(), StorageError>;

    /// Insert or replace by id. Every record must carry an embedding.
    async fn upsert(&self, collection: &str, records: Vec<VectorRecord>)
    -> Result<(), StorageError>;

    async fn get(
        &self,
        collection: &str,
        request: GetRequest,
    ) -> Result<Vec<VectorRecord>, StorageError>;

    async fn query(
        &self,
        collection: &str,
        request: QueryRequest,
    ) -> Result<Vec<QueryHit>, StorageError>;

    async fn update(&self, collection: &str, updates: Vec<RecordUpdate>)
    -> Result<(), StorageError>;

    async fn delete(&self, collection: &str, ids: Vec<String>) -> Result<(), StorageError>;

    async fn count(&self, collection: &str) -> Result<usize, StorageError>;

    async fn collection(&self, name: &str) -> Result<Option<CollectionInfo>, StorageError> {
        Ok(self
            .list_collections()
            .await?
            .into_iter()
            .find(|c| c.name == name))
    }

    async fn get_or_create_collection(
        &self,
        name: &str,
        metric: DistanceMetric,
    ) -> Result<CollectionInfo, StorageError> {
        match self.collection(name).await? {
            Some(info) => Ok(info),
            None => self.create_collection(name, metric).await,
        }
    }
}
