use std::time::Duration;

use async_trait::async_trait;
use memvault_core::{DistanceMetric, Metadata, VectorRecord};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};

use crate::error::StorageError;
use crate::traits::VectorStore;
use crate::types::{CollectionInfo, GetRequest, QueryHit, QueryRequest, RecordUpdate};

const SPACE_KEY: &str = "hnsw:space";

/// `VectorStore` over the Chroma v1 REST API.
#[derive(Clone)]
pub struct ChromaStore {
    base_url: String,
    client: Client,
}

impl ChromaStore {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, StorageError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    async fn collection_id(&self, name: &str) -> Result<String, StorageError> {
        self.collection(name)
            .await?
            .map(|c| c.id)
            .ok_or_else(|| StorageError::CollectionNotFound(name.to_string()))
    }

    async fn post_collection<T: DeserializeOwned>(
        &self,
        name: &str,
        op: &str,
        body: Value,
    ) -> Result<T, StorageError> {
        let id = self.collection_id(name).await?;
        let res = self
            .client
            .post(self.url(&format!("/collections/{id}/{op}")))
            .json(&body)
            .send()
            .await?;
        Ok(checked(res).await?.json().await?)
    }
}

async fn checked(res: Response) -> Result<Response, StorageError> {
    if res.status().is_success() {
        return Ok(res);
    }
    let status = res.status().as_u16();
    let body = res.text().await.unwrap_or_default();
    Err(StorageError::Api { status, body })
}

#[derive(Debug, Deserialize)]
struct RawCollection {
    id: String,
    name: String,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

impl RawCollection {
    fn into_info(self) -> CollectionInfo {
        let metric = self
            .metadata
            .as_ref()
            .and_then(|m| m.get(SPACE_KEY))
            .and_then(Value::as_str)
            .and_then(DistanceMetric::parse)
            .unwrap_or_default();
        CollectionInfo {
            name: self.name,
            id: self.id,
            metric,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawGet {
    ids: Vec<String>,
    #[serde(default)]
    documents: Option<Vec<Option<String>>>,
    #[serde(default)]
    metadatas: Option<Vec<Option<Map<String, Value>>>>,
    #[serde(default)]
    embeddings: Option<Vec<Option<Vec<f32>>>>,
}

#[derive(Debug, Deserialize)]
struct RawQuery {
    ids: Vec<Vec<String>>,
    #[serde(default)]
    documents: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Option<Map<String, Value>>>>>,
    #[serde(default)]
    distances: Option<Vec<Vec<f32>>>,
}

/// Non-string values keep their JSON text; see [`Metadata`].
fn to_metadata(raw: Option<Map<String, Value>>) -> Metadata {
    raw.unwrap_or_default()
        .into_iter()
        .map(|(k, v)| match v {
            Value::String(s) => (k, s),
            other => (k, other.to_string()),
        })
        .collect()
}

fn nth<T: Clone>(column: Option<&Vec<Option<T>>>, idx: usize) -> Option<T> {
    column.and_then(|c| c.get(idx)).cloned().flatten()
}

fn metadata_json(metadata: &Metadata) -> Value {
    if metadata.is_empty() {
        Value::Null
    } else {
        json!(metadata)
    }
}

fn rows_from_get(raw: RawGet) -> Vec<VectorRecord> {
    raw.ids
        .iter()
        .enumerate()
        .map(|(i, id)| VectorRecord {
            id: id.clone(),
            content: nth(raw.documents.as_ref(), i).unwrap_or_default(),
            metadata: to_metadata(nth(raw.metadatas.as_ref(), i)),
            embedding: nth(raw.embeddings.as_ref(), i),
        })
        .collect()
}

fn hits_from_query(raw: RawQuery) -> Vec<QueryHit> {
    let Some(ids) = raw.ids.into_iter().next() else {
        return Vec::new();
    };
    let documents = raw.documents.and_then(|d| d.into_iter().next());
    let metadatas = raw.metadatas.and_then(|m| m.into_iter().next());
    let distances = raw.distances.and_then(|d| d.into_iter().next());

    ids.into_iter()
        .enumerate()
        .map(|(i, id)| QueryHit {
            record: VectorRecord {
                id,
                content: nth(documents.as_ref(), i).unwrap_or_default(),
                metadata: to_metadata(nth(metadatas.as_ref(), i)),
                embedding: None,
            },
            distance: distances
                .as_ref()
                .and_then(|d| d.get(i).copied())
                .unwrap_or(f32::MAX),
        })
        .collect()
}

#[async_trait]
impl VectorStore for ChromaStore {
    fn name(&self) -> &'static str {
        "chroma"
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>, StorageError> {
        let res = self.client.get(self.url("/collections")).send().await?;
        let raw: Vec<RawCollection> = checked(res).await?.json().await?;
        Ok(raw.into_iter().map(RawCollection::into_info).collect())
    }

    async fn create_collection(
        &self,
        name: &str,
        metric: DistanceMetric,
    ) -> Result<CollectionInfo, StorageError> {
        let body = json!({
            "name": name,
            "metadata": { SPACE_KEY: metric.as_str() },
            "get_or_create": false
        });
        let res = self
            .client
            .post(self.url("/collections"))
            .json(&body)
            .send()
            .await?;
        let raw: RawCollection = checked(res).await?.json().await?;
        Ok(raw.into_info())
    }

    async fn delete_collection(&self, name: &str) -> Result<(), StorageError> {
        let res = self
            .client
            .delete(self.url(&format!("/collections/{name}")))
            .send()
            .await?;
        checked(res).await?;
        Ok(())
    }

    async fn upsert(
        &self,
        collection: &str,
        records: Vec<VectorRecord>,
    ) -> Result<(), StorageError> {
        if records.is_empty() {
            return Ok(());
        }
        let mut ids = Vec::with_capacity(records.len());
        let mut embeddings = Vec::with_capacity(records.len());
        let mut documents = Vec::with_capacity(records.len());
        let mut metadatas = Vec::with_capacity(records.len());
        for record in records {
            let embedding = record.embedding.ok_or_else(|| {
                StorageError::InvalidInput(format!("record {} has no embedding", record.id))
            })?;
            metadatas.push(metadata_json(&record.metadata));
            ids.push(record.id);
            embeddings.push(embedding);
            documents.push(record.content);
        }
        let body = json!({
            "ids": ids,
            "embeddings": embeddings,
            "documents": documents,
            "metadatas": metadatas
        });
        let _: Value = self.post_collection(collection, "upsert", body).await?;
        Ok(())
    }

    async fn get(
        &self,
        collection: &str,
        request: GetRequest,
    ) -> Result<Vec<VectorRecord>, StorageError> {
        let mut include = vec!["documents", "metadatas"];
        if request.include_embeddings {
            include.push("embeddings");
        }
        let mut body = json!({ "include": include });
        if let Some(ids) = request.ids {
            body["ids"] = json!(ids);
        }
        if let Some(clause) = request.filter.as_ref().and_then(|f| f.to_where()) {
            body["where"] = clause;
        }
        if let Some(limit) = request.limit {
            body["limit"] = json!(limit);
        }
        if let Some(offset) = request.offset {
            body["offset"] = json!(offset);
        }
        let raw: RawGet = self.post_collection(collection, "get", body).await?;
        Ok(rows_from_get(raw))
    }

    async fn query(
        &self,
        collection: &str,
        request: QueryRequest,
    ) -> Result<Vec<QueryHit>, StorageError> {
        let mut body = json!({
            "query_embeddings": [request.embedding],
            "n_results": request.n_results,
            "include": ["documents", "metadatas", "distances"]
        });
        if let Some(clause) = request.filter.as_ref().and_then(|f| f.to_where()) {
            body["where"] = clause;
        }
        let raw: RawQuery = self.post_collection(collection, "query", body).await?;
        Ok(hits_from_query(raw))
    }

    async fn update(
        &self,
        collection: &str,
        updates: Vec<RecordUpdate>,
    ) -> Result<(), StorageError> {
        if updates.is_empty() {
            return Ok(());
        }
        let ids: Vec<&str> = updates.iter().map(|u| u.id.as_str()).collect();
        let mut body = json!({ "ids": ids });
        if updates.iter().any(|u| u.content.is_some()) {
            let documents: Vec<Option<&str>> =
                updates.iter().map(|u| u.content.as_deref()).collect();
            body["documents"] = json!(documents);
        }
        if updates.iter().any(|u| u.metadata.is_some()) {
            let metadatas: Vec<Value> = updates
                .iter()
                .map(|u| u.metadata.as_ref().map_or(Value::Null, metadata_json))
                .collect();
            body["metadatas"] = json!(metadatas);
        }
        let _: Value = self.post_collection(collection, "update", body).await?;
        Ok(())
    }

    async fn delete(&self, collection: &str, ids: Vec<String>) -> Result<(), StorageError> {
        if ids.is_empty() {
            return Ok(());
        }
        let _: Value = self
            .post_collection(collection, "delete", json!({ "ids": ids }))
            .await?;
        Ok(())
    }

    async fn count(&self, collection: &str) -> Result<usize, StorageError> {
        let id = self.collection_id(collection).await?;
        let res = self
            .client
            .get(self.url(&format!("/collections/{id}/count")))
            .send()
            .await?;
        Ok(checked(res).await?.json().await?)
    }
}
