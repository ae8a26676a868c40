//! Startup wiring and the handles tool handlers work through.
//!
//! Bootstrap is strictly sequential: the engine is made reachable, the
//! distance migration runs once, and only then is the collection handed out.

use std::sync::Arc;

use memvault_core::{Allocation, DuplicatePolicy, ScoredCandidate, TokenBudget, VectorRecord};
use memvault_sidecar::{Ready, SidecarError, Supervisor};
use memvault_storage::{
    ChromaStore, CollectionInfo, DistanceMigrator, LocalVectorStore, MigrationMarker, QueryHit,
    QueryRequest, StorageError, VectorStore,
};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{Backend, ServerConfig};
use crate::dedup::DuplicateSuppressor;
use crate::session::SessionAggregator;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("sidecar error: {0}")]
    Sidecar(#[from] SidecarError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Stored,
    Duplicate { nearest: String },
}

pub struct ServerContext {
    config: ServerConfig,
    store: Arc<dyn VectorStore>,
    collection: CollectionInfo,
    ready: Option<Ready>,
    budget: TokenBudget,
    duplicates: DuplicateSuppressor,
    sessions: SessionAggregator,
}

impl ServerContext {
    pub async fn bootstrap(config: ServerConfig) -> Result<Self, BootstrapError> {
        match config.backend {
            Backend::Chroma => {
                let supervisor = Supervisor::from_config(&config.sidecar)?;
                let ready = supervisor.ensure_running().await?;
                let store = ChromaStore::new(&ready.endpoint, config.request_timeout)?;
                Self::from_store(config, Arc::new(store), Some(ready)).await
            }
            Backend::Local => {
                let store = LocalVectorStore::open(config.local_store_path())?;
                Self::from_store(config, Arc::new(store), None).await
            }
        }
    }

    /// Everything after the engine is reachable.
    pub async fn from_store(
        config: ServerConfig,
        store: Arc<dyn VectorStore>,
        ready: Option<Ready>,
    ) -> Result<Self, BootstrapError> {
        DistanceMigrator::new(
            Arc::clone(&store),
            &config.collection,
            config.distance,
            MigrationMarker::in_dir(config.data_dir()),
        )
        .with_batch_size(config.migration_batch)
        .migrate_if_needed()
        .await;

        let collection = store
            .get_or_create_collection(&config.collection, config.distance)
            .await?;
        info!(
            backend = store.name(),
            collection = %collection.name,
            metric = %collection.metric,
            "memory collection ready"
        );

        let duplicates = DuplicateSuppressor::new(
            Arc::clone(&store),
            &config.collection,
            DuplicatePolicy::new(config.duplicate_threshold),
        );
        let sessions = SessionAggregator::new(Arc::clone(&store), &config.session_collection);
        Ok(Self {
            budget: TokenBudget::new(config.chars_per_token),
            config,
            store,
            collection,
            ready,
            duplicates,
            sessions,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn VectorStore> {
        Arc::clone(&self.store)
    }

    pub fn collection(&self) -> &CollectionInfo {
        &self.collection
    }

    /// `None` when no sidecar was involved.
    pub fn ready(&self) -> Option<&Ready> {
        self.ready.as_ref()
    }

    pub fn budget(&self) -> TokenBudget {
        self.budget
    }

    pub fn duplicates(&self) -> &DuplicateSuppressor {
        &self.duplicates
    }

    pub fn sessions(&self) -> &SessionAggregator {
        &self.sessions
    }

    /// Hits keep engine order; similarity comes from the collection metric.
    pub fn build_candidates(&self, hits: Vec<QueryHit>) -> Vec<ScoredCandidate> {
        hits.into_iter()
            .map(|hit| {
                let similarity = self.collection.metric.similarity(hit.distance);
                self.budget.candidate(hit.record, similarity)
            })
            .collect()
    }

    pub async fn recall_within_budget(
        &self,
        request: QueryRequest,
        max_tokens: usize,
    ) -> Result<Allocation, StorageError> {
        let hits = self.store.query(&self.collection.name, request).await?;
        Ok(self
            .budget
            .allocate(self.build_candidates(hits), max_tokens))
    }

    /// Insert path for auto-captured content: near duplicates are dropped,
    /// stored records count toward the open session.
    pub async fn capture(&self, record: VectorRecord) -> Result<CaptureOutcome, StorageError> {
        if let Some(embedding) = &record.embedding {
            if let Some(hit) = self.duplicates.nearest_duplicate(embedding).await {
                return Ok(CaptureOutcome::Duplicate {
                    nearest: hit.record.id,
                });
            }
        }

        let project = record.meta("project").unwrap_or_default().to_string();
        let memory_type = record.meta("type").unwrap_or_default().to_string();
        self.store
            .upsert(&self.collection.name, vec![record])
            .await?;

        if let Err(err) = self.sessions.record_activity(&project, &memory_type) {
            debug!(error = %err, "stored outside an open session");
        }
        Ok(CaptureOutcome::Stored)
    }
}
