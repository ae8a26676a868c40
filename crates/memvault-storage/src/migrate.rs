//! One-shot move of a collection into a new distance space.
//!
//! Records are read back with their stored embeddings and re-inserted into a
//! freshly created collection, so the move never calls an embedding provider.
//! The marker is written last: any failure leaves it absent and the whole
//! migration is attempted again on the next start.
//!
//! A failure after the collection was recreated is not recoverable this way.
//! The next start finds the collection already on the target metric and only
//! writes the marker, so records from batches that never landed stay lost.
//! That start logs a warning with the surviving record count.

use std::sync::Arc;

use chrono::Utc;
use memvault_core::{DistanceMetric, VectorRecord};
use tracing::{debug, error, info, warn};

use crate::error::StorageError;
use crate::marker::MigrationMarker;
use crate::traits::VectorStore;
use crate::types::GetRequest;

pub const DEFAULT_MIGRATION_BATCH: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    AlreadyMigrated,
    NoCollection,
    AlreadyOnTarget,
    RecreatedEmpty,
    Migrated { records: usize, batches: usize },
}

pub struct DistanceMigrator {
    store: Arc<dyn VectorStore>,
    collection: String,
    target: DistanceMetric,
    marker: MigrationMarker,
    batch_size: usize,
}

impl DistanceMigrator {
    pub fn new(
        store: Arc<dyn VectorStore>,
        collection: impl Into<String>,
        target: DistanceMetric,
        marker: MigrationMarker,
    ) -> Self {
        Self {
            store,
            collection: collection.into(),
            target,
            marker,
            batch_size: DEFAULT_MIGRATION_BATCH,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Startup entry point. Errors are logged and dropped; the next process
    /// start retries.
    pub async fn migrate_if_needed(&self) {
        match self.run().await {
            Ok(outcome) => {
                debug!(collection = %self.collection, ?outcome, "distance migration check done");
            }
            Err(err) => error!(
                collection = %self.collection,
                target = %self.target,
                error = %err,
                "distance migration failed, will retry on next start"
            ),
        }
    }

    pub async fn run(&self) -> Result<MigrationOutcome, StorageError> {
        if self.marker.status()?.is_done() {
            return Ok(MigrationOutcome::AlreadyMigrated);
        }

        let Some(info) = self.store.collection(&self.collection).await? else {
            self.mark_done()?;
            return Ok(MigrationOutcome::NoCollection);
        };

        if info.metric == self.target {
            // No marker yet the metric already matches: either the collection
            // was created on the target, or an earlier run died mid re-insert.
            let count = self.store.count(&self.collection).await.ok();
            warn!(
                collection = %self.collection,
                metric = %info.metric,
                records = ?count,
                "collection already on target metric without a marker, \
                 records missing from an interrupted migration are not restored"
            );
            self.mark_done()?;
            return Ok(MigrationOutcome::AlreadyOnTarget);
        }

        if self.store.count(&self.collection).await? == 0 {
            self.recreate().await?;
            self.mark_done()?;
            return Ok(MigrationOutcome::RecreatedEmpty);
        }

        info!(
            collection = %self.collection,
            from = %info.metric,
            to = %self.target,
            "migrating collection to new distance space"
        );
        let records = self.read_all().await?;
        let total = records.len();

        self.recreate().await?;

        let mut rows = records.into_iter().peekable();
        let mut batches = 0usize;
        while rows.peek().is_some() {
            let batch: Vec<VectorRecord> = rows.by_ref().take(self.batch_size).collect();
            self.store.upsert(&self.collection, batch).await?;
            batches += 1;
            debug!(collection = %self.collection, batch = batches, "re-inserted batch");
        }

        self.mark_done()?;
        info!(
            collection = %self.collection,
            records = total,
            batches,
            "distance migration complete"
        );
        Ok(MigrationOutcome::Migrated {
            records: total,
            batches,
        })
    }

    async fn read_all(&self) -> Result<Vec<VectorRecord>, StorageError> {
        let mut records = Vec::new();
        loop {
            let page = self
                .store
                .get(
                    &self.collection,
                    GetRequest::page(records.len(), self.batch_size).with_embeddings(),
                )
                .await?;
            let short = page.len() < self.batch_size;
            records.extend(page);
            if short {
                break;
            }
        }

        if let Some(bare) = records.iter().find(|r| r.embedding.is_none()) {
            return Err(StorageError::InvalidInput(format!(
                "record {} has no stored embedding",
                bare.id
            )));
        }

        let expected = self.store.count(&self.collection).await?;
        if expected != records.len() {
            warn!(
                collection = %self.collection,
                expected,
                read = records.len(),
                "record count changed while reading"
            );
        }
        Ok(records)
    }

    async fn recreate(&self) -> Result<(), StorageError> {
        self.store.delete_collection(&self.collection).await?;
        self.store
            .create_collection(&self.collection, self.target)
            .await?;
        Ok(())
    }

    fn mark_done(&self) -> Result<(), StorageError> {
        self.marker.mark_done(Utc::now())
    }
}
