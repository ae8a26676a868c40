use std::sync::Arc;

use memvault_core::DuplicatePolicy;
use memvault_storage::{QueryHit, QueryRequest, StorageError, VectorStore};
use tracing::{debug, warn};

/// Advisory near-duplicate check run before auto-captured inserts.
/// Nothing is locked; two racing inserts can both pass.
pub struct DuplicateSuppressor {
    store: Arc<dyn VectorStore>,
    collection: String,
    policy: DuplicatePolicy,
}

impl DuplicateSuppressor {
    pub fn new(
        store: Arc<dyn VectorStore>,
        collection: impl Into<String>,
        policy: DuplicatePolicy,
    ) -> Self {
        Self {
            store,
            collection: collection.into(),
            policy,
        }
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    /// Nearest stored record when it lies strictly inside the threshold.
    pub async fn check(&self, embedding: &[f32]) -> Result<Option<QueryHit>, StorageError> {
        let hits = self
            .store
            .query(
                &self.collection,
                QueryRequest::nearest(embedding.to_vec(), 1),
            )
            .await?;
        Ok(hits
            .into_iter()
            .next()
            .filter(|hit| self.policy.is_duplicate_distance(hit.distance)))
    }

    /// Fails open: any lookup error reads as "not a duplicate".
    pub async fn nearest_duplicate(&self, embedding: &[f32]) -> Option<QueryHit> {
        match self.check(embedding).await {
            Ok(Some(hit)) => {
                debug!(
                    collection = %self.collection,
                    nearest = %hit.record.id,
                    distance = hit.distance,
                    "duplicate suppressed"
                );
                Some(hit)
            }
            Ok(None) => None,
            Err(err) => {
                warn!(collection = %self.collection, error = %err, "duplicate check failed");
                None
            }
        }
    }

    pub async fn is_duplicate(&self, embedding: &[f32]) -> bool {
        self.nearest_duplicate(embedding).await.is_some()
    }
}
