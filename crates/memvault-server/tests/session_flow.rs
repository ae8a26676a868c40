use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use memvault_core::{DistanceMetric, VectorRecord};
use memvault_server::{Clock, SessionAggregator, SessionError};
use memvault_storage::{
    CollectionInfo, GetRequest, LocalVectorStore, QueryHit, QueryRequest, RecordUpdate,
    StorageError, VectorStore,
};
use parking_lot::Mutex;

struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    fn starting_at(rfc3339: &str) -> Arc<Self> {
        let at = DateTime::parse_from_rfc3339(rfc3339)
            .expect("timestamp")
            .with_timezone(&Utc);
        Arc::new(Self(Mutex::new(at)))
    }

    fn advance(&self, by: Duration) {
        let mut now = self.0.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock()
    }
}

/// Local store whose upserts can be switched off.
struct SwitchableStore {
    inner: LocalVectorStore,
    reject_writes: AtomicBool,
}

impl SwitchableStore {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: LocalVectorStore::in_memory(),
            reject_writes: AtomicBool::new(false),
        })
    }

    fn reject_writes(&self, on: bool) {
        self.reject_writes.store(on, Ordering::SeqCst);
    }
}

#[async_trait]
impl VectorStore for SwitchableStore {
    fn name(&self) -> &'static str {
        "switchable"
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>, StorageError> {
        self.inner.list_collections().await
    }

    async fn create_collection(
        &self,
        name: &str,
        metric: DistanceMetric,
    ) -> Result<CollectionInfo, StorageError> {
        self.inner.create_collection(name, metric).await
    }

    async fn delete_collection(&self, name: &str) -> Result<(), StorageError> {
        self.inner.delete_collection(name).await
    }

    async fn upsert(
        &self,
        collection: &str,
        records: Vec<VectorRecord>,
    ) -> Result<(), StorageError> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Api {
                status: 503,
                body: "engine unavailable".to_string(),
            });
        }
        self.inner.upsert(collection, records).await
    }

    async fn get(
        &self,
        collection: &str,
        request: GetRequest,
    ) -> Result<Vec<VectorRecord>, StorageError> {
        self.inner.get(collection, request).await
    }

    async fn query(
        &self,
        collection: &str,
        request: QueryRequest,
    ) -> Result<Vec<QueryHit>, StorageError> {
        self.inner.query(collection, request).await
    }

    async fn update(
        &self,
        collection: &str,
        updates: Vec<RecordUpdate>,
    ) -> Result<(), StorageError> {
        self.inner.update(collection, updates).await
    }

    async fn delete(&self, collection: &str, ids: Vec<String>) -> Result<(), StorageError> {
        self.inner.delete(collection, ids).await
    }

    async fn count(&self, collection: &str) -> Result<usize, StorageError> {
        self.inner.count(collection).await
    }
}

#[tokio::test]
async fn session_round_trip_preserves_start_time() {
    let store = Arc::new(LocalVectorStore::in_memory());
    let clock = ManualClock::starting_at("2026-03-01T09:00:00Z");
    let agg = SessionAggregator::with_clock(store, "sessions", clock.clone());

    agg.start_session("ses_1").await.expect("start");
    let opened = agg.load("ses_1").await.expect("load").expect("persisted");
    assert!(opened.is_open());
    assert_eq!(opened.memory_count, 0);

    agg.record_activity("proj-a", "bugfix").expect("first");
    agg.record_activity("proj-a", "bugfix").expect("second");

    // Counters are not written until the session ends.
    let mid = agg.load("ses_1").await.expect("load").expect("persisted");
    assert_eq!(mid.memory_count, 0);

    clock.advance(Duration::minutes(5));
    let closed = agg.end_session("ses_1").await.expect("end");
    assert_eq!(closed.memory_count, 2);
    assert_eq!(closed.projects, vec!["proj-a".to_string()]);
    assert_eq!(closed.types_seen, vec!["bugfix".to_string()]);
    assert_eq!(closed.start_time, opened.start_time);
    assert!(!closed.end_time.is_empty());
    assert!(closed.end_time > closed.start_time);

    let persisted = agg.load("ses_1").await.expect("load").expect("persisted");
    assert_eq!(persisted, closed);
    assert_eq!(
        persisted.summary,
        "Session ses_1: 2 memories saved across 1 project (proj-a); types: bugfix"
    );
}

#[tokio::test]
async fn closed_session_rejects_further_activity() {
    let agg = SessionAggregator::new(Arc::new(LocalVectorStore::in_memory()), "sessions");
    agg.start_session("ses_1").await.expect("start");
    agg.end_session("ses_1").await.expect("end");

    assert!(matches!(
        agg.record_activity("proj-a", "note"),
        Err(SessionError::Closed(_))
    ));
    assert!(matches!(
        agg.end_session("ses_1").await,
        Err(SessionError::Closed(_))
    ));
    assert!(matches!(
        agg.start_session("ses_2").await,
        Err(SessionError::AlreadyStarted(_))
    ));
    assert_eq!(agg.snapshot().expect("final summary").memory_count, 0);
}

#[tokio::test]
async fn ending_another_session_is_rejected() {
    let agg = SessionAggregator::new(Arc::new(LocalVectorStore::in_memory()), "sessions");
    assert!(matches!(
        agg.end_session("ses_1").await,
        Err(SessionError::NotStarted)
    ));

    agg.start_session("ses_1").await.expect("start");
    agg.record_activity("proj-a", "note").expect("record");
    assert!(matches!(
        agg.end_session("ses_other").await,
        Err(SessionError::UnknownSession(id)) if id == "ses_other"
    ));
    assert_eq!(agg.current_session_id().expect("still open"), "ses_1");
    assert_eq!(agg.snapshot().expect("snapshot").memory_count, 1);
}

#[tokio::test]
async fn unclosed_session_stays_orphaned() {
    let store = Arc::new(LocalVectorStore::in_memory());
    {
        let agg = SessionAggregator::new(store.clone(), "sessions");
        agg.start_session("ses_killed").await.expect("start");
        agg.record_activity("proj-a", "note").expect("record");
    }

    let reader = SessionAggregator::new(store, "sessions");
    let orphan = reader
        .load("ses_killed")
        .await
        .expect("load")
        .expect("persisted");
    assert!(orphan.is_open());
    assert_eq!(orphan.memory_count, 0);
}

#[tokio::test]
async fn failed_close_keeps_counters() {
    let store = SwitchableStore::new();
    let agg = SessionAggregator::new(store.clone(), "sessions");
    agg.start_session("ses_1").await.expect("start");
    agg.record_activity("proj-a", "bugfix").expect("record");

    store.reject_writes(true);
    let err = agg.end_session("ses_1").await.expect_err("write rejected");
    assert!(matches!(err, SessionError::Storage(StorageError::Api { status: 503, .. })));
    assert_eq!(agg.current_session_id().expect("reopened"), "ses_1");

    agg.record_activity("proj-b", "decision").expect("record after failure");
    store.reject_writes(false);
    let closed = agg.end_session("ses_1").await.expect("end");
    assert_eq!(closed.memory_count, 2);
    assert_eq!(closed.projects, vec!["proj-a".to_string(), "proj-b".to_string()]);
}

#[tokio::test]
async fn failed_open_leaves_session_unstarted() {
    let store = SwitchableStore::new();
    store.reject_writes(true);
    let agg = SessionAggregator::new(store.clone(), "sessions");

    assert!(agg.start_session("ses_1").await.is_err());
    assert!(matches!(agg.current_session_id(), Err(SessionError::NotStarted)));

    store.reject_writes(false);
    agg.start_session("ses_1").await.expect("retry");
}

#[tokio::test]
async fn concurrent_recorders_never_lose_updates() {
    let agg = SessionAggregator::new(Arc::new(LocalVectorStore::in_memory()), "sessions");
    agg.start_session("ses_1").await.expect("start");

    std::thread::scope(|scope| {
        for worker in 0..8 {
            let agg = &agg;
            scope.spawn(move || {
                for _ in 0..250 {
                    agg.record_activity(&format!("proj-{worker}"), "note")
                        .expect("record");
                }
            });
        }
    });

    let closed = agg.end_session("ses_1").await.expect("end");
    assert_eq!(closed.memory_count, 2_000);
    assert_eq!(closed.projects.len(), 8);
    assert_eq!(closed.types_seen, vec!["note".to_string()]);
}

#[tokio::test]
async fn generated_ids_are_distinct() {
    let agg = SessionAggregator::new(Arc::new(LocalVectorStore::in_memory()), "sessions");
    let a = agg.next_session_id();
    let b = agg.next_session_id();
    assert!(a.starts_with("ses_"));
    assert_ne!(a, b);
}
