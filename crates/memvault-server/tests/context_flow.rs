use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use memvault_core::{DistanceMetric, DuplicatePolicy, VectorRecord};
use memvault_server::{Backend, CaptureOutcome, DuplicateSuppressor, ServerConfig, ServerContext};
use memvault_storage::{
    LocalVectorStore, MigrationMarker, QueryRequest, StorageError, VectorStore,
};

static TEMP_SEQ: AtomicU64 = AtomicU64::new(1);

fn temp_data_dir() -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let pid = std::process::id();
    std::env::temp_dir().join(format!("memvault-ctx-test-{pid}-{now}-{seq}"))
}

fn local_config(data_dir: PathBuf) -> ServerConfig {
    let mut config = ServerConfig {
        backend: Backend::Local,
        ..ServerConfig::default()
    };
    config.sidecar.data_dir = data_dir;
    config
}

fn memory(id: &str, content: &str, embedding: Vec<f32>) -> VectorRecord {
    VectorRecord::new(id, content)
        .with_embedding(embedding)
        .with_meta("project", "proj-a")
        .with_meta("type", "bugfix")
}

#[tokio::test]
async fn duplicate_boundary_is_strict() {
    let store = Arc::new(LocalVectorStore::in_memory());
    store
        .create_collection("memories", DistanceMetric::L2)
        .await
        .expect("create");
    store
        .upsert("memories", vec![memory("origin", "x", vec![0.0, 0.0])])
        .await
        .expect("seed");

    let dedup = DuplicateSuppressor::new(store, "memories", DuplicatePolicy::new(0.25));

    // Squared L2: 0.5^2 is exactly the threshold.
    assert!(!dedup.is_duplicate(&[0.5, 0.0]).await);
    assert!(dedup.check(&[0.5, 0.0]).await.expect("query").is_none());

    assert!(dedup.is_duplicate(&[0.4, 0.0]).await);
    let hit = dedup.check(&[0.4, 0.0]).await.expect("query").expect("hit");
    assert_eq!(hit.record.id, "origin");

    assert!(!dedup.is_duplicate(&[3.0, 4.0]).await);
}

#[tokio::test]
async fn duplicate_check_fails_open() {
    let store = Arc::new(LocalVectorStore::in_memory());
    let missing = DuplicateSuppressor::new(store.clone(), "memories", DuplicatePolicy::default());
    assert!(matches!(
        missing.check(&[1.0, 0.0]).await,
        Err(StorageError::CollectionNotFound(_))
    ));
    assert!(!missing.is_duplicate(&[1.0, 0.0]).await);

    store
        .create_collection("memories", DistanceMetric::Cosine)
        .await
        .expect("create");
    let empty = DuplicateSuppressor::new(store.clone(), "memories", DuplicatePolicy::default());
    assert!(!empty.is_duplicate(&[1.0, 0.0]).await);

    store
        .upsert("memories", vec![memory("a", "x", vec![1.0, 0.0])])
        .await
        .expect("seed");
    // Wrong dimension is a query error, still not a duplicate.
    assert!(!empty.is_duplicate(&[1.0, 0.0, 0.0]).await);
    assert!(empty.is_duplicate(&[1.0, 0.0]).await);
}

#[tokio::test]
async fn local_bootstrap_wires_every_component() {
    let data_dir = temp_data_dir();
    let ctx = ServerContext::bootstrap(local_config(data_dir.clone()))
        .await
        .expect("bootstrap");

    assert!(ctx.ready().is_none());
    assert_eq!(ctx.collection().name, "memories");
    assert_eq!(ctx.collection().metric, DistanceMetric::Cosine);
    assert!(MigrationMarker::in_dir(&data_dir).status().expect("status").is_done());

    let sessions = ctx.sessions();
    let session_id = sessions.next_session_id();
    sessions.start_session(&session_id).await.expect("start");

    let stored = ctx
        .capture(memory("a", &"a".repeat(40), vec![1.0, 0.0, 0.0]))
        .await
        .expect("capture a");
    assert_eq!(stored, CaptureOutcome::Stored);

    let dup = ctx
        .capture(memory("a-again", "same thing", vec![1.0, 0.0, 0.0]))
        .await
        .expect("capture dup");
    assert_eq!(
        dup,
        CaptureOutcome::Duplicate {
            nearest: "a".to_string()
        }
    );

    for (id, content, embedding) in [
        ("b", "b".repeat(80), vec![0.6, 0.8, 0.0]),
        ("c", "c".repeat(8), vec![0.0, 1.0, 0.0]),
    ] {
        let outcome = ctx
            .capture(memory(id, &content, embedding))
            .await
            .expect("capture");
        assert_eq!(outcome, CaptureOutcome::Stored);
    }
    assert_eq!(ctx.store().count("memories").await.expect("count"), 3);

    // a = 10 tokens, b = 20 (skipped), c = 2.
    let allocation = ctx
        .recall_within_budget(QueryRequest::nearest(vec![1.0, 0.0, 0.0], 3), 13)
        .await
        .expect("recall");
    let ids: Vec<&str> = allocation
        .selected
        .iter()
        .map(|c| c.record.id.as_str())
        .collect();
    assert_eq!(ids, vec!["a", "c"]);
    assert_eq!(allocation.tokens_used, 12);
    let first = allocation.selected.first().expect("first");
    assert!((first.similarity - 1.0).abs() < 1e-6);

    let closed = sessions.end_session(&session_id).await.expect("end");
    assert_eq!(closed.memory_count, 3);
    assert_eq!(closed.projects, vec!["proj-a".to_string()]);
    assert_eq!(closed.types_seen, vec!["bugfix".to_string()]);

    let _ = std::fs::remove_dir_all(data_dir);
}

#[tokio::test]
async fn bootstrap_migrates_existing_collection_once() {
    let data_dir = temp_data_dir();
    let config = local_config(data_dir.clone());
    {
        let seed = LocalVectorStore::open(config.local_store_path()).expect("open seed");
        seed.create_collection("memories", DistanceMetric::L2)
            .await
            .expect("create");
        let rows = (0..7)
            .map(|i| memory(&format!("m{i}"), "note", vec![i as f32, 1.0]))
            .collect();
        seed.upsert("memories", rows).await.expect("seed");
    }

    let ctx = ServerContext::bootstrap(ServerConfig {
        migration_batch: 3,
        ..config.clone()
    })
    .await
    .expect("bootstrap");
    assert_eq!(ctx.collection().metric, DistanceMetric::Cosine);
    assert_eq!(ctx.store().count("memories").await.expect("count"), 7);
    assert!(MigrationMarker::in_dir(&data_dir).status().expect("status").is_done());
    drop(ctx);

    // A later switch back to l2 is not applied: the marker is already there.
    let again = ServerContext::bootstrap(ServerConfig {
        distance: DistanceMetric::L2,
        ..config
    })
    .await
    .expect("second bootstrap");
    assert_eq!(again.collection().metric, DistanceMetric::Cosine);
    assert_eq!(again.store().count("memories").await.expect("count"), 7);

    let _ = std::fs::remove_dir_all(data_dir);
}

#[tokio::test]
async fn chroma_bootstrap_skips_launch_when_engine_is_live() {
    let mut server = mockito::Server::new_async().await;
    let beat = server
        .mock("GET", "/api/v1/heartbeat")
        .with_status(200)
        .with_body(r#"{"nanosecond heartbeat": 1}"#)
        .create_async()
        .await;
    let _collections = server
        .mock("GET", "/api/v1/collections")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"id":"c-1","name":"memories","metadata":{"hnsw:space":"cosine"}}]"#)
        .expect_at_least(1)
        .create_async()
        .await;

    let data_dir = temp_data_dir();
    let mut config = ServerConfig::default();
    let addr = server.host_with_port();
    let (host, port) = addr.rsplit_once(':').expect("host:port");
    config.sidecar.host = host.to_string();
    config.sidecar.port = port.parse().expect("port");
    config.sidecar.data_dir = data_dir.clone();
    config.sidecar.engine_bin = "memvault-no-such-engine".to_string();
    config.sidecar.container.runtime = "memvault-no-such-runtime".to_string();

    let ctx = ServerContext::bootstrap(config).await.expect("bootstrap");
    let ready = ctx.ready().expect("sidecar ready");
    assert_eq!(ready.launched, None);
    assert_eq!(ctx.collection().id, "c-1");
    assert_eq!(ctx.store().name(), "chroma");
    beat.assert_async().await;
    assert!(MigrationMarker::in_dir(&data_dir).status().expect("status").is_done());

    let _ = std::fs::remove_dir_all(data_dir);
}
