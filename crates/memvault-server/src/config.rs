use std::path::{Path, PathBuf};
use std::time::Duration;

use memvault_core::{DEFAULT_CHARS_PER_TOKEN, DEFAULT_DUPLICATE_DISTANCE, DistanceMetric};
use memvault_sidecar::SidecarConfig;
use memvault_storage::DEFAULT_MIGRATION_BATCH;

pub const LOCAL_STORE_FILE: &str = "memvault-local.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// HTTP engine kept alive by the sidecar supervisor.
    Chroma,
    /// JSON file in the data directory; no sidecar.
    Local,
}

impl Backend {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "chroma" => Some(Self::Chroma),
            "local" | "json" => Some(Self::Local),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub backend: Backend,
    pub sidecar: SidecarConfig,
    pub collection: String,
    pub session_collection: String,
    pub distance: DistanceMetric,
    pub migration_batch: usize,
    pub duplicate_threshold: f32,
    pub chars_per_token: usize,
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Chroma,
            sidecar: SidecarConfig::default(),
            collection: "memories".to_string(),
            session_collection: "sessions".to_string(),
            distance: DistanceMetric::Cosine,
            migration_batch: DEFAULT_MIGRATION_BATCH,
            duplicate_threshold: DEFAULT_DUPLICATE_DISTANCE,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let backend = std::env::var("MEMVAULT_BACKEND")
            .ok()
            .and_then(|v| Backend::parse(&v))
            .unwrap_or(defaults.backend);
        let distance = std::env::var("MEMVAULT_DISTANCE")
            .ok()
            .and_then(|v| DistanceMetric::parse(&v))
            .unwrap_or(defaults.distance);

        Self {
            backend,
            sidecar: SidecarConfig::from_env(),
            collection: env_name("MEMVAULT_COLLECTION").unwrap_or(defaults.collection),
            session_collection: env_name("MEMVAULT_SESSION_COLLECTION")
                .unwrap_or(defaults.session_collection),
            distance,
            migration_batch: env_usize(
                "MEMVAULT_MIGRATION_BATCH",
                DEFAULT_MIGRATION_BATCH,
                1,
                10_000,
            ),
            duplicate_threshold: env_f32(
                "MEMVAULT_DUP_THRESHOLD",
                DEFAULT_DUPLICATE_DISTANCE,
                0.0,
                2.0,
            ),
            chars_per_token: env_usize("MEMVAULT_CHARS_PER_TOKEN", DEFAULT_CHARS_PER_TOKEN, 1, 64),
            request_timeout: defaults.request_timeout,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.sidecar.data_dir
    }

    pub fn local_store_path(&self) -> PathBuf {
        self.sidecar.data_dir.join(LOCAL_STORE_FILE)
    }
}

fn env_name(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_usize(name: &str, default: usize, min: usize, max: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
        .clamp(min, max)
}

fn env_f32(name: &str, default: f32, min: f32, max: f32) -> f32 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<f32>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
        .clamp(min, max)
}
