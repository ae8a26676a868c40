use std::sync::Arc;

use thiserror::Error;

/// Cloneable so a terminal startup failure can be handed to every caller.
#[derive(Debug, Clone, Error)]
pub enum SidecarError {
    #[error("liveness probe failed: {0}")]
    Probe(String),

    #[error("http error: {0}")]
    Http(Arc<reqwest::Error>),

    #[error("failed to launch vector engine via {strategy}: {source}")]
    Spawn {
        strategy: &'static str,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("container runtime failed: status={status}, stderr={stderr}")]
    Container { status: i32, stderr: String },

    #[error("no launch strategy available: {0}")]
    NoLaunchStrategy(String),

    #[error("vector engine did not become ready in time (waited {waited_ms} ms)")]
    NotReady { waited_ms: u64 },
}

impl From<reqwest::Error> for SidecarError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(Arc::new(err))
    }
}

impl SidecarError {
    pub(crate) fn spawn(strategy: &'static str, source: std::io::Error) -> Self {
        Self::Spawn {
            strategy,
            source: Arc::new(source),
        }
    }
}
