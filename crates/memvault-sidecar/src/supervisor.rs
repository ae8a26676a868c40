use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::config::SidecarConfig;
use crate::error::SidecarError;
use crate::launcher::{HostCapabilities, Launcher, select_launcher};
use crate::probe::{HttpProbe, LivenessProbe};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ready {
    pub endpoint: String,
    /// Strategy used when this call had to start the engine.
    pub launched: Option<&'static str>,
    pub waited: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct ReadinessPolicy {
    pub poll_interval: Duration,
    pub ready_timeout: Duration,
}

impl ReadinessPolicy {
    pub fn from_config(config: &SidecarConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            ready_timeout: config.ready_timeout,
        }
    }
}

enum LaunchSource {
    Available(Arc<dyn Launcher>),
    Unavailable(String),
}

/// Makes sure the vector engine answers before anything else touches it.
/// The first outcome is final for the lifetime of the value: a failed start
/// is never retried by the same supervisor.
pub struct Supervisor {
    endpoint: String,
    probe: Arc<dyn LivenessProbe>,
    launch: LaunchSource,
    policy: ReadinessPolicy,
    outcome: OnceCell<Result<Ready, SidecarError>>,
}

impl Supervisor {
    pub fn new(
        endpoint: impl Into<String>,
        probe: Arc<dyn LivenessProbe>,
        launcher: Arc<dyn Launcher>,
        policy: ReadinessPolicy,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            probe,
            launch: LaunchSource::Available(launcher),
            policy,
            outcome: OnceCell::new(),
        }
    }

    pub fn from_config(config: &SidecarConfig) -> Result<Self, SidecarError> {
        let endpoint = config.base_url();
        let probe = Arc::new(HttpProbe::new(&endpoint, config.probe_timeout)?);
        let launch = match select_launcher(&HostCapabilities::detect(config), config) {
            Ok(launcher) => LaunchSource::Available(Arc::new(launcher)),
            Err(err) => LaunchSource::Unavailable(err.to_string()),
        };
        Ok(Self {
            endpoint,
            probe,
            launch,
            policy: ReadinessPolicy::from_config(config),
            outcome: OnceCell::new(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn ensure_running(&self) -> Result<Ready, SidecarError> {
        self.outcome.get_or_init(|| self.bring_up()).await.clone()
    }

    async fn bring_up(&self) -> Result<Ready, SidecarError> {
        if self.is_live().await {
            info!(endpoint = %self.endpoint, "vector engine already running");
            return Ok(Ready {
                endpoint: self.endpoint.clone(),
                launched: None,
                waited: Duration::ZERO,
            });
        }

        let launcher = match &self.launch {
            LaunchSource::Available(launcher) => launcher,
            LaunchSource::Unavailable(reason) => {
                return Err(SidecarError::NoLaunchStrategy(reason.clone()));
            }
        };
        let strategy = launcher.strategy();
        info!(endpoint = %self.endpoint, strategy, "starting vector engine");
        launcher.launch().await?;

        let started = Instant::now();
        loop {
            if self.is_live().await {
                let waited = started.elapsed();
                info!(
                    endpoint = %self.endpoint,
                    strategy,
                    waited_ms = waited.as_millis() as u64,
                    "vector engine ready"
                );
                return Ok(Ready {
                    endpoint: self.endpoint.clone(),
                    launched: Some(strategy),
                    waited,
                });
            }
            let waited = started.elapsed();
            if waited >= self.policy.ready_timeout {
                warn!(endpoint = %self.endpoint, strategy, "vector engine did not become ready");
                return Err(SidecarError::NotReady {
                    waited_ms: waited.as_millis() as u64,
                });
            }
            tokio::time::sleep(self.policy.poll_interval).await;
        }
    }

    async fn is_live(&self) -> bool {
        self.probe.probe().await.is_ok()
    }
}
