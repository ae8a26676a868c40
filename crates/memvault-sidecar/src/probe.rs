use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::SidecarError;

#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn probe(&self) -> Result<(), SidecarError>;
}

/// GET on the engine heartbeat; any 2xx counts as live.
#[derive(Clone)]
pub struct HttpProbe {
    url: String,
    client: Client,
}

impl HttpProbe {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SidecarError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: format!("{}/api/v1/heartbeat", base_url.trim_end_matches('/')),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl LivenessProbe for HttpProbe {
    async fn probe(&self) -> Result<(), SidecarError> {
        let res = self.client.get(&self.url).send().await?;
        if res.status().is_success() {
            Ok(())
        } else {
            Err(SidecarError::Probe(format!("heartbeat status {}", res.status())))
        }
    }
}
