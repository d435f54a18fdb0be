//! Delivery of a single heartbeat to the registry

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

use crate::types::{Result, RollcallError, Service};

/// Sends one heartbeat announcing a service
#[async_trait]
pub trait Announcer: Send + Sync {
    /// Announce `service` once; failures are reported, never retried here
    async fn announce(&self, service: &Service) -> Result<()>;
}

/// Announces by POSTing the service as a form to the registry endpoint
#[derive(Clone)]
pub struct HttpAnnouncer {
    client: Client,
    registry_url: String,
}

impl HttpAnnouncer {
    /// Create an announcer whose request timeout matches the heartbeat interval
    ///
    /// A request slower than one interval would overlap the next heartbeat.
    pub fn new(registry_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RollcallError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            registry_url: registry_url.into(),
        })
    }

    /// Registry endpoint heartbeats are sent to
    pub fn registry_url(&self) -> &str {
        &self.registry_url
    }
}

#[async_trait]
impl Announcer for HttpAnnouncer {
    async fn announce(&self, service: &Service) -> Result<()> {
        let response = self
            .client
            .post(&self.registry_url)
            .form(&service.form_fields())
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::OK {
            debug!(service = %service, "Heartbeat accepted");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        warn!(service = %service, status = %status, "Registry rejected heartbeat: {}", body);
        Err(RollcallError::Http(format!(
            "registry returned {}: {}",
            status, body
        )))
    }
}
