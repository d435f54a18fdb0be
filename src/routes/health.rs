//! Health and version endpoints
//!
//! - /health, /healthz - liveness; 200 while the process is up, with the
//!   registry's view attached for operators
//! - /version - build information

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use super::json_response;
use crate::server::AppState;

/// Liveness body
#[derive(Serialize)]
pub struct HealthResponse {
    /// Always true when this responds
    pub healthy: bool,
    /// "online", or "degraded" if the store could not be listed
    pub status: &'static str,
    /// Registry instance identifier
    pub node_id: String,
    /// Backing store in use
    pub backend: &'static str,
    /// Entry time-to-live in seconds
    pub ttl_secs: u64,
    /// Live entries, absent when the store is unreachable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_services: Option<usize>,
    /// Seconds since the server started
    pub uptime: u64,
    /// Package version
    pub version: &'static str,
    /// Current timestamp
    pub timestamp: String,
    /// Store error, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Handle liveness probe (/health, /healthz)
pub async fn health_check(state: Arc<AppState>) -> Response<Full<Bytes>> {
    let (live_services, error) = match state.registry.list_services().await {
        Ok(services) => (Some(services.len()), None),
        Err(e) => (None, Some(e.to_string())),
    };

    let response = HealthResponse {
        healthy: true,
        status: if error.is_none() { "online" } else { "degraded" },
        node_id: state.node_id.to_string(),
        backend: state.registry.backend(),
        ttl_secs: state.registry.config().ttl.as_secs(),
        live_services,
        uptime: state.started_at.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now().to_rfc3339(),
        error,
    };

    json_response(StatusCode::OK, &response)
}

/// Build information
#[derive(Serialize)]
pub struct VersionResponse {
    pub version: &'static str,
    pub commit: &'static str,
    pub commit_full: &'static str,
    pub build_time: &'static str,
    pub service: &'static str,
}

/// Handle version endpoint (/version)
pub fn version_info() -> Response<Full<Bytes>> {
    let response = VersionResponse {
        version: env!("CARGO_PKG_VERSION"),
        commit: option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
        commit_full: option_env!("GIT_COMMIT_FULL").unwrap_or("unknown"),
        build_time: option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
        service: "rollcall",
    };

    json_response(StatusCode::OK, &response)
}
