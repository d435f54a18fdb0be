//! Live service listing (GET /services)

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use std::sync::Arc;
use tracing::warn;

use super::{error_response, json_response};
use crate::server::AppState;

/// Handle GET /services
pub async fn list_services(state: Arc<AppState>) -> Response<Full<Bytes>> {
    match state.registry.list_services().await {
        Ok(mut services) => {
            services.sort_by(|a, b| {
                (&a.address, a.port, &a.endpoint).cmp(&(&b.address, b.port, &b.endpoint))
            });
            json_response(StatusCode::OK, &services)
        }
        Err(e) => {
            warn!("Listing services failed: {}", e);
            error_response(e)
        }
    }
}
