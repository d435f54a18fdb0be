//! Rollcall client
//!
//! Serves a callback endpoint, announces it to the registry, and logs every
//! message the dispatcher delivers. Ctrl-C stops the heartbeat and exits.

use bytes::Bytes;
use clap::Parser;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use rollcall::{
    client::{HeartbeatManager, HttpAnnouncer},
    config::ClientArgs,
    logging, Service,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let args = ClientArgs::parse();
    logging::init_tracing(&args.log_level, args.log_format);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let listener = TcpListener::bind(args.listen).await?;
    let service = Service::new(
        args.advertise_address.clone(),
        args.advertised_port(),
        args.endpoint.clone(),
    );
    info!("Serving {} on {}", args.endpoint, args.listen);

    let endpoint: Arc<str> = Arc::from(args.endpoint.as_str());
    let server = tokio::spawn(async move {
        loop {
            let (stream, addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Accept error: {}", e);
                    continue;
                }
            };
            let endpoint = Arc::clone(&endpoint);
            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let endpoint = Arc::clone(&endpoint);
                    async move { handle_callback(&endpoint, req).await }
                });
                if let Err(e) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                {
                    debug!("Connection error from {}: {}", addr, e);
                }
            });
        }
    });

    let announcer = HttpAnnouncer::new(args.registry_url.clone(), args.heartbeat_interval())?;
    info!("Announcing {} to {}", service, announcer.registry_url());
    let manager = HeartbeatManager::new(Arc::new(announcer), args.heartbeat_interval());
    manager.register(service.clone()).await;

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl-C, deregistering");
    manager.deregister(&service).await;
    server.abort();

    Ok(())
}

async fn handle_callback(
    endpoint: &str,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    if req.uri().path() != endpoint {
        return Ok(status_only(StatusCode::NOT_FOUND));
    }

    match req.collect().await {
        Ok(collected) => {
            let body = collected.to_bytes();
            info!("Received: {}", String::from_utf8_lossy(&body));
            Ok(status_only(StatusCode::OK))
        }
        Err(e) => {
            warn!("Failed to read message body: {}", e);
            Ok(status_only(StatusCode::BAD_REQUEST))
        }
    }
}

fn status_only(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}
