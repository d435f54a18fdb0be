//! End-to-end flow: client heartbeats over HTTP, registry expiry, dispatch
//!
//! Everything binds to 127.0.0.1:0 and runs with sub-second intervals.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use rollcall::client::{HeartbeatManager, HttpAnnouncer};
use rollcall::dispatcher::{spawn_dispatcher, Dispatcher, DispatcherConfig};
use rollcall::registry::{Registry, RegistryConfig};
use rollcall::server::{serve, AppState};
use rollcall::store::MemoryStore;
use rollcall::Service;

const TTL: Duration = Duration::from_millis(600);
const HEARTBEAT: Duration = Duration::from_millis(100);

struct Harness {
    base: String,
    registry: Arc<Registry>,
    shutdown: CancellationToken,
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn start_registry() -> Harness {
    let config = RegistryConfig {
        ttl: TTL,
        cleanup_grace: Duration::from_millis(200),
        cleanup_interval: Duration::from_millis(100),
    };
    let registry = Arc::new(Registry::new(Arc::new(MemoryStore::new()), config));
    let state = Arc::new(AppState::new(Uuid::new_v4(), Arc::clone(&registry)));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let shutdown = CancellationToken::new();
    tokio::spawn(serve(listener, state, shutdown.clone()));

    Harness {
        base,
        registry,
        shutdown,
    }
}

/// Callback receiver forwarding every body it gets
async fn start_receiver() -> (u16, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                    let tx = tx.clone();
                    async move {
                        let body = req.into_body().collect().await.unwrap().to_bytes();
                        let _ = tx.send(String::from_utf8_lossy(&body).into_owned());
                        Ok::<_, Infallible>(Response::new(Full::new(Bytes::new())))
                    }
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    (port, rx)
}

async fn live_services(base: &str) -> Vec<Service> {
    reqwest::get(format!("{}/services", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_heartbeats_keep_service_live_until_deregistered() {
    let harness = start_registry().await;
    let announcer = HttpAnnouncer::new(format!("{}/register", harness.base), HEARTBEAT).unwrap();
    let manager = HeartbeatManager::new(Arc::new(announcer), HEARTBEAT);
    let service = Service::new("127.0.0.1", 9, "/message");

    manager.register(service.clone()).await;

    // Several TTLs pass; heartbeats keep the entry live throughout
    for _ in 0..4 {
        tokio::time::sleep(TTL / 2).await;
        assert_eq!(live_services(&harness.base).await, vec![service.clone()]);
    }

    manager.deregister(&service).await;
    tokio::time::sleep(TTL + Duration::from_millis(100)).await;
    assert!(live_services(&harness.base).await.is_empty());
}

#[tokio::test]
async fn test_expired_entry_is_swept() {
    let harness = start_registry().await;
    let cleanup = rollcall::registry::spawn_cleanup_task(
        Arc::clone(&harness.registry),
        harness.shutdown.clone(),
    );

    harness
        .registry
        .register(&Service::new("127.0.0.1", 9, "/message"))
        .await
        .unwrap();

    // ttl + grace + a couple of sweep periods
    tokio::time::sleep(Duration::from_millis(1200)).await;
    let stats = harness.registry.sweep().await.unwrap();
    assert_eq!(stats.scanned, 0);

    harness.shutdown.cancel();
    cleanup.await.unwrap();
}

#[tokio::test]
async fn test_dispatcher_reaches_heartbeating_client() {
    let harness = start_registry().await;
    let (port, mut received) = start_receiver().await;

    let announcer = HttpAnnouncer::new(format!("{}/register", harness.base), HEARTBEAT).unwrap();
    let manager = HeartbeatManager::new(Arc::new(announcer), HEARTBEAT);
    manager
        .register(Service::new("127.0.0.1", port, "/message"))
        .await;

    let dispatcher = Dispatcher::new(
        Arc::clone(&harness.registry),
        DispatcherConfig {
            interval: Duration::from_millis(100),
            timeout: Duration::from_secs(1),
            max_in_flight: 4,
        },
    )
    .unwrap();
    spawn_dispatcher(dispatcher, harness.shutdown.clone());

    let message = tokio::time::timeout(Duration::from_secs(3), received.recv())
        .await
        .expect("no message dispatched")
        .unwrap();
    assert!(message.starts_with("message in timestamp "));

    manager.shutdown().await;
}
