//! Fan-out dispatcher
//!
//! On every tick, reads the live services from the registry and POSTs a
//! message to each one's callback URL. Deliveries run concurrently and are
//! independent: a slow or failing receiver only affects its own delivery.

use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::Registry;
use crate::types::{Result, RollcallError, Service};

/// Content type of dispatched messages
pub const MESSAGE_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Produces the body for one tick's deliveries
pub type MessageSource = Arc<dyn Fn() -> String + Send + Sync>;

/// Default message: the dispatch time
pub fn timestamp_message() -> String {
    format!("message in timestamp {}", chrono::Utc::now().to_rfc3339())
}

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Time between ticks
    pub interval: Duration,
    /// Per-delivery request timeout
    pub timeout: Duration,
    /// Deliveries allowed in flight at once across ticks
    pub max_in_flight: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(5),
            max_in_flight: 256,
        }
    }
}

/// How a single delivery ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Receiver answered 2xx
    Delivered(Service),
    /// Receiver answered with a non-success status
    Rejected(Service, u16),
    /// Connection, timeout or other transport error
    Failed(Service, String),
}

impl DeliveryOutcome {
    /// The service this delivery targeted
    pub fn service(&self) -> &Service {
        match self {
            Self::Delivered(s) | Self::Rejected(s, _) | Self::Failed(s, _) => s,
        }
    }

    /// Whether the receiver accepted the message
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered(_))
    }
}

/// Periodic fan-out to all live services
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
    client: Client,
    permits: Arc<Semaphore>,
    message: MessageSource,
    config: DispatcherConfig,
}

impl Dispatcher {
    /// Create a dispatcher sending [`timestamp_message`] bodies
    pub fn new(registry: Arc<Registry>, config: DispatcherConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RollcallError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            registry,
            client,
            permits: Arc::new(Semaphore::new(
                config.max_in_flight.clamp(1, Semaphore::MAX_PERMITS),
            )),
            message: Arc::new(timestamp_message),
            config,
        })
    }

    /// Replace the message source
    pub fn with_message_source(mut self, message: MessageSource) -> Self {
        self.message = message;
        self
    }

    /// Get the configuration
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Start one delivery per service and return their handles immediately
    pub fn fan_out(&self, services: Vec<Service>, body: String) -> Vec<JoinHandle<DeliveryOutcome>> {
        services
            .into_iter()
            .map(|service| {
                let client = self.client.clone();
                let permits = Arc::clone(&self.permits);
                let body = body.clone();
                tokio::spawn(async move {
                    // Semaphore is never closed
                    let _permit = permits.acquire_owned().await.ok();
                    deliver(&client, service, body).await
                })
            })
            .collect()
    }

    /// Run a single tick: list live services and fan out one message
    ///
    /// Returns the number of deliveries started.
    pub async fn tick(&self) -> Result<usize> {
        let services = self.registry.list_services().await?;
        if services.is_empty() {
            debug!("No live services to dispatch to");
            return Ok(0);
        }

        let body = (self.message)();
        let handles = self.fan_out(services, body);
        let started = handles.len();

        // Detach a reaper so the tick never waits on receivers
        tokio::spawn(async move {
            let mut delivered = 0;
            let total = handles.len();
            for handle in handles {
                if let Ok(outcome) = handle.await {
                    if outcome.is_delivered() {
                        delivered += 1;
                    }
                }
            }
            debug!("Dispatch round: {}/{} delivered", delivered, total);
        });

        Ok(started)
    }
}

async fn deliver(client: &Client, service: Service, body: String) -> DeliveryOutcome {
    let url = service.callback_url();
    match client
        .post(&url)
        .header(CONTENT_TYPE, MESSAGE_CONTENT_TYPE)
        .body(body)
        .send()
        .await
    {
        Ok(response) if response.status().is_success() => {
            debug!(service = %service, "Message delivered");
            DeliveryOutcome::Delivered(service)
        }
        Ok(response) => {
            let status = response.status().as_u16();
            warn!(service = %service, status, "Receiver rejected message");
            DeliveryOutcome::Rejected(service, status)
        }
        Err(e) => {
            warn!(service = %service, "Delivery failed: {}", e);
            DeliveryOutcome::Failed(service, e.to_string())
        }
    }
}

/// Tick the dispatcher every `interval` until `shutdown` fires
///
/// A tick whose registry read fails is logged and skipped.
pub fn spawn_dispatcher(dispatcher: Dispatcher, shutdown: CancellationToken) -> JoinHandle<()> {
    let period = dispatcher.config().interval;
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = dispatcher.tick().await {
                warn!("Dispatch tick skipped, registry unavailable: {}", e);
            }
        }
        debug!("Dispatcher stopped");
    });
    info!("Dispatcher started (every {:?})", period);
    handle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ManualClock, RegistryConfig};
    use crate::store::MemoryStore;
    use bytes::Bytes;
    use http_body_util::{BodyExt, Full};
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::convert::Infallible;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    /// Received (content type, body)
    type Received = (String, String);

    /// Local receiver answering every request with `status`
    async fn spawn_receiver(status: StatusCode) -> (u16, mpsc::UnboundedReceiver<Received>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let tx = tx.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                        let tx = tx.clone();
                        async move {
                            let content_type = req
                                .headers()
                                .get(hyper::header::CONTENT_TYPE)
                                .and_then(|v| v.to_str().ok())
                                .unwrap_or_default()
                                .to_string();
                            let body = req.into_body().collect().await.unwrap().to_bytes();
                            let _ = tx.send((content_type, String::from_utf8_lossy(&body).into_owned()));
                            Ok::<_, Infallible>(
                                Response::builder()
                                    .status(status)
                                    .body(Full::new(Bytes::from_static(b"ok")))
                                    .unwrap(),
                            )
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

    /// A port with nothing listening on it
    async fn dead_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    fn dispatcher(registry: Arc<Registry>) -> Dispatcher {
        Dispatcher::new(
            registry,
            DispatcherConfig {
                interval: Duration::from_millis(50),
                timeout: Duration::from_secs(2),
                max_in_flight: 8,
            },
        )
        .unwrap()
    }

    fn registry() -> Arc<Registry> {
        Arc::new(Registry::new(
            Arc::new(MemoryStore::new()),
            RegistryConfig::default(),
        ))
    }

    #[test]
    fn test_timestamp_message_format() {
        assert!(timestamp_message().starts_with("message in timestamp "));
    }

    #[tokio::test]
    async fn test_fan_out_isolates_failures() {
        let (ok_a, mut rx_a) = spawn_receiver(StatusCode::OK).await;
        let (ok_b, mut rx_b) = spawn_receiver(StatusCode::OK).await;
        let dead = dead_port().await;

        let services = vec![
            Service::new("127.0.0.1", ok_a, "/message"),
            Service::new("127.0.0.1", dead, "/message"),
            Service::new("127.0.0.1", ok_b, "/message"),
        ];

        let handles = dispatcher(registry()).fan_out(services, "hello".to_string());
        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }

        let delivered: Vec<u16> = outcomes
            .iter()
            .filter(|o| o.is_delivered())
            .map(|o| o.service().port)
            .collect();
        assert_eq!(delivered.len(), 2);
        assert!(delivered.contains(&ok_a) && delivered.contains(&ok_b));
        assert!(outcomes
            .iter()
            .any(|o| matches!(o, DeliveryOutcome::Failed(s, _) if s.port == dead)));

        let (content_type, body) = rx_a.recv().await.unwrap();
        assert_eq!(content_type, MESSAGE_CONTENT_TYPE);
        assert_eq!(body, "hello");
        assert_eq!(rx_b.recv().await.unwrap().1, "hello");
    }

    #[tokio::test]
    async fn test_non_success_status_is_rejected() {
        let (port, _rx) = spawn_receiver(StatusCode::INTERNAL_SERVER_ERROR).await;
        let handles = dispatcher(registry())
            .fan_out(vec![Service::new("127.0.0.1", port, "/message")], "x".into());

        let outcome = handles.into_iter().next().unwrap().await.unwrap();
        assert!(matches!(outcome, DeliveryOutcome::Rejected(_, 500)));
    }

    #[tokio::test]
    async fn test_tick_reaches_live_services_only() {
        let clock = Arc::new(ManualClock::starting_now());
        let registry = Arc::new(Registry::with_clock(
            Arc::new(MemoryStore::new()),
            RegistryConfig::with_ttl(Duration::from_secs(3)),
            clock.clone(),
        ));
        let (expired_port, mut expired_rx) = spawn_receiver(StatusCode::OK).await;
        let (live_port, mut live_rx) = spawn_receiver(StatusCode::OK).await;

        registry
            .register(&Service::new("127.0.0.1", expired_port, "/message"))
            .await
            .unwrap();
        clock.advance(chrono::Duration::seconds(4));
        registry
            .register(&Service::new("127.0.0.1", live_port, "/message"))
            .await
            .unwrap();

        let dispatcher = dispatcher(Arc::clone(&registry))
            .with_message_source(Arc::new(|| "fixed".to_string()));
        assert_eq!(dispatcher.tick().await.unwrap(), 1);

        let (_, body) = tokio::time::timeout(Duration::from_secs(2), live_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(body, "fixed");

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(expired_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_tick_with_empty_registry() {
        assert_eq!(dispatcher(registry()).tick().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_spawned_dispatcher_ticks_until_cancelled() {
        let registry = registry();
        let (port, mut rx) = spawn_receiver(StatusCode::OK).await;
        registry
            .register(&Service::new("127.0.0.1", port, "/message"))
            .await
            .unwrap();

        let shutdown = CancellationToken::new();
        let handle = spawn_dispatcher(dispatcher(registry), shutdown.clone());

        for _ in 0..2 {
            let received = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
            assert!(received.unwrap().is_some());
        }

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
