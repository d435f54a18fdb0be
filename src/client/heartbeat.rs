//! Heartbeat manager
//!
//! Keeps one periodic heartbeat task per registered service. A service's
//! identity is its fingerprint, so registering the same descriptor twice
//! leaves a single task running.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::announcer::Announcer;
use crate::types::{Fingerprint, Service};

/// Default time between heartbeats
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(3);

/// A running heartbeat task
struct HeartbeatHandle {
    service: Service,
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// Runs heartbeat tasks for the services this process announces
pub struct HeartbeatManager {
    announcer: Arc<dyn Announcer>,
    interval: Duration,
    tasks: Mutex<HashMap<Fingerprint, HeartbeatHandle>>,
}

impl HeartbeatManager {
    /// Create a manager sending one heartbeat per `interval`
    pub fn new(announcer: Arc<dyn Announcer>, interval: Duration) -> Self {
        Self {
            announcer,
            interval,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Heartbeat interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start heartbeating for `service`
    ///
    /// The first heartbeat goes out immediately. Returns `false` if the
    /// service was already registered, in which case nothing changes.
    pub async fn register(&self, service: Service) -> bool {
        let fingerprint = service.fingerprint();
        let mut tasks = self.tasks.lock().await;
        if tasks.contains_key(&fingerprint) {
            debug!(service = %service, "Already heartbeating");
            return false;
        }

        let token = CancellationToken::new();
        let task = tokio::spawn(heartbeat_loop(
            Arc::clone(&self.announcer),
            service.clone(),
            self.interval,
            token.clone(),
        ));

        info!(
            service = %service,
            fingerprint = %fingerprint.short(),
            "Started heartbeat (every {:?})", self.interval
        );
        tasks.insert(
            fingerprint,
            HeartbeatHandle {
                service,
                token,
                task,
            },
        );
        true
    }

    /// Stop heartbeating for `service`
    ///
    /// Waits for the task to exit, so no heartbeat for this service is sent
    /// after this returns. Returns `false` if it was not registered.
    pub async fn deregister(&self, service: &Service) -> bool {
        let handle = self.tasks.lock().await.remove(&service.fingerprint());
        match handle {
            Some(handle) => {
                stop(handle).await;
                true
            }
            None => false,
        }
    }

    /// Whether `service` currently has a heartbeat task
    pub async fn is_registered(&self, service: &Service) -> bool {
        self.tasks.lock().await.contains_key(&service.fingerprint())
    }

    /// Services currently heartbeating
    pub async fn services(&self) -> Vec<Service> {
        self.tasks
            .lock()
            .await
            .values()
            .map(|h| h.service.clone())
            .collect()
    }

    /// Number of running heartbeat tasks
    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Whether no heartbeat tasks are running
    pub async fn is_empty(&self) -> bool {
        self.tasks.lock().await.is_empty()
    }

    /// Stop every heartbeat task
    pub async fn shutdown(&self) {
        let handles: Vec<HeartbeatHandle> = self.tasks.lock().await.drain().map(|(_, h)| h).collect();
        for handle in handles {
            stop(handle).await;
        }
    }
}

impl Drop for HeartbeatManager {
    /// Tasks are owned by the manager and must not outlive it
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut();
        if !tasks.is_empty() {
            debug!("Heartbeat manager dropped with {} running tasks", tasks.len());
        }
        for (_, handle) in tasks.drain() {
            handle.token.cancel();
            handle.task.abort();
        }
    }
}

async fn stop(handle: HeartbeatHandle) {
    handle.token.cancel();
    if let Err(e) = handle.task.await {
        warn!(service = %handle.service, "Heartbeat task ended abnormally: {}", e);
    }
    info!(service = %handle.service, "Stopped heartbeat");
}

async fn heartbeat_loop(
    announcer: Arc<dyn Announcer>,
    service: Service,
    period: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // Cancellation may land while we were waiting on the tick
        if token.is_cancelled() {
            break;
        }

        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            result = announcer.announce(&service) => {
                if let Err(e) = result {
                    warn!(service = %service, "Heartbeat failed: {}", e);
                }
            }
        }
    }
}
