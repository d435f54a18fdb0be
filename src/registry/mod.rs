//! Service registry
//!
//! Owns the freshness model on top of a [`BackingStore`]:
//!
//! - Identity is the service fingerprint; one entry per fingerprint
//! - An entry is live while `now < last_update + ttl` by the registry's clock
//! - Refreshes follow "update if newer": a heartbeat is persisted only if its
//!   timestamp is strictly after the stored one, via compare-and-swap on the
//!   record version, so concurrent registry instances never regress an entry
//! - A background sweep deletes entries expired for longer than a grace period
//!
//! ## Entry lifecycle
//!
//! ```text
//! absent -> live -> live (refreshed) -> expired (still stored) -> absent (swept)
//!                 ^                          |
//!                 +------ re-register -------+
//! ```

pub mod cleanup;
pub mod clock;
pub mod entry;

pub use cleanup::{spawn_cleanup_task, SweepStats};
pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::RegistryEntry;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::store::{BackingStore, Precondition, StoreError};
use crate::types::{Result, RollcallError, Service};

/// Tag carried by every registry record in the backing store
pub const MEMBER_TAG: &str = "registered-service";

/// Compare-and-swap attempts before a refresh gives up
pub const MAX_WRITE_ATTEMPTS: u32 = 3;

/// Default time-to-live for an entry
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// Default grace period between expiry and deletion
pub const DEFAULT_CLEANUP_GRACE: Duration = Duration::from_secs(600);

/// Default period of the cleanup sweep
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(30);

/// Registry configuration
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How long an entry stays live without a heartbeat
    pub ttl: Duration,
    /// How long an expired entry is kept before the sweep deletes it
    pub cleanup_grace: Duration,
    /// How often the sweep runs
    pub cleanup_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            cleanup_grace: DEFAULT_CLEANUP_GRACE,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
        }
    }
}

impl RegistryConfig {
    /// Config with the given TTL and default sweep settings
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            ..Default::default()
        }
    }

    fn ttl_delta(&self) -> chrono::Duration {
        to_delta(self.ttl)
    }

    fn grace_delta(&self) -> chrono::Duration {
        to_delta(self.cleanup_grace)
    }
}

fn to_delta(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(365 * 100))
}

/// What a register call did to the stored entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// No entry existed; one was created
    Created,
    /// The entry's timestamp was advanced
    Refreshed,
    /// The stored timestamp was already as new or newer; nothing written
    Stale,
}

/// Registry over any backing store
pub struct Registry {
    store: Arc<dyn BackingStore>,
    clock: Arc<dyn Clock>,
    config: RegistryConfig,
}

impl Registry {
    /// Create a registry using the wall clock
    pub fn new(store: Arc<dyn BackingStore>, config: RegistryConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Create a registry with an explicit clock
    pub fn with_clock(
        store: Arc<dyn BackingStore>,
        config: RegistryConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Name of the backing store
    pub fn backend(&self) -> &'static str {
        self.store.name()
    }

    /// Register or refresh a service, stamped with the registry's clock
    pub async fn register(&self, service: &Service) -> Result<RegisterOutcome> {
        self.register_at(service, self.clock.now()).await
    }

    /// Register or refresh a service with an explicit heartbeat time
    ///
    /// Applies update-if-newer: an existing entry is only rewritten when
    /// `at` is strictly after its stored `last_update`.
    pub async fn register_at(&self, service: &Service, at: DateTime<Utc>) -> Result<RegisterOutcome> {
        let fingerprint = service.fingerprint();
        let key = fingerprint.storage_key();
        let payload = RegistryEntry::new(service.clone(), at).encode()?;

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let current = match self.store.read(&key).await? {
                Some(record) => record,
                None => match self.store.create(&key, MEMBER_TAG, payload.clone()).await {
                    Ok(_) => {
                        info!(fingerprint = %fingerprint.short(), service = %service, "Registered new service");
                        return Ok(RegisterOutcome::Created);
                    }
                    // Another writer created it first; refresh instead
                    Err(StoreError::AlreadyExists { .. }) => continue,
                    Err(e) => return Err(e.into()),
                },
            };

            match RegistryEntry::decode(&current.payload) {
                Ok(stored) if at <= stored.last_update => {
                    debug!(
                        fingerprint = %fingerprint.short(),
                        stored = %stored.last_update,
                        heartbeat = %at,
                        "Stored entry is newer, skipping refresh"
                    );
                    return Ok(RegisterOutcome::Stale);
                }
                Ok(_) => {}
                Err(e) => {
                    // A heartbeat for this fingerprint repairs the entry
                    warn!(key = %key, "Overwriting undecodable entry: {}", e);
                }
            }

            match self
                .store
                .conditional_update(&key, Precondition::Version(current.version), payload.clone())
                .await
            {
                Ok(_) => {
                    debug!(fingerprint = %fingerprint.short(), "Refreshed service");
                    return Ok(RegisterOutcome::Refreshed);
                }
                Err(StoreError::Conflict { .. }) | Err(StoreError::NotFound { .. }) => {
                    debug!(
                        fingerprint = %fingerprint.short(),
                        attempt,
                        "Concurrent write on entry, re-reading"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(RollcallError::Conflict(format!(
            "gave up refreshing {} after {} attempts",
            key, MAX_WRITE_ATTEMPTS
        )))
    }

    /// Entries that are currently live, in no particular order
    pub async fn live_entries(&self) -> Result<Vec<RegistryEntry>> {
        let now = self.clock.now();
        let ttl = self.config.ttl_delta();
        let records = self.store.list_by_tag(MEMBER_TAG).await?;

        let mut live = Vec::with_capacity(records.len());
        for record in records {
            let entry = match RegistryEntry::decode(&record.payload) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(key = %record.key, "Skipping undecodable entry: {}", e);
                    continue;
                }
            };

            if entry.is_expired(now, ttl) {
                continue;
            }
            live.push(entry);
        }

        Ok(live)
    }

    /// Services that are currently live, in no particular order
    pub async fn list_services(&self) -> Result<Vec<Service>> {
        Ok(self
            .live_entries()
            .await?
            .into_iter()
            .map(|entry| entry.service)
            .collect())
    }
}
