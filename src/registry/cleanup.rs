//! Background deletion of long-expired entries

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Registry, RegistryEntry, MEMBER_TAG};
use crate::store::Precondition;
use crate::types::Result;

/// Result of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Records inspected
    pub scanned: usize,
    /// Records deleted
    pub deleted: usize,
    /// Reclaimable records refreshed by someone else mid-sweep
    pub raced: usize,
    /// Records that could not be decoded
    pub skipped: usize,
}

impl Registry {
    /// Delete every entry that has been expired for longer than the grace period
    ///
    /// Deletes are conditional on the version observed while listing, so an
    /// entry refreshed between the list and the delete survives.
    pub async fn sweep(&self) -> Result<SweepStats> {
        let now = self.clock.now();
        let ttl = self.config.ttl_delta();
        let grace = self.config.grace_delta();
        let records = self.store.list_by_tag(MEMBER_TAG).await?;

        let mut stats = SweepStats {
            scanned: records.len(),
            ..Default::default()
        };

        for record in records {
            let entry = match RegistryEntry::decode(&record.payload) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(key = %record.key, "Sweep skipping undecodable entry: {}", e);
                    stats.skipped += 1;
                    continue;
                }
            };

            if !entry.is_reclaimable(now, ttl, grace) {
                continue;
            }

            if self
                .store
                .delete(&record.key, Precondition::Version(record.version))
                .await?
            {
                debug!(key = %record.key, service = %entry.service, "Swept expired entry");
                stats.deleted += 1;
            } else {
                stats.raced += 1;
            }
        }

        Ok(stats)
    }
}

/// Run [`Registry::sweep`] every `cleanup_interval` until `shutdown` fires
pub fn spawn_cleanup_task(registry: Arc<Registry>, shutdown: CancellationToken) -> JoinHandle<()> {
    let period = registry.config().cleanup_interval;
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // First tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match registry.sweep().await {
                Ok(stats) if stats.deleted > 0 => {
                    info!(
                        "Registry cleanup: removed {} of {} entries",
                        stats.deleted, stats.scanned
                    );
                }
                Ok(stats) => {
                    debug!("Registry cleanup: {} entries, none reclaimable", stats.scanned);
                }
                Err(e) => warn!("Registry cleanup failed: {}", e),
            }
        }
        debug!("Registry cleanup task stopped");
    });
    info!("Registry cleanup task started (every {:?})", period);
    handle
}
