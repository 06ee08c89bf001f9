//! Stale-partition reaper
//!
//! Reclaims every owner whose last successful pass is older than the
//! retention threshold, or that has cached data but no sync metadata at all.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::Result;
use crate::progress::ProgressBroadcaster;
use crate::storage::StorageManager;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Owners whose partitions were deleted, sorted
    pub reclaimed: Vec<String>,
    pub items_removed: u64,
    /// Owners looked at (excluded and syncing owners not counted)
    pub inspected: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.reclaimed.is_empty()
    }
}

#[derive(Clone)]
pub struct StalePartitionReaper {
    storage: StorageManager,
    progress: Arc<ProgressBroadcaster>,
    /// Retention threshold (milliseconds)
    retention_ms: i64,
}

impl StalePartitionReaper {
    pub fn new(storage: StorageManager, progress: Arc<ProgressBroadcaster>, retention_ms: i64) -> Self {
        Self {
            storage,
            progress,
            retention_ms,
        }
    }

    pub async fn sweep(&self, exclude_owner: Option<&str>) -> Result<SweepReport> {
        self.sweep_at(exclude_owner, chrono::Utc::now().timestamp_millis())
            .await
    }

    /// Sweep against an explicit clock (UTC millis).
    pub async fn sweep_at(&self, exclude_owner: Option<&str>, now: i64) -> Result<SweepReport> {
        let mut owners: BTreeSet<String> = BTreeSet::new();
        owners.extend(self.storage.items().owners().await?);
        owners.extend(self.storage.metadata().owners().await?);
        owners.extend(self.storage.aggregates().owners().await?);

        let mut report = SweepReport::default();
        for owner in owners {
            if exclude_owner == Some(owner.as_str()) || self.progress.is_syncing(&owner) {
                continue;
            }
            report.inspected += 1;

            let stale = match self.storage.metadata().get(&owner).await? {
                None => {
                    debug!(owner = %owner, "orphan partition without sync metadata");
                    true
                }
                Some(metadata) => now - metadata.last_synced_at > self.retention_ms,
            };
            if !stale {
                continue;
            }

            let removed = self.storage.purge_owner(&owner).await?;
            info!(owner = %owner, items_removed = removed, "stale partition reclaimed");
            report.items_removed += removed;
            report.reclaimed.push(owner);
        }

        if !report.is_empty() {
            info!(
                reclaimed = report.reclaimed.len(),
                items_removed = report.items_removed,
                "stale partition sweep finished"
            );
        }
        Ok(report)
    }
}
