//! Sync engine
//!
//! One pass for an owner:
//! 1. single-flight guard (a second request while a pass runs is a no-op)
//! 2. resume point from the cache, stepped back by the overlap window
//! 3. optional total estimate through the count endpoint
//! 4. worker pool fetches and commits pages in order
//! 5. rows of the re-fetched window the pass did not rewrite are dropped
//! 6. sync metadata update, aggregate invalidation, stale-partition sweep

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::pool::{PassContext, PoolSettings, SyncWorkerPool};
use super::reaper::{StalePartitionReaper, SweepReport};
use super::resume::ResumePointResolver;
use crate::config::SyncConfig;
use crate::error::{FeedSyncError, Result};
use crate::model::{CachedItem, CountQuery, ItemId, ResumePoint, SyncMetadata, FROM_BEGINNING};
use crate::progress::{ProgressBroadcaster, SyncEvent, SyncLease};
use crate::remote::RemoteSource;
use crate::scheduler::{EndpointClass, FetchScheduler, SchedulerStats};
use crate::storage::{kv, StorageManager};

/// Summary of one successful pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub pass_id: String,
    pub owner: String,
    pub resume: ResumePoint,
    /// Count endpoint answer, 0 when unknown or disabled
    pub total_estimate: u64,
    pub pages_committed: u64,
    pub items_committed: u64,
    pub last_sequence: u64,
    pub last_item_id: ItemId,
    /// Cached items of the owner after the pass
    pub item_count: u64,
    /// Window rows dropped because the remote no longer returned them
    pub reconciled: u64,
    pub reaped: Option<SweepReport>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed(SyncReport),
    /// Another pass held the engine; nothing was done.
    AlreadyRunning,
}

impl SyncOutcome {
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            SyncOutcome::Completed(report) => Some(report),
            SyncOutcome::AlreadyRunning => None,
        }
    }
}

pub struct SyncEngine {
    config: SyncConfig,
    storage: StorageManager,
    remote: Arc<dyn RemoteSource>,
    scheduler: Arc<FetchScheduler>,
    progress: Arc<ProgressBroadcaster>,
    resolver: ResumePointResolver,
    pool: SyncWorkerPool,
    reaper: StalePartitionReaper,
    /// Stamp of the latest pass, kept strictly increasing
    last_pass_stamp: AtomicI64,
}

impl SyncEngine {
    pub fn new(config: SyncConfig, storage: StorageManager, remote: Arc<dyn RemoteSource>) -> Result<Self> {
        config.validate()?;

        let scheduler = Arc::new(FetchScheduler::new(config.scheduler.clone()));
        let progress = Arc::new(ProgressBroadcaster::new(config.event_capacity));
        let resolver = ResumePointResolver::new(storage.items(), config.overlap_window_ms());
        let pool = SyncWorkerPool::new(
            remote.clone(),
            scheduler.clone(),
            storage.items(),
            progress.clone(),
            PoolSettings {
                page_size: config.page_size,
                concurrency: config.concurrency,
                fetch_timeout: config.fetch_timeout(),
                retry: config.retry.clone(),
            },
        );
        let reaper = StalePartitionReaper::new(storage.clone(), progress.clone(), config.retention_ms());

        info!(
            version = %crate::version::banner(),
            page_size = config.page_size,
            concurrency = config.concurrency,
            overlap_window_days = config.overlap_window_days,
            "sync engine created"
        );

        Ok(Self {
            config,
            storage,
            remote,
            scheduler,
            progress,
            resolver,
            pool,
            reaper,
            last_pass_stamp: AtomicI64::new(0),
        })
    }

    /// Open the on-disk cache under `config.data_dir` and build an engine on it.
    pub async fn open(config: SyncConfig, remote: Arc<dyn RemoteSource>) -> Result<Self> {
        config.validate()?;
        let storage = StorageManager::open(&config.data_dir).await?;
        Self::new(config, storage, remote)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    pub fn progress(&self) -> Arc<ProgressBroadcaster> {
        self.progress.clone()
    }

    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// Bring the cache of `owner` up to date with the remote.
    pub async fn sync(&self, owner: &str) -> Result<SyncOutcome> {
        kv::owner_prefix(owner)?;
        let Some(lease) = self.progress.try_begin(owner) else {
            return Ok(self.already_running(owner));
        };
        self.execute(lease, owner).await
    }

    /// Drop everything cached for `owner`, then run a full sync.
    pub async fn full_reset(&self, owner: &str) -> Result<SyncOutcome> {
        kv::owner_prefix(owner)?;
        let Some(lease) = self.progress.try_begin(owner) else {
            return Ok(self.already_running(owner));
        };
        match self.storage.purge_owner(owner).await {
            Ok(removed) => info!(owner = %owner, items_removed = removed, "cache reset before full sync"),
            Err(e) => {
                error!(owner = %owner, "cache reset failed: {}", e);
                lease.fail(&e.to_string());
                return Err(e);
            }
        }
        self.execute(lease, owner).await
    }

    /// True when `owner` was never synced or its last pass is older than the
    /// refresh interval.
    pub async fn needs_sync(&self, owner: &str) -> Result<bool> {
        self.needs_sync_at(owner, chrono::Utc::now().timestamp_millis())
            .await
    }

    pub async fn needs_sync_at(&self, owner: &str, now: i64) -> Result<bool> {
        Ok(match self.storage.metadata().get(owner).await? {
            None => true,
            Some(metadata) => {
                !metadata.completed || now - metadata.last_synced_at > self.config.refresh_interval_ms()
            }
        })
    }

    /// Cached items of `owner` in id order, which is sequence order.
    pub async fn items(&self, owner: &str) -> Result<Vec<CachedItem>> {
        self.storage.items().range(owner, 1, ItemId::MAX).await
    }

    pub async fn metadata(&self, owner: &str) -> Result<Option<SyncMetadata>> {
        self.storage.metadata().get(owner).await
    }

    /// Manual sweep over every owner not currently syncing.
    pub async fn sweep_stale(&self) -> Result<SweepReport> {
        let report = self.reaper.sweep(None).await?;
        self.announce_reaped(&report);
        Ok(report)
    }

    fn already_running(&self, owner: &str) -> SyncOutcome {
        info!(
            owner = %owner,
            active = ?self.progress.active_owners(),
            "sync already running, request ignored"
        );
        SyncOutcome::AlreadyRunning
    }

    async fn execute(&self, lease: SyncLease, owner: &str) -> Result<SyncOutcome> {
        let pass_id = Uuid::new_v4().to_string();
        let started_at = self.next_pass_stamp();
        let clock = Instant::now();

        match self.run_pass(owner, &pass_id, started_at).await {
            Ok(mut report) => {
                report.duration_ms = clock.elapsed().as_millis() as u64;
                lease.complete();
                info!(
                    owner = %owner,
                    pass_id = %pass_id,
                    items = report.items_committed,
                    last_sequence = report.last_sequence,
                    reconciled = report.reconciled,
                    duration_ms = report.duration_ms,
                    "sync pass completed"
                );
                self.progress.emit(SyncEvent::Completed {
                    owner: owner.to_string(),
                    pass_id,
                    items_committed: report.items_committed,
                    last_sequence: report.last_sequence,
                });
                Ok(SyncOutcome::Completed(report))
            }
            Err(e) => {
                error!(owner = %owner, pass_id = %pass_id, kind = %e.kind(), "sync pass failed: {}", e);
                lease.fail(&e.to_string());
                self.progress.emit(SyncEvent::Failed {
                    owner: owner.to_string(),
                    pass_id,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run_pass(&self, owner: &str, pass_id: &str, started_at: i64) -> Result<SyncReport> {
        let metadata = self.storage.metadata();
        if metadata.get(owner).await?.is_none() {
            metadata.put(&SyncMetadata::pending(owner, started_at)).await?;
            debug!(owner = %owner, "first pass, pending metadata written");
        }

        let resume = self.resolver.resolve(owner).await?;
        info!(
            owner = %owner,
            pass_id = %pass_id,
            boundary = resume.start_boundary,
            start_sequence = resume.start_sequence,
            full_sync = resume.is_full_sync(),
            "sync pass started"
        );
        self.progress.emit(SyncEvent::Started {
            owner: owner.to_string(),
            pass_id: pass_id.to_string(),
            full_sync: resume.is_full_sync(),
        });

        let total_estimate = if self.config.estimate_total {
            self.estimate_total(owner, resume.start_boundary).await
        } else {
            0
        };
        self.progress.report(0, total_estimate, "fetching");

        let outcome = self
            .pool
            .run(
                owner,
                resume,
                PassContext {
                    synced_at: started_at,
                    total: total_estimate,
                },
            )
            .await?;

        let reconciled = if outcome.reached_end {
            self.reconcile(owner, resume.start_boundary, started_at).await?
        } else {
            0
        };

        let items = self.storage.items();
        let item_count = items.count(owner).await?;
        let last_item_id = items
            .newest(owner)
            .await?
            .map(|item| item.id)
            .unwrap_or(FROM_BEGINNING);
        metadata
            .put(&SyncMetadata {
                owner: owner.to_string(),
                last_synced_at: chrono::Utc::now().timestamp_millis(),
                last_item_id,
                last_sequence: outcome.last_sequence,
                item_count,
                completed: true,
            })
            .await?;

        if outcome.items_committed > 0 || reconciled > 0 {
            let dropped = self.storage.aggregates().delete_owner(owner).await?;
            debug!(owner = %owner, dropped, "aggregate cache invalidated");
        }

        let reaped = if self.config.reap_after_sync {
            match self.reaper.sweep(Some(owner)).await {
                Ok(report) => {
                    self.announce_reaped(&report);
                    Some(report)
                }
                Err(e) => {
                    warn!(owner = %owner, "stale partition sweep failed: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(SyncReport {
            pass_id: pass_id.to_string(),
            owner: owner.to_string(),
            resume,
            total_estimate,
            pages_committed: outcome.pages_committed,
            items_committed: outcome.items_committed,
            last_sequence: outcome.last_sequence,
            last_item_id,
            item_count,
            reconciled,
            reaped,
            duration_ms: 0,
        })
    }

    /// Items above the boundary, or 0 if the count endpoint fails.
    async fn estimate_total(&self, owner: &str, after_id: ItemId) -> u64 {
        let query = CountQuery {
            owner: owner.to_string(),
            after_id,
        };
        let timeout = self.config.fetch_timeout();
        let result = self
            .scheduler
            .enqueue(EndpointClass::Count, || async {
                match tokio::time::timeout(timeout, self.remote.count(&query)).await {
                    Ok(result) => result,
                    Err(elapsed) => Err(FeedSyncError::from(elapsed)),
                }
            })
            .await;

        match result {
            Ok(total) => {
                debug!(owner = %owner, after_id, total, "total estimated");
                total
            }
            Err(e) => {
                warn!(owner = %owner, "total estimate unavailable: {}", e);
                0
            }
        }
    }

    /// Drop rows above the boundary that this pass did not rewrite.
    async fn reconcile(&self, owner: &str, boundary: ItemId, started_at: i64) -> Result<u64> {
        let items = self.storage.items();
        let vanished: Vec<ItemId> = items
            .range(owner, boundary.saturating_add(1), ItemId::MAX)
            .await?
            .into_iter()
            .filter(|item| item.synced_at != started_at)
            .map(|item| item.id)
            .collect();
        if vanished.is_empty() {
            return Ok(0);
        }
        let removed = items.delete_ids(owner, &vanished).await?;
        info!(owner = %owner, removed, "dropped items the remote no longer returns");
        Ok(removed)
    }

    /// Wall clock millis, bumped past the previous pass so stamps never repeat.
    fn next_pass_stamp(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let previous = self
            .last_pass_stamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(now.max(last + 1)))
            .unwrap_or(now);
        now.max(previous + 1)
    }

    fn announce_reaped(&self, report: &SweepReport) {
        if report.is_empty() {
            return;
        }
        self.progress.emit(SyncEvent::Reaped {
            owners: report.reclaimed.clone(),
            items_removed: report.items_removed,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RemoteItem;
    use crate::remote::memory::{Fault, MemoryRemote};
    use crate::scheduler::SchedulerConfig;
    use crate::sync::retry::RetryPolicy;
    use std::sync::atomic::AtomicU64;

    const HOUR: i64 = 3_600_000;
    const DAY: i64 = 24 * HOUR;

    fn config(page_size: u32, concurrency: usize) -> SyncConfig {
        SyncConfig::builder()
            .page_size(page_size)
            .concurrency(concurrency)
            .retry(RetryPolicy::immediate(3))
            .scheduler(SchedulerConfig::immediate())
            .fetch_timeout_secs(5)
            .build()
            .unwrap()
    }

    fn engine(remote: &Arc<MemoryRemote>, config: SyncConfig) -> SyncEngine {
        SyncEngine::new(config, StorageManager::temporary().unwrap(), remote.clone()).unwrap()
    }

    /// Everything but the pass stamp.
    fn projection(items: &[CachedItem]) -> Vec<(u64, u64, i64, i64, u32)> {
        items
            .iter()
            .map(|i| (i.id, i.no, i.created_at, i.score, i.comment_count))
            .collect()
    }

    fn completed(outcome: SyncOutcome) -> SyncReport {
        match outcome {
            SyncOutcome::Completed(report) => report,
            SyncOutcome::AlreadyRunning => panic!("expected a completed pass"),
        }
    }

    fn assert_contiguous(items: &[CachedItem]) {
        for (index, item) in items.iter().enumerate() {
            assert_eq!(item.no, index as u64 + 1, "item {} out of sequence", item.id);
        }
        assert!(items.windows(2).all(|w| w[0].created_at < w[1].created_at));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn sequence_follows_creation_under_random_completion_order() {
        let remote = Arc::new(MemoryRemote::new().with_latency(1, 20).with_shuffled_pages(true));
        remote.seed("alice", 1, 733, 0, HOUR);
        let engine = engine(&remote, config(50, 5));

        let report = completed(engine.sync("alice").await.unwrap());
        assert_eq!(report.items_committed, 733);

        let items = engine.items("alice").await.unwrap();
        assert_eq!(items.len(), 733);
        assert_contiguous(&items);

        let metadata = engine.metadata("alice").await.unwrap().unwrap();
        assert_eq!(metadata.last_sequence, 733);
        assert_eq!(metadata.last_item_id, 733);
        assert_eq!(metadata.item_count, 733);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn short_page_terminates_the_pass() {
        let remote = Arc::new(MemoryRemote::new().with_latency(1, 10));
        remote.seed("alice", 1, 733, 0, HOUR);
        let engine = engine(&remote, config(200, 5));

        let report = completed(engine.sync("alice").await.unwrap());
        assert_eq!(report.pages_committed, 4);
        assert_eq!(report.last_sequence, 733);

        let numbers: Vec<u64> = engine.items("alice").await.unwrap().iter().map(|i| i.no).collect();
        assert_eq!(numbers, (1..=733).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn rejected_page_past_the_end_does_not_fail_the_pass() {
        let remote = Arc::new(MemoryRemote::new().with_latency(5, 20));
        remote.seed("alice", 1, 733, 0, HOUR);
        remote.inject_fault(5, Fault::BadRequest);
        let engine = engine(&remote, config(200, 5));

        let report = completed(engine.sync("alice").await.unwrap());
        assert_eq!(report.pages_committed, 4);
        assert_eq!(report.item_count, 733);

        let metadata = engine.metadata("alice").await.unwrap().unwrap();
        assert!(metadata.completed);
        assert_eq!(metadata.last_sequence, 733);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn exact_multiple_ends_on_empty_page() {
        let remote = Arc::new(MemoryRemote::new());
        remote.seed("alice", 1, 400, 0, HOUR);
        let engine = engine(&remote, config(200, 3));

        let report = completed(engine.sync("alice").await.unwrap());
        assert_eq!(report.items_committed, 400);
        assert_eq!(report.pages_committed, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn interrupted_pass_resumes_to_the_same_state() {
        let uninterrupted = {
            let remote = Arc::new(MemoryRemote::new());
            remote.seed("alice", 1, 733, 0, DAY);
            let engine = engine(&remote, config(200, 5));
            completed(engine.sync("alice").await.unwrap());
            projection(&engine.items("alice").await.unwrap())
        };

        let remote = Arc::new(MemoryRemote::new().with_latency(1, 5));
        remote.seed("alice", 1, 733, 0, DAY);
        remote.inject_fault(3, Fault::BadRequest);
        let engine = engine(&remote, config(200, 5));

        let err = engine.sync("alice").await.unwrap_err();
        assert!(matches!(err, FeedSyncError::Rejected { status: 400, .. }));
        assert!(!engine.progress().is_active());
        let pending = engine.metadata("alice").await.unwrap().unwrap();
        assert!(!pending.completed);
        assert!(engine.needs_sync("alice").await.unwrap());
        assert_eq!(engine.items("alice").await.unwrap().len(), 400);

        let report = completed(engine.sync("alice").await.unwrap());
        assert_eq!(report.resume.start_boundary, 369);
        assert_eq!(report.resume.start_sequence, 369);
        assert_eq!(projection(&engine.items("alice").await.unwrap()), uninterrupted);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn failed_first_pass_survives_another_owners_sweep() {
        let remote = Arc::new(MemoryRemote::new());
        remote.seed("alice", 1, 300, 0, DAY);
        remote.seed("bob", 10_000, 733, 0, DAY);
        remote.inject_fault(3, Fault::BadRequest);
        let engine = engine(&remote, config(200, 5));

        assert!(engine.sync("bob").await.is_err());
        assert_eq!(engine.items("bob").await.unwrap().len(), 400);

        let report = completed(engine.sync("alice").await.unwrap());
        assert!(report.reaped.unwrap().is_empty());
        assert_eq!(engine.items("bob").await.unwrap().len(), 400);

        let report = completed(engine.sync("bob").await.unwrap());
        assert!(report.resume.start_boundary > FROM_BEGINNING);
        let items = engine.items("bob").await.unwrap();
        assert_eq!(items.len(), 733);
        assert_contiguous(&items);
        assert!(engine.metadata("bob").await.unwrap().unwrap().completed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn overlap_window_reabsorbs_mutations() {
        let remote = Arc::new(MemoryRemote::new());
        remote.seed("alice", 1, 100, 0, DAY);
        let engine = engine(&remote, config(20, 3));
        completed(engine.sync("alice").await.unwrap());

        assert!(remote.mutate("alice", 95, 1_000, 77));
        let report = completed(engine.sync("alice").await.unwrap());
        assert_eq!(report.resume.start_boundary, 69);
        assert_eq!(report.items_committed, 31);

        let items = engine.items("alice").await.unwrap();
        assert_eq!(items.len(), 100);
        assert_contiguous(&items);
        let mutated = items.iter().find(|i| i.id == 95).unwrap();
        assert_eq!((mutated.no, mutated.score, mutated.comment_count), (95, 1_000, 77));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn repeated_syncs_are_idempotent() {
        let remote = Arc::new(MemoryRemote::new().with_shuffled_pages(true));
        remote.seed("alice", 1, 300, 0, DAY);
        let engine = engine(&remote, config(40, 4));

        completed(engine.sync("alice").await.unwrap());
        let first = projection(&engine.items("alice").await.unwrap());
        let first_meta = engine.metadata("alice").await.unwrap().unwrap();

        completed(engine.sync("alice").await.unwrap());
        let second = projection(&engine.items("alice").await.unwrap());
        let second_meta = engine.metadata("alice").await.unwrap().unwrap();

        assert_eq!(first, second);
        assert_eq!(first_meta.last_sequence, second_meta.last_sequence);
        assert_eq!(first_meta.item_count, second_meta.item_count);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn vanished_window_items_are_reconciled() {
        let remote = Arc::new(MemoryRemote::new());
        remote.seed("alice", 1, 100, 0, DAY);
        let engine = engine(&remote, config(20, 2));
        completed(engine.sync("alice").await.unwrap());

        assert!(remote.remove("alice", 90));
        let report = completed(engine.sync("alice").await.unwrap());
        assert_eq!(report.reconciled, 1);

        let items = engine.items("alice").await.unwrap();
        assert_eq!(items.len(), 99);
        assert_contiguous(&items);
        assert_eq!(items.iter().find(|i| i.id == 91).map(|i| i.no), Some(90));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn second_request_is_ignored_while_a_pass_runs() {
        let remote = Arc::new(MemoryRemote::new().with_latency(5, 15));
        remote.seed("alice", 1, 733, 0, HOUR);
        remote.seed("bob", 10_000, 50, 0, HOUR);
        let engine = Arc::new(engine(&remote, config(50, 2)));

        let mut events = engine.progress().events();
        let first = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.sync("alice").await })
        };
        loop {
            if let SyncEvent::Started { .. } = events.recv().await.unwrap() {
                break;
            }
        }

        assert!(engine.progress().is_active());
        assert_eq!(engine.sync("alice").await.unwrap(), SyncOutcome::AlreadyRunning);
        assert_eq!(engine.sync("bob").await.unwrap(), SyncOutcome::AlreadyRunning);
        assert_eq!(engine.full_reset("alice").await.unwrap(), SyncOutcome::AlreadyRunning);

        let report = completed(first.await.unwrap().unwrap());
        assert_eq!(report.items_committed, 733);
        assert_contiguous(&engine.items("alice").await.unwrap());
        assert!(engine.items("bob").await.unwrap().is_empty());
        assert!(!engine.progress().is_active());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn count_endpoint_feeds_progress_total() {
        let remote = Arc::new(MemoryRemote::new());
        remote.seed("alice", 1, 733, 0, HOUR);
        let engine = engine(&remote, config(200, 3));

        let seen_total = Arc::new(AtomicU64::new(0));
        let seen_current = Arc::new(AtomicU64::new(0));
        {
            let (seen_total, seen_current) = (seen_total.clone(), seen_current.clone());
            engine.progress().subscribe(move |current, total, _| {
                seen_total.fetch_max(total, Ordering::SeqCst);
                seen_current.fetch_max(current, Ordering::SeqCst);
            });
        }

        let report = completed(engine.sync("alice").await.unwrap());
        assert_eq!(report.total_estimate, 733);
        assert_eq!(remote.count_calls(), 1);
        assert_eq!(seen_total.load(Ordering::SeqCst), 733);
        assert_eq!(seen_current.load(Ordering::SeqCst), 733);
        assert_eq!(engine.scheduler_stats().in_flight, 0);
        assert_eq!(engine.progress().state(), Default::default());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn full_reset_rebuilds_from_scratch() {
        let remote = Arc::new(MemoryRemote::new());
        remote.seed("alice", 1, 50, 0, DAY);
        let engine = engine(&remote, config(20, 2));
        completed(engine.sync("alice").await.unwrap());

        let mut stray = engine.items("alice").await.unwrap()[0].clone();
        stray.id = 999;
        stray.no = 5_000;
        engine.storage().items().put_batch("alice", &[stray]).await.unwrap();

        let report = completed(engine.full_reset("alice").await.unwrap());
        assert!(report.resume.is_full_sync());

        let items = engine.items("alice").await.unwrap();
        assert_eq!(items.len(), 50);
        assert_contiguous(&items);
    }

    #[tokio::test]
    async fn staleness_follows_refresh_interval() {
        let remote = Arc::new(MemoryRemote::new());
        remote.seed("alice", 1, 10, 0, DAY);
        let engine = engine(&remote, config(20, 1));
        assert!(engine.needs_sync("alice").await.unwrap());

        completed(engine.sync("alice").await.unwrap());
        let last = engine.metadata("alice").await.unwrap().unwrap().last_synced_at;
        let interval = engine.config().refresh_interval_ms();
        assert!(!engine.needs_sync_at("alice", last + interval).await.unwrap());
        assert!(engine.needs_sync_at("alice", last + interval + 1).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn pass_invalidates_aggregates_and_reaps_stale_owners() {
        let remote = Arc::new(MemoryRemote::new());
        remote.seed("alice", 1, 30, 0, DAY);
        let engine = engine(&remote, config(20, 2));
        let storage = engine.storage().clone();

        storage
            .aggregates()
            .put("alice", "daily:1970-01-01", &serde_json::json!(12))
            .await
            .unwrap();
        storage
            .items()
            .put_batch(
                "old",
                &[CachedItem::from_remote(
                    RemoteItem {
                        id: 1,
                        owner: "old".to_string(),
                        created_at: 0,
                        score: 0,
                        comment_count: 0,
                        title: String::new(),
                    },
                    1,
                    0,
                )],
            )
            .await
            .unwrap();
        storage
            .metadata()
            .put(&SyncMetadata {
                owner: "old".to_string(),
                last_synced_at: chrono::Utc::now().timestamp_millis() - 30 * DAY,
                last_item_id: 1,
                last_sequence: 1,
                item_count: 1,
                completed: true,
            })
            .await
            .unwrap();

        let mut events = engine.progress().events();
        let report = completed(engine.sync("alice").await.unwrap());

        assert!(storage.aggregates().names("alice").await.unwrap().is_empty());
        let reaped = report.reaped.unwrap();
        assert_eq!(reaped.reclaimed, vec!["old".to_string()]);
        assert_eq!(storage.items().count("old").await.unwrap(), 0);

        let mut saw_reaped = false;
        while let Ok(event) = events.try_recv() {
            saw_reaped |= matches!(event, SyncEvent::Reaped { .. });
        }
        assert!(saw_reaped);
    }

    #[tokio::test]
    async fn empty_owner_is_rejected() {
        let remote = Arc::new(MemoryRemote::new());
        let engine = engine(&remote, config(20, 1));
        let err = engine.sync("").await.unwrap_err();
        assert!(matches!(err, FeedSyncError::InvalidArgument(_)));
        assert!(!engine.progress().is_active());
    }
}
