//! Ordered-commit worker pool
//!
//! N workers claim pages from a shared counter and fetch them through the
//! scheduler. Fetched pages land in the [`OrderedCommitBuffer`]; one commit
//! step, serialized by an async mutex, drains it in page order and assigns
//! sequence numbers. A short or empty page ends the pass.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::commit_buffer::{OrderedCommitBuffer, SequenceCursor};
use super::retry::RetryPolicy;
use crate::error::{FeedSyncError, Result};
use crate::model::{ItemId, PageQuery, RemoteItem, ResumePoint};
use crate::progress::{ProgressBroadcaster, SyncEvent};
use crate::remote::RemoteSource;
use crate::scheduler::{EndpointClass, FetchScheduler};
use crate::storage::ItemTable;

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub page_size: u32,
    pub concurrency: usize,
    pub fetch_timeout: Duration,
    pub retry: RetryPolicy,
}

/// Per-pass inputs besides the resume point.
#[derive(Debug, Clone, Copy)]
pub struct PassContext {
    /// Pass start (UTC millis), stamped on every row written
    pub synced_at: i64,
    /// Progress total, 0 when unknown
    pub total: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolOutcome {
    pub pages_committed: u64,
    pub items_committed: u64,
    pub last_sequence: u64,
    pub highest_id: ItemId,
    pub reached_end: bool,
}

struct CommitState {
    buffer: OrderedCommitBuffer,
    cursor: SequenceCursor,
    pages_committed: u64,
    items_committed: u64,
}

struct PassShared {
    owner: String,
    resume: ResumePoint,
    context: PassContext,
    next_page: AtomicU64,
    /// End of data seen, or the pass is aborting
    done: AtomicBool,
    /// Lowest short page fetched so far, `u64::MAX` until one arrives
    terminal_hint: AtomicU64,
    commit: Mutex<CommitState>,
}

impl PassShared {
    fn past_end(&self, page: u64) -> bool {
        page > self.terminal_hint.load(Ordering::SeqCst)
    }
}

/// Why a worker stopped. `page` is set for fetch failures, which no longer
/// matter once the page turns out to lie past the end of data.
struct WorkerFailure {
    page: Option<u64>,
    error: FeedSyncError,
}

impl WorkerFailure {
    fn fatal(error: FeedSyncError) -> Self {
        Self { page: None, error }
    }
}

#[derive(Clone)]
pub struct SyncWorkerPool {
    remote: Arc<dyn RemoteSource>,
    scheduler: Arc<FetchScheduler>,
    items: Arc<dyn ItemTable>,
    progress: Arc<ProgressBroadcaster>,
    settings: PoolSettings,
}

impl SyncWorkerPool {
    pub fn new(
        remote: Arc<dyn RemoteSource>,
        scheduler: Arc<FetchScheduler>,
        items: Arc<dyn ItemTable>,
        progress: Arc<ProgressBroadcaster>,
        settings: PoolSettings,
    ) -> Self {
        Self {
            remote,
            scheduler,
            items,
            progress,
            settings,
        }
    }

    /// Fetch and commit everything above `resume.start_boundary`.
    ///
    /// On error, pages committed so far stay in the cache and the first error
    /// is returned once every worker has stopped.
    pub async fn run(&self, owner: &str, resume: ResumePoint, context: PassContext) -> Result<PoolOutcome> {
        let shared = Arc::new(PassShared {
            owner: owner.to_string(),
            resume,
            context,
            next_page: AtomicU64::new(1),
            done: AtomicBool::new(false),
            terminal_hint: AtomicU64::new(u64::MAX),
            commit: Mutex::new(CommitState {
                buffer: OrderedCommitBuffer::new(),
                cursor: SequenceCursor {
                    last_id: resume.start_boundary,
                    last_sequence: resume.start_sequence,
                },
                pages_committed: 0,
                items_committed: 0,
            }),
        });

        let workers = self.settings.concurrency.max(1);
        info!(
            owner = %owner,
            boundary = resume.start_boundary,
            start_sequence = resume.start_sequence,
            workers,
            page_size = self.settings.page_size,
            "worker pool starting"
        );

        let mut join_set = JoinSet::new();
        for worker_id in 0..workers {
            let pool = self.clone();
            let shared = shared.clone();
            join_set.spawn(async move { pool.worker(worker_id, shared).await });
        }

        let mut failures: Vec<WorkerFailure> = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            let result = joined.unwrap_or_else(|e| {
                Err(WorkerFailure::fatal(FeedSyncError::Internal(format!(
                    "worker task failed: {}",
                    e
                ))))
            });
            if let Err(failure) = result {
                shared.done.store(true, Ordering::SeqCst);
                failures.push(failure);
            }
        }

        let state = shared.commit.lock().await;
        let terminal_page = state.buffer.terminal_page();
        let first_error = failures
            .into_iter()
            .filter(|failure| match (failure.page, terminal_page) {
                (Some(page), Some(terminal)) if page > terminal => {
                    debug!(owner = %owner, page, "failure past end of data ignored: {}", failure.error);
                    false
                }
                _ => true,
            })
            .map(|failure| failure.error)
            .next();
        let outcome = PoolOutcome {
            pages_committed: state.pages_committed,
            items_committed: state.items_committed,
            last_sequence: state.cursor.last_sequence,
            highest_id: state.cursor.last_id,
            reached_end: state.buffer.is_complete(),
        };

        if let Some(e) = first_error {
            error!(
                owner = %owner,
                pages_committed = outcome.pages_committed,
                last_sequence = outcome.last_sequence,
                "worker pool aborted: {}",
                e
            );
            return Err(e);
        }

        info!(
            owner = %owner,
            pages = outcome.pages_committed,
            items = outcome.items_committed,
            last_sequence = outcome.last_sequence,
            "worker pool finished"
        );
        Ok(outcome)
    }

    async fn worker(&self, worker_id: usize, shared: Arc<PassShared>) -> std::result::Result<(), WorkerFailure> {
        while !shared.done.load(Ordering::SeqCst) {
            let page = shared.next_page.fetch_add(1, Ordering::SeqCst);
            let query = PageQuery {
                owner: shared.owner.clone(),
                after_id: shared.resume.start_boundary,
                page,
                page_size: self.settings.page_size,
            };

            let result = self.fetch_with_retry(&shared, &query).await.and_then(|items| {
                check_owner(&shared.owner, page, &items)?;
                Ok(items)
            });
            let items = match result {
                Ok(items) => items,
                Err(error) => {
                    shared.done.store(true, Ordering::SeqCst);
                    return Err(WorkerFailure {
                        page: Some(page),
                        error,
                    });
                }
            };

            let terminal = (items.len() as u64) < self.settings.page_size as u64;
            if terminal {
                shared.terminal_hint.fetch_min(page, Ordering::SeqCst);
                shared.done.store(true, Ordering::SeqCst);
            }
            debug!(
                owner = %shared.owner,
                worker_id,
                page,
                items = items.len(),
                terminal,
                "page fetched"
            );

            if let Err(e) = self.accept(&shared, page, items, terminal).await {
                shared.done.store(true, Ordering::SeqCst);
                return Err(WorkerFailure::fatal(e));
            }
        }
        Ok(())
    }

    /// Retries transient failures until the policy gives up or a lower page
    /// turns out to be the last one.
    async fn fetch_with_retry(&self, shared: &PassShared, query: &PageQuery) -> Result<Vec<RemoteItem>> {
        let mut attempt = 0u32;
        loop {
            let result = self
                .scheduler
                .enqueue(EndpointClass::Records, || async {
                    match tokio::time::timeout(self.settings.fetch_timeout, self.remote.fetch_page(query)).await {
                        Ok(result) => result,
                        Err(elapsed) => Err(FeedSyncError::from(elapsed)),
                    }
                })
                .await;

            match result {
                Ok(items) => return Ok(items),
                Err(e) if shared.past_end(query.page) => return Err(e),
                Err(e) if self.settings.retry.should_retry(attempt, &e) => {
                    let delay = self.settings.retry.delay_for(attempt);
                    warn!(
                        owner = %query.owner,
                        page = query.page,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "page fetch failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Stage one page and commit whatever became contiguous.
    async fn accept(&self, shared: &PassShared, page: u64, items: Vec<RemoteItem>, terminal: bool) -> Result<()> {
        let mut state = shared.commit.lock().await;
        if terminal {
            state.buffer.mark_terminal(page);
        }
        if !state.buffer.insert(page, items) {
            debug!(owner = %shared.owner, page, "page past end of data discarded");
            return Ok(());
        }

        while let Some((page, items)) = state.buffer.pop_ready() {
            let sequenced = state
                .cursor
                .sequence(&shared.owner, items, shared.context.synced_at);
            if !sequenced.rows.is_empty() {
                self.items.put_batch(&shared.owner, &sequenced.rows).await?;
            }

            let written = sequenced.rows.len() as u64;
            state.cursor = sequenced.cursor;
            state.pages_committed += 1;
            state.items_committed += written;

            debug!(
                owner = %shared.owner,
                page,
                items = written,
                skipped = sequenced.skipped,
                last_sequence = state.cursor.last_sequence,
                "page committed"
            );
            self.progress.report(
                state.items_committed,
                shared.context.total.max(state.items_committed),
                &format!("committed page {}", page),
            );
            self.progress.emit(SyncEvent::PageCommitted {
                owner: shared.owner.clone(),
                page,
                items: written,
                last_sequence: state.cursor.last_sequence,
            });
        }
        Ok(())
    }
}

fn check_owner(owner: &str, page: u64, items: &[RemoteItem]) -> Result<()> {
    match items.iter().find(|item| item.owner != owner) {
        Some(foreign) => Err(FeedSyncError::MalformedResponse(format!(
            "page {} for owner {} contains item {} of owner {}",
            page, owner, foreign.id, foreign.owner
        ))),
        None => Ok(()),
    }
}
