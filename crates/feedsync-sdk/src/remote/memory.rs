//! In-process remote fixture
//!
//! Serves pages out of an in-memory collection with optional per-request
//! latency jitter (so pages complete out of order), in-page shuffling (the
//! remote's volatile order) and one-shot fault injection per page number.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::Rng;

use super::RemoteSource;
use crate::error::{FeedSyncError, Result};
use crate::model::{CountQuery, ItemId, PageQuery, RemoteItem};

/// Failure injected into one page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// 503
    Unavailable,
    /// 400
    BadRequest,
    /// Body that does not decode
    Malformed,
    /// Never answers within any sane timeout
    Hang,
}

impl Fault {
    fn into_error(self) -> FeedSyncError {
        match self {
            Fault::Unavailable => FeedSyncError::from_status(503, "service unavailable"),
            Fault::BadRequest => FeedSyncError::from_status(400, "bad filter"),
            Fault::Malformed => FeedSyncError::MalformedResponse("truncated JSON".to_string()),
            Fault::Hang => FeedSyncError::Timeout("fixture hang".to_string()),
        }
    }
}

#[derive(Default)]
struct FixtureState {
    /// owner → id → item
    items: HashMap<String, BTreeMap<ItemId, RemoteItem>>,
    /// page → queued faults
    faults: HashMap<u64, VecDeque<Fault>>,
    /// every requested page, in dispatch order
    page_log: Vec<u64>,
}

pub struct MemoryRemote {
    state: Mutex<FixtureState>,
    latency_ms: (u64, u64),
    shuffle_pages: bool,
    fetch_calls: AtomicU64,
    count_calls: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FixtureState::default()),
            latency_ms: (0, 0),
            shuffle_pages: false,
            fetch_calls: AtomicU64::new(0),
            count_calls: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Random latency in `[min_ms, max_ms]` per request.
    pub fn with_latency(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.latency_ms = (min_ms, max_ms.max(min_ms));
        self
    }

    /// Return the items of each page in random order.
    pub fn with_shuffled_pages(mut self, shuffle: bool) -> Self {
        self.shuffle_pages = shuffle;
        self
    }

    /// Generate `count` items for `owner` with ids `first_id..`, one every `spacing_ms`
    /// starting at `start_ms`.
    pub fn seed(&self, owner: &str, first_id: ItemId, count: u64, start_ms: i64, spacing_ms: i64) {
        let mut state = self.state.lock();
        let partition = state.items.entry(owner.to_string()).or_default();
        for i in 0..count {
            let id = first_id + i;
            partition.insert(
                id,
                RemoteItem {
                    id,
                    owner: owner.to_string(),
                    created_at: start_ms + i as i64 * spacing_ms,
                    score: (id % 97) as i64,
                    comment_count: (id % 13) as u32,
                    title: format!("{} #{}", owner, id),
                },
            );
        }
    }

    /// Store `item` under `partition` whatever its owner field says.
    pub fn plant(&self, partition: &str, item: RemoteItem) {
        let mut state = self.state.lock();
        state
            .items
            .entry(partition.to_string())
            .or_default()
            .insert(item.id, item);
    }

    /// Change the mutable attributes of an item. Returns false if it does not exist.
    pub fn mutate(&self, owner: &str, id: ItemId, score: i64, comment_count: u32) -> bool {
        let mut state = self.state.lock();
        match state.items.get_mut(owner).and_then(|p| p.get_mut(&id)) {
            Some(item) => {
                item.score = score;
                item.comment_count = comment_count;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, owner: &str, id: ItemId) -> bool {
        let mut state = self.state.lock();
        state
            .items
            .get_mut(owner)
            .map(|p| p.remove(&id).is_some())
            .unwrap_or(false)
    }

    /// Queue a fault for the next request of `page` (any owner, any boundary).
    pub fn inject_fault(&self, page: u64, fault: Fault) {
        self.state.lock().faults.entry(page).or_default().push_back(fault);
    }

    pub fn fetch_calls(&self) -> u64 {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn count_calls(&self) -> u64 {
        self.count_calls.load(Ordering::SeqCst)
    }

    /// Highest number of page requests observed in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn page_log(&self) -> Vec<u64> {
        self.state.lock().page_log.clone()
    }

    async fn simulate_latency(&self) {
        let (min, max) = self.latency_ms;
        if max == 0 {
            tokio::task::yield_now().await;
            return;
        }
        let delay = rand::thread_rng().gen_range(min..=max);
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    fn serve(&self, query: &PageQuery) -> Result<Vec<RemoteItem>> {
        if query.page == 0 || query.page_size == 0 {
            return Err(FeedSyncError::from_status(400, "page and per_page start at 1"));
        }
        let state = self.state.lock();
        let Some(partition) = state.items.get(&query.owner) else {
            return Ok(Vec::new());
        };
        let skip = ((query.page - 1) * query.page_size as u64) as usize;
        let mut page: Vec<RemoteItem> = partition
            .range(query.after_id + 1..)
            .map(|(_, item)| item)
            .skip(skip)
            .take(query.page_size as usize)
            .cloned()
            .collect();
        if self.shuffle_pages {
            page.shuffle(&mut rand::thread_rng());
        }
        Ok(page)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteSource for MemoryRemote {
    async fn fetch_page(&self, query: &PageQuery) -> Result<Vec<RemoteItem>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        // released on drop, so a request cancelled by a timeout is not counted forever
        let _in_flight = InFlight(&self.in_flight);

        let fault = {
            let mut state = self.state.lock();
            state.page_log.push(query.page);
            state
                .faults
                .get_mut(&query.page)
                .and_then(|queue| queue.pop_front())
        };

        match fault {
            Some(Fault::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(Fault::Hang.into_error())
            }
            Some(fault) => {
                self.simulate_latency().await;
                Err(fault.into_error())
            }
            None => {
                self.simulate_latency().await;
                self.serve(query)
            }
        }
    }

    async fn count(&self, query: &CountQuery) -> Result<u64> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        let state = self.state.lock();
        Ok(state
            .items
            .get(&query.owner)
            .map(|p| p.range(query.after_id + 1..).count() as u64)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(page: u64, after_id: ItemId) -> PageQuery {
        PageQuery {
            owner: "alice".to_string(),
            after_id,
            page,
            page_size: 200,
        }
    }

    #[tokio::test]
    async fn pages_follow_filter_and_size() {
        let remote = MemoryRemote::new();
        remote.seed("alice", 1, 733, 0, 1_000);

        let pages: Vec<usize> = futures::future::join_all((1..=5).map(|p| {
            let remote = &remote;
            async move { remote.fetch_page(&query(p, 0)).await.unwrap().len() }
        }))
        .await;
        assert_eq!(pages, vec![200, 200, 200, 133, 0]);

        let after = remote.fetch_page(&query(1, 700)).await.unwrap();
        assert_eq!(after.first().map(|i| i.id), Some(701));
        assert_eq!(after.len(), 33);
        assert_eq!(
            remote
                .count(&CountQuery {
                    owner: "alice".to_string(),
                    after_id: 700
                })
                .await
                .unwrap(),
            33
        );
    }

    #[tokio::test]
    async fn faults_fire_once_per_injection() {
        let remote = MemoryRemote::new();
        remote.seed("alice", 1, 10, 0, 1_000);
        remote.inject_fault(1, Fault::Unavailable);

        let err = remote.fetch_page(&query(1, 0)).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(remote.fetch_page(&query(1, 0)).await.unwrap().len(), 10);
        assert_eq!(remote.fetch_calls(), 2);
        assert_eq!(remote.page_log(), vec![1, 1]);
    }

    #[tokio::test]
    async fn page_zero_is_rejected() {
        let remote = MemoryRemote::new();
        let err = remote.fetch_page(&query(0, 0)).await.unwrap_err();
        assert!(!err.is_transient());
    }
}
