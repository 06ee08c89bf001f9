//! Rate-limited fetch scheduler
//!
//! Client-side pacing of outbound requests to the remote query API.
//!
//! ## What it enforces
//!
//! 1. **Active-slot cap** - at most `max_in_flight` requests hold a slot at once
//! 2. **Start jitter** - each dequeued request waits a random delay before dispatch
//! 3. **Per-class cooldown** - after the response the slot stays taken for a
//!    class-specific cooldown
//! 4. **Strict lanes** - a class marked `serialized` dispatches one request at a
//!    time with a minimum interval between dispatches
//!
//! ## Recommended parameters
//!
//! | Class | Cooldown | Serialized | Min interval |
//! |-------|----------|------------|--------------|
//! | Count | 100 ms | no | - |
//! | Records | 500 ms | no | - |
//! | Search | 1000 ms | yes | 2 s |
//!
//! Errors from the request pass through untouched. Retrying is the caller's job.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore};
use tracing::debug;

use crate::error::{FeedSyncError, Result};

/// Logical endpoint class, each with its own remote budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndpointClass {
    /// Count-only endpoint, cheap
    Count,
    /// Full-record page endpoint
    Records,
    /// Expensive search endpoint with the strictest budget
    Search,
}

impl EndpointClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointClass::Count => "count",
            EndpointClass::Records => "records",
            EndpointClass::Search => "search",
        }
    }

    const ALL: [EndpointClass; 3] = [
        EndpointClass::Count,
        EndpointClass::Records,
        EndpointClass::Search,
    ];
}

/// Pacing rules for one endpoint class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassPolicy {
    /// Slot hold time after the response (milliseconds)
    pub cooldown_ms: u64,
    /// One request at a time for this class
    pub serialized: bool,
    /// Minimum gap between two dispatches of a serialized class (milliseconds)
    pub min_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Concurrent active slots
    pub max_in_flight: usize,
    /// Start jitter range (milliseconds)
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
    pub count: ClassPolicy,
    pub records: ClassPolicy,
    pub search: ClassPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 6,
            jitter_min_ms: 20,
            jitter_max_ms: 250,
            count: ClassPolicy {
                cooldown_ms: 100,
                serialized: false,
                min_interval_ms: 0,
            },
            records: ClassPolicy {
                cooldown_ms: 500,
                serialized: false,
                min_interval_ms: 0,
            },
            search: ClassPolicy {
                cooldown_ms: 1_000,
                serialized: true,
                min_interval_ms: 2_000,
            },
        }
    }
}

impl SchedulerConfig {
    /// No jitter, no cooldown, no intervals. Lane serialization is kept.
    pub fn immediate() -> Self {
        let defaults = Self::default();
        let strip = |policy: ClassPolicy| ClassPolicy {
            cooldown_ms: 0,
            min_interval_ms: 0,
            ..policy
        };
        Self {
            max_in_flight: defaults.max_in_flight,
            jitter_min_ms: 0,
            jitter_max_ms: 0,
            count: strip(defaults.count),
            records: strip(defaults.records),
            search: strip(defaults.search),
        }
    }

    pub fn policy(&self, class: EndpointClass) -> &ClassPolicy {
        match class {
            EndpointClass::Count => &self.count,
            EndpointClass::Records => &self.records,
            EndpointClass::Search => &self.search,
        }
    }
}

/// Scheduler counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub dispatched: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub in_flight: u64,
}

/// Strict lane of a serialized class: holds the last dispatch time.
#[derive(Debug, Default)]
struct Lane {
    last_dispatch: Mutex<Option<Instant>>,
}

#[derive(Debug)]
pub struct FetchScheduler {
    config: SchedulerConfig,
    slots: Arc<Semaphore>,
    lanes: HashMap<EndpointClass, Lane>,
    stats: Arc<RwLock<SchedulerStats>>,
}

impl FetchScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
        let lanes = EndpointClass::ALL
            .iter()
            .map(|class| (*class, Lane::default()))
            .collect();
        Self {
            config,
            slots,
            lanes,
            stats: Arc::new(RwLock::new(SchedulerStats::default())),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats.read().clone()
    }

    /// Run `request` once a slot (and, for strict classes, the lane) is free.
    ///
    /// Strict classes wait on their lane before taking a slot, so paced
    /// requests never sit on capacity other classes could use. The slot is
    /// held through the response and the class cooldown.
    pub async fn enqueue<T, F, Fut>(&self, class: EndpointClass, request: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let policy = self.config.policy(class);
        let mut lane = match (policy.serialized, self.lanes.get(&class)) {
            (true, Some(lane)) => {
                let last_dispatch = lane.last_dispatch.lock().await;
                if let Some(last) = *last_dispatch {
                    let min_interval = Duration::from_millis(policy.min_interval_ms);
                    let elapsed = last.elapsed();
                    if elapsed < min_interval {
                        let wait = min_interval - elapsed;
                        debug!(class = class.as_str(), wait_ms = wait.as_millis() as u64, "strict lane pacing");
                        tokio::time::sleep(wait).await;
                    }
                }
                Some(last_dispatch)
            }
            _ => None,
        };

        let _slot = self
            .slots
            .acquire()
            .await
            .map_err(|_| FeedSyncError::Config("fetch scheduler closed".to_string()))?;

        let jitter = self.start_jitter();
        if !jitter.is_zero() {
            tokio::time::sleep(jitter).await;
        }
        if let Some(last_dispatch) = lane.as_mut() {
            **last_dispatch = Some(Instant::now());
        }

        let tracker = InFlight::start(&self.stats);
        let result = request().await;
        tracker.finish(result.is_ok());
        drop(lane);

        if policy.cooldown_ms > 0 {
            tokio::time::sleep(Duration::from_millis(policy.cooldown_ms)).await;
        }
        result
    }

    fn start_jitter(&self) -> Duration {
        let (min, max) = (self.config.jitter_min_ms, self.config.jitter_max_ms);
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(min.min(max)..=max))
    }
}

/// Keeps `in_flight` honest even if the caller drops the request future.
struct InFlight<'a> {
    stats: &'a RwLock<SchedulerStats>,
    finished: bool,
}

impl<'a> InFlight<'a> {
    fn start(stats: &'a RwLock<SchedulerStats>) -> Self {
        {
            let mut s = stats.write();
            s.dispatched += 1;
            s.in_flight += 1;
        }
        Self {
            stats,
            finished: false,
        }
    }

    fn finish(mut self, ok: bool) {
        let mut s = self.stats.write();
        s.in_flight -= 1;
        if ok {
            s.succeeded += 1;
        } else {
            s.failed += 1;
        }
        self.finished = true;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let mut s = self.stats.write();
            s.in_flight -= 1;
            s.failed += 1;
        }
    }
}
