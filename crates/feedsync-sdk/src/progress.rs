//! Progress broadcaster
//!
//! Owned by the engine and shared with the worker pool. Three ways to observe
//! a pass:
//! - one overridable callback slot receiving `(current, total, message)`;
//!   the last `subscribe` wins
//! - a `watch` receiver of the latest [`ProgressState`]
//! - a `broadcast` stream of [`SyncEvent`]s
//!
//! It also holds the single-flight guard: [`ProgressBroadcaster::try_begin`]
//! hands out at most one [`SyncLease`] at a time.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::debug;

/// Callback receiving `(current, total, message)`.
pub type ProgressCallback = Arc<dyn Fn(u64, u64, &str) + Send + Sync>;

/// Volatile progress of the running (or last) pass. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressState {
    pub current: u64,
    /// 0 when unknown
    pub total: u64,
    pub message: String,
    pub active: bool,
    pub owner: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncEvent {
    Started {
        owner: String,
        pass_id: String,
        full_sync: bool,
    },
    PageCommitted {
        owner: String,
        page: u64,
        items: u64,
        last_sequence: u64,
    },
    Completed {
        owner: String,
        pass_id: String,
        items_committed: u64,
        last_sequence: u64,
    },
    Failed {
        owner: String,
        pass_id: String,
        error: String,
    },
    Reaped {
        owners: Vec<String>,
        items_removed: u64,
    },
}

impl SyncEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            SyncEvent::Started { .. } => "started",
            SyncEvent::PageCommitted { .. } => "page_committed",
            SyncEvent::Completed { .. } => "completed",
            SyncEvent::Failed { .. } => "failed",
            SyncEvent::Reaped { .. } => "reaped",
        }
    }
}

pub struct ProgressBroadcaster {
    state: watch::Sender<ProgressState>,
    events: broadcast::Sender<SyncEvent>,
    callback: RwLock<Option<ProgressCallback>>,
    active: Mutex<HashSet<String>>,
}

impl ProgressBroadcaster {
    pub fn new(event_capacity: usize) -> Self {
        let (state, _) = watch::channel(ProgressState::default());
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            state,
            events,
            callback: RwLock::new(None),
            active: Mutex::new(HashSet::new()),
        }
    }

    /// Install the progress callback, replacing any previous one.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(u64, u64, &str) + Send + Sync + 'static,
    {
        *self.callback.write() = Some(Arc::new(callback));
    }

    pub fn unsubscribe(&self) {
        *self.callback.write() = None;
    }

    pub fn watch(&self) -> watch::Receiver<ProgressState> {
        self.state.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> ProgressState {
        self.state.borrow().clone()
    }

    pub fn is_active(&self) -> bool {
        !self.active.lock().is_empty()
    }

    pub fn is_syncing(&self, owner: &str) -> bool {
        self.active.lock().contains(owner)
    }

    pub fn active_owners(&self) -> Vec<String> {
        self.active.lock().iter().cloned().collect()
    }

    /// Claim the engine for `owner`. `None` while another pass holds the lease.
    pub fn try_begin(self: &Arc<Self>, owner: &str) -> Option<SyncLease> {
        {
            let mut active = self.active.lock();
            if !active.is_empty() {
                return None;
            }
            active.insert(owner.to_string());
        }
        self.state.send_replace(ProgressState {
            current: 0,
            total: 0,
            message: "starting".to_string(),
            active: true,
            owner: Some(owner.to_string()),
        });
        Some(SyncLease {
            broadcaster: self.clone(),
            owner: owner.to_string(),
        })
    }

    pub fn report(&self, current: u64, total: u64, message: &str) {
        self.state.send_modify(|state| {
            state.current = current;
            state.total = total;
            state.message = message.to_string();
        });
        let callback = self.callback.read().clone();
        if let Some(callback) = callback {
            callback(current, total, message);
        }
    }

    pub fn emit(&self, event: SyncEvent) {
        debug!(event = event.event_type(), "sync event");
        if self.events.send(event).is_err() {
            debug!("no active event receivers");
        }
    }

    fn release(&self, owner: &str, clear: bool, message: Option<String>) {
        self.active.lock().remove(owner);
        self.state.send_modify(|state| {
            if clear {
                *state = ProgressState::default();
            }
            if let Some(message) = message {
                state.message = message;
            }
            state.active = false;
        });
    }
}

/// Single-flight lease for one pass. Dropping it releases the engine and
/// leaves the last reported progress in place.
pub struct SyncLease {
    broadcaster: Arc<ProgressBroadcaster>,
    owner: String,
}

impl SyncLease {
    /// Successful end: progress is cleared.
    pub fn complete(self) {
        self.broadcaster.release(&self.owner, true, None);
    }

    /// Failed end: counters stay, message carries the error.
    pub fn fail(self, error: &str) {
        self.broadcaster
            .release(&self.owner, false, Some(format!("failed: {}", error)));
    }
}

impl Drop for SyncLease {
    fn drop(&mut self) {
        if self.broadcaster.is_syncing(&self.owner) {
            self.broadcaster.release(&self.owner, false, None);
        }
    }
}
