//! Resume-point resolver
//!
//! Responsibilities:
//! - find where the previous pass of an owner left off
//! - step back by the overlap window so recently mutated items get refetched
//! - derive the sequence number the next pass continues from

use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::model::ResumePoint;
use crate::storage::ItemTable;

#[derive(Clone)]
pub struct ResumePointResolver {
    items: Arc<dyn ItemTable>,
    /// Overlap window (milliseconds)
    overlap_window_ms: i64,
}

impl ResumePointResolver {
    pub fn new(items: Arc<dyn ItemTable>, overlap_window_ms: i64) -> Self {
        Self {
            items,
            overlap_window_ms,
        }
    }

    /// Boundary is the highest cached id created strictly before
    /// `newest.created_at - overlap_window`; sequence is the number of cached
    /// ids at or below it. No cache, or a history younger than the window,
    /// resolves to a full sync.
    pub async fn resolve(&self, owner: &str) -> Result<ResumePoint> {
        let Some(newest) = self.items.newest(owner).await? else {
            debug!(owner = %owner, "no cached items, syncing from the beginning");
            return Ok(ResumePoint::from_beginning());
        };

        let cutoff = newest.created_at.saturating_sub(self.overlap_window_ms);
        let Some(anchor) = self.items.last_created_before(owner, cutoff).await? else {
            debug!(owner = %owner, newest = newest.id, "history inside overlap window, full re-sync");
            return Ok(ResumePoint::from_beginning());
        };

        let start_sequence = self.items.count_through(owner, anchor.id).await?;
        debug!(
            owner = %owner,
            newest = newest.id,
            boundary = anchor.id,
            start_sequence,
            "resume point resolved"
        );
        Ok(ResumePoint {
            start_boundary: anchor.id,
            start_sequence,
        })
    }
}
