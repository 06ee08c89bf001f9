//! Data model shared by the remote adapters, the stores and the sync engine.

use serde::{Deserialize, Serialize};

/// Item identifier. Strictly increasing with creation time, globally unique, starts at 1.
pub type ItemId = u64;

/// Boundary meaning "fetch from the beginning".
pub const FROM_BEGINNING: ItemId = 0;

/// Item projection as returned by the remote query API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteItem {
    pub id: ItemId,
    pub owner: String,
    /// Creation time (UTC millis)
    pub created_at: i64,
    /// Mutable for a while after creation
    pub score: i64,
    /// Mutable for a while after creation
    pub comment_count: u32,
    pub title: String,
}

/// An item as stored in the local cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedItem {
    pub id: ItemId,
    pub owner: String,
    pub created_at: i64,
    pub score: i64,
    pub comment_count: u32,
    pub title: String,
    /// Per-owner sequence number assigned at commit time, 1-based.
    pub no: u64,
    /// Start time (UTC millis) of the sync pass that last wrote this row.
    pub synced_at: i64,
}

impl CachedItem {
    pub fn from_remote(item: RemoteItem, no: u64, synced_at: i64) -> Self {
        Self {
            id: item.id,
            owner: item.owner,
            created_at: item.created_at,
            score: item.score,
            comment_count: item.comment_count,
            title: item.title,
            no,
            synced_at,
        }
    }
}

/// Per-owner sync bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    pub owner: String,
    /// End of the last successful pass (UTC millis). Before the first pass
    /// succeeds this is the start of the first attempt.
    pub last_synced_at: i64,
    pub last_item_id: ItemId,
    pub last_sequence: u64,
    pub item_count: u64,
    /// False until a pass for the owner has succeeded
    pub completed: bool,
}

impl SyncMetadata {
    /// Placeholder written when an owner's first pass begins, so partially
    /// committed pages are never mistaken for orphaned data.
    pub fn pending(owner: &str, started_at: i64) -> Self {
        Self {
            owner: owner.to_string(),
            last_synced_at: started_at,
            last_item_id: FROM_BEGINNING,
            last_sequence: 0,
            item_count: 0,
            completed: false,
        }
    }
}

/// Where a pass starts: fetch ids strictly greater than `start_boundary`,
/// numbering from `start_sequence + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumePoint {
    pub start_boundary: ItemId,
    pub start_sequence: u64,
}

impl ResumePoint {
    pub fn from_beginning() -> Self {
        Self {
            start_boundary: FROM_BEGINNING,
            start_sequence: 0,
        }
    }

    pub fn is_full_sync(&self) -> bool {
        self.start_boundary == FROM_BEGINNING
    }
}

/// One page request: owner, `id > after_id` in ascending id order, 1-based page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    pub owner: String,
    pub after_id: ItemId,
    pub page: u64,
    pub page_size: u32,
}

/// Count-only request over the same filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountQuery {
    pub owner: String,
    pub after_id: ItemId,
}
