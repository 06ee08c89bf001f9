//! Items table: `(owner, id)` → `CachedItem`
//!
//! Ids are strictly increasing with creation time, so the key order inside a
//! partition is also creation order and sequence order.

use async_trait::async_trait;
use sled::Tree;

use super::kv::{self, KvStore};
use crate::error::{FeedSyncError, Result};
use crate::model::{CachedItem, ItemId};

pub const ITEMS_TREE: &str = "items";

#[async_trait]
pub trait ItemTable: Send + Sync {
    async fn get(&self, owner: &str, id: ItemId) -> Result<Option<CachedItem>>;

    /// Highest-id (newest) cached item of the owner.
    async fn newest(&self, owner: &str) -> Result<Option<CachedItem>>;

    /// Highest-id item whose `created_at` is strictly older than `cutoff`,
    /// scanning the partition newest-first.
    async fn last_created_before(&self, owner: &str, cutoff: i64) -> Result<Option<CachedItem>>;

    /// Number of cached items with `id <= through`.
    async fn count_through(&self, owner: &str, through: ItemId) -> Result<u64>;

    async fn count(&self, owner: &str) -> Result<u64>;

    /// Items with `from <= id <= to`, ascending.
    async fn range(&self, owner: &str, from: ItemId, to: ItemId) -> Result<Vec<CachedItem>>;

    /// Insert or overwrite in one atomic batch.
    async fn put_batch(&self, owner: &str, items: &[CachedItem]) -> Result<()>;

    async fn delete_ids(&self, owner: &str, ids: &[ItemId]) -> Result<u64>;

    async fn delete_owner(&self, owner: &str) -> Result<u64>;

    async fn owners(&self) -> Result<Vec<String>>;
}

/// sled-backed items table.
#[derive(Debug, Clone)]
pub struct SledItemTable {
    tree: Tree,
}

impl SledItemTable {
    pub fn new(kv: &KvStore) -> Result<Self> {
        Ok(Self {
            tree: kv.tree(ITEMS_TREE)?,
        })
    }

    fn key(owner: &str, id: ItemId) -> Result<Vec<u8>> {
        kv::composite_key(owner, &id.to_be_bytes())
    }

    fn decode_entry(value: &[u8]) -> Result<CachedItem> {
        kv::decode(value)
    }
}

#[async_trait]
impl ItemTable for SledItemTable {
    async fn get(&self, owner: &str, id: ItemId) -> Result<Option<CachedItem>> {
        match self.tree.get(Self::key(owner, id)?)? {
            Some(bytes) => Ok(Some(Self::decode_entry(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn newest(&self, owner: &str) -> Result<Option<CachedItem>> {
        let prefix = kv::owner_prefix(owner)?;
        match self.tree.scan_prefix(&prefix).next_back() {
            Some(entry) => {
                let (_, value) = entry?;
                Ok(Some(Self::decode_entry(&value)?))
            }
            None => Ok(None),
        }
    }

    async fn last_created_before(&self, owner: &str, cutoff: i64) -> Result<Option<CachedItem>> {
        let prefix = kv::owner_prefix(owner)?;
        for entry in self.tree.scan_prefix(&prefix).rev() {
            let (_, value) = entry?;
            let item = Self::decode_entry(&value)?;
            if item.created_at < cutoff {
                return Ok(Some(item));
            }
        }
        Ok(None)
    }

    async fn count_through(&self, owner: &str, through: ItemId) -> Result<u64> {
        let start = Self::key(owner, 0)?;
        let end = Self::key(owner, through)?;
        let mut count = 0u64;
        for entry in self.tree.range(start..=end) {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    async fn count(&self, owner: &str) -> Result<u64> {
        let prefix = kv::owner_prefix(owner)?;
        let mut count = 0u64;
        for entry in self.tree.scan_prefix(&prefix) {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    async fn range(&self, owner: &str, from: ItemId, to: ItemId) -> Result<Vec<CachedItem>> {
        if from > to {
            return Ok(Vec::new());
        }
        let start = Self::key(owner, from)?;
        let end = Self::key(owner, to)?;
        let mut items = Vec::new();
        for entry in self.tree.range(start..=end) {
            let (_, value) = entry?;
            items.push(Self::decode_entry(&value)?);
        }
        Ok(items)
    }

    async fn put_batch(&self, owner: &str, items: &[CachedItem]) -> Result<()> {
        let mut batch = sled::Batch::default();
        for item in items {
            if item.owner != owner {
                return Err(FeedSyncError::InvalidArgument(format!(
                    "item {} belongs to {}, not {}",
                    item.id, item.owner, owner
                )));
            }
            batch.insert(Self::key(owner, item.id)?, kv::encode(item)?);
        }
        self.tree.apply_batch(batch)?;
        Ok(())
    }

    async fn delete_ids(&self, owner: &str, ids: &[ItemId]) -> Result<u64> {
        let mut batch = sled::Batch::default();
        let mut removed = 0u64;
        for &id in ids {
            let key = Self::key(owner, id)?;
            if self.tree.contains_key(&key)? {
                batch.remove(key);
                removed += 1;
            }
        }
        self.tree.apply_batch(batch)?;
        Ok(removed)
    }

    async fn delete_owner(&self, owner: &str) -> Result<u64> {
        kv::remove_partition(&self.tree, owner)
    }

    async fn owners(&self) -> Result<Vec<String>> {
        kv::distinct_owners(&self.tree)
    }
}
