//! KV layer over sled
//!
//! Provides:
//! - the on-disk (or temporary) sled database and its named trees
//! - the composite `(owner, position)` key codec shared by every table
//! - compact value encoding
//! - distinct-owner enumeration over any owner-keyed tree
//!
//! Key layout: `[owner length: u16 BE][owner bytes][position bytes]`.
//! The length prefix keeps one owner's keys contiguous and never lets
//! "ab" swallow "abc", so a prefix scan on the owner part is exact and
//! sled's byte order inside a partition is the position order.

use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};
use sled::{Db, Tree};

use crate::error::{FeedSyncError, Result};

/// Owner-keyed sled database.
#[derive(Debug, Clone)]
pub struct KvStore {
    db: Db,
}

impl KvStore {
    /// Open (or create) the database under `path`.
    ///
    /// A previous handle in the same process may still hold the file lock for a
    /// moment after being dropped, so lock errors are retried with backoff.
    pub async fn open(path: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(path).await?;

        const MAX_OPEN_RETRIES: u32 = 6;
        const RETRY_DELAY_MS: u64 = 100;
        let mut attempt = 0;
        loop {
            match sled::open(path) {
                Ok(db) => return Ok(Self { db }),
                Err(e) => {
                    let msg = e.to_string();
                    let is_lock = msg.contains("could not acquire lock")
                        || msg.contains("Resource temporarily unavailable")
                        || msg.contains("WouldBlock");
                    attempt += 1;
                    if !is_lock || attempt >= MAX_OPEN_RETRIES {
                        return Err(FeedSyncError::KvStore(format!(
                            "failed to open sled database at {}: {}",
                            path.display(),
                            msg
                        )));
                    }
                    let delay = RETRY_DELAY_MS * (1 << attempt);
                    tracing::warn!(attempt, delay_ms = delay, "sled database locked, retrying");
                    tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                }
            }
        }
    }

    /// In-memory database removed on drop. Used by tests and demos.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    pub fn tree(&self, name: &str) -> Result<Tree> {
        Ok(self.db.open_tree(name)?)
    }

    pub async fn flush(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }
}

/// Owner part of every key.
pub fn owner_prefix(owner: &str) -> Result<Vec<u8>> {
    let bytes = owner.as_bytes();
    let len = u16::try_from(bytes.len())
        .map_err(|_| FeedSyncError::InvalidArgument(format!("owner too long: {} bytes", bytes.len())))?;
    if bytes.is_empty() {
        return Err(FeedSyncError::InvalidArgument("owner must not be empty".to_string()));
    }
    let mut key = Vec::with_capacity(2 + bytes.len() + 8);
    key.extend_from_slice(&len.to_be_bytes());
    key.extend_from_slice(bytes);
    Ok(key)
}

/// `(owner, position)` key.
pub fn composite_key(owner: &str, position: &[u8]) -> Result<Vec<u8>> {
    let mut key = owner_prefix(owner)?;
    key.extend_from_slice(position);
    Ok(key)
}

/// Split a composite key back into owner and position bytes.
pub fn split_key(key: &[u8]) -> Result<(String, &[u8])> {
    if key.len() < 2 {
        return Err(FeedSyncError::KvStore("truncated key".to_string()));
    }
    let len = u16::from_be_bytes([key[0], key[1]]) as usize;
    let end = 2 + len;
    if key.len() < end {
        return Err(FeedSyncError::KvStore("truncated owner in key".to_string()));
    }
    let owner = std::str::from_utf8(&key[2..end])
        .map_err(|e| FeedSyncError::KvStore(format!("owner is not utf-8: {}", e)))?
        .to_string();
    Ok((owner, &key[end..]))
}

/// Smallest key greater than every key starting with `prefix`.
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut next = prefix.to_vec();
    while let Some(last) = next.pop() {
        if last < u8::MAX {
            next.push(last + 1);
            return Some(next);
        }
    }
    None
}

/// Every distinct owner in an owner-keyed tree, skipping from partition to partition.
pub fn distinct_owners(tree: &Tree) -> Result<Vec<String>> {
    let mut owners = Vec::new();
    let mut cursor: Vec<u8> = Vec::new();
    loop {
        let Some(entry) = tree.range(cursor.clone()..).next() else {
            break;
        };
        let (key, _) = entry?;
        let (owner, _) = split_key(&key)?;
        let prefix = owner_prefix(&owner)?;
        owners.push(owner);
        match prefix_successor(&prefix) {
            Some(next) => cursor = next,
            None => break,
        }
    }
    Ok(owners)
}

/// Remove every key of one owner from a tree, returning how many were removed.
pub fn remove_partition(tree: &Tree, owner: &str) -> Result<u64> {
    let prefix = owner_prefix(owner)?;
    let mut batch = sled::Batch::default();
    let mut removed = 0u64;
    for entry in tree.scan_prefix(&prefix) {
        let (key, _) = entry?;
        batch.remove(key);
        removed += 1;
    }
    tree.apply_batch(batch)?;
    Ok(removed)
}

pub fn encode<V: Serialize>(value: &V) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

pub fn decode<V: DeserializeOwned>(bytes: &[u8]) -> Result<V> {
    Ok(bincode::deserialize(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn owner_prefix_is_exact() {
        let ab = composite_key("ab", &1u64.to_be_bytes()).unwrap();
        let abc_prefix = owner_prefix("abc").unwrap();
        assert!(!ab.starts_with(&abc_prefix));
        let (owner, position) = split_key(&ab).unwrap();
        assert_eq!(owner, "ab");
        assert_eq!(position, &1u64.to_be_bytes());
    }

    #[test]
    fn empty_owner_is_rejected() {
        assert!(matches!(owner_prefix(""), Err(FeedSyncError::InvalidArgument(_))));
    }

    #[test]
    fn successor_skips_trailing_max_bytes() {
        assert_eq!(prefix_successor(&[1, 2]), Some(vec![1, 3]));
        assert_eq!(prefix_successor(&[1, 0xFF]), Some(vec![2]));
        assert_eq!(prefix_successor(&[0xFF, 0xFF]), None);
    }

    #[test]
    fn distinct_owners_and_partition_removal() {
        let kv = KvStore::temporary().unwrap();
        let tree = kv.tree("t").unwrap();
        for owner in ["bob", "alice", "alicia"] {
            for id in 1..=3u64 {
                tree.insert(composite_key(owner, &id.to_be_bytes()).unwrap(), vec![0u8])
                    .unwrap();
            }
        }
        let mut owners = distinct_owners(&tree).unwrap();
        owners.sort();
        assert_eq!(owners, vec!["alice", "alicia", "bob"]);

        assert_eq!(remove_partition(&tree, "alice").unwrap(), 3);
        let mut owners = distinct_owners(&tree).unwrap();
        owners.sort();
        assert_eq!(owners, vec!["alicia", "bob"]);
    }

    #[tokio::test]
    async fn open_on_disk_persists_trees() {
        let temp_dir = TempDir::new().unwrap();
        {
            let kv = KvStore::open(temp_dir.path()).await.unwrap();
            kv.tree("items").unwrap().insert(b"k", b"v".to_vec()).unwrap();
            kv.flush().await.unwrap();
        }
        let kv = KvStore::open(temp_dir.path()).await.unwrap();
        let value = kv.tree("items").unwrap().get(b"k").unwrap();
        assert_eq!(value.as_deref(), Some(&b"v"[..]));
    }
}
