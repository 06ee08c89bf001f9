//! Derived aggregate cache: `(owner, name)` → JSON blob
//!
//! Readers (statistics views) park computed results here, e.g. under
//! `daily:2024-05-01`. The sync engine only invalidates and reclaims them.

use async_trait::async_trait;
use sled::Tree;

use super::kv::{self, KvStore};
use crate::error::Result;

pub const AGGREGATES_TREE: &str = "aggregates";

#[async_trait]
pub trait AggregateTable: Send + Sync {
    async fn get(&self, owner: &str, name: &str) -> Result<Option<serde_json::Value>>;
    async fn put(&self, owner: &str, name: &str, value: &serde_json::Value) -> Result<()>;
    /// Names cached for the owner, in key order.
    async fn names(&self, owner: &str) -> Result<Vec<String>>;
    async fn delete_owner(&self, owner: &str) -> Result<u64>;
    async fn owners(&self) -> Result<Vec<String>>;
}

#[derive(Debug, Clone)]
pub struct SledAggregateTable {
    tree: Tree,
}

impl SledAggregateTable {
    pub fn new(kv: &KvStore) -> Result<Self> {
        Ok(Self {
            tree: kv.tree(AGGREGATES_TREE)?,
        })
    }
}

#[async_trait]
impl AggregateTable for SledAggregateTable {
    async fn get(&self, owner: &str, name: &str) -> Result<Option<serde_json::Value>> {
        match self.tree.get(kv::composite_key(owner, name.as_bytes())?)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, owner: &str, name: &str, value: &serde_json::Value) -> Result<()> {
        self.tree.insert(
            kv::composite_key(owner, name.as_bytes())?,
            serde_json::to_vec(value)?,
        )?;
        Ok(())
    }

    async fn names(&self, owner: &str) -> Result<Vec<String>> {
        let prefix = kv::owner_prefix(owner)?;
        let mut names = Vec::new();
        for entry in self.tree.scan_prefix(&prefix) {
            let (key, _) = entry?;
            let (_, name) = kv::split_key(&key)?;
            names.push(String::from_utf8_lossy(name).into_owned());
        }
        Ok(names)
    }

    async fn delete_owner(&self, owner: &str) -> Result<u64> {
        kv::remove_partition(&self.tree, owner)
    }

    async fn owners(&self) -> Result<Vec<String>> {
        kv::distinct_owners(&self.tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn aggregates_are_partitioned_by_owner() {
        let table = SledAggregateTable::new(&KvStore::temporary().unwrap()).unwrap();
        table.put("alice", "daily:2024-05-01", &json!({"items": 3})).await.unwrap();
        table.put("alice", "daily:2024-05-02", &json!({"items": 1})).await.unwrap();
        table.put("bob", "daily:2024-05-01", &json!({"items": 7})).await.unwrap();

        assert_eq!(
            table.get("alice", "daily:2024-05-01").await.unwrap(),
            Some(json!({"items": 3}))
        );
        assert_eq!(
            table.names("alice").await.unwrap(),
            vec!["daily:2024-05-01", "daily:2024-05-02"]
        );

        assert_eq!(table.delete_owner("alice").await.unwrap(), 2);
        assert!(table.get("alice", "daily:2024-05-01").await.unwrap().is_none());
        assert_eq!(table.owners().await.unwrap(), vec!["bob".to_string()]);
    }
}
