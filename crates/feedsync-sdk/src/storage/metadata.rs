//! Sync metadata table: `owner` → `SyncMetadata`

use async_trait::async_trait;
use sled::Tree;

use super::kv::{self, KvStore};
use crate::error::Result;
use crate::model::SyncMetadata;

pub const SYNC_META_TREE: &str = "sync_meta";

#[async_trait]
pub trait SyncMetadataTable: Send + Sync {
    async fn get(&self, owner: &str) -> Result<Option<SyncMetadata>>;
    async fn put(&self, metadata: &SyncMetadata) -> Result<()>;
    async fn delete(&self, owner: &str) -> Result<bool>;
    async fn owners(&self) -> Result<Vec<String>>;
}

#[derive(Debug, Clone)]
pub struct SledMetadataTable {
    tree: Tree,
}

impl SledMetadataTable {
    pub fn new(kv: &KvStore) -> Result<Self> {
        Ok(Self {
            tree: kv.tree(SYNC_META_TREE)?,
        })
    }
}

#[async_trait]
impl SyncMetadataTable for SledMetadataTable {
    async fn get(&self, owner: &str) -> Result<Option<SyncMetadata>> {
        match self.tree.get(kv::owner_prefix(owner)?)? {
            Some(bytes) => Ok(Some(kv::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, metadata: &SyncMetadata) -> Result<()> {
        self.tree
            .insert(kv::owner_prefix(&metadata.owner)?, kv::encode(metadata)?)?;
        Ok(())
    }

    async fn delete(&self, owner: &str) -> Result<bool> {
        Ok(self.tree.remove(kv::owner_prefix(owner)?)?.is_some())
    }

    async fn owners(&self) -> Result<Vec<String>> {
        kv::distinct_owners(&self.tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn metadata_roundtrip_and_delete() {
        let table = SledMetadataTable::new(&KvStore::temporary().unwrap()).unwrap();
        assert!(table.get("alice").await.unwrap().is_none());

        let meta = SyncMetadata {
            owner: "alice".to_string(),
            last_synced_at: 1_700_000_000_000,
            last_item_id: 733,
            last_sequence: 733,
            item_count: 733,
            completed: true,
        };
        table.put(&meta).await.unwrap();
        assert_eq!(table.get("alice").await.unwrap(), Some(meta));
        assert_eq!(table.owners().await.unwrap(), vec!["alice".to_string()]);

        assert!(table.delete("alice").await.unwrap());
        assert!(!table.delete("alice").await.unwrap());
        assert!(table.owners().await.unwrap().is_empty());
    }
}
