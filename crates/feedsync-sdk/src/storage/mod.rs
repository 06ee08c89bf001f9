//! Local cache storage
//!
//! One sled database, one trait per logical table:
//! - [`ItemTable`] - cached items keyed by `(owner, id)`
//! - [`SyncMetadataTable`] - per-owner sync bookkeeping
//! - [`AggregateTable`] - derived caches keyed by `(owner, name)`
//!
//! Tables are chosen when the [`StorageManager`] is built; callers only see
//! the traits, so another backend can be slotted in without touching the
//! sync engine.

pub mod aggregates;
pub mod items;
pub mod kv;
pub mod metadata;

use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use aggregates::{AggregateTable, SledAggregateTable};
pub use items::{ItemTable, SledItemTable};
pub use kv::KvStore;
pub use metadata::{SledMetadataTable, SyncMetadataTable};

use crate::error::Result;

/// Bundle of the table handles the engine works with.
#[derive(Clone)]
pub struct StorageManager {
    base_path: Option<PathBuf>,
    kv: KvStore,
    items: Arc<dyn ItemTable>,
    metadata: Arc<dyn SyncMetadataTable>,
    aggregates: Arc<dyn AggregateTable>,
}

impl StorageManager {
    /// Open the cache under `{base_path}/cache`.
    pub async fn open(base_path: &Path) -> Result<Self> {
        let kv = KvStore::open(&base_path.join("cache")).await?;
        tracing::info!(path = %base_path.display(), "cache storage opened");
        Self::from_kv(kv, Some(base_path.to_path_buf()))
    }

    /// Throwaway in-memory cache.
    pub fn temporary() -> Result<Self> {
        Self::from_kv(KvStore::temporary()?, None)
    }

    fn from_kv(kv: KvStore, base_path: Option<PathBuf>) -> Result<Self> {
        Ok(Self {
            items: Arc::new(SledItemTable::new(&kv)?),
            metadata: Arc::new(SledMetadataTable::new(&kv)?),
            aggregates: Arc::new(SledAggregateTable::new(&kv)?),
            base_path,
            kv,
        })
    }

    pub fn items(&self) -> Arc<dyn ItemTable> {
        self.items.clone()
    }

    pub fn metadata(&self) -> Arc<dyn SyncMetadataTable> {
        self.metadata.clone()
    }

    pub fn aggregates(&self) -> Arc<dyn AggregateTable> {
        self.aggregates.clone()
    }

    pub fn base_path(&self) -> Option<&Path> {
        self.base_path.as_deref()
    }

    pub async fn flush(&self) -> Result<()> {
        self.kv.flush().await
    }

    /// Drop every trace of one owner. Returns the number of items removed.
    pub async fn purge_owner(&self, owner: &str) -> Result<u64> {
        let removed = self.items.delete_owner(owner).await?;
        self.aggregates.delete_owner(owner).await?;
        self.metadata.delete(owner).await?;
        Ok(removed)
    }
}
