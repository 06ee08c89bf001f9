//! Feedsync SDK - incremental sync of per-owner remote item collections
//!
//! Keeps a local cache of an ever-growing, remotely hosted collection in step
//! with a rate-limited, paginated query API:
//! - resumable passes that re-fetch a trailing overlap window
//! - parallel page fetches committed strictly in order, with per-owner sequence numbers
//! - client-side pacing of outbound requests per endpoint class
//! - progress callback, `watch` state and event stream for a UI
//! - reclamation of partitions nobody synced for a while
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use feedsync_sdk::{HttpRemoteConfig, HttpRemoteSource, SyncConfig, SyncEngine, SyncOutcome};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SyncConfig::builder()
//!         .data_dir("/path/to/data")
//!         .page_size(200)
//!         .concurrency(5)
//!         .build()?;
//!
//!     let remote = HttpRemoteSource::new(HttpRemoteConfig {
//!         base_url: "https://feeds.example.com/api".to_string(),
//!         ..Default::default()
//!     })?;
//!     let engine = SyncEngine::open(config, Arc::new(remote)).await?;
//!
//!     engine.progress().subscribe(|current, total, message| {
//!         println!("{}/{} {}", current, total, message);
//!     });
//!
//!     if let SyncOutcome::Completed(report) = engine.sync("alice").await? {
//!         println!("{} items cached", report.item_count);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod model;
pub mod progress;
pub mod remote;
pub mod scheduler;
pub mod storage;
pub mod sync;
pub mod version;

pub use config::{SyncConfig, SyncConfigBuilder};
pub use error::{ErrorKind, FeedSyncError, Result};
pub use model::{
    CachedItem, CountQuery, ItemId, PageQuery, RemoteItem, ResumePoint, SyncMetadata,
    FROM_BEGINNING,
};
pub use progress::{ProgressBroadcaster, ProgressCallback, ProgressState, SyncEvent, SyncLease};
pub use remote::{Fault, HttpRemoteConfig, HttpRemoteSource, MemoryRemote, RemoteSource};
pub use scheduler::{ClassPolicy, EndpointClass, FetchScheduler, SchedulerConfig, SchedulerStats};
pub use storage::{
    AggregateTable, ItemTable, KvStore, SledAggregateTable, SledItemTable, SledMetadataTable,
    StorageManager, SyncMetadataTable,
};
pub use sync::{
    OrderedCommitBuffer, PoolOutcome, ResumePointResolver, RetryPolicy, StalePartitionReaper,
    SweepReport, SyncEngine, SyncOutcome, SyncReport, SyncWorkerPool,
};
pub use version::{BUILD_TIME, SDK_VERSION};
