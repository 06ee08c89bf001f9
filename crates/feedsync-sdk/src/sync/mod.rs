//! Incremental synchronization
//!
//! - [`ResumePointResolver`]: where a pass starts
//! - [`SyncWorkerPool`]: parallel fetch, ordered commit, sequence numbers
//! - [`StalePartitionReaper`]: reclaims partitions past retention
//! - [`SyncEngine`]: one pass end to end, behind a single-flight guard

pub mod commit_buffer;
pub mod engine;
pub mod pool;
pub mod reaper;
pub mod resume;
pub mod retry;

pub use commit_buffer::{OrderedCommitBuffer, SequenceCursor};
pub use engine::{SyncEngine, SyncOutcome, SyncReport};
pub use pool::{PassContext, PoolOutcome, PoolSettings, SyncWorkerPool};
pub use reaper::{StalePartitionReaper, SweepReport};
pub use resume::ResumePointResolver;
pub use retry::RetryPolicy;
