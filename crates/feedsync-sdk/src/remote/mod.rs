//! Remote query API
//!
//! The engine talks to the remote through [`RemoteSource`] only. Two adapters
//! ship with the SDK:
//! - [`HttpRemoteSource`] - JSON over HTTP (reqwest)
//! - [`MemoryRemote`] - in-process fixture with latency jitter and fault injection

pub mod http;
pub mod memory;

use async_trait::async_trait;

pub use http::{HttpRemoteConfig, HttpRemoteSource};
pub use memory::{Fault, MemoryRemote};

use crate::error::Result;
use crate::model::{CountQuery, PageQuery, RemoteItem};

#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// One page of items matching the query. An empty vec means end of data.
    async fn fetch_page(&self, query: &PageQuery) -> Result<Vec<RemoteItem>>;

    /// Number of items matching the filter, without fetching them.
    async fn count(&self, query: &CountQuery) -> Result<u64>;
}
