//! Cache Engine Boundary
//!
//! The router never stores data itself. Execution, caching, deduplication,
//! retry and invalidation belong to a `CacheEngine`; the router only computes
//! the keys and filters that drive it.

use crate::error::CacheError;
use crate::key::{KeyFilter, QueryKey};
use crate::types::{AnyValue, Fetcher, Mutator, OperationFailure};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

pub mod memory;

pub use memory::MemoryEngine;

/// Settled status of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// Never fetched successfully or unsuccessfully
    Idle,
    Success,
    Error,
}

/// Engine-side options, passed through the router unmodified
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    /// When false the engine reports the current entry and does not fetch
    pub enabled: bool,
    /// Age after which cached data is refetched; `None` uses the engine default
    pub stale_time: Option<Duration>,
    /// Extra attempts after a failure; `None` uses the engine default
    pub retry: Option<u32>,
    /// Fetch even when fresh data is cached
    pub force: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        FetchOptions {
            enabled: true,
            stale_time: None,
            retry: None,
            force: false,
        }
    }
}

/// Engine-side mutation options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationSettings {
    pub retry: Option<u32>,
}

/// Point-in-time view of one cache entry
#[derive(Debug, Clone)]
pub struct EntrySnapshot {
    pub status: QueryStatus,
    pub data: Option<AnyValue>,
    pub error: Option<OperationFailure>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Number of settled fetches for this key, retries included in one
    pub fetch_count: u32,
    /// A fetch for this key is currently in flight
    pub is_fetching: bool,
    pub invalidated: bool,
}

impl EntrySnapshot {
    pub fn idle() -> Self {
        EntrySnapshot {
            status: QueryStatus::Idle,
            data: None,
            error: None,
            updated_at: None,
            fetch_count: 0,
            is_fetching: false,
            invalidated: false,
        }
    }
}

/// Key-addressed cache that executes fetchers and mutators
#[async_trait]
pub trait CacheEngine: Send + Sync {
    /// Serve `key` from cache or run `fetcher`, returning the settled entry.
    async fn run_query(
        &self,
        key: QueryKey,
        fetcher: Fetcher,
        options: FetchOptions,
    ) -> Result<EntrySnapshot, CacheError>;

    /// Run `mutator` with `variables`. User failures come back as
    /// `CacheError::Operation`.
    async fn run_mutation(
        &self,
        mutator: Mutator,
        variables: AnyValue,
        settings: MutationSettings,
    ) -> Result<AnyValue, CacheError>;

    fn get_query_data(&self, key: &QueryKey) -> Option<AnyValue>;

    /// Store `data` under `key` without fetching.
    fn set_query_data(&self, key: QueryKey, data: AnyValue);

    fn query_state(&self, key: &QueryKey) -> Option<EntrySnapshot>;

    /// Abort in-flight fetches matching `filter`; returns how many were aborted.
    async fn cancel_queries(&self, filter: KeyFilter) -> usize;

    /// Mark matching entries and fetches in flight stale; returns how many
    /// keys were marked.
    async fn invalidate_queries(&self, filter: KeyFilter) -> usize;
}
