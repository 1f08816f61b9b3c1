//! In-memory cache engine.
//!
//! Entries are indexed by prefix, then by the canonical suffix fingerprint.
//! Fetches in flight are `Shared` so concurrent callers for one key join a
//! single fetch, and `Abortable` so `cancel_queries` can stop them. Locks are
//! never held across an `.await`. When both are needed, `in_flight` is taken
//! before `entries`.
//!
//! Invalidating a key whose fetch is in flight marks the fetch; its data is
//! stored already invalidated, so the next run fetches again.

use crate::config::EngineConfig;
use crate::engine::{CacheEngine, EntrySnapshot, FetchOptions, MutationSettings, QueryStatus};
use crate::error::CacheError;
use crate::key::{KeyFilter, QueryKey, QueryPrefix};
use crate::types::{AnyValue, FetchFuture, Fetcher, Mutator, OperationFailure};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{AbortHandle, Abortable, Aborted, BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

type FetchOutcome = Result<Result<AnyValue, OperationFailure>, Aborted>;
type SharedFetch = Shared<BoxFuture<'static, FetchOutcome>>;
type Slot = (QueryPrefix, String);

struct CacheEntry {
    key: QueryKey,
    status: QueryStatus,
    data: Option<AnyValue>,
    error: Option<OperationFailure>,
    updated_at: Option<DateTime<Utc>>,
    fetched_at: Option<Instant>,
    fetch_count: u32,
    invalidated: bool,
}

impl CacheEntry {
    fn new(key: QueryKey) -> Self {
        CacheEntry {
            key,
            status: QueryStatus::Idle,
            data: None,
            error: None,
            updated_at: None,
            fetched_at: None,
            fetch_count: 0,
            invalidated: false,
        }
    }

    fn store(&mut self, data: AnyValue) {
        self.status = QueryStatus::Success;
        self.data = Some(data);
        self.error = None;
        self.updated_at = Some(Utc::now());
        self.fetched_at = Some(Instant::now());
        self.invalidated = false;
    }

    fn is_fresh(&self, stale_time: Option<Duration>) -> bool {
        if self.status != QueryStatus::Success || self.invalidated {
            return false;
        }
        match (stale_time, self.fetched_at) {
            (None, _) => true,
            (Some(stale_time), Some(fetched_at)) => fetched_at.elapsed() < stale_time,
            (Some(_), None) => false,
        }
    }

    fn snapshot(&self, is_fetching: bool) -> EntrySnapshot {
        EntrySnapshot {
            status: self.status,
            data: self.data.clone(),
            error: self.error.clone(),
            updated_at: self.updated_at,
            fetch_count: self.fetch_count,
            is_fetching,
            invalidated: self.invalidated,
        }
    }
}

struct InFlight {
    id: u64,
    key: QueryKey,
    abort: AbortHandle,
    result: SharedFetch,
    /// Invalidated after this fetch started
    invalidated: bool,
}

struct Inner {
    config: EngineConfig,
    entries: RwLock<HashMap<QueryPrefix, HashMap<String, CacheEntry>>>,
    in_flight: Mutex<HashMap<Slot, InFlight>>,
    next_fetch_id: AtomicU64,
}

/// Thread-safe in-memory `CacheEngine`
#[derive(Clone)]
pub struct MemoryEngine {
    inner: Arc<Inner>,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::with_config(&EngineConfig::default())
    }

    pub fn with_config(config: &EngineConfig) -> Self {
        MemoryEngine {
            inner: Arc::new(Inner {
                config: config.clone(),
                entries: RwLock::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                next_fetch_id: AtomicU64::new(0),
            }),
        }
    }

    /// Number of cached entries across all prefixes.
    pub fn len(&self) -> usize {
        self.inner.entries.read().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight_len(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    /// Drop every entry and abort every fetch in flight.
    pub fn clear(&self) {
        for (_, fetch) in self.inner.in_flight.lock().drain() {
            fetch.abort.abort();
        }
        self.inner.entries.write().clear();
    }
}

impl Inner {
    fn snapshot(&self, prefix: &QueryPrefix, fingerprint: &str) -> Option<EntrySnapshot> {
        let is_fetching = self
            .in_flight
            .lock()
            .contains_key(&(prefix.clone(), fingerprint.to_string()));
        self.entries
            .read()
            .get(prefix)
            .and_then(|by_suffix| by_suffix.get(fingerprint))
            .map(|entry| entry.snapshot(is_fetching))
    }

    fn fresh_snapshot(
        &self,
        prefix: &QueryPrefix,
        fingerprint: &str,
        stale_time: Option<Duration>,
    ) -> Option<EntrySnapshot> {
        let is_fetching = self
            .in_flight
            .lock()
            .contains_key(&(prefix.clone(), fingerprint.to_string()));
        self.entries
            .read()
            .get(prefix)
            .and_then(|by_suffix| by_suffix.get(fingerprint))
            .filter(|entry| entry.is_fresh(stale_time))
            .map(|entry| entry.snapshot(is_fetching))
    }

    /// Join the fetch in flight for `key`, or start one.
    fn join_or_start(
        self: &Arc<Self>,
        key: &QueryKey,
        fingerprint: String,
        fetcher: Fetcher,
        retry: u32,
    ) -> SharedFetch {
        let slot = (key.prefix().clone(), fingerprint);
        let mut in_flight = self.in_flight.lock();
        if let Some(existing) = in_flight.get(&slot) {
            debug!(key = %key, "Joining fetch in flight");
            return existing.result.clone();
        }

        let id = self.next_fetch_id.fetch_add(1, Ordering::SeqCst);
        let (abort, registration) = AbortHandle::new_pair();
        let label = key.to_string();
        let attempts = Abortable::new(
            with_retry(retry, label, move || fetcher()),
            registration,
        );

        let inner = Arc::clone(self);
        let settled_key = key.clone();
        let settled_slot = slot.clone();
        let result = async move {
            let outcome = attempts.await;
            inner.settle(id, &settled_key, &settled_slot, &outcome);
            outcome
        }
        .boxed()
        .shared();

        in_flight.insert(
            slot,
            InFlight {
                id,
                key: key.clone(),
                abort,
                result: result.clone(),
                invalidated: false,
            },
        );
        result
    }

    fn settle(&self, id: u64, key: &QueryKey, slot: &Slot, outcome: &FetchOutcome) {
        // Held until the entry is written so an invalidation cannot slip
        // between removing the slot and storing the data.
        let mut in_flight = self.in_flight.lock();
        let current = in_flight.get(slot).map_or(false, |fetch| fetch.id == id);
        let invalidated = current && in_flight.remove(slot).map_or(false, |fetch| fetch.invalidated);

        let result = match outcome {
            Ok(result) => result,
            Err(Aborted) => {
                debug!(key = %key, "Fetch cancelled");
                return;
            }
        };

        let mut entries = self.entries.write();
        drop(in_flight);
        let entry = entries
            .entry(slot.0.clone())
            .or_default()
            .entry(slot.1.clone())
            .or_insert_with(|| CacheEntry::new(key.clone()));
        entry.fetch_count += 1;
        match result {
            Ok(data) => {
                entry.store(Arc::clone(data));
                entry.invalidated = invalidated;
                debug!(key = %key, fetch_count = entry.fetch_count, invalidated, "Query fetched");
            }
            Err(failure) => {
                // Previous data stays available alongside the error.
                entry.status = QueryStatus::Error;
                entry.error = Some(failure.clone());
                entry.invalidated |= invalidated;
                debug!(key = %key, error = %failure, "Query failed");
            }
        }
    }
}

async fn with_retry<F>(retry: u32, label: String, mut attempt: F) -> Result<AnyValue, OperationFailure>
where
    F: FnMut() -> FetchFuture,
{
    let mut failures = 0;
    loop {
        match attempt().await {
            Ok(data) => return Ok(data),
            Err(failure) if failures < retry => {
                failures += 1;
                warn!(
                    target_key = %label,
                    attempt = failures,
                    retry,
                    error = %failure,
                    "Attempt failed, retrying"
                );
            }
            Err(failure) => return Err(failure),
        }
    }
}

#[async_trait]
impl CacheEngine for MemoryEngine {
    async fn run_query(
        &self,
        key: QueryKey,
        fetcher: Fetcher,
        options: FetchOptions,
    ) -> Result<EntrySnapshot, CacheError> {
        let fingerprint = key.fingerprint();

        if !options.enabled {
            return Ok(self
                .inner
                .snapshot(key.prefix(), &fingerprint)
                .unwrap_or_else(EntrySnapshot::idle));
        }

        if !options.force {
            let stale_time = options.stale_time.or_else(|| self.inner.config.stale_time());
            if let Some(snapshot) = self.inner.fresh_snapshot(key.prefix(), &fingerprint, stale_time) {
                debug!(key = %key, "Serving query from cache");
                return Ok(snapshot);
            }
        }

        let retry = options.retry.unwrap_or(self.inner.config.retry);
        let fetch = self.inner.join_or_start(&key, fingerprint.clone(), fetcher, retry);
        match fetch.await {
            Ok(_) => Ok(self
                .inner
                .snapshot(key.prefix(), &fingerprint)
                .unwrap_or_else(EntrySnapshot::idle)),
            Err(Aborted) => Err(CacheError::Cancelled(key.prefix().clone())),
        }
    }

    async fn run_mutation(
        &self,
        mutator: Mutator,
        variables: AnyValue,
        settings: MutationSettings,
    ) -> Result<AnyValue, CacheError> {
        let retry = settings.retry.unwrap_or(0);
        with_retry(retry, "mutation".to_string(), || mutator(Arc::clone(&variables)))
            .await
            .map_err(CacheError::Operation)
    }

    fn get_query_data(&self, key: &QueryKey) -> Option<AnyValue> {
        self.inner
            .entries
            .read()
            .get(key.prefix())
            .and_then(|by_suffix| by_suffix.get(&key.fingerprint()))
            .and_then(|entry| entry.data.clone())
    }

    fn set_query_data(&self, key: QueryKey, data: AnyValue) {
        let fingerprint = key.fingerprint();
        let mut entries = self.inner.entries.write();
        entries
            .entry(key.prefix().clone())
            .or_default()
            .entry(fingerprint)
            .or_insert_with(|| CacheEntry::new(key.clone()))
            .store(data);
        debug!(key = %key, "Query data set");
    }

    fn query_state(&self, key: &QueryKey) -> Option<EntrySnapshot> {
        self.inner.snapshot(key.prefix(), &key.fingerprint())
    }

    async fn cancel_queries(&self, filter: KeyFilter) -> usize {
        let mut in_flight = self.inner.in_flight.lock();
        let matching: Vec<Slot> = in_flight
            .iter()
            .filter(|(_, fetch)| filter.matches(&fetch.key))
            .map(|(slot, _)| slot.clone())
            .collect();
        for slot in &matching {
            if let Some(fetch) = in_flight.remove(slot) {
                fetch.abort.abort();
            }
        }
        debug!(prefix = %filter.prefix, cancelled = matching.len(), "Queries cancelled");
        matching.len()
    }

    async fn invalidate_queries(&self, filter: KeyFilter) -> usize {
        let mut in_flight = self.inner.in_flight.lock();
        let mut entries = self.inner.entries.write();
        let mut marked: HashSet<String> = HashSet::new();

        for ((_, fingerprint), fetch) in in_flight.iter_mut() {
            if filter.matches(&fetch.key) {
                fetch.invalidated = true;
                marked.insert(fingerprint.clone());
            }
        }
        if let Some(by_suffix) = entries.get_mut(&filter.prefix) {
            for (fingerprint, entry) in by_suffix.iter_mut() {
                if filter.matches(&entry.key) {
                    entry.invalidated = true;
                    marked.insert(fingerprint.clone());
                }
            }
        }

        let invalidated = marked.len();
        debug!(prefix = %filter.prefix, invalidated, "Queries invalidated");
        invalidated
    }
}
