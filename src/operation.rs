//! Operation Wrapper
//!
//! `Query` and `Mutation` wrap one user-supplied async function each. On
//! invocation they hand the engine a fetcher (or mutator) that multiplexes the
//! per-call lifecycle callbacks around the function: `on_success` or
//! `on_error` first, then `on_settled`, exactly once per attempt. Failures are
//! always handed back to the engine so its own error state observes them.

use crate::engine::{CacheEngine, EntrySnapshot, FetchOptions, MutationSettings, QueryStatus};
use crate::error::{CacheError, MutationError};
use crate::key::{QueryKey, QueryPrefix};
use crate::types::{AnyValue, Fetcher, Mutator, OperationFailure, Signature};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

type RunFn<A, R, E> = Arc<dyn Fn(A) -> BoxFuture<'static, Result<R, E>> + Send + Sync>;

/// Read operation: `A -> Result<R, E>`, cache-addressable once composed
pub struct Query<A, R, E> {
    run: RunFn<A, R, E>,
}

impl<A, R, E> Clone for Query<A, R, E> {
    fn clone(&self) -> Self {
        Query {
            run: Arc::clone(&self.run),
        }
    }
}

impl<A, R, E> Query<A, R, E>
where
    A: Serialize + Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
    E: fmt::Display + Send + Sync + 'static,
{
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        Query {
            run: Arc::new(move |args| f(args).boxed()),
        }
    }

    pub fn signature() -> Signature {
        Signature::of::<A, R, E>()
    }

    /// Run the query under an explicit prefix.
    ///
    /// Composed routers call this through `BoundQuery::invoke`, which supplies
    /// the prefix assigned at composition time.
    pub async fn invoke(
        &self,
        engine: &dyn CacheEngine,
        prefix: QueryPrefix,
        args: A,
        options: QueryOptions<R, E>,
    ) -> Result<QueryState<R, E>, CacheError> {
        let key = QueryKey::new(prefix, &args)?;
        let QueryOptions { fetch, callbacks } = options;
        debug!(key = %key, force = fetch.force, enabled = fetch.enabled, "Invoking query");

        let fetcher = self.fetcher(args, callbacks);
        let snapshot = engine.run_query(key.clone(), fetcher, fetch).await?;
        QueryState::from_snapshot(&key, snapshot)
    }

    fn fetcher(&self, args: A, callbacks: QueryCallbacks<R, E>) -> Fetcher {
        let run = Arc::clone(&self.run);
        Arc::new(move || {
            let attempt = run(args.clone());
            let callbacks = callbacks.clone();
            async move {
                match attempt.await {
                    Ok(data) => {
                        callbacks.succeeded(&data);
                        Ok(Arc::new(data) as AnyValue)
                    }
                    Err(error) => {
                        callbacks.failed(&error);
                        Err(OperationFailure::new(error))
                    }
                }
            }
            .boxed()
        })
    }
}

struct QueryCallbacks<R, E> {
    on_success: Option<Arc<dyn Fn(&R) + Send + Sync>>,
    on_error: Option<Arc<dyn Fn(&E) + Send + Sync>>,
    on_settled: Option<Arc<dyn Fn(Option<&R>, Option<&E>) + Send + Sync>>,
}

impl<R, E> Clone for QueryCallbacks<R, E> {
    fn clone(&self) -> Self {
        QueryCallbacks {
            on_success: self.on_success.clone(),
            on_error: self.on_error.clone(),
            on_settled: self.on_settled.clone(),
        }
    }
}

impl<R, E> QueryCallbacks<R, E> {
    fn succeeded(&self, data: &R) {
        if let Some(on_success) = &self.on_success {
            on_success(data);
        }
        if let Some(on_settled) = &self.on_settled {
            on_settled(Some(data), None);
        }
    }

    fn failed(&self, error: &E) {
        if let Some(on_error) = &self.on_error {
            on_error(error);
        }
        if let Some(on_settled) = &self.on_settled {
            on_settled(None, Some(error));
        }
    }
}

/// Per-call query options: engine pass-through plus lifecycle callbacks
pub struct QueryOptions<R, E> {
    pub fetch: FetchOptions,
    callbacks: QueryCallbacks<R, E>,
}

impl<R, E> Default for QueryOptions<R, E> {
    fn default() -> Self {
        QueryOptions {
            fetch: FetchOptions::default(),
            callbacks: QueryCallbacks {
                on_success: None,
                on_error: None,
                on_settled: None,
            },
        }
    }
}

impl<R, E> QueryOptions<R, E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.fetch.enabled = enabled;
        self
    }

    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.fetch.stale_time = Some(stale_time);
        self
    }

    pub fn retry(mut self, retry: u32) -> Self {
        self.fetch.retry = Some(retry);
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.fetch.force = force;
        self
    }

    pub fn on_success(mut self, f: impl Fn(&R) + Send + Sync + 'static) -> Self {
        self.callbacks.on_success = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&E) + Send + Sync + 'static) -> Self {
        self.callbacks.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_settled(mut self, f: impl Fn(Option<&R>, Option<&E>) + Send + Sync + 'static) -> Self {
        self.callbacks.on_settled = Some(Arc::new(f));
        self
    }
}

/// Typed view of a settled cache entry
#[derive(Debug, Clone)]
pub struct QueryState<R, E> {
    pub status: QueryStatus,
    pub data: Option<R>,
    pub error: Option<Arc<E>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub fetch_count: u32,
    pub is_invalidated: bool,
}

impl<R, E> QueryState<R, E>
where
    R: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    pub(crate) fn from_snapshot(key: &QueryKey, snapshot: EntrySnapshot) -> Result<Self, CacheError> {
        let data = match snapshot.data {
            Some(value) => Some(downcast_data::<R>(value, key)?),
            None => None,
        };
        let error = match snapshot.error {
            Some(failure) => Some(
                failure
                    .downcast::<E>()
                    .ok_or_else(|| CacheError::StoredTypeMismatch(key.to_string()))?,
            ),
            None => None,
        };
        Ok(QueryState {
            status: snapshot.status,
            data,
            error,
            updated_at: snapshot.updated_at,
            fetch_count: snapshot.fetch_count,
            is_invalidated: snapshot.invalidated,
        })
    }

    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Error
    }

    pub fn is_idle(&self) -> bool {
        self.status == QueryStatus::Idle
    }
}

pub(crate) fn downcast_data<R>(value: AnyValue, key: &QueryKey) -> Result<R, CacheError>
where
    R: Clone + Send + Sync + 'static,
{
    value
        .downcast::<R>()
        .map(|data| (*data).clone())
        .map_err(|_| CacheError::StoredTypeMismatch(key.to_string()))
}

/// Write operation: `V -> Result<R, E>`, never cache-addressed
pub struct Mutation<V, R, E> {
    run: RunFn<V, R, E>,
}

impl<V, R, E> Clone for Mutation<V, R, E> {
    fn clone(&self) -> Self {
        Mutation {
            run: Arc::clone(&self.run),
        }
    }
}

impl<V, R, E> Mutation<V, R, E>
where
    V: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
    E: fmt::Display + Send + Sync + 'static,
{
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        Mutation {
            run: Arc::new(move |variables| f(variables).boxed()),
        }
    }

    pub fn signature() -> Signature {
        Signature::of::<V, R, E>()
    }

    /// Bind the mutation to an engine, returning a handle that tracks the
    /// outcome of its latest `mutate` call.
    pub fn invoke(
        &self,
        engine: Arc<dyn CacheEngine>,
        options: MutationOptions<V, R, E>,
    ) -> MutationHandle<V, R, E> {
        MutationHandle {
            mutation: self.clone(),
            engine,
            options,
            state: Mutex::new(MutationState::default()),
        }
    }

    fn mutator(&self) -> Mutator {
        let run = Arc::clone(&self.run);
        Arc::new(move |variables: AnyValue| {
            let run = Arc::clone(&run);
            async move {
                let variables = variables
                    .downcast::<V>()
                    .map_err(|_| OperationFailure::new("mutation variables have an unexpected type"))?;
                run((*variables).clone())
                    .await
                    .map(|data| Arc::new(data) as AnyValue)
                    .map_err(OperationFailure::new)
            }
            .boxed()
        })
    }
}

/// Mutation lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStatus {
    Idle,
    Pending,
    Success,
    Error,
}

#[derive(Debug)]
struct MutationState<R, E> {
    status: MutationStatus,
    data: Option<R>,
    error: Option<Arc<E>>,
}

impl<R, E> Default for MutationState<R, E> {
    fn default() -> Self {
        MutationState {
            status: MutationStatus::Idle,
            data: None,
            error: None,
        }
    }
}

/// Mutation options: engine pass-through plus lifecycle callbacks
pub struct MutationOptions<V, R, E> {
    pub settings: MutationSettings,
    on_success: Option<Arc<dyn Fn(&R, &V) + Send + Sync>>,
    on_error: Option<Arc<dyn Fn(&E, &V) + Send + Sync>>,
    on_settled: Option<Arc<dyn Fn(Option<&R>, Option<&E>, &V) + Send + Sync>>,
}

impl<V, R, E> Default for MutationOptions<V, R, E> {
    fn default() -> Self {
        MutationOptions {
            settings: MutationSettings::default(),
            on_success: None,
            on_error: None,
            on_settled: None,
        }
    }
}

impl<V, R, E> MutationOptions<V, R, E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retry(mut self, retry: u32) -> Self {
        self.settings.retry = Some(retry);
        self
    }

    pub fn on_success(mut self, f: impl Fn(&R, &V) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&E, &V) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_settled(
        mut self,
        f: impl Fn(Option<&R>, Option<&E>, &V) + Send + Sync + 'static,
    ) -> Self {
        self.on_settled = Some(Arc::new(f));
        self
    }
}

/// Mutation bound to an engine
pub struct MutationHandle<V, R, E> {
    mutation: Mutation<V, R, E>,
    engine: Arc<dyn CacheEngine>,
    options: MutationOptions<V, R, E>,
    state: Mutex<MutationState<R, E>>,
}

impl<V, R, E> MutationHandle<V, R, E>
where
    V: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
    E: fmt::Display + Send + Sync + 'static,
{
    /// Run the mutation. The function's result or failure is returned as is.
    pub async fn mutate(&self, variables: V) -> Result<R, MutationError<E>> {
        self.state.lock().status = MutationStatus::Pending;
        debug!("Running mutation");

        let outcome = self
            .engine
            .run_mutation(
                self.mutation.mutator(),
                Arc::new(variables.clone()),
                self.options.settings.clone(),
            )
            .await;

        match outcome {
            Ok(value) => {
                let data = match value.downcast::<R>() {
                    Ok(data) => (*data).clone(),
                    Err(_) => {
                        self.state.lock().status = MutationStatus::Idle;
                        return Err(CacheError::StoredTypeMismatch("mutation result".to_string()).into());
                    }
                };
                if let Some(on_success) = &self.options.on_success {
                    on_success(&data, &variables);
                }
                if let Some(on_settled) = &self.options.on_settled {
                    on_settled(Some(&data), None, &variables);
                }
                let mut state = self.state.lock();
                state.status = MutationStatus::Success;
                state.data = Some(data.clone());
                state.error = None;
                Ok(data)
            }
            Err(CacheError::Operation(failure)) => {
                let Some(error) = failure.downcast::<E>() else {
                    self.state.lock().status = MutationStatus::Idle;
                    return Err(CacheError::Operation(failure).into());
                };
                debug!(error = %failure, "Mutation failed");
                if let Some(on_error) = &self.options.on_error {
                    on_error(&error, &variables);
                }
                if let Some(on_settled) = &self.options.on_settled {
                    on_settled(None, Some(&error), &variables);
                }
                let mut state = self.state.lock();
                state.status = MutationStatus::Error;
                state.data = None;
                state.error = Some(Arc::clone(&error));
                Err(MutationError::Failed(error))
            }
            Err(other) => {
                self.state.lock().status = MutationStatus::Idle;
                Err(MutationError::Cache(other))
            }
        }
    }

    pub fn status(&self) -> MutationStatus {
        self.state.lock().status
    }

    pub fn data(&self) -> Option<R> {
        self.state.lock().data.clone()
    }

    pub fn error(&self) -> Option<Arc<E>> {
        self.state.lock().error.clone()
    }

    pub fn reset(&self) {
        *self.state.lock() = MutationState::default();
    }
}
