//! Query-Key Middleware
//!
//! Composition hands every direct query leaf of a definition to
//! `apply_namespace`, which pairs it with the prefix `"<namespace>/<name>"`.
//! The result is a new `BoundQuery`; the `Query` it was built from is never
//! changed, so one query composed into two routers yields two independent
//! leaves. Mutations and nested router instances pass through untouched.

use crate::engine::CacheEngine;
use crate::error::CacheError;
use crate::key::{NamespaceId, QueryKey, QueryPrefix};
use crate::operation::{Query, QueryOptions, QueryState};
use crate::router::{DefinitionEntry, QueryRoute, RouteNode};
use crate::types::Signature;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// A query paired with the prefix its composition assigned
pub struct BoundQuery<A, R, E> {
    query: Query<A, R, E>,
    prefix: QueryPrefix,
}

impl<A, R, E> Clone for BoundQuery<A, R, E> {
    fn clone(&self) -> Self {
        BoundQuery {
            query: self.query.clone(),
            prefix: self.prefix.clone(),
        }
    }
}

impl<A, R, E> fmt::Debug for BoundQuery<A, R, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundQuery")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl<A, R, E> BoundQuery<A, R, E>
where
    A: Serialize + Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
    E: fmt::Display + Send + Sync + 'static,
{
    pub(crate) fn new(query: Query<A, R, E>, prefix: QueryPrefix) -> Self {
        BoundQuery { query, prefix }
    }

    pub fn prefix(&self) -> &QueryPrefix {
        &self.prefix
    }

    /// Full cache key for a call with `args`.
    pub fn key(&self, args: &A) -> Result<QueryKey, CacheError> {
        QueryKey::new(self.prefix.clone(), args)
    }

    /// The unbound descriptor this leaf was built from.
    pub fn query(&self) -> &Query<A, R, E> {
        &self.query
    }

    pub fn signature(&self) -> Signature {
        Query::<A, R, E>::signature()
    }

    pub async fn invoke(
        &self,
        engine: &dyn CacheEngine,
        args: A,
        options: QueryOptions<R, E>,
    ) -> Result<QueryState<R, E>, CacheError> {
        self.query
            .invoke(engine, self.prefix.clone(), args, options)
            .await
    }

    /// Invoke, fetching even when fresh data is cached.
    pub async fn refetch(
        &self,
        engine: &dyn CacheEngine,
        args: A,
        options: QueryOptions<R, E>,
    ) -> Result<QueryState<R, E>, CacheError> {
        self.invoke(engine, args, options.force(true)).await
    }
}

/// Unbound query stored in a definition, erased over its types
pub(crate) trait UnboundQuery: Send + Sync {
    fn signature(&self) -> Signature;

    /// Produce a `BoundQuery` for `prefix`, erased.
    fn bind(&self, prefix: QueryPrefix) -> Arc<dyn Any + Send + Sync>;
}

impl<A, R, E> UnboundQuery for Query<A, R, E>
where
    A: Serialize + Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
    E: fmt::Display + Send + Sync + 'static,
{
    fn signature(&self) -> Signature {
        Query::<A, R, E>::signature()
    }

    fn bind(&self, prefix: QueryPrefix) -> Arc<dyn Any + Send + Sync> {
        Arc::new(BoundQuery::new(self.clone(), prefix))
    }
}

/// Bind every direct query entry to `namespace`.
pub(crate) fn apply_namespace(
    entries: Vec<(String, DefinitionEntry)>,
    namespace: NamespaceId,
) -> Vec<(String, RouteNode)> {
    entries
        .into_iter()
        .map(|(name, entry)| {
            let node = match entry {
                DefinitionEntry::Query(query) => {
                    let prefix = QueryPrefix::new(namespace, name.as_str());
                    trace!(prefix = %prefix, "Binding query");
                    let bound = query.bind(prefix.clone());
                    RouteNode::Query(QueryRoute::new(prefix, query.signature(), bound))
                }
                DefinitionEntry::Mutation(mutation) => RouteNode::Mutation(mutation),
                DefinitionEntry::Router(instance) => RouteNode::Router(instance),
            };
            (name, node)
        })
        .collect()
}
