//! Context Tree
//!
//! Read-time projection of a composed router onto a cache engine. Every query
//! leaf becomes a `QueryScope` bound to its prefix, nested routers become
//! nested trees built through their own `context` accessor, and mutations are
//! left out. A scope can only reach entries under its own prefix, so nothing
//! done through it affects sibling or ancestor namespaces.

use crate::engine::{CacheEngine, EntrySnapshot};
use crate::error::{CacheError, RouterError};
use crate::key::{NamespaceId, QueryFilters, QueryKey, QueryPrefix};
use crate::operation::downcast_data;
use crate::router::{RouteNode, RouterInstance};
use crate::types::{AnyValue, Signature};
use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

/// Cache accessors for one query leaf, untyped
#[derive(Clone)]
pub struct QueryScope {
    prefix: QueryPrefix,
    signature: Signature,
    engine: Arc<dyn CacheEngine>,
}

impl fmt::Debug for QueryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryScope")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl QueryScope {
    pub fn prefix(&self) -> &QueryPrefix {
        &self.prefix
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Cancel fetches in flight under this leaf. `None` matches every call.
    pub async fn cancel(&self, filters: Option<QueryFilters>) -> usize {
        let filter = filters.unwrap_or_default().scoped(self.prefix.clone());
        self.engine.cancel_queries(filter).await
    }

    /// Mark entries under this leaf stale. `None` matches every call.
    pub async fn invalidate(&self, filters: Option<QueryFilters>) -> usize {
        let filter = filters.unwrap_or_default().scoped(self.prefix.clone());
        let invalidated = self.engine.invalidate_queries(filter).await;
        debug!(prefix = %self.prefix, invalidated, "Scope invalidated");
        invalidated
    }

    /// Typed accessors, checked against the leaf's argument and result types.
    pub fn typed<A, R>(&self) -> Result<QueryContext<A, R>, RouterError>
    where
        A: Serialize + 'static,
        R: Clone + Send + Sync + 'static,
    {
        let requested = Signature::of::<A, R, ()>();
        if !self.signature.same_data(&requested) {
            return Err(RouterError::TypeMismatch {
                name: self.prefix.to_string(),
                expected: requested.to_string(),
                actual: self.signature.to_string(),
            });
        }
        Ok(QueryContext {
            scope: self.clone(),
            _types: PhantomData,
        })
    }
}

/// Typed cache accessors for one query leaf
pub struct QueryContext<A, R> {
    scope: QueryScope,
    _types: PhantomData<fn(A) -> R>,
}

impl<A, R> Clone for QueryContext<A, R> {
    fn clone(&self) -> Self {
        QueryContext {
            scope: self.scope.clone(),
            _types: PhantomData,
        }
    }
}

impl<A, R> QueryContext<A, R>
where
    A: Serialize + 'static,
    R: Clone + Send + Sync + 'static,
{
    pub fn prefix(&self) -> &QueryPrefix {
        &self.scope.prefix
    }

    pub fn key(&self, args: &A) -> Result<QueryKey, CacheError> {
        QueryKey::new(self.scope.prefix.clone(), args)
    }

    /// Stored value for `args`, without fetching.
    pub fn get_data(&self, args: &A) -> Result<Option<R>, CacheError> {
        let key = self.key(args)?;
        self.scope
            .engine
            .get_query_data(&key)
            .map(|value| downcast_data::<R>(value, &key))
            .transpose()
    }

    /// Store `data` for `args`, without fetching.
    pub fn set_data(&self, args: &A, data: R) -> Result<(), CacheError> {
        let key = self.key(args)?;
        self.scope
            .engine
            .set_query_data(key, Arc::new(data) as AnyValue);
        Ok(())
    }

    pub fn state(&self, args: &A) -> Result<Option<EntrySnapshot>, CacheError> {
        let key = self.key(args)?;
        Ok(self.scope.engine.query_state(&key))
    }

    pub async fn cancel(&self, filters: Option<QueryFilters>) -> usize {
        self.scope.cancel(filters).await
    }

    pub async fn invalidate(&self, filters: Option<QueryFilters>) -> usize {
        self.scope.invalidate(filters).await
    }
}

/// One entry of a context tree
#[derive(Debug, Clone)]
pub enum ContextNode {
    Query(QueryScope),
    Router(ContextTree),
}

/// Context mirror of a router instance, mutations omitted
#[derive(Debug, Clone)]
pub struct ContextTree {
    namespace: NamespaceId,
    nodes: Vec<(String, ContextNode)>,
}

impl ContextTree {
    pub(crate) fn build(instance: &RouterInstance, engine: Arc<dyn CacheEngine>) -> Self {
        let nodes = instance
            .iter()
            .filter_map(|(name, node)| {
                let node = match node {
                    RouteNode::Query(route) => ContextNode::Query(QueryScope {
                        prefix: route.prefix().clone(),
                        signature: *route.signature(),
                        engine: Arc::clone(&engine),
                    }),
                    RouteNode::Mutation(_) => return None,
                    RouteNode::Router(nested) => {
                        ContextNode::Router(nested.context(Arc::clone(&engine)))
                    }
                };
                Some((name.to_string(), node))
            })
            .collect();

        ContextTree {
            namespace: instance.namespace(),
            nodes,
        }
    }

    pub fn namespace(&self) -> NamespaceId {
        self.namespace
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.nodes.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&ContextNode> {
        self.nodes
            .iter()
            .find(|(node, _)| node == name)
            .map(|(_, node)| node)
    }

    pub fn scope(&self, name: &str) -> Result<&QueryScope, RouterError> {
        match self.get(name) {
            Some(ContextNode::Query(scope)) => Ok(scope),
            Some(ContextNode::Router(_)) => Err(RouterError::WrongRouteKind {
                name: name.to_string(),
                expected: "query",
                actual: "router",
            }),
            None => Err(RouterError::RouteNotFound(name.to_string())),
        }
    }

    pub fn query<A, R>(&self, name: &str) -> Result<QueryContext<A, R>, RouterError>
    where
        A: Serialize + 'static,
        R: Clone + Send + Sync + 'static,
    {
        self.scope(name)?.typed()
    }

    pub fn router(&self, name: &str) -> Result<&ContextTree, RouterError> {
        match self.get(name) {
            Some(ContextNode::Router(tree)) => Ok(tree),
            Some(ContextNode::Query(_)) => Err(RouterError::WrongRouteKind {
                name: name.to_string(),
                expected: "router",
                actual: "query",
            }),
            None => Err(RouterError::RouteNotFound(name.to_string())),
        }
    }

    /// Every query scope in this subtree, depth first.
    pub fn scopes(&self) -> Vec<&QueryScope> {
        let mut scopes = Vec::new();
        self.collect_scopes(&mut scopes);
        scopes
    }

    fn collect_scopes<'a>(&'a self, out: &mut Vec<&'a QueryScope>) {
        for (_, node) in &self.nodes {
            match node {
                ContextNode::Query(scope) => out.push(scope),
                ContextNode::Router(tree) => tree.collect_scopes(out),
            }
        }
    }

    /// Invalidate every query in this subtree.
    pub async fn invalidate_all(&self) -> usize {
        let mut invalidated = 0;
        for scope in self.scopes() {
            invalidated += scope.invalidate(None).await;
        }
        invalidated
    }

    /// Cancel every fetch in flight in this subtree.
    pub async fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        for scope in self.scopes() {
            cancelled += scope.cancel(None).await;
        }
        cancelled
    }
}
