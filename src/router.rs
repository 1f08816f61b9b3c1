//! Router Composition
//!
//! A `RouterDefinition` maps names to queries, mutations and already composed
//! router instances. Composing it validates the names, takes one namespace id
//! from an allocator and binds every direct query to that namespace. Nested
//! instances keep the namespace they were composed with, so every query leaf
//! in a tree has a distinct prefix.

use crate::context::ContextTree;
use crate::engine::CacheEngine;
use crate::error::RouterError;
use crate::key::{NamespaceId, QueryPrefix};
use crate::middleware::{apply_namespace, BoundQuery, UnboundQuery};
use crate::namespace::NamespaceAllocator;
use crate::operation::{Mutation, Query};
use crate::types::Signature;
use serde::Serialize;
use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Unbound entry of a definition
pub(crate) enum DefinitionEntry {
    Query(Arc<dyn UnboundQuery>),
    Mutation(MutationRoute),
    Router(RouterInstance),
}

/// Ordered, not yet composed route table
#[derive(Default)]
pub struct RouterDefinition {
    entries: Vec<(String, DefinitionEntry)>,
}

impl RouterDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query<A, R, E>(mut self, name: impl Into<String>, query: Query<A, R, E>) -> Self
    where
        A: Serialize + Clone + Send + Sync + 'static,
        R: Clone + Send + Sync + 'static,
        E: fmt::Display + Send + Sync + 'static,
    {
        self.entries
            .push((name.into(), DefinitionEntry::Query(Arc::new(query))));
        self
    }

    pub fn mutation<V, R, E>(mut self, name: impl Into<String>, mutation: Mutation<V, R, E>) -> Self
    where
        V: Clone + Send + Sync + 'static,
        R: Clone + Send + Sync + 'static,
        E: fmt::Display + Send + Sync + 'static,
    {
        self.entries.push((
            name.into(),
            DefinitionEntry::Mutation(MutationRoute::new(mutation)),
        ));
        self
    }

    /// Nest an already composed instance. It keeps its own namespace.
    pub fn router(mut self, name: impl Into<String>, instance: RouterInstance) -> Self {
        self.entries
            .push((name.into(), DefinitionEntry::Router(instance)));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn validate(&self) -> Result<(), RouterError> {
        let mut seen = HashSet::new();
        for (name, _) in &self.entries {
            if name.is_empty() {
                return Err(RouterError::InvalidRouteName {
                    name: name.clone(),
                    reason: "name is empty",
                });
            }
            if name.contains('/') {
                return Err(RouterError::InvalidRouteName {
                    name: name.clone(),
                    reason: "name contains '/'",
                });
            }
            if !seen.insert(name.as_str()) {
                return Err(RouterError::DuplicateRoute(name.clone()));
            }
        }
        Ok(())
    }

    /// Compose into an instance with a fresh namespace from `allocator`.
    ///
    /// Names are validated before allocation; a rejected definition takes
    /// no id.
    pub fn compose(self, allocator: &NamespaceAllocator) -> Result<RouterInstance, RouterError> {
        self.validate()?;
        let namespace = allocator.allocate()?;
        let routes = apply_namespace(self.entries, namespace);

        info!(
            namespace = namespace.get(),
            routes = routes.len(),
            "Router composed"
        );
        Ok(RouterInstance {
            inner: Arc::new(RouterInner { namespace, routes }),
        })
    }

    /// Compose with the process-wide allocator.
    pub fn compose_global(self) -> Result<RouterInstance, RouterError> {
        self.compose(NamespaceAllocator::global())
    }
}

/// Composed query leaf
#[derive(Clone)]
pub struct QueryRoute {
    prefix: QueryPrefix,
    signature: Signature,
    bound: Arc<dyn Any + Send + Sync>,
}

impl QueryRoute {
    pub(crate) fn new(
        prefix: QueryPrefix,
        signature: Signature,
        bound: Arc<dyn Any + Send + Sync>,
    ) -> Self {
        QueryRoute {
            prefix,
            signature,
            bound,
        }
    }

    pub fn prefix(&self) -> &QueryPrefix {
        &self.prefix
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Recover the typed leaf.
    pub fn typed<A, R, E>(&self) -> Result<Arc<BoundQuery<A, R, E>>, RouterError>
    where
        A: Serialize + Clone + Send + Sync + 'static,
        R: Clone + Send + Sync + 'static,
        E: fmt::Display + Send + Sync + 'static,
    {
        let mismatch = || RouterError::TypeMismatch {
            name: self.prefix.to_string(),
            expected: Query::<A, R, E>::signature().to_string(),
            actual: self.signature.to_string(),
        };
        if self.signature != Query::<A, R, E>::signature() {
            return Err(mismatch());
        }
        Arc::clone(&self.bound)
            .downcast::<BoundQuery<A, R, E>>()
            .map_err(|_| mismatch())
    }
}

impl fmt::Debug for QueryRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryRoute")
            .field("prefix", &self.prefix)
            .field("signature", &format_args!("{}", self.signature))
            .finish()
    }
}

/// Composed mutation leaf. Mutations carry no key.
#[derive(Clone)]
pub struct MutationRoute {
    signature: Signature,
    op: Arc<dyn Any + Send + Sync>,
}

impl MutationRoute {
    pub(crate) fn new<V, R, E>(mutation: Mutation<V, R, E>) -> Self
    where
        V: Clone + Send + Sync + 'static,
        R: Clone + Send + Sync + 'static,
        E: fmt::Display + Send + Sync + 'static,
    {
        MutationRoute {
            signature: Mutation::<V, R, E>::signature(),
            op: Arc::new(mutation),
        }
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    fn typed<V, R, E>(&self, name: &str) -> Result<Mutation<V, R, E>, RouterError>
    where
        V: Clone + Send + Sync + 'static,
        R: Clone + Send + Sync + 'static,
        E: fmt::Display + Send + Sync + 'static,
    {
        self.op
            .downcast_ref::<Mutation<V, R, E>>()
            .cloned()
            .ok_or_else(|| RouterError::TypeMismatch {
                name: name.to_string(),
                expected: Mutation::<V, R, E>::signature().to_string(),
                actual: self.signature.to_string(),
            })
    }
}

impl fmt::Debug for MutationRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationRoute")
            .field("signature", &format_args!("{}", self.signature))
            .finish()
    }
}

/// One entry of a composed router
#[derive(Debug, Clone)]
pub enum RouteNode {
    Query(QueryRoute),
    Mutation(MutationRoute),
    Router(RouterInstance),
}

impl RouteNode {
    pub fn kind(&self) -> &'static str {
        match self {
            RouteNode::Query(_) => "query",
            RouteNode::Mutation(_) => "mutation",
            RouteNode::Router(_) => "router",
        }
    }
}

struct RouterInner {
    namespace: NamespaceId,
    routes: Vec<(String, RouteNode)>,
}

/// Composed router. Clones share the same routes.
#[derive(Clone)]
pub struct RouterInstance {
    inner: Arc<RouterInner>,
}

impl fmt::Debug for RouterInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterInstance")
            .field("namespace", &self.inner.namespace)
            .field("routes", &self.inner.routes)
            .finish()
    }
}

impl RouterInstance {
    pub fn namespace(&self) -> NamespaceId {
        self.inner.namespace
    }

    pub fn len(&self) -> usize {
        self.inner.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.routes.is_empty()
    }

    /// Route names in definition order.
    pub fn names(&self) -> Vec<&str> {
        self.inner.routes.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RouteNode)> {
        self.inner
            .routes
            .iter()
            .map(|(name, node)| (name.as_str(), node))
    }

    pub fn get(&self, name: &str) -> Option<&RouteNode> {
        self.inner
            .routes
            .iter()
            .find(|(route, _)| route == name)
            .map(|(_, node)| node)
    }

    fn require(&self, name: &str) -> Result<&RouteNode, RouterError> {
        self.get(name)
            .ok_or_else(|| RouterError::RouteNotFound(name.to_string()))
    }

    pub fn query_route(&self, name: &str) -> Result<&QueryRoute, RouterError> {
        match self.require(name)? {
            RouteNode::Query(route) => Ok(route),
            other => Err(wrong_kind(name, "query", other)),
        }
    }

    /// Typed query leaf by name.
    pub fn query<A, R, E>(&self, name: &str) -> Result<Arc<BoundQuery<A, R, E>>, RouterError>
    where
        A: Serialize + Clone + Send + Sync + 'static,
        R: Clone + Send + Sync + 'static,
        E: fmt::Display + Send + Sync + 'static,
    {
        self.query_route(name)?.typed()
    }

    /// Typed mutation by name.
    pub fn mutation<V, R, E>(&self, name: &str) -> Result<Mutation<V, R, E>, RouterError>
    where
        V: Clone + Send + Sync + 'static,
        R: Clone + Send + Sync + 'static,
        E: fmt::Display + Send + Sync + 'static,
    {
        match self.require(name)? {
            RouteNode::Mutation(route) => route.typed(name),
            other => Err(wrong_kind(name, "mutation", other)),
        }
    }

    pub fn router(&self, name: &str) -> Result<&RouterInstance, RouterError> {
        match self.require(name)? {
            RouteNode::Router(instance) => Ok(instance),
            other => Err(wrong_kind(name, "router", other)),
        }
    }

    /// Query leaf at a dotted path of nested routers, e.g. `["posts", "all"]`.
    pub fn query_at(&self, path: &[&str]) -> Result<QueryRoute, RouterError> {
        let Some((leaf, parents)) = path.split_last() else {
            return Err(RouterError::RouteNotFound(String::new()));
        };
        let mut current = self;
        for segment in parents {
            current = current.router(segment)?;
        }
        current.query_route(leaf).cloned()
    }

    /// Every query prefix reachable from this instance, depth first.
    pub fn query_prefixes(&self) -> Vec<QueryPrefix> {
        let mut prefixes = Vec::new();
        self.collect_prefixes(&mut prefixes);
        prefixes
    }

    fn collect_prefixes(&self, out: &mut Vec<QueryPrefix>) {
        for (_, node) in &self.inner.routes {
            match node {
                RouteNode::Query(route) => out.push(route.prefix.clone()),
                RouteNode::Mutation(_) => {}
                RouteNode::Router(nested) => nested.collect_prefixes(out),
            }
        }
    }

    /// Scoped cache accessors for this instance and everything nested in it.
    pub fn context(&self, engine: Arc<dyn CacheEngine>) -> ContextTree {
        debug!(namespace = self.inner.namespace.get(), "Building context tree");
        ContextTree::build(self, engine)
    }
}

fn wrong_kind(name: &str, expected: &'static str, actual: &RouteNode) -> RouterError {
    RouterError::WrongRouteKind {
        name: name.to_string(),
        expected,
        actual: actual.kind(),
    }
}
