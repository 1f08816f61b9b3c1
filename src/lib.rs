//! Query Router: Typed Routing and Cache Namespacing
//!
//! Declare a tree of named queries and mutations once and compose it into a
//! router. Composition gives every router its own namespace, so each query
//! leaf gets a stable, collision-free cache key prefix `"<namespace>/<name>"`
//! without anyone building keys by hand. A context tree mirrors the router
//! and exposes scoped cache accessors (`get_data`, `set_data`, `cancel`,
//! `invalidate`) on top of any `CacheEngine`.

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod key;
pub mod logging;
pub mod middleware;
pub mod namespace;
pub mod operation;
pub mod router;
pub mod types;

pub use context::{ContextNode, ContextTree, QueryContext, QueryScope};
pub use engine::{CacheEngine, FetchOptions, MemoryEngine, QueryStatus};
pub use error::{CacheError, ConfigError, MutationError, RouterError};
pub use key::{NamespaceId, QueryFilters, QueryKey, QueryPrefix};
pub use middleware::BoundQuery;
pub use namespace::NamespaceAllocator;
pub use operation::{Mutation, MutationHandle, MutationOptions, Query, QueryOptions, QueryState};
pub use router::{RouteNode, RouterDefinition, RouterInstance};
