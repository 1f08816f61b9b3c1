//! Error types for the query router.

use crate::key::QueryPrefix;
use crate::types::OperationFailure;
use std::sync::Arc;
use thiserror::Error;

/// Composition and route lookup errors
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Duplicate route name '{0}' in router definition")]
    DuplicateRoute(String),

    #[error("Invalid route name '{name}': {reason}")]
    InvalidRouteName { name: String, reason: &'static str },

    #[error("Route not found: {0}")]
    RouteNotFound(String),

    #[error("Route '{name}' is a {actual}, not a {expected}")]
    WrongRouteKind {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Route '{name}' has signature {actual}, requested {expected}")]
    TypeMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Namespace allocator exhausted")]
    NamespaceExhausted,
}

/// Errors raised at the cache engine boundary
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Failed to serialize query arguments: {0}")]
    KeySerialization(#[from] serde_json::Error),

    #[error("Query {0} was cancelled")]
    Cancelled(QueryPrefix),

    #[error("Value for {0} does not have the requested type")]
    StoredTypeMismatch(String),

    #[error("Operation failed: {0}")]
    Operation(OperationFailure),
}

/// Failure of a single `mutate` call
#[derive(Debug, Error)]
pub enum MutationError<E> {
    #[error("Mutation failed: {0}")]
    Failed(Arc<E>),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Configuration and logging setup errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}
