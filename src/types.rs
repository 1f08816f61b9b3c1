//! Core type definitions shared across the crate.
//!
//! Values cross the cache engine boundary type-erased; typed wrappers in
//! `operation` and `context` downcast them back.

use futures::future::BoxFuture;
use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// Type-erased cached value or variables
pub type AnyValue = Arc<dyn Any + Send + Sync>;

/// Future produced by one fetch or mutate attempt
pub type FetchFuture = BoxFuture<'static, Result<AnyValue, OperationFailure>>;

/// Re-runnable query fetcher handed to the engine (one call per attempt)
pub type Fetcher = Arc<dyn Fn() -> FetchFuture + Send + Sync>;

/// Re-runnable mutator handed to the engine
pub type Mutator = Arc<dyn Fn(AnyValue) -> FetchFuture + Send + Sync>;

/// Failure raised by a user-supplied query or mutation function.
///
/// Carries the original error (as `Arc<E>`) plus its rendered message so the
/// engine can log it without knowing `E`.
#[derive(Clone)]
pub struct OperationFailure {
    error: AnyValue,
    message: String,
}

impl OperationFailure {
    pub fn new<E>(error: E) -> Self
    where
        E: fmt::Display + Send + Sync + 'static,
    {
        let message = error.to_string();
        Self {
            error: Arc::new(error),
            message,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Recover the typed error, if `E` matches the original type.
    pub fn downcast<E>(&self) -> Option<Arc<E>>
    where
        E: Send + Sync + 'static,
    {
        Arc::clone(&self.error).downcast::<E>().ok()
    }
}

impl fmt::Debug for OperationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationFailure")
            .field("message", &self.message)
            .finish()
    }
}

impl fmt::Display for OperationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Argument and result types of a route leaf, checked on typed lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    input: TypeId,
    output: TypeId,
    error: TypeId,
    input_name: &'static str,
    output_name: &'static str,
    error_name: &'static str,
}

impl Signature {
    pub fn of<I: 'static, O: 'static, E: 'static>() -> Self {
        Signature {
            input: TypeId::of::<I>(),
            output: TypeId::of::<O>(),
            error: TypeId::of::<E>(),
            input_name: type_name::<I>(),
            output_name: type_name::<O>(),
            error_name: type_name::<E>(),
        }
    }

    /// Whether input and output types match, ignoring the error type.
    pub fn same_data(&self, other: &Signature) -> bool {
        self.input == other.input && self.output == other.output
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}) -> Result<{}, {}>",
            self.input_name, self.output_name, self.error_name
        )
    }
}
