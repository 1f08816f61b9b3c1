//! Namespace Allocation
//!
//! Every router composition takes one id from a `NamespaceAllocator`. Ids are
//! dense and handed out in call order, so a fresh allocator makes key prefixes
//! reproducible in tests.

use crate::error::RouterError;
use crate::key::NamespaceId;
use std::sync::atomic::{AtomicU64, Ordering};

static GLOBAL_NAMESPACES: NamespaceAllocator = NamespaceAllocator::new();

/// Monotonic source of namespace ids
#[derive(Debug)]
pub struct NamespaceAllocator {
    next: AtomicU64,
}

impl Default for NamespaceAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl NamespaceAllocator {
    /// Allocator whose first id is 0.
    pub const fn new() -> Self {
        Self::starting_at(0)
    }

    pub const fn starting_at(first: u64) -> Self {
        NamespaceAllocator {
            next: AtomicU64::new(first),
        }
    }

    /// The process-wide allocator used by `RouterDefinition::compose_global`.
    pub fn global() -> &'static NamespaceAllocator {
        &GLOBAL_NAMESPACES
    }

    /// Take the next id.
    ///
    /// Returns the pre-increment value; never wraps.
    pub fn allocate(&self) -> Result<NamespaceId, RouterError> {
        self.next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_add(1))
            .map(NamespaceId::new)
            .map_err(|_| RouterError::NamespaceExhausted)
    }

    /// Id the next `allocate` call would return.
    pub fn peek(&self) -> NamespaceId {
        NamespaceId::new(self.next.load(Ordering::SeqCst))
    }
}
