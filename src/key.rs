//! Cache Keys
//!
//! Every query leaf is addressed by a two-part key: a stable prefix
//! `"<namespace>/<name>"` and a variable suffix holding the call arguments as
//! JSON. Prefixes are unique across the route tree; suffixes distinguish
//! calls of the same leaf.

use crate::error::CacheError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Namespace identifier assigned to one router composition
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct NamespaceId(u64);

impl NamespaceId {
    pub(crate) fn new(id: u64) -> Self {
        NamespaceId(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable key prefix of a query leaf
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryPrefix {
    namespace: NamespaceId,
    name: String,
}

impl QueryPrefix {
    pub(crate) fn new(namespace: NamespaceId, name: impl Into<String>) -> Self {
        QueryPrefix {
            namespace,
            name: name.into(),
        }
    }

    pub fn namespace(&self) -> NamespaceId {
        self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for QueryPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Full cache key: `(prefix, suffix)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryKey {
    prefix: QueryPrefix,
    suffix: Value,
}

impl QueryKey {
    /// Build a key from a prefix and the call arguments.
    pub fn new<A: Serialize + ?Sized>(prefix: QueryPrefix, args: &A) -> Result<Self, CacheError> {
        Ok(QueryKey {
            prefix,
            suffix: serde_json::to_value(args)?,
        })
    }

    pub fn prefix(&self) -> &QueryPrefix {
        &self.prefix
    }

    pub fn suffix(&self) -> &Value {
        &self.suffix
    }

    /// Canonical string form of the suffix: compact JSON with object keys
    /// sorted, so equal suffixes always render identically.
    pub fn fingerprint(&self) -> String {
        let mut out = String::new();
        write_canonical(&self.suffix, &mut out);
        out
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut fields: Vec<(&String, &Value)> = map.iter().collect();
            fields.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (field, value)) in fields.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(field.clone()).to_string());
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[\"{}\",{}]", self.prefix, self.suffix)
    }
}

/// Caller-supplied filter for `cancel` and `invalidate`.
///
/// The prefix is never chosen by the caller; a context accessor merges these
/// fields with its own leaf prefix.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryFilters {
    /// Argument suffix to match; `None` matches every call of the leaf
    pub suffix: Option<Value>,
    /// Require the suffix to be equal rather than a partial match
    pub exact: bool,
}

impl QueryFilters {
    /// Match every entry under the leaf.
    pub fn all() -> Self {
        Self::default()
    }

    /// Match entries whose arguments contain `args`.
    pub fn for_args<A: Serialize + ?Sized>(args: &A) -> Result<Self, CacheError> {
        Ok(QueryFilters {
            suffix: Some(serde_json::to_value(args)?),
            exact: false,
        })
    }

    pub fn exact(mut self, exact: bool) -> Self {
        self.exact = exact;
        self
    }

    /// Scope the filter to one leaf prefix.
    pub fn scoped(self, prefix: QueryPrefix) -> KeyFilter {
        KeyFilter {
            prefix,
            suffix: self.suffix,
            exact: self.exact,
        }
    }
}

/// Engine-facing filter, always restricted to a single prefix
#[derive(Debug, Clone, PartialEq)]
pub struct KeyFilter {
    pub prefix: QueryPrefix,
    pub suffix: Option<Value>,
    pub exact: bool,
}

impl KeyFilter {
    pub fn matches(&self, key: &QueryKey) -> bool {
        if key.prefix != self.prefix {
            return false;
        }
        match &self.suffix {
            None => true,
            Some(expected) if self.exact => key.suffix == *expected,
            Some(expected) => partial_match(&key.suffix, expected),
        }
    }
}

/// Whether `filter` is contained in `value`.
///
/// Objects match when every filter field matches recursively, arrays when
/// each filter element matches the element at the same index.
pub fn partial_match(value: &Value, filter: &Value) -> bool {
    match (value, filter) {
        (Value::Object(value), Value::Object(filter)) => filter.iter().all(|(field, expected)| {
            value
                .get(field)
                .map_or(false, |actual| partial_match(actual, expected))
        }),
        (Value::Array(value), Value::Array(filter)) => {
            filter.len() <= value.len()
                && filter
                    .iter()
                    .zip(value.iter())
                    .all(|(expected, actual)| partial_match(actual, expected))
        }
        _ => value == filter,
    }
}
