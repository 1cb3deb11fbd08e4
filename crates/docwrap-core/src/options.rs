//! Per-call options for facade operations.
//!
//! Every field is optional. Defaults per operation:
//!
//! | option      | default                                   |
//! |-------------|-------------------------------------------|
//! | `filter`    | `{}` (match everything)                   |
//! | `limit`     | none                                      |
//! | `skip`      | 0                                         |
//! | `sort`      | store order                               |
//! | `safe`      | false                                     |
//! | `upsert`    | true when unset                           |
//! | `overwrite` | false when unset                          |
//! | `cache`     | false                                     |
//! | `ttl`       | the configured default cache TTL          |

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::driver::FindQuery;

/// A stored document. Always a JSON object in practice.
pub type Document = Value;

fn empty_filter() -> Value {
    Value::Object(serde_json::Map::new())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// One sort criterion. Criteria apply in the order given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub order: SortOrder,
}

impl SortKey {
    pub fn asc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            order: SortOrder::Ascending,
        }
    }

    pub fn desc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            order: SortOrder::Descending,
        }
    }

    fn shape(&self) -> Value {
        let direction = match self.order {
            SortOrder::Ascending => 1,
            SortOrder::Descending => -1,
        };
        json!([self.field, direction])
    }
}

/// Options for `fetch` and `fetch_and_count`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchOptions {
    pub filter: Option<Value>,
    /// Maximum documents returned; `None` or 0 means no limit.
    pub limit: Option<u64>,
    pub skip: Option<u64>,
    pub sort: Vec<SortKey>,
    /// Serve from and populate the expiring cache.
    pub cache: bool,
    /// Cache lifetime in ticks for this result.
    pub ttl: Option<u32>,
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(self, filter: Value) -> Self {
        Self {
            filter: Some(filter),
            ..self
        }
    }

    pub fn with_limit(self, limit: u64) -> Self {
        Self {
            limit: Some(limit),
            ..self
        }
    }

    pub fn with_skip(self, skip: u64) -> Self {
        Self {
            skip: Some(skip),
            ..self
        }
    }

    pub fn with_sort(mut self, key: SortKey) -> Self {
        self.sort.push(key);
        self
    }

    /// Cache the result; `ttl` of `None` uses the default TTL.
    pub fn with_cache(self, ttl: Option<u32>) -> Self {
        Self {
            cache: true,
            ttl,
            ..self
        }
    }

    /// The store query these options describe.
    pub fn query(&self) -> FindQuery {
        FindQuery {
            filter: self.filter.clone().unwrap_or_else(empty_filter),
            limit: self.limit.unwrap_or(0),
            skip: self.skip.unwrap_or(0),
            sort: self.sort.clone(),
        }
    }

    /// Everything that changes the result set, and nothing that doesn't.
    pub fn cache_shape(&self) -> Value {
        json!({
            "filter": self.filter.clone().unwrap_or_else(empty_filter),
            "limit": self.limit.unwrap_or(0),
            "skip": self.skip.unwrap_or(0),
            "sort": self.sort.iter().map(SortKey::shape).collect::<Vec<_>>(),
        })
    }
}

/// Options for `count`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CountOptions {
    pub filter: Option<Value>,
    pub cache: bool,
    pub ttl: Option<u32>,
}

impl CountOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(self, filter: Value) -> Self {
        Self {
            filter: Some(filter),
            ..self
        }
    }

    pub fn with_cache(self, ttl: Option<u32>) -> Self {
        Self {
            cache: true,
            ttl,
            ..self
        }
    }

    pub fn filter(&self) -> Value {
        self.filter.clone().unwrap_or_else(empty_filter)
    }

    pub fn cache_shape(&self) -> Value {
        json!({ "filter": self.filter() })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertOptions {
    pub document: Document,
    /// Wait for write acknowledgment.
    pub safe: bool,
}

impl InsertOptions {
    pub fn new(document: Document) -> Self {
        Self {
            document,
            safe: false,
        }
    }

    pub fn safe(self) -> Self {
        Self { safe: true, ..self }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOptions {
    pub filter: Option<Value>,
    pub document: Document,
    pub safe: bool,
    /// Insert when nothing matches. Unset means true.
    pub upsert: Option<bool>,
}

impl UpdateOptions {
    pub fn new(filter: Value, document: Document) -> Self {
        Self {
            filter: Some(filter),
            document,
            safe: false,
            upsert: None,
        }
    }

    pub fn safe(self) -> Self {
        Self { safe: true, ..self }
    }

    pub fn with_upsert(self, upsert: bool) -> Self {
        Self {
            upsert: Some(upsert),
            ..self
        }
    }

    pub fn filter(&self) -> Value {
        self.filter.clone().unwrap_or_else(empty_filter)
    }

    pub fn effective_upsert(&self) -> bool {
        self.upsert.unwrap_or(true)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GetOrInsertOptions {
    pub filter: Value,
    pub document: Document,
    pub safe: bool,
}

impl GetOrInsertOptions {
    pub fn new(filter: Value, document: Document) -> Self {
        Self {
            filter,
            document,
            safe: false,
        }
    }

    pub fn safe(self) -> Self {
        Self { safe: true, ..self }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MoveOptions {
    pub document: Document,
    /// Replace a matching document already in the destination.
    /// Unset means false.
    pub overwrite: Option<bool>,
    pub safe: bool,
}

impl MoveOptions {
    pub fn new(document: Document) -> Self {
        Self {
            document,
            overwrite: None,
            safe: false,
        }
    }

    pub fn with_overwrite(self, overwrite: bool) -> Self {
        Self {
            overwrite: Some(overwrite),
            ..self
        }
    }

    pub fn safe(self) -> Self {
        Self { safe: true, ..self }
    }

    pub fn effective_overwrite(&self) -> bool {
        self.overwrite.unwrap_or(false)
    }

    /// Filter identifying the moved document: its `_id` when it has one,
    /// otherwise the whole document.
    pub fn identity_filter(&self) -> Value {
        match self.document.get("_id") {
            Some(id) => json!({ "_id": id }),
            None => self.document.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoveOptions {
    /// Documents to remove; unset removes everything.
    pub filter: Option<Value>,
}

impl RemoveOptions {
    pub fn new(filter: Value) -> Self {
        Self {
            filter: Some(filter),
        }
    }

    pub fn all() -> Self {
        Self::default()
    }

    pub fn filter(&self) -> Value {
        self.filter.clone().unwrap_or_else(empty_filter)
    }
}
