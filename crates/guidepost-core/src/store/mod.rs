//! Storage collaborator.
//!
//! The engines treat persistence as an opaque record store addressed by
//! table name. `RecordStore` is the seam; `RestStore` talks to a
//! PostgREST-style HTTP backend and `MemoryStore` keeps rows in process
//! for tests and offline runs.

pub mod error;
pub mod memory;
pub mod rest;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use rest::RestStore;

// ============================================================================
// Table names
// ============================================================================

pub const TOURS: &str = "tours";
pub const TOUR_GROUPS: &str = "tour_groups";
pub const PARTICIPANTS: &str = "participants";
pub const GUIDES: &str = "guides";
pub const TICKET_BUCKETS: &str = "ticket_buckets";

// ============================================================================
// Query types
// ============================================================================

/// Conjunction of field-equality conditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_id(id: &str) -> Self {
        Self::new().eq("id", id)
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.conditions.push((field.to_string(), value.into()));
        self
    }

    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// A missing field matches only a `null` condition.
    pub fn matches(&self, row: &Value) -> bool {
        self.conditions.iter().all(|(field, expected)| {
            let actual = row.get(field).unwrap_or(&Value::Null);
            actual == expected
        })
    }

    /// Value of an `id` condition, used in conflict messages.
    pub fn id(&self) -> Option<&str> {
        self.conditions
            .iter()
            .find(|(field, _)| field == "id")
            .and_then(|(_, value)| value.as_str())
    }
}

/// Embed rows of a related collection whose `foreign_key` equals the parent's `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expand {
    pub table: String,
    pub foreign_key: String,
    pub nested: Vec<Expand>,
}

impl Expand {
    pub fn new(table: &str, foreign_key: &str) -> Self {
        Self {
            table: table.to_string(),
            foreign_key: foreign_key.to_string(),
            nested: Vec::new(),
        }
    }

    pub fn with(mut self, nested: Expand) -> Self {
        self.nested.push(nested);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: String,
    pub filter: Filter,
    pub expand: Vec<Expand>,
}

impl Query {
    pub fn table(table: &str) -> Self {
        Self {
            table: table.to_string(),
            filter: Filter::new(),
            expand: Vec::new(),
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn expand(mut self, expand: Expand) -> Self {
        self.expand.push(expand);
        self
    }
}

// ============================================================================
// Store trait
// ============================================================================

/// Opaque key/value record store reachable by table name.
///
/// Implementations signal success or failure only; retry across calls is the
/// reconciler's job, though an implementation may retry rate-limited requests
/// internally.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Rows of `query.table` matching the filter, with related rows embedded.
    async fn fetch(&self, query: &Query) -> Result<Vec<Value>, StoreError>;

    /// Insert a row and return it as stored.
    async fn insert(&self, table: &str, row: Value) -> Result<Value, StoreError>;

    /// Merge `patch` into every matching row. Returns the number of rows matched.
    async fn update(&self, table: &str, filter: &Filter, patch: Value) -> Result<usize, StoreError>;

    async fn count(&self, table: &str, filter: &Filter) -> Result<usize, StoreError>;

    /// Remove matching rows. Returns the number removed.
    async fn delete(&self, table: &str, filter: &Filter) -> Result<usize, StoreError>;
}

/// Fetch and deserialize rows.
pub async fn fetch_as<T: DeserializeOwned>(
    store: &dyn RecordStore,
    query: &Query,
) -> Result<Vec<T>, StoreError> {
    store
        .fetch(query)
        .await?
        .into_iter()
        .map(|row| serde_json::from_value(row).map_err(StoreError::from))
        .collect()
}

/// Fetch exactly one row by id.
pub async fn fetch_one<T: DeserializeOwned>(
    store: &dyn RecordStore,
    query: Query,
    id: &str,
) -> Result<T, StoreError> {
    let table = query.table.clone();
    let query = query.filter(Filter::by_id(id));
    fetch_as::<T>(store, &query)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| StoreError::NotFound(format!("{} {}", table, id)))
}

/// Versioned update: matches `id` and `version`, writes `version + 1`.
/// Zero matched rows means someone else wrote first. Returns the version written.
pub async fn update_versioned(
    store: &dyn RecordStore,
    table: &str,
    id: &str,
    read_version: u64,
    mut patch: Value,
) -> Result<u64, StoreError> {
    let next = read_version + 1;
    if let Value::Object(ref mut map) = patch {
        map.insert("version".to_string(), Value::from(next));
    }
    let filter = Filter::by_id(id).eq("version", read_version);
    match store.update(table, &filter, patch).await? {
        0 => Err(StoreError::VersionConflict {
            table: table.to_string(),
            id: id.to_string(),
        }),
        _ => Ok(next),
    }
}

/// Current version counter of one row, `None` when the row is missing.
/// Rows without a counter read as version 0.
pub async fn stored_version(store: &dyn RecordStore, table: &str, id: &str) -> Result<Option<u64>, StoreError> {
    let query = Query::table(table).filter(Filter::by_id(id));
    Ok(store
        .fetch(&query)
        .await?
        .first()
        .map(|row| row.get("version").and_then(Value::as_u64).unwrap_or(0)))
}

/// Version for an unconditional write: one past both the local read and
/// whatever is stored, so the counter never moves backwards.
pub fn next_version(read_version: u64, stored: Option<u64>) -> u64 {
    stored.unwrap_or(0).max(read_version) + 1
}
