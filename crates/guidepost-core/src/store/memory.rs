//! In-process record store.
//!
//! Rows are kept as JSON values per table. Used by tests and by the CLI's
//! offline mode. Writes can be made to fail on demand to exercise the
//! reconciler's fallback paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use super::{Expand, Filter, Query, RecordStore, StoreError};

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, Vec<Value>>>,
    /// Remaining forced write failures per table.
    failures: Mutex<HashMap<String, u32>>,
    next_id: AtomicU64,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from `{ "table": [rows...] }`.
    pub fn from_tables(tables: HashMap<String, Vec<Value>>) -> Self {
        Self {
            tables: Mutex::new(tables),
            ..Self::default()
        }
    }

    pub fn seed(&self, table: &str, rows: Vec<Value>) {
        self.lock_tables().entry(table.to_string()).or_default().extend(rows);
    }

    /// Snapshot of a table's rows.
    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.lock_tables().get(table).cloned().unwrap_or_default()
    }

    /// Make the next `times` writes (insert/update/delete) on `table` fail.
    pub fn fail_writes(&self, table: &str, times: u32) {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        failures.insert(table.to_string(), times);
    }

    /// Total successful write calls, across tables.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn lock_tables(&self) -> MutexGuard<'_, HashMap<String, Vec<Value>>> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_failure(&self, table: &str) -> Result<(), StoreError> {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(remaining) = failures.get_mut(table) {
            if *remaining > 0 {
                *remaining -= 1;
                debug!(table, remaining = *remaining, "Injected write failure");
                return Err(StoreError::Unavailable(format!("{} write rejected", table)));
            }
        }
        Ok(())
    }

    fn expand_row(tables: &HashMap<String, Vec<Value>>, row: &mut Value, expand: &Expand) {
        let Some(parent_id) = row.get("id").cloned() else {
            return;
        };
        let children: Vec<Value> = tables
            .get(&expand.table)
            .map(|rows| {
                rows.iter()
                    .filter(|child| child.get(&expand.foreign_key) == Some(&parent_id))
                    .cloned()
                    .map(|mut child| {
                        for nested in &expand.nested {
                            Self::expand_row(tables, &mut child, nested);
                        }
                        child
                    })
                    .collect()
            })
            .unwrap_or_default();
        if let Value::Object(map) = row {
            map.insert(expand.table.clone(), Value::Array(children));
        }
    }
}

fn merge(row: &mut Value, patch: &Map<String, Value>) {
    if let Value::Object(map) = row {
        for (key, value) in patch {
            map.insert(key.clone(), value.clone());
        }
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn fetch(&self, query: &Query) -> Result<Vec<Value>, StoreError> {
        let tables = self.lock_tables();
        let rows = tables
            .get(&query.table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| query.filter.matches(row))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        Ok(rows
            .into_iter()
            .map(|mut row| {
                for expand in &query.expand {
                    Self::expand_row(&tables, &mut row, expand);
                }
                row
            })
            .collect())
    }

    async fn insert(&self, table: &str, mut row: Value) -> Result<Value, StoreError> {
        self.check_failure(table)?;
        let Value::Object(ref mut map) = row else {
            return Err(StoreError::InvalidRequest("row must be a JSON object".to_string()));
        };
        if !map.contains_key("id") {
            let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            map.insert("id".to_string(), Value::from(format!("mem-{}", n)));
        }
        self.lock_tables()
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(row)
    }

    async fn update(&self, table: &str, filter: &Filter, patch: Value) -> Result<usize, StoreError> {
        self.check_failure(table)?;
        let Value::Object(patch) = patch else {
            return Err(StoreError::InvalidRequest("patch must be a JSON object".to_string()));
        };
        let mut tables = self.lock_tables();
        let mut matched = 0;
        if let Some(rows) = tables.get_mut(table) {
            for row in rows.iter_mut().filter(|row| filter.matches(row)) {
                merge(row, &patch);
                matched += 1;
            }
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(matched)
    }

    async fn count(&self, table: &str, filter: &Filter) -> Result<usize, StoreError> {
        Ok(self
            .lock_tables()
            .get(table)
            .map(|rows| rows.iter().filter(|row| filter.matches(row)).count())
            .unwrap_or(0))
    }

    async fn delete(&self, table: &str, filter: &Filter) -> Result<usize, StoreError> {
        self.check_failure(table)?;
        let mut tables = self.lock_tables();
        let removed = tables
            .get_mut(table)
            .map(|rows| {
                let before = rows.len();
                rows.retain(|row| !filter.matches(row));
                before - rows.len()
            })
            .unwrap_or(0);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.seed("tour_groups", vec![
            json!({"id": "g1", "tour_id": "t1", "name": "Group 1", "version": 0}),
            json!({"id": "g2", "tour_id": "t1", "name": "Group 2", "version": 0}),
            json!({"id": "g3", "tour_id": "t2", "name": "Group 1", "version": 0}),
        ]);
        store.seed("participants", vec![
            json!({"id": "p1", "name": "A", "count": 2, "group_id": "g1"}),
            json!({"id": "p2", "name": "B", "count": 1, "group_id": "g2"}),
        ]);
        store
    }

    #[tokio::test]
    async fn test_fetch_with_filter() {
        let store = seeded();
        let query = Query::table("tour_groups").filter(Filter::new().eq("tour_id", "t1"));
        let rows = store.fetch(&query).await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_with_expand() {
        let store = seeded();
        let query = Query::table("tour_groups")
            .filter(Filter::by_id("g1"))
            .expand(Expand::new("participants", "group_id"));
        let rows = store.fetch(&query).await.unwrap();
        assert_eq!(rows[0]["participants"].as_array().unwrap().len(), 1);
        assert_eq!(rows[0]["participants"][0]["id"], "p1");
    }

    #[tokio::test]
    async fn test_update_returns_matched_rows() {
        let store = seeded();
        let filter = Filter::by_id("g1").eq("version", 0);
        let matched = store.update("tour_groups", &filter, json!({"version": 1})).await.unwrap();
        assert_eq!(matched, 1);
        // Same read version no longer matches
        let matched = store.update("tour_groups", &filter, json!({"version": 1})).await.unwrap();
        assert_eq!(matched, 0);
    }

    #[tokio::test]
    async fn test_insert_assigns_id() {
        let store = MemoryStore::new();
        let row = store.insert("guides", json!({"name": "Anna"})).await.unwrap();
        assert_eq!(row["id"], "mem-1");
        assert_eq!(store.count("guides", &Filter::new()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_fail_writes() {
        let store = seeded();
        store.fail_writes("tour_groups", 1);
        let filter = Filter::by_id("g1");
        assert!(store.update("tour_groups", &filter, json!({"name": "x"})).await.is_err());
        assert!(store.update("tour_groups", &filter, json!({"name": "x"})).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = seeded();
        let removed = store.delete("tour_groups", &Filter::new().eq("tour_id", "t1")).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.rows("tour_groups").len(), 1);
    }
}
