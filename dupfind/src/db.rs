//! The relational persistence layer is an external collaborator
//! (`spec.md` §1 non-goals); this module specifies only the operations the
//! core invokes (`spec.md` §6) plus an in-memory double used by the index
//! implementations' tests.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::SqlFatal;

/// A prepared row: column name -> raw bytes/text, kept generic enough to
/// hold blobs (`matrix`/`color`/`kphash` tables) or scalars (`hash` table).
#[derive(Debug, Clone, Default)]
pub struct Row {
    columns: HashMap<String, Value>,
}

/// A single column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A signed integer.
    Int(i64),
    /// A UTF-8 string.
    Text(String),
    /// Opaque bytes (a BLOB column).
    Blob(Vec<u8>),
    /// SQL NULL.
    Null,
}

impl Row {
    /// Set a column.
    pub fn set(&mut self, column: &str, value: Value) {
        self.columns.insert(column.to_string(), value);
    }

    /// Get a column, or `Value::Null` if absent.
    pub fn get(&self, column: &str) -> &Value {
        self.columns.get(column).unwrap_or(&Value::Null)
    }

    /// Get a column as `i64`, panicking on type mismatch (used only by
    /// trusted in-process callers reading rows they just wrote).
    pub fn get_int(&self, column: &str) -> i64 {
        match self.get(column) {
            Value::Int(v) => *v,
            other => panic!("column {column} is not an int: {other:?}"),
        }
    }

    /// Get a column as bytes.
    pub fn get_blob(&self, column: &str) -> &[u8] {
        match self.get(column) {
            Value::Blob(v) => v,
            other => panic!("column {column} is not a blob: {other:?}"),
        }
    }
}

/// The minimal set of database operations every `SearchIndex` consumes
/// (`spec.md` §6 "Database operations consumed"). Any backing store that
/// supports these qualifies — a real SQL engine is not implemented here,
/// per `spec.md` §1's explicit non-goal.
pub trait Database: Send + Sync {
    /// Idempotently create a table matching `schema` (a backend-specific
    /// DDL string for a real SQL engine; ignored by the in-memory double).
    fn create_table_if_not_exists(&self, table: &str, schema: &str) -> Result<(), SqlFatal>;

    /// Insert a row into `table`. Errors here are always fatal
    /// (`spec.md` §7).
    fn insert(&self, table: &str, row: Row) -> Result<(), SqlFatal>;

    /// Delete all rows in `table` where `media_id` matches one of `ids`.
    fn delete(&self, table: &str, ids: &[u32]) -> Result<(), SqlFatal>;

    /// Fetch every row of `table`, in insertion order.
    fn query_rows(&self, table: &str) -> Result<Vec<Row>, SqlFatal>;

    /// Fetch every row of `table` whose `media_id` is in `ids`.
    fn query_rows_for_ids(&self, table: &str, ids: &[u32]) -> Result<Vec<Row>, SqlFatal> {
        let id_set: std::collections::HashSet<u32> = ids.iter().copied().collect();
        Ok(self
            .query_rows(table)?
            .into_iter()
            .filter(|r| id_set.contains(&(r.get_int("media_id") as u32)))
            .collect())
    }
}

/// An in-memory `Database` double, used by `SearchIndex` unit tests and by
/// small single-machine deployments that don't need real persistence.
#[derive(Default)]
pub struct MemoryDatabase {
    tables: Mutex<HashMap<String, Vec<Row>>>,
}

impl MemoryDatabase {
    /// A fresh, empty database.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Database for MemoryDatabase {
    fn create_table_if_not_exists(&self, table: &str, _schema: &str) -> Result<(), SqlFatal> {
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default();
        Ok(())
    }

    fn insert(&self, table: &str, row: Row) -> Result<(), SqlFatal> {
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .push(row);
        Ok(())
    }

    fn delete(&self, table: &str, ids: &[u32]) -> Result<(), SqlFatal> {
        let id_set: std::collections::HashSet<u32> = ids.iter().copied().collect();
        if let Some(rows) = self.tables.lock().unwrap().get_mut(table) {
            rows.retain(|r| !id_set.contains(&(r.get_int("media_id") as u32)));
        }
        Ok(())
    }

    fn query_rows(&self, table: &str) -> Result<Vec<Row>, SqlFatal> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default())
    }
}
