//! In-memory store. Sessions read a private snapshot taken at first access and log their
//! writes; commit replays the log against the live tables, all or nothing.

use super::{Session, SessionFactory};
use crate::config::{Model, SemanticType};
use crate::error::StoreError;
use crate::query::{Predicate, Query};
use crate::value::{Record, Value};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

type Tables = HashMap<String, Vec<Record>>;

/// A write recorded by a session, replayed at commit.
#[derive(Clone, Debug)]
enum Op {
    Insert { table: String, key: Vec<(String, Value)>, record: Record },
    Update { table: String, key: Vec<(String, Value)>, record: Record },
    Delete { table: String, filters: Vec<Predicate> },
}

fn table_key(model: &Model) -> String {
    match &model.schema {
        Some(schema) => format!("{}.{}", schema, model.table),
        None => model.table.clone(),
    }
}

#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
    /// Last serial handed out per table and column, shared by all sessions.
    serials: Arc<Mutex<HashMap<(String, String), i64>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts committed rows directly, bypassing sessions. Intended for fixtures.
    pub fn seed(&self, model: &Model, rows: Vec<Record>) {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        tables.entry(table_key(model)).or_default().extend(rows);
    }

    /// Committed rows of a table.
    pub fn rows(&self, model: &Model) -> Vec<Record> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        tables.get(&table_key(model)).cloned().unwrap_or_default()
    }

    pub fn session(&self) -> MemorySession {
        MemorySession {
            store: self.clone(),
            working: None,
            log: Vec::new(),
        }
    }
}

#[async_trait]
impl SessionFactory for MemoryStore {
    async fn open(&self) -> Result<Box<dyn Session>, StoreError> {
        Ok(Box::new(self.session()))
    }
}

pub struct MemorySession {
    store: MemoryStore,
    working: Option<Tables>,
    log: Vec<Op>,
}

impl MemorySession {
    fn tables(&mut self) -> &mut Tables {
        let store = &self.store;
        self.working.get_or_insert_with(|| {
            store.tables.read().unwrap_or_else(|e| e.into_inner()).clone()
        })
    }

    fn table(&mut self, model: &Model) -> &mut Vec<Record> {
        self.tables().entry(table_key(model)).or_default()
    }
}

fn pattern_error(e: regex::Error) -> StoreError {
    StoreError::InvalidPattern(e.to_string())
}

fn row_matches(filters: &[Predicate], row: &Record) -> Result<bool, StoreError> {
    for p in filters {
        if !p.matches(row).map_err(pattern_error)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn max_integer(rows: &[Record], column: &str) -> i64 {
    rows.iter()
        .filter_map(|r| match r.value(column) {
            Value::Integer(n) => Some(n),
            _ => None,
        })
        .max()
        .unwrap_or(0)
}

fn render_key(key: &[(String, Value)]) -> String {
    key.iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl Session for MemorySession {
    async fn fetch(&mut self, model: &Model, query: &Query) -> Result<Vec<Record>, StoreError> {
        let rows = self.table(model).clone();
        query.apply(rows).map_err(pattern_error)
    }

    async fn count(&mut self, model: &Model, query: &Query) -> Result<u64, StoreError> {
        let rows = self.table(model).clone();
        Ok(query.unpaginated().apply(rows).map_err(pattern_error)?.len() as u64)
    }

    async fn insert(&mut self, model: &Model, mut record: Record) -> Result<Record, StoreError> {
        let table_name = table_key(model);
        let serials = self.store.serials.clone();
        let rows = self.table(model);
        for col in &model.columns {
            let missing = record.value(&col.name).is_null();
            if missing && col.has_default && col.kind == SemanticType::Integer {
                let mut serials = serials.lock().unwrap_or_else(|e| e.into_inner());
                let last = serials.entry((table_name.clone(), col.name.clone())).or_insert(0);
                *last = (*last).max(max_integer(rows, &col.name)) + 1;
                record.set(col.name.clone(), Value::Integer(*last));
            } else if !record.contains(&col.name) {
                record.set(col.name.clone(), Value::Null);
            }
        }
        let key = model.key_of(&record);
        let lookup = [Predicate::all_eq(&key)];
        for row in rows.iter() {
            if row_matches(&lookup, row)? {
                return Err(StoreError::DuplicateKey {
                    table: table_name,
                    key: render_key(&key),
                });
            }
        }
        tracing::debug!(table = %table_name, key = %render_key(&key), "memory insert");
        rows.push(record.clone());
        self.log.push(Op::Insert {
            table: table_name,
            key,
            record: record.clone(),
        });
        Ok(record)
    }

    async fn update(&mut self, model: &Model, key: &[(String, Value)], record: &Record) -> Result<(), StoreError> {
        let table_name = table_key(model);
        let lookup = [Predicate::all_eq(key)];
        let rows = self.table(model);
        update_rows(rows, &lookup, record)?;
        self.log.push(Op::Update {
            table: table_name,
            key: key.to_vec(),
            record: record.clone(),
        });
        Ok(())
    }

    async fn delete(&mut self, model: &Model, query: &Query) -> Result<u64, StoreError> {
        let table_name = table_key(model);
        let removed = delete_rows(self.table(model), &query.filters)?;
        self.log.push(Op::Delete {
            table: table_name,
            filters: query.filters.clone(),
        });
        Ok(removed)
    }

    async fn flush(&mut self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.working = None;
        let log = std::mem::take(&mut self.log);
        if log.is_empty() {
            return Ok(());
        }
        let mut tables = self.store.tables.write().unwrap_or_else(|e| e.into_inner());
        // Replay on copies of the touched tables so a conflict leaves the store as it was.
        let mut staged: Tables = HashMap::new();
        for op in &log {
            let name = match op {
                Op::Insert { table, .. } | Op::Update { table, .. } | Op::Delete { table, .. } => table,
            };
            let rows = staged
                .entry(name.clone())
                .or_insert_with(|| tables.get(name).cloned().unwrap_or_default());
            replay(rows, op)?;
        }
        tracing::debug!(ops = log.len(), tables = staged.len(), "memory commit");
        tables.extend(staged);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.working = None;
        self.log.clear();
        Ok(())
    }
}

fn update_rows(rows: &mut [Record], lookup: &[Predicate], record: &Record) -> Result<(), StoreError> {
    for row in rows.iter_mut() {
        if row_matches(lookup, row)? {
            for (name, value) in record.iter() {
                row.set(name.clone(), value.clone());
            }
        }
    }
    Ok(())
}

fn delete_rows(rows: &mut Vec<Record>, filters: &[Predicate]) -> Result<u64, StoreError> {
    let mut kept = Vec::with_capacity(rows.len());
    let mut removed = 0u64;
    for row in rows.drain(..) {
        if row_matches(filters, &row)? {
            removed += 1;
        } else {
            kept.push(row);
        }
    }
    *rows = kept;
    Ok(removed)
}

fn replay(rows: &mut Vec<Record>, op: &Op) -> Result<(), StoreError> {
    match op {
        Op::Insert { table, key, record } => {
            let lookup = [Predicate::all_eq(key)];
            for row in rows.iter() {
                if row_matches(&lookup, row)? {
                    return Err(StoreError::DuplicateKey {
                        table: table.clone(),
                        key: render_key(key),
                    });
                }
            }
            rows.push(record.clone());
        }
        Op::Update { key, record, .. } => update_rows(rows, &[Predicate::all_eq(key)], record)?,
        Op::Delete { filters, .. } => {
            delete_rows(rows, filters)?;
        }
    }
    Ok(())
}
