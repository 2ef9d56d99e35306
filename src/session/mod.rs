//! Data store abstraction. A session is opened per request and is the only mutable
//! state a handler touches; nothing it writes is visible to other sessions before
//! `commit`.

mod memory;
mod postgres;

pub use memory::{MemorySession, MemoryStore};
pub use postgres::{PgSession, PgSessionFactory};

use crate::config::Model;
use crate::error::StoreError;
use crate::query::Query;
use crate::value::{Record, Value};
use async_trait::async_trait;

#[async_trait]
pub trait Session: Send {
    /// Rows of `model` matching `query`, ordered and windowed.
    async fn fetch(&mut self, model: &Model, query: &Query) -> Result<Vec<Record>, StoreError>;

    /// Number of rows matching the query's filters; the window is ignored.
    async fn count(&mut self, model: &Model, query: &Query) -> Result<u64, StoreError>;

    /// Inserts a row and returns it as stored, store defaults included.
    async fn insert(&mut self, model: &Model, record: Record) -> Result<Record, StoreError>;

    /// Overwrites the row whose storage key equals `key` with every column of `record`.
    async fn update(&mut self, model: &Model, key: &[(String, Value)], record: &Record) -> Result<(), StoreError>;

    /// Deletes every row matching the query's filters; returns the number removed.
    async fn delete(&mut self, model: &Model, query: &Query) -> Result<u64, StoreError>;

    /// Pushes pending writes to the store without committing.
    async fn flush(&mut self) -> Result<(), StoreError>;

    async fn commit(&mut self) -> Result<(), StoreError>;

    async fn rollback(&mut self) -> Result<(), StoreError>;

    /// Drops cached state so the next fetch observes the store.
    fn expire_all(&mut self) {}
}

#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn Session>, StoreError>;
}
