//! PostgreSQL sessions. Each session lazily opens one transaction on first use; dropping
//! an uncommitted session rolls it back.

use super::{Session, SessionFactory};
use crate::config::Model;
use crate::error::StoreError;
use crate::query::Query;
use crate::sql::{self, bind_value, decode_row, param_for_log, QueryBuf};
use crate::value::{Record, Value};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};

#[derive(Clone)]
pub struct PgSessionFactory {
    pool: PgPool,
}

impl PgSessionFactory {
    pub fn new(pool: PgPool) -> Self {
        PgSessionFactory { pool }
    }
}

#[async_trait]
impl SessionFactory for PgSessionFactory {
    async fn open(&self) -> Result<Box<dyn Session>, StoreError> {
        Ok(Box::new(PgSession::new(self.pool.clone())))
    }
}

pub struct PgSession {
    pool: PgPool,
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgSession {
    pub fn new(pool: PgPool) -> Self {
        PgSession { pool, tx: None }
    }

    async fn tx(&mut self) -> Result<&mut Transaction<'static, Postgres>, StoreError> {
        if let Some(tx) = self.tx.take() {
            return Ok(self.tx.insert(tx));
        }
        let tx = self.pool.begin().await?;
        Ok(self.tx.insert(tx))
    }

    async fn fetch_rows(&mut self, q: &QueryBuf) -> Result<Vec<PgRow>, StoreError> {
        log_query(q);
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = bind_value(query, p);
        }
        let tx = self.tx().await?;
        Ok(query.fetch_all(&mut **tx).await?)
    }

    async fn execute(&mut self, q: &QueryBuf) -> Result<u64, StoreError> {
        log_query(q);
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = bind_value(query, p);
        }
        let tx = self.tx().await?;
        Ok(query.execute(&mut **tx).await?.rows_affected())
    }
}

fn log_query(q: &QueryBuf) {
    let params: Vec<_> = q.params.iter().map(param_for_log).collect();
    tracing::debug!(sql = %q.sql, params = ?params, "query");
}

#[async_trait]
impl Session for PgSession {
    async fn fetch(&mut self, model: &Model, query: &Query) -> Result<Vec<Record>, StoreError> {
        let q = sql::select(model, query)?;
        let rows = self.fetch_rows(&q).await?;
        rows.iter().map(|r| decode_row(model, r)).collect()
    }

    async fn count(&mut self, model: &Model, query: &Query) -> Result<u64, StoreError> {
        let q = sql::count(model, query)?;
        let rows = self.fetch_rows(&q).await?;
        let n: i64 = match rows.first() {
            Some(row) => row.try_get(0)?,
            None => 0,
        };
        Ok(n.max(0) as u64)
    }

    async fn insert(&mut self, model: &Model, record: Record) -> Result<Record, StoreError> {
        let q = sql::insert(model, &record);
        let rows = self.fetch_rows(&q).await?;
        match rows.first() {
            Some(row) => decode_row(model, row),
            None => Err(StoreError::Db(sqlx::Error::RowNotFound)),
        }
    }

    async fn update(&mut self, model: &Model, key: &[(String, Value)], record: &Record) -> Result<(), StoreError> {
        let q = sql::update(model, key, record)?;
        self.execute(&q).await?;
        Ok(())
    }

    async fn delete(&mut self, model: &Model, query: &Query) -> Result<u64, StoreError> {
        let q = sql::delete(model, query)?;
        self.execute(&q).await
    }

    /// Statements run eagerly inside the transaction, so there is nothing to push.
    async fn flush(&mut self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await?;
            tracing::debug!("transaction committed");
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
            tracing::debug!("transaction rolled back");
        }
        Ok(())
    }
}
