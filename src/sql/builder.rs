//! Builds parameterized SELECT, INSERT, UPDATE, DELETE from a model and a [`Query`].

use crate::config::{ColumnSpec, Model, SemanticType};
use crate::error::StoreError;
use crate::query::{Predicate, Query};
use crate::value::{Record, Value};

/// Quote identifier for PostgreSQL (safe: only from model descriptors).
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Schema-qualified table name when the model has a schema.
fn qualified_table(model: &Model) -> String {
    match &model.schema {
        Some(schema) => format!("{}.{}", quoted(schema), quoted(&model.table)),
        None => quoted(&model.table),
    }
}

#[derive(Debug, Default)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf::default()
    }

    fn push_param(&mut self, v: Value) -> usize {
        self.params.push(v);
        self.params.len()
    }

    /// Placeholder with a cast to the column type so untyped and null binds resolve.
    fn typed_param(&mut self, v: Value, kind: &SemanticType) -> String {
        let null = v.is_null();
        let n = self.push_param(v);
        if null {
            return format!("${}::{}", n, pg_type(kind));
        }
        match kind {
            SemanticType::Duration => format!("make_interval(secs => ${}::double precision)", n),
            SemanticType::Array(inner) => format!(
                "ARRAY(SELECT jsonb_array_elements_text(${}::jsonb))::{}[]",
                n,
                pg_type(inner)
            ),
            _ => format!("${}::{}", n, pg_type(kind)),
        }
    }
}

pub fn pg_type(kind: &SemanticType) -> String {
    match kind {
        SemanticType::Integer => "bigint".into(),
        SemanticType::Boolean => "boolean".into(),
        SemanticType::Real => "double precision".into(),
        SemanticType::Decimal => "numeric".into(),
        SemanticType::String => "text".into(),
        SemanticType::Bytes => "bytea".into(),
        SemanticType::Date => "date".into(),
        SemanticType::Time => "time".into(),
        SemanticType::DateTime => "timestamp".into(),
        SemanticType::Duration => "interval".into(),
        SemanticType::Array(inner) => format!("{}[]", pg_type(inner)),
        SemanticType::Opaque => "jsonb".into(),
    }
}

/// SELECT list: each column cast to the form the row decoder reads back.
fn select_column_list(model: &Model) -> String {
    model
        .columns
        .iter()
        .map(|c| {
            let q = quoted(&c.name);
            let expr = match &c.kind {
                SemanticType::Integer => format!("{}::bigint", q),
                SemanticType::Real | SemanticType::Decimal => format!("{}::double precision", q),
                SemanticType::Duration => format!("EXTRACT(EPOCH FROM {})::double precision", q),
                SemanticType::DateTime => format!("{}::timestamp", q),
                SemanticType::Array(_) | SemanticType::Opaque => format!("to_jsonb({})", q),
                _ => q.clone(),
            };
            format!("{} AS {}", expr, q)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn column<'a>(model: &'a Model, name: &str) -> Result<&'a ColumnSpec, StoreError> {
    model.column_spec(name).ok_or_else(|| StoreError::UnknownColumn {
        table: model.table.clone(),
        column: name.to_string(),
    })
}

fn predicate_sql(model: &Model, p: &Predicate, q: &mut QueryBuf) -> Result<String, StoreError> {
    let compare = |q: &mut QueryBuf, c: &str, op: &str, v: &Value| -> Result<String, StoreError> {
        let col = column(model, c)?;
        let ph = q.typed_param(v.clone(), &col.kind);
        Ok(format!("{} {} {}", quoted(c), op, ph))
    };
    Ok(match p {
        Predicate::Eq(_, v) if v.is_null() => "1 = 0".to_string(),
        Predicate::Eq(c, v) => compare(q, c, "=", v)?,
        Predicate::Ne(c, v) => compare(q, c, "<>", v)?,
        Predicate::Gte(c, v) => compare(q, c, ">=", v)?,
        Predicate::Lte(c, v) => compare(q, c, "<=", v)?,
        Predicate::In(_, values) if values.is_empty() => "1 = 0".to_string(),
        Predicate::In(c, values) => {
            let col = column(model, c)?;
            let phs: Vec<String> = values.iter().map(|v| q.typed_param(v.clone(), &col.kind)).collect();
            format!("{} IN ({})", quoted(c), phs.join(", "))
        }
        Predicate::Matches {
            column: c,
            pattern,
            case_insensitive,
        } => {
            column(model, c)?;
            let n = q.push_param(Value::String(pattern.clone()));
            let op = if *case_insensitive { "~*" } else { "~" };
            format!("{}::text {} ${}", quoted(c), op, n)
        }
        Predicate::And(items) if items.is_empty() => "1 = 1".to_string(),
        Predicate::And(items) => format!(
            "({})",
            items
                .iter()
                .map(|i| predicate_sql(model, i, q))
                .collect::<Result<Vec<_>, _>>()?
                .join(" AND ")
        ),
        Predicate::Or(items) if items.is_empty() => "1 = 0".to_string(),
        Predicate::Or(items) => format!(
            "({})",
            items
                .iter()
                .map(|i| predicate_sql(model, i, q))
                .collect::<Result<Vec<_>, _>>()?
                .join(" OR ")
        ),
    })
}

fn where_clause(model: &Model, query: &Query, q: &mut QueryBuf) -> Result<String, StoreError> {
    if query.filters.is_empty() {
        return Ok(String::new());
    }
    let parts = query
        .filters
        .iter()
        .map(|p| predicate_sql(model, p, q))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!(" WHERE {}", parts.join(" AND ")))
}

/// SELECT with filters, ORDER BY the query's orderings, optional LIMIT/OFFSET.
pub fn select(model: &Model, query: &Query) -> Result<QueryBuf, StoreError> {
    let mut q = QueryBuf::new();
    let where_clause = where_clause(model, query, &mut q)?;
    let mut order = Vec::new();
    for o in &query.order {
        column(model, &o.column)?;
        order.push(format!("{} {}", quoted(&o.column), if o.descending { "DESC" } else { "ASC" }));
    }
    let order_clause = if order.is_empty() {
        String::new()
    } else {
        format!(" ORDER BY {}", order.join(", "))
    };
    let limit_clause = query.limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let offset_clause = query.offset.map(|n| format!(" OFFSET {}", n)).unwrap_or_default();
    q.sql = format!(
        "SELECT {} FROM {}{}{}{}{}",
        select_column_list(model),
        qualified_table(model),
        where_clause,
        order_clause,
        limit_clause,
        offset_clause
    );
    Ok(q)
}

/// SELECT count(*) over the query's filters; window and ordering are ignored.
pub fn count(model: &Model, query: &Query) -> Result<QueryBuf, StoreError> {
    let mut q = QueryBuf::new();
    let where_clause = where_clause(model, query, &mut q)?;
    q.sql = format!("SELECT count(*) FROM {}{}", qualified_table(model), where_clause);
    Ok(q)
}

/// INSERT: columns the record provides. Null columns with a DB default are omitted so
/// the database fills them.
pub fn insert(model: &Model, record: &Record) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    for c in &model.columns {
        let val = record.value(&c.name);
        if val.is_null() && (c.has_default || !record.contains(&c.name)) {
            continue;
        }
        placeholders.push(q.typed_param(val, &c.kind));
        cols.push(quoted(&c.name));
    }
    let table = qualified_table(model);
    q.sql = if cols.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", table, select_column_list(model))
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            table,
            cols.join(", "),
            placeholders.join(", "),
            select_column_list(model)
        )
    };
    q
}

/// UPDATE by storage key: SET every model column the record carries.
pub fn update(model: &Model, key: &[(String, Value)], record: &Record) -> Result<QueryBuf, StoreError> {
    let mut q = QueryBuf::new();
    let mut sets = Vec::new();
    for c in &model.columns {
        if !record.contains(&c.name) {
            continue;
        }
        let ph = q.typed_param(record.value(&c.name), &c.kind);
        sets.push(format!("{} = {}", quoted(&c.name), ph));
    }
    let lookup = Query::new().filter(Predicate::all_eq(key));
    let where_clause = where_clause(model, &lookup, &mut q)?;
    q.sql = if sets.is_empty() {
        format!("SELECT 1 FROM {}{}", qualified_table(model), where_clause)
    } else {
        format!("UPDATE {} SET {}{}", qualified_table(model), sets.join(", "), where_clause)
    };
    Ok(q)
}

/// DELETE over the query's filters.
pub fn delete(model: &Model, query: &Query) -> Result<QueryBuf, StoreError> {
    let mut q = QueryBuf::new();
    let where_clause = where_clause(model, query, &mut q)?;
    q.sql = format!("DELETE FROM {}{}", qualified_table(model), where_clause);
    Ok(q)
}
