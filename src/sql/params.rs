//! Convert [`Value`]s to sqlx binds and PostgreSQL rows back to [`Record`]s.

use crate::coerce::{deserialize_value, duration_seconds, seconds_to_duration, serialize_value};
use crate::config::{Model, SemanticType};
use crate::error::StoreError;
use crate::value::{Record, Value};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Postgres, Row};

pub type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

/// Binds one value. The builder wraps every placeholder in a cast, so a null is bound
/// as untyped text and converted by the server.
pub fn bind_value<'q>(query: PgQuery<'q>, value: &Value) -> PgQuery<'q> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Integer(n) => query.bind(*n),
        Value::Boolean(b) => query.bind(*b),
        Value::Real(n) | Value::Decimal(n) => query.bind(*n),
        Value::String(s) => query.bind(s.clone()),
        Value::Bytes(b) => query.bind(b.clone()),
        Value::Date(d) => query.bind(*d),
        Value::Time(t) => query.bind(*t),
        Value::DateTime(dt) => query.bind(*dt),
        Value::Duration(d) => query.bind(duration_seconds(d)),
        Value::Array(_) => query.bind(array_json(value)),
        Value::Opaque(j) => query.bind(j.clone()),
    }
}

/// Arrays travel as JSON text arrays and are rebuilt server side.
fn array_json(value: &Value) -> JsonValue {
    match value {
        Value::Array(items) => JsonValue::Array(items.iter().map(array_json).collect()),
        Value::Null => JsonValue::Null,
        Value::Opaque(j) => j.clone(),
        other => JsonValue::String(other.to_string()),
    }
}

fn decode_err(column: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError::Decode {
        column: column.to_string(),
        message: e.to_string(),
    }
}

fn get<'r, T>(row: &'r PgRow, name: &str) -> Result<Option<T>, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get::<Option<T>, _>(name).map_err(|e| decode_err(name, e))
}

/// Decodes a row produced by the builder's SELECT list, directed by the column types.
pub fn decode_row(model: &Model, row: &PgRow) -> Result<Record, StoreError> {
    let mut record = Record::new();
    for c in &model.columns {
        let name = c.name.as_str();
        let v = match &c.kind {
            SemanticType::Integer => get::<i64>(row, name)?.map(Value::Integer),
            SemanticType::Boolean => get::<bool>(row, name)?.map(Value::Boolean),
            SemanticType::Real => get::<f64>(row, name)?.map(Value::Real),
            SemanticType::Decimal => get::<f64>(row, name)?.map(Value::Decimal),
            SemanticType::String => get::<String>(row, name)?.map(Value::String),
            SemanticType::Bytes => get::<Vec<u8>>(row, name)?.map(Value::Bytes),
            SemanticType::Date => get::<NaiveDate>(row, name)?.map(Value::Date),
            SemanticType::Time => get::<NaiveTime>(row, name)?.map(Value::Time),
            SemanticType::DateTime => get::<NaiveDateTime>(row, name)?.map(Value::DateTime),
            SemanticType::Duration => match get::<f64>(row, name)? {
                Some(secs) => Some(Value::Duration(seconds_to_duration(name, secs).map_err(|e| decode_err(name, e))?)),
                None => None,
            },
            SemanticType::Array(_) => match get::<JsonValue>(row, name)? {
                Some(j) => Some(deserialize_value(name, &c.kind, &j).map_err(|e| decode_err(name, e))?),
                None => None,
            },
            SemanticType::Opaque => get::<JsonValue>(row, name)?.map(Value::Opaque),
        };
        record.set(name, v.unwrap_or(Value::Null));
    }
    Ok(record)
}

/// JSON form of a bound parameter, for debug logging.
pub fn param_for_log(value: &Value) -> JsonValue {
    serialize_value("param", &SemanticType::Opaque, value).unwrap_or(JsonValue::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arrays_flatten_to_text_elements() {
        let v = Value::Array(vec![Value::Integer(1), Value::Null, Value::from("x")]);
        assert_eq!(array_json(&v), serde_json::json!(["1", null, "x"]));
    }

    #[test]
    fn log_form_is_json() {
        assert_eq!(param_for_log(&Value::Integer(7)), serde_json::json!(7));
        assert_eq!(param_for_log(&Value::Null), JsonValue::Null);
    }
}
