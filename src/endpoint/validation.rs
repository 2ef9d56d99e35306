//! Field validators and the per-record error report.

use crate::config::Model;
use crate::error::RestError;
use crate::value::{Record, Value};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// A validator rejected a value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct FieldError(pub String);

/// What a validator sees: the current value, the column name and the whole record.
#[derive(Debug)]
pub struct Validatable<'a> {
    pub value: Value,
    pub name: &'a str,
    pub record: &'a Record,
}

impl Validatable<'_> {
    pub fn error(&self, message: impl Into<String>) -> FieldError {
        FieldError(message.into())
    }
}

/// Returns the value to store, possibly transformed, or rejects it.
pub type Validator = Arc<dyn Fn(Validatable<'_>) -> Result<Value, FieldError> + Send + Sync>;

/// Runs every column's validators in order over each record, replacing values with what
/// the validators return. Failures are collected across the whole batch and reported as
/// `{pk..., fields: {column: message}}` entries.
pub fn validate_records(
    validators: &BTreeMap<String, Vec<Validator>>,
    primary_keys: &[String],
    model: &Model,
    records: &mut [Record],
    status: u16,
    render_pk: impl Fn(&str, &Record) -> JsonValue,
) -> Result<(), RestError> {
    if validators.is_empty() {
        return Ok(());
    }
    let mut errors = Vec::new();
    for record in records.iter_mut() {
        let mut fields = Map::new();
        for (column, chain) in validators {
            let mut value = record.value(column);
            let mut failed = false;
            for validate in chain {
                let field = Validatable {
                    value: value.clone(),
                    name: column,
                    record: &*record,
                };
                match validate(field) {
                    Ok(v) => value = v,
                    Err(e) => {
                        fields.insert(column.clone(), JsonValue::String(e.0));
                        failed = true;
                        break;
                    }
                }
            }
            if !failed && model.has_column(column) {
                record.set(column.clone(), value);
            }
        }
        if !fields.is_empty() {
            let mut entry = Map::new();
            for pk in primary_keys {
                entry.insert(pk.clone(), render_pk(pk.as_str(), &*record));
            }
            entry.insert("fields".into(), JsonValue::Object(fields));
            errors.push(JsonValue::Object(entry));
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        tracing::debug!(failures = errors.len(), "validation failed");
        Err(RestError::validation(status, errors))
    }
}
