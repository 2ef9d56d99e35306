//! Typed errors and their HTTP mapping.

use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("endpoint {endpoint}: primary key is empty")]
    EmptyPrimaryKey { endpoint: String },
    #[error("endpoint {endpoint}: unknown primary key '{key}' (not a column or property)")]
    UnknownPrimaryKey { endpoint: String, key: String },
    #[error("endpoint {endpoint}: unknown column '{column}' in {context}")]
    UnknownColumn {
        endpoint: String,
        column: String,
        context: &'static str,
    },
    #[error("endpoint {endpoint}: relationship '{relationship}' targets unregistered model '{target}'")]
    UnknownRelationshipTarget {
        endpoint: String,
        relationship: String,
        target: String,
    },
    #[error("duplicate endpoint name: {0}")]
    DuplicateEndpoint(String),
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),
    #[error("route already registered: {method} {path}")]
    DuplicateRoute { method: String, path: String },
    #[error("invalid option {name}: {message}")]
    InvalidOption { name: &'static str, message: String },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("unknown column {column} in {table}")]
    UnknownColumn { table: String, column: String },
    #[error("duplicate key in {table}: {key}")]
    DuplicateKey { table: String, key: String },
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),
    #[error("row decode failed for column {column}: {message}")]
    Decode { column: String, message: String },
}

/// A value could not be converted to or from its semantic type.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("cannot coerce '{column}': {message}")]
pub struct CoercionError {
    pub column: String,
    pub message: String,
}

impl CoercionError {
    pub fn new(column: impl Into<String>, message: impl Into<String>) -> Self {
        CoercionError {
            column: column.into(),
            message: message.into(),
        }
    }
}

/// Which entry of the error taxonomy a [`RestError`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ClientPayload,
    Authorization,
    NotFound,
    MethodNotAllowed,
    BatchDisallowed,
    NotImplemented,
    Validation,
    Internal,
}

/// The single error every handler raises. Idioms render it as `{message, ...extra}`.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{status}: {message}")]
pub struct RestError {
    pub kind: ErrorKind,
    pub status: u16,
    pub message: String,
    pub extra: Map<String, JsonValue>,
}

impl RestError {
    pub fn new(kind: ErrorKind, status: u16, message: impl Into<String>) -> Self {
        RestError {
            kind,
            status,
            message: message.into(),
            extra: Map::new(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ClientPayload, 400, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authorization, 403, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, 404, message)
    }

    pub fn method_not_allowed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MethodNotAllowed, 405, message)
    }

    pub fn batch_disallowed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BatchDisallowed, 406, message)
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotImplemented, 501, message)
    }

    pub fn validation(status: u16, errors: Vec<JsonValue>) -> Self {
        Self::new(ErrorKind::Validation, status, "validation failed").with_extra("errors", JsonValue::Array(errors))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, 500, message)
    }

    pub fn with_extra(mut self, key: &str, value: JsonValue) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }

    /// Body shape shared by all idioms: `{message, ...extra}`.
    pub fn body(&self) -> JsonValue {
        let mut body = Map::new();
        body.insert("message".into(), JsonValue::String(self.message.clone()));
        for (k, v) in &self.extra {
            body.insert(k.clone(), v.clone());
        }
        JsonValue::Object(body)
    }
}

impl From<CoercionError> for RestError {
    fn from(e: CoercionError) -> Self {
        RestError::bad_request(e.to_string()).with_extra("column", JsonValue::String(e.column))
    }
}

impl From<StoreError> for RestError {
    fn from(e: StoreError) -> Self {
        RestError::internal(e.to_string())
    }
}
