//! Model descriptors: tables with typed columns, computed properties and relationships.

use crate::value::{Record, Value};
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;

/// Closed set of semantic column types. Coercion and SQL casts match on it statically.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SemanticType {
    Integer,
    Boolean,
    Real,
    Decimal,
    String,
    Bytes,
    Date,
    Time,
    DateTime,
    Duration,
    Array(Box<SemanticType>),
    Opaque,
}

impl SemanticType {
    pub fn array_of(inner: SemanticType) -> Self {
        SemanticType::Array(Box::new(inner))
    }

    /// Name used in OPTIONS descriptions.
    pub fn type_name(&self) -> String {
        match self {
            SemanticType::Integer => "integer".into(),
            SemanticType::Boolean => "boolean".into(),
            SemanticType::Real => "real".into(),
            SemanticType::Decimal => "decimal".into(),
            SemanticType::String => "string".into(),
            SemanticType::Bytes => "bytes".into(),
            SemanticType::Date => "date".into(),
            SemanticType::Time => "time".into(),
            SemanticType::DateTime => "datetime".into(),
            SemanticType::Duration => "duration".into(),
            SemanticType::Array(inner) => format!("array[{}]", inner.type_name()),
            SemanticType::Opaque => "opaque".into(),
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.type_name())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: SemanticType,
    pub nullable: bool,
    /// Whether the store fills the column when it is omitted (serial ids, NOW() defaults).
    pub has_default: bool,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, kind: SemanticType) -> Self {
        ColumnSpec {
            name: name.into(),
            kind,
            nullable: true,
            has_default: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self) -> Self {
        self.has_default = true;
        self
    }
}

/// A table as the store sees it. `key` is the storage identity used for UPDATE/DELETE.
#[derive(Clone, Debug, PartialEq)]
pub struct Model {
    pub name: String,
    pub schema: Option<String>,
    pub table: String,
    pub columns: Vec<ColumnSpec>,
    pub key: Vec<String>,
}

impl Model {
    /// Model named after its table, with no schema and no key yet.
    pub fn new(table: impl Into<String>) -> Self {
        let table = table.into();
        Model {
            name: table.clone(),
            schema: None,
            table,
            columns: Vec::new(),
            key: Vec::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn in_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn column(mut self, column: ColumnSpec) -> Self {
        self.columns.push(column);
        self
    }

    /// Adds a column and makes it part of the storage key.
    pub fn key_column(mut self, column: ColumnSpec) -> Self {
        self.key.push(column.name.clone());
        self.columns.push(column.not_null());
        self
    }

    pub fn column_spec(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_spec(name).is_some()
    }

    /// Storage key values of a record, in key order.
    pub fn key_of(&self, record: &Record) -> Vec<(String, Value)> {
        self.key
            .iter()
            .map(|k| (k.clone(), record.get(k).cloned().unwrap_or(Value::Null)))
            .collect()
    }
}

pub type PropertyFn = Arc<dyn Fn(&Record) -> Value + Send + Sync>;
pub type FormatterFn = Arc<dyn Fn(&Value) -> JsonValue + Send + Sync>;

/// Read-only attribute computed from a record.
#[derive(Clone)]
pub struct Property {
    pub name: String,
    pub kind: SemanticType,
    pub compute: PropertyFn,
    pub formatter: Option<FormatterFn>,
}

impl Property {
    pub fn new<F>(name: impl Into<String>, kind: SemanticType, compute: F) -> Self
    where
        F: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        Property {
            name: name.into(),
            kind,
            compute: Arc::new(compute),
            formatter: None,
        }
    }

    pub fn formatted<F>(mut self, formatter: F) -> Self
    where
        F: Fn(&Value) -> JsonValue + Send + Sync + 'static,
    {
        self.formatter = Some(Arc::new(formatter));
        self
    }
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("formatted", &self.formatter.is_some())
            .finish()
    }
}

/// Link to the endpoint registered for `target`. Related records satisfy
/// `remote == record[local]` for every pair.
#[derive(Clone, Debug, PartialEq)]
pub struct Relationship {
    pub name: String,
    pub target: String,
    pub pairs: Vec<(String, String)>,
}

impl Relationship {
    pub fn new(name: impl Into<String>, target: impl Into<String>) -> Self {
        Relationship {
            name: name.into(),
            target: target.into(),
            pairs: Vec::new(),
        }
    }

    pub fn on(mut self, local: impl Into<String>, remote: impl Into<String>) -> Self {
        self.pairs.push((local.into(), remote.into()));
        self
    }
}
