//! Endpoint descriptors: one REST surface per model, configured through a builder.
//!
//! An endpoint owns everything that shapes its requests: primary keys, the method set,
//! projection, properties, relationships, defaults and fixed values, validators, guards,
//! a persistent query refinement and per-method overrides. The dispatch engine in
//! [`dispatch`] interprets it.

pub mod auth;
pub(crate) mod dispatch;
pub mod validation;

pub use auth::{Guard, HeaderGuard};
pub use validation::{FieldError, Validatable, Validator};

use crate::coerce::Coercer;
use crate::config::{ColumnSpec, Model, Property, Relationship, SemanticType};
use crate::error::RestError;
use crate::query::{compose, identity_factory, Query, QueryFactory};
use crate::request::{Method, Request};
use crate::session::Session;
use crate::value::{Record, Value};
use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

pub type ComputeFn = Arc<dyn Fn(&Map<String, JsonValue>) -> JsonValue + Send + Sync>;

/// Value for a default or fixed column: a constant or computed from the payload.
#[derive(Clone)]
pub enum FieldSource {
    Value(JsonValue),
    Computed(ComputeFn),
}

impl FieldSource {
    pub fn resolve(&self, payload: &Map<String, JsonValue>) -> JsonValue {
        match self {
            FieldSource::Value(v) => v.clone(),
            FieldSource::Computed(f) => f(payload),
        }
    }
}

impl From<JsonValue> for FieldSource {
    fn from(v: JsonValue) -> Self {
        FieldSource::Value(v)
    }
}

/// What a declared handler hands back.
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    /// Records the engine serializes into the idiom's envelope.
    Records(Vec<Record>),
    /// A mapping sent as is.
    Raw(JsonValue),
}

/// Arguments of a declared handler.
pub struct HandlerContext<'a> {
    pub request: &'a Request,
    pub payload: Option<JsonValue>,
    /// Primary key values from the path, coerced to their declared types. Empty on
    /// collection routes.
    pub pks: Vec<(String, Value)>,
    pub session: &'a mut dyn Session,
    pub endpoint: &'a Endpoint,
}

/// Replacement for the built-in behaviour of one method.
#[async_trait]
pub trait DeclaredHandler: Send + Sync {
    async fn handle(&self, ctx: HandlerContext<'_>) -> Result<Reply, RestError>;
}

#[derive(Clone)]
pub struct Declared {
    pub handler: Arc<dyn DeclaredHandler>,
    /// The handler commits itself; the engine only rolls back.
    pub manual_commit: bool,
}

#[derive(Clone)]
pub struct Endpoint {
    pub name: String,
    pub description: Option<String>,
    pub model: Arc<Model>,
    pub primary_keys: Vec<String>,
    pub methods: BTreeSet<Method>,
    pub allow_batch: bool,
    /// `None` defers to the registry option.
    pub empty_get_as_404: Option<bool>,
    pub validation_error_status: Option<u16>,
    pub only: Option<Vec<String>>,
    pub exclude: Vec<String>,
    pub properties: Vec<Property>,
    pub relationships: Vec<Relationship>,
    pub defaults: BTreeMap<String, FieldSource>,
    pub fixed: BTreeMap<String, FieldSource>,
    pub validators: BTreeMap<String, Vec<Validator>>,
    pub auth: Option<Arc<dyn Guard>>,
    pub read_auth: Option<Arc<dyn Guard>>,
    pub write_auth: Option<Arc<dyn Guard>>,
    pub query_factory: QueryFactory,
    pub coercer: Option<Arc<dyn Coercer>>,
    pub declared: HashMap<Method, Declared>,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name)
            .field("model", &self.model.name)
            .field("primary_keys", &self.primary_keys)
            .field("methods", &self.methods)
            .field("allow_batch", &self.allow_batch)
            .finish_non_exhaustive()
    }
}

impl Endpoint {
    /// Endpoint named after the model, keyed by the model's storage key, with every method.
    pub fn new(model: impl Into<Arc<Model>>) -> Self {
        let model = model.into();
        Endpoint {
            name: model.name.clone(),
            description: None,
            primary_keys: model.key.clone(),
            model,
            methods: Method::ALL.into_iter().collect(),
            allow_batch: false,
            empty_get_as_404: None,
            validation_error_status: None,
            only: None,
            exclude: Vec::new(),
            properties: Vec::new(),
            relationships: Vec::new(),
            defaults: BTreeMap::new(),
            fixed: BTreeMap::new(),
            validators: BTreeMap::new(),
            auth: None,
            read_auth: None,
            write_auth: None,
            query_factory: identity_factory(),
            coercer: None,
            declared: HashMap::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn primary_key<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_keys = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods = methods.into_iter().collect();
        self
    }

    pub fn allow_batch(mut self, on: bool) -> Self {
        self.allow_batch = on;
        self
    }

    pub fn empty_get_as_404(mut self, on: bool) -> Self {
        self.empty_get_as_404 = Some(on);
        self
    }

    pub fn validation_error_status(mut self, status: u16) -> Self {
        self.validation_error_status = Some(status);
        self
    }

    pub fn only<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.only = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn exclude<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    pub fn relationship(mut self, relationship: Relationship) -> Self {
        self.relationships.push(relationship);
        self
    }

    pub fn default_value(mut self, column: impl Into<String>, value: JsonValue) -> Self {
        self.defaults.insert(column.into(), FieldSource::Value(value));
        self
    }

    pub fn default_with<F>(mut self, column: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Map<String, JsonValue>) -> JsonValue + Send + Sync + 'static,
    {
        self.defaults.insert(column.into(), FieldSource::Computed(Arc::new(f)));
        self
    }

    pub fn fixed_value(mut self, column: impl Into<String>, value: JsonValue) -> Self {
        self.fixed.insert(column.into(), FieldSource::Value(value));
        self
    }

    pub fn fixed_with<F>(mut self, column: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Map<String, JsonValue>) -> JsonValue + Send + Sync + 'static,
    {
        self.fixed.insert(column.into(), FieldSource::Computed(Arc::new(f)));
        self
    }

    /// Appends a validator to the column's chain.
    pub fn validator<F>(mut self, column: impl Into<String>, f: F) -> Self
    where
        F: Fn(Validatable<'_>) -> Result<Value, FieldError> + Send + Sync + 'static,
    {
        self.validators.entry(column.into()).or_default().push(Arc::new(f));
        self
    }

    pub fn auth<G: Guard + 'static>(mut self, guard: G) -> Self {
        self.auth = Some(Arc::new(guard));
        self
    }

    pub fn read_auth<G: Guard + 'static>(mut self, guard: G) -> Self {
        self.read_auth = Some(Arc::new(guard));
        self
    }

    pub fn write_auth<G: Guard + 'static>(mut self, guard: G) -> Self {
        self.write_auth = Some(Arc::new(guard));
        self
    }

    /// Adds a persistent refinement applied to every query of this endpoint, after the
    /// refinements already installed.
    pub fn refine<F>(mut self, f: F) -> Self
    where
        F: Fn(Query) -> Query + Send + Sync + 'static,
    {
        self.query_factory = compose(self.query_factory, Arc::new(f));
        self
    }

    pub fn coercer(mut self, coercer: Arc<dyn Coercer>) -> Self {
        self.coercer = Some(coercer);
        self
    }

    /// Replaces the built-in handler of `method` and adds the method to the method set.
    pub fn declare<H>(mut self, method: Method, handler: H, manual_commit: bool) -> Self
    where
        H: DeclaredHandler + 'static,
    {
        self.declare_arc(method, Arc::new(handler), manual_commit);
        self
    }

    pub(crate) fn declare_arc(&mut self, method: Method, handler: Arc<dyn DeclaredHandler>, manual_commit: bool) {
        self.methods.insert(method);
        self.declared.insert(method, Declared { handler, manual_commit });
    }

    /// Copy of this endpoint named `{name}_sub` whose queries are further restricted by
    /// `refiner`. Builder calls on the result, `named` included, override any setting.
    pub fn sub<F>(&self, refiner: F) -> Self
    where
        F: Fn(Query) -> Query + Send + Sync + 'static,
    {
        let name = format!("{}_sub", self.name);
        self.clone().named(name).refine(refiner)
    }

    pub fn allows(&self, method: Method) -> bool {
        self.methods.contains(&method)
    }

    /// Columns serialized and accepted from payloads: `only` (or all columns) minus
    /// `exclude`, plus key columns, in model order.
    pub fn visible_columns(&self) -> Vec<&ColumnSpec> {
        self.model
            .columns
            .iter()
            .filter(|c| {
                if self.primary_keys.contains(&c.name) {
                    return true;
                }
                let selected = match &self.only {
                    Some(only) => only.contains(&c.name),
                    None => true,
                };
                selected && !self.exclude.contains(&c.name)
            })
            .collect()
    }

    pub fn property_named(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Type of a primary key, whether it is a column or a property.
    pub fn key_kind(&self, name: &str) -> Option<&SemanticType> {
        self.model
            .column_spec(name)
            .map(|c| &c.kind)
            .or_else(|| self.property_named(name).map(|p| &p.kind))
    }

    /// Value of a column or property of a record.
    pub fn attribute(&self, record: &Record, name: &str) -> Value {
        match self.property_named(name) {
            Some(p) if !self.model.has_column(name) => (p.compute)(record),
            _ => record.value(name),
        }
    }

    pub fn empty_get_is_404(&self, registry_default: bool) -> bool {
        self.empty_get_as_404.unwrap_or(registry_default)
    }
}
