//! Entity REST: automatic REST endpoints for relational data models.

pub mod adapter;
pub mod coerce;
pub mod config;
pub mod describe;
pub mod endpoint;
pub mod error;
pub mod idiom;
pub mod openapi;
pub mod query;
pub mod registry;
pub mod request;
pub mod response;
pub mod session;
pub mod sql;
pub mod state;
pub mod value;

pub use adapter::{Adapter, AxumAdapter, Handler};
pub use coerce::{Coercer, DefaultCoercer};
pub use config::{ApiOptions, ColumnSpec, Info, Model, Property, Relationship, SemanticType};
pub use endpoint::{
    DeclaredHandler, Endpoint, FieldError, Guard, HandlerContext, HeaderGuard, Reply, Validatable, Validator,
};
pub use error::{CoercionError, ConfigError, ErrorKind, RestError, StoreError};
pub use idiom::{DefaultIdiom, Idiom, IdiomHandle, JsonServerIdiom, YamlIdiom};
pub use query::{Order, Predicate, Query};
pub use registry::Api;
pub use request::{Method, Request, Response};
pub use response::{Envelope, Outcome};
pub use session::{MemoryStore, PgSessionFactory, Session, SessionFactory};
pub use value::{Record, Value};
