//! Wire dialects. An idiom decodes request bodies, encodes results and errors, and may
//! rewrite queries from dialect-specific query parameters. Endpoints never depend on a
//! particular idiom; the active one is read per request from an [`IdiomHandle`].

mod default;
mod json_server;
mod yaml;

pub use default::DefaultIdiom;
pub use json_server::JsonServerIdiom;
pub use yaml::YamlIdiom;

use crate::config::Model;
use crate::error::RestError;
use crate::query::Query;
use crate::request::{Request, Response};
use crate::response::Outcome;
use serde_json::Value as JsonValue;
use std::sync::{Arc, RwLock};

pub trait Idiom: Send + Sync {
    fn name(&self) -> &'static str;

    fn media_type(&self) -> &'static str;

    /// Decoded body of PUT, POST and PATCH requests; `None` for other methods or an empty
    /// body. Grammar errors are 400.
    fn request_to_payload(&self, request: &Request) -> Result<Option<JsonValue>, RestError>;

    fn data_to_response(&self, outcome: Outcome, request: &Request, status: u16) -> Result<Response, RestError>;

    /// Applies dialect query parameters. `model` gives the filterable columns.
    fn alter_query(&self, _request: &Request, _model: &Model, query: Query) -> Result<Query, RestError> {
        Ok(query)
    }

    fn error_to_response(&self, error: &RestError) -> Response;
}

/// Shared, swappable reference to the active idiom.
#[derive(Clone)]
pub struct IdiomHandle(Arc<RwLock<Arc<dyn Idiom>>>);

impl IdiomHandle {
    pub fn new(idiom: Arc<dyn Idiom>) -> Self {
        IdiomHandle(Arc::new(RwLock::new(idiom)))
    }

    pub fn get(&self) -> Arc<dyn Idiom> {
        self.0.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set(&self, idiom: Arc<dyn Idiom>) {
        let mut guard = self.0.write().unwrap_or_else(|e| e.into_inner());
        tracing::info!(from = guard.name(), to = idiom.name(), "idiom switched");
        *guard = idiom;
    }
}

impl Default for IdiomHandle {
    fn default() -> Self {
        IdiomHandle::new(Arc::new(DefaultIdiom))
    }
}

/// Body bytes worth decoding, if the method carries one.
fn body_of(request: &Request) -> Option<&[u8]> {
    if !request.method.carries_body() || request.body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        Some(&request.body)
    }
}

fn encode_json(value: &JsonValue) -> Result<Vec<u8>, RestError> {
    serde_json::to_vec(value).map_err(|e| RestError::internal(format!("cannot encode response: {}", e)))
}

fn parse_window(request: &Request, name: &str) -> Result<Option<u64>, RestError> {
    match request.query_value(name) {
        None | Some("") => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| RestError::bad_request(format!("{} must be a non-negative integer, got '{}'", name, raw))),
    }
}

/// `offset` and `limit` query parameters shared by the enveloping idioms.
fn apply_offset_limit(request: &Request, mut query: Query) -> Result<Query, RestError> {
    if let Some(offset) = parse_window(request, "offset")? {
        query = query.offset(offset);
    }
    if let Some(limit) = parse_window(request, "limit")? {
        query = query.limit(limit);
    }
    Ok(query)
}
