use super::{apply_offset_limit, body_of, encode_json, Idiom};
use crate::config::Model;
use crate::error::RestError;
use crate::query::Query;
use crate::request::{Request, Response};
use crate::response::Outcome;
use serde_json::Value as JsonValue;

const JSON: &str = "application/json";

/// JSON bodies, `{primary_keys, occurences, objects[, offset, limit]}` responses.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultIdiom;

impl Idiom for DefaultIdiom {
    fn name(&self) -> &'static str {
        "default"
    }

    fn media_type(&self) -> &'static str {
        JSON
    }

    fn request_to_payload(&self, request: &Request) -> Result<Option<JsonValue>, RestError> {
        match body_of(request) {
            None => Ok(None),
            Some(bytes) => serde_json::from_slice(bytes)
                .map(Some)
                .map_err(|e| RestError::bad_request(format!("malformed JSON payload: {}", e))),
        }
    }

    fn data_to_response(&self, outcome: Outcome, _request: &Request, status: u16) -> Result<Response, RestError> {
        Ok(Response::new(status, JSON, encode_json(&outcome.into_json())?))
    }

    fn alter_query(&self, request: &Request, _model: &Model, query: Query) -> Result<Query, RestError> {
        apply_offset_limit(request, query)
    }

    fn error_to_response(&self, error: &RestError) -> Response {
        let body = serde_json::to_vec(&error.body()).unwrap_or_else(|_| b"{}".to_vec());
        Response::new(error.status, JSON, body)
    }
}
