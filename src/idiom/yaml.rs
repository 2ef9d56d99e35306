use super::{apply_offset_limit, body_of, Idiom};
use crate::config::Model;
use crate::error::RestError;
use crate::query::Query;
use crate::request::{Request, Response};
use crate::response::Outcome;
use serde_json::Value as JsonValue;

const YAML: &str = "text/yaml";

/// The default envelope encoded as YAML.
#[derive(Clone, Copy, Debug, Default)]
pub struct YamlIdiom;

fn encode(value: &JsonValue) -> Result<String, RestError> {
    serde_yaml::to_string(value).map_err(|e| RestError::internal(format!("cannot encode response: {}", e)))
}

impl Idiom for YamlIdiom {
    fn name(&self) -> &'static str {
        "yaml"
    }

    fn media_type(&self) -> &'static str {
        YAML
    }

    fn request_to_payload(&self, request: &Request) -> Result<Option<JsonValue>, RestError> {
        match body_of(request) {
            None => Ok(None),
            Some(bytes) => serde_yaml::from_slice::<JsonValue>(bytes)
                .map(Some)
                .map_err(|e| RestError::bad_request(format!("malformed YAML payload: {}", e))),
        }
    }

    fn data_to_response(&self, outcome: Outcome, _request: &Request, status: u16) -> Result<Response, RestError> {
        Ok(Response::new(status, YAML, encode(&outcome.into_json())?))
    }

    fn alter_query(&self, request: &Request, _model: &Model, query: Query) -> Result<Query, RestError> {
        apply_offset_limit(request, query)
    }

    fn error_to_response(&self, error: &RestError) -> Response {
        let body = encode(&error.body()).unwrap_or_default();
        Response::new(error.status, YAML, body)
    }
}
