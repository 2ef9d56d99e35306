//! Flat-list dialect in the style of json-server: bare arrays, `X-Total-Count`, and
//! filtering, sorting and windowing through query parameters.

use super::{body_of, encode_json, Idiom};
use crate::coerce::parse_text;
use crate::config::{Model, SemanticType};
use crate::error::RestError;
use crate::query::{Order, Predicate, Query};
use crate::request::{Request, Response};
use crate::response::{Envelope, Outcome};
use serde_json::{Map, Value as JsonValue};

const JSON: &str = "application/json";
const KEY_SEPARATOR: &str = "|";
const DEFAULT_PAGE_SIZE: u64 = 10;
const RESERVED: [&str; 7] = ["_sort", "_order", "_start", "_end", "_limit", "_page", "q"];

#[derive(Clone, Copy, Debug, Default)]
pub struct JsonServerIdiom;

fn parse_count(name: &str, raw: &str) -> Result<u64, RestError> {
    raw.trim()
        .parse()
        .map_err(|_| RestError::bad_request(format!("{} must be a non-negative integer, got '{}'", name, raw)))
}

fn count_param(request: &Request, name: &str) -> Result<Option<u64>, RestError> {
    request.query_value(name).map(|raw| parse_count(name, raw)).transpose()
}

/// Scalar standing for a related record: its primary key, or the key parts joined by `|`.
fn collapse(object: &JsonValue, keys: &[String]) -> JsonValue {
    let Some(map) = object.as_object() else {
        return object.clone();
    };
    if let [single] = keys {
        return map.get(single).cloned().unwrap_or(JsonValue::Null);
    }
    let parts: Vec<String> = keys
        .iter()
        .map(|k| match map.get(k) {
            Some(JsonValue::String(s)) => s.clone(),
            Some(JsonValue::Null) | None => String::new(),
            Some(other) => other.to_string(),
        })
        .collect();
    JsonValue::String(parts.join(KEY_SEPARATOR))
}

fn flatten(env: &Envelope) -> Vec<JsonValue> {
    env.objects
        .iter()
        .map(|object| {
            let mut object: Map<String, JsonValue> = object.clone();
            for (name, keys) in &env.relationships {
                if let Some(JsonValue::Array(related)) = object.get(name) {
                    let collapsed = related.iter().map(|r| collapse(r, keys)).collect();
                    object.insert(name.clone(), JsonValue::Array(collapsed));
                }
            }
            JsonValue::Object(object)
        })
        .collect()
}

/// Resolves a sort key to a column, falling back to the last dotted segment.
fn sort_column(model: &Model, key: &str) -> Option<String> {
    if model.has_column(key) {
        return Some(key.to_string());
    }
    let last = key.rsplit('.').next().unwrap_or(key);
    if last != key && model.has_column(last) {
        tracing::warn!(sort = key, column = last, "sort key is not a column; using its last segment");
        return Some(last.to_string());
    }
    tracing::warn!(sort = key, model = %model.name, "ignoring unknown sort key");
    None
}

fn field_filter(model: &Model, key: &str, values: &[String]) -> Result<Option<Predicate>, RestError> {
    let (column, op) = [("_gte", "gte"), ("_lte", "lte"), ("_ne", "ne"), ("_like", "like")]
        .iter()
        .find_map(|(suffix, op)| key.strip_suffix(suffix).map(|c| (c, *op)))
        .filter(|(c, _)| model.has_column(c))
        .unwrap_or((key, "eq"));
    let Some(spec) = model.column_spec(column) else {
        tracing::warn!(param = key, model = %model.name, "ignoring query parameter that names no column");
        return Ok(None);
    };
    let Some(last) = values.last() else {
        return Ok(None);
    };
    let parse = |raw: &str| parse_text(column, &spec.kind, raw).map_err(RestError::from);
    Ok(Some(match op {
        "gte" => Predicate::Gte(column.to_string(), parse(last.as_str())?),
        "lte" => Predicate::Lte(column.to_string(), parse(last.as_str())?),
        "ne" => Predicate::Ne(column.to_string(), parse(last.as_str())?),
        "like" => {
            regex::Regex::new(last)
                .map_err(|e| RestError::bad_request(format!("{} is not a valid pattern: {}", key, e)))?;
            Predicate::Matches {
                column: column.to_string(),
                pattern: last.clone(),
                case_insensitive: true,
            }
        }
        _ if values.len() > 1 => Predicate::In(
            column.to_string(),
            values.iter().map(|v| parse(v.as_str())).collect::<Result<_, _>>()?,
        ),
        _ => Predicate::Eq(column.to_string(), parse(last.as_str())?),
    }))
}

fn full_text(model: &Model, text: &str) -> Predicate {
    let pattern = regex::escape(text);
    Predicate::Or(
        model
            .columns
            .iter()
            .filter(|c| !matches!(c.kind, SemanticType::Bytes | SemanticType::Opaque))
            .map(|c| Predicate::Matches {
                column: c.name.clone(),
                pattern: pattern.clone(),
                case_insensitive: true,
            })
            .collect(),
    )
}

impl Idiom for JsonServerIdiom {
    fn name(&self) -> &'static str {
        "json-server"
    }

    fn media_type(&self) -> &'static str {
        JSON
    }

    /// A bare array is read as `{objects: [...]}` so batch verbs work unchanged.
    fn request_to_payload(&self, request: &Request) -> Result<Option<JsonValue>, RestError> {
        let Some(bytes) = body_of(request) else {
            return Ok(None);
        };
        let value: JsonValue =
            serde_json::from_slice(bytes).map_err(|e| RestError::bad_request(format!("malformed JSON payload: {}", e)))?;
        match value {
            JsonValue::Array(items) => {
                let mut wrapped = Map::new();
                wrapped.insert("objects".into(), JsonValue::Array(items));
                Ok(Some(JsonValue::Object(wrapped)))
            }
            JsonValue::Object(_) => Ok(Some(value)),
            _ => Err(RestError::bad_request("payload must be an object or an array of objects")),
        }
    }

    fn data_to_response(&self, outcome: Outcome, _request: &Request, status: u16) -> Result<Response, RestError> {
        let env = match outcome {
            Outcome::Raw(v) => return Ok(Response::new(status, JSON, encode_json(&v)?)),
            Outcome::Envelope(env) => env,
        };
        let total = env.occurences.to_string();
        let mut objects = flatten(&env);
        let (status, body) = if env.single {
            if objects.is_empty() {
                (404, JsonValue::Object(Map::new()))
            } else {
                (status, objects.swap_remove(0))
            }
        } else {
            (status, JsonValue::Array(objects))
        };
        Ok(Response::new(status, JSON, encode_json(&body)?).with_header("X-Total-Count", total))
    }

    fn alter_query(&self, request: &Request, model: &Model, mut query: Query) -> Result<Query, RestError> {
        for (key, values) in &request.query {
            if RESERVED.contains(&key.as_str()) {
                continue;
            }
            if let Some(p) = field_filter(model, key, values)? {
                query = query.filter(p);
            }
        }
        if let Some(text) = request.query_value("q").filter(|t| !t.is_empty()) {
            query = query.filter(full_text(model, text));
        }
        if let Some(sort) = request.query_value("_sort") {
            let orders: Vec<&str> = request.query_value("_order").map(|o| o.split(',').collect()).unwrap_or_default();
            for (i, key) in sort.split(',').map(str::trim).filter(|k| !k.is_empty()).enumerate() {
                let Some(column) = sort_column(model, key) else {
                    continue;
                };
                let descending = orders.get(i).is_some_and(|o| o.trim().eq_ignore_ascii_case("desc"));
                query = query.order_by(if descending { Order::desc(column) } else { Order::asc(column) });
            }
        }
        let limit = count_param(request, "_limit")?;
        if let Some(page) = count_param(request, "_page")? {
            let size = limit.unwrap_or(DEFAULT_PAGE_SIZE);
            return Ok(query.offset(page.saturating_sub(1) * size).limit(size));
        }
        let start = count_param(request, "_start")?;
        if let Some(start) = start {
            query = query.offset(start);
        }
        match (count_param(request, "_end")?, limit) {
            (Some(end), _) => query = query.limit(end.saturating_sub(start.unwrap_or(0))),
            (None, Some(limit)) => query = query.limit(limit),
            (None, None) => {}
        }
        Ok(query)
    }

    fn error_to_response(&self, error: &RestError) -> Response {
        let body = serde_json::to_vec(&error.body()).unwrap_or_else(|_| b"{}".to_vec());
        Response::new(error.status, JSON, body)
    }
}
