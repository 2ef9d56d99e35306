//! Result data handed from the engine to the idiom.

use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;

/// Canonical result shape of the default idiom.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Envelope {
    pub primary_keys: Vec<String>,
    pub occurences: u64,
    pub objects: Vec<Map<String, JsonValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    /// The request addressed one record through its primary key.
    #[serde(skip)]
    pub single: bool,
    /// Relationship name to the primary keys of the related endpoint.
    #[serde(skip)]
    pub relationships: BTreeMap<String, Vec<String>>,
}

impl Envelope {
    /// Serialized form; the window fields appear only when set.
    pub fn to_json(&self) -> JsonValue {
        // Every field serializes to a JSON tree with string keys, so this cannot fail.
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Envelope(Envelope),
    /// A mapping returned by a declared handler; idioms encode it untouched.
    Raw(JsonValue),
}

impl Outcome {
    pub fn into_json(self) -> JsonValue {
        match self {
            Outcome::Envelope(env) => env.to_json(),
            Outcome::Raw(v) => v,
        }
    }
}
