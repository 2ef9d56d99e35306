//! Self-descriptions served by OPTIONS and the HTML index.

use crate::endpoint::Endpoint;
use crate::state::Shared;
use serde_json::{json, Map, Value as JsonValue};

/// `{model, description, parameters, columns, properties, relationships, methods, batch}`.
/// Relationships nest the related endpoint's description; an endpoint already being
/// described is nested without its own relationships.
pub fn describe_endpoint(shared: &Shared, endpoint: &Endpoint) -> JsonValue {
    let mut visited = vec![endpoint.name.clone()];
    describe(shared, endpoint, &mut visited)
}

fn describe(shared: &Shared, endpoint: &Endpoint, visited: &mut Vec<String>) -> JsonValue {
    let mut relationships = Map::new();
    for rel in &endpoint.relationships {
        let Some(target) = shared.endpoint(&rel.target) else {
            continue;
        };
        let nested = if visited.contains(&target.name) {
            let mut flat = describe_shallow(target);
            flat.insert("relationships".into(), json!({}));
            JsonValue::Object(flat)
        } else {
            visited.push(target.name.clone());
            let nested = describe(shared, target, visited);
            visited.pop();
            nested
        };
        relationships.insert(rel.name.clone(), nested);
    }

    let mut out = describe_shallow(endpoint);
    out.insert("relationships".into(), JsonValue::Object(relationships));
    JsonValue::Object(out)
}

fn describe_shallow(endpoint: &Endpoint) -> Map<String, JsonValue> {
    let methods: Vec<&str> = endpoint.methods.iter().map(|m| m.as_str()).collect();
    let mut out = Map::new();
    out.insert("model".into(), json!(endpoint.model.name));
    out.insert("description".into(), json!(endpoint.description));
    out.insert("parameters".into(), json!(endpoint.primary_keys));
    out.insert(
        "columns".into(),
        endpoint
            .visible_columns()
            .into_iter()
            .map(|c| (c.name.clone(), JsonValue::String(c.kind.type_name())))
            .collect::<Map<_, _>>()
            .into(),
    );
    out.insert(
        "properties".into(),
        endpoint
            .properties
            .iter()
            .map(|p| (p.name.clone(), JsonValue::String(p.kind.type_name())))
            .collect::<Map<_, _>>()
            .into(),
    );
    out.insert("methods".into(), json!(methods));
    out.insert("batch".into(), json!(endpoint.allow_batch));
    out
}

/// `OPTIONS {root}`: endpoint path to description, in registration order.
pub fn describe_root(shared: &Shared) -> JsonValue {
    let mut out = Map::new();
    for endpoint in &shared.endpoints {
        out.insert(shared.endpoint_path(endpoint), describe_endpoint(shared, endpoint));
    }
    JsonValue::Object(out)
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// `GET {root}/`: a plain page listing endpoints and linking the OpenAPI document.
pub fn html_index(shared: &Shared) -> String {
    let title = escape(&shared.options.info.title);
    let mut rows = String::new();
    for endpoint in &shared.endpoints {
        let path = escape(&shared.endpoint_path(endpoint));
        let methods: Vec<&str> = endpoint.methods.iter().map(|m| m.as_str()).collect();
        let description = endpoint.description.as_deref().map(escape).unwrap_or_default();
        rows.push_str(&format!(
            "<tr><td><a href=\"{path}\">{path}</a></td><td>{}</td><td>{}</td></tr>\n",
            methods.join(", "),
            description,
        ));
    }
    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{title}</title></head>\n<body>\n\
         <h1>{title}</h1>\n<p><a href=\"{root}/openapi.json\">openapi.json</a></p>\n\
         <table>\n<tr><th>endpoint</th><th>methods</th><th>description</th></tr>\n{rows}</table>\n\
         </body></html>\n",
        root = escape(&shared.root()),
    )
}
