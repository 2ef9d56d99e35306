//! OpenAPI 3.0.0 document derived from the mounted endpoints.

use crate::config::SemanticType;
use crate::endpoint::Endpoint;
use crate::error::RestError;
use crate::request::Method;
use crate::state::Shared;
use serde_json::Value as JsonValue;
use utoipa::openapi::path::{HttpMethod, Operation, OperationBuilder, ParameterBuilder, ParameterIn, PathItemBuilder};
use utoipa::openapi::request_body::RequestBodyBuilder;
use utoipa::openapi::schema::{ArrayBuilder, KnownFormat, Object, ObjectBuilder, SchemaFormat, Type};
use utoipa::openapi::tag::TagBuilder;
use utoipa::openapi::{
    ContentBuilder, InfoBuilder, OpenApiBuilder, PathsBuilder, Required, ResponseBuilder, ServerBuilder,
};

fn known(kind: KnownFormat) -> Option<SchemaFormat> {
    Some(SchemaFormat::KnownFormat(kind))
}

fn type_schema(kind: &SemanticType) -> ObjectBuilder {
    let b = ObjectBuilder::new();
    match kind {
        SemanticType::Integer => b.schema_type(Type::Integer).format(known(KnownFormat::Int64)),
        SemanticType::Boolean => b.schema_type(Type::Boolean),
        SemanticType::Real => b.schema_type(Type::Number).format(known(KnownFormat::Double)),
        SemanticType::Decimal => b.schema_type(Type::Number),
        SemanticType::String => b.schema_type(Type::String),
        SemanticType::Bytes => b.schema_type(Type::String).format(known(KnownFormat::Byte)),
        SemanticType::Date => b.schema_type(Type::String).format(known(KnownFormat::Date)),
        SemanticType::Time => b.schema_type(Type::String).format(Some(SchemaFormat::Custom("time".into()))),
        SemanticType::DateTime => b.schema_type(Type::String).format(known(KnownFormat::DateTime)),
        SemanticType::Duration => b
            .schema_type(Type::Number)
            .description(Some("duration in seconds")),
        SemanticType::Array(_) | SemanticType::Opaque => b.description(Some(kind.type_name())),
    }
}

fn property_schema(kind: &SemanticType) -> utoipa::openapi::RefOr<utoipa::openapi::Schema> {
    match kind {
        SemanticType::Array(inner) => ArrayBuilder::new().items(property_schema(inner)).build().into(),
        other => type_schema(other).build().into(),
    }
}

/// Columns, properties and related entities, as sent and received.
fn entity_schema(shared: &Shared, endpoint: &Endpoint, depth: usize) -> Object {
    let mut b = ObjectBuilder::new().schema_type(Type::Object);
    for column in endpoint.visible_columns() {
        b = b.property(&column.name, property_schema(&column.kind));
        if !column.nullable && !column.has_default {
            b = b.required(&column.name);
        }
    }
    for prop in &endpoint.properties {
        b = b.property(&prop.name, property_schema(&prop.kind));
    }
    if depth > 0 {
        for rel in &endpoint.relationships {
            if let Some(target) = shared.endpoint(&rel.target) {
                let items = entity_schema(shared, target, depth - 1);
                b = b.property(&rel.name, ArrayBuilder::new().items(items).build());
            }
        }
    }
    b.build()
}

fn envelope_schema(entity: Object) -> Object {
    let keys = ArrayBuilder::new().items(ObjectBuilder::new().schema_type(Type::String).build());
    ObjectBuilder::new()
        .schema_type(Type::Object)
        .property("primary_keys", keys.build())
        .property("occurences", ObjectBuilder::new().schema_type(Type::Integer).build())
        .property("objects", ArrayBuilder::new().items(entity).build())
        .property("offset", ObjectBuilder::new().schema_type(Type::Integer).build())
        .property("limit", ObjectBuilder::new().schema_type(Type::Integer).build())
        .required("primary_keys")
        .required("occurences")
        .required("objects")
        .build()
}

fn batch_schema(entity: Object) -> Object {
    ObjectBuilder::new()
        .schema_type(Type::Object)
        .property("objects", ArrayBuilder::new().items(entity).build())
        .required("objects")
        .build()
}

fn http_method(method: Method) -> HttpMethod {
    match method {
        Method::Get => HttpMethod::Get,
        Method::Put => HttpMethod::Put,
        Method::Post => HttpMethod::Post,
        Method::Delete => HttpMethod::Delete,
        Method::Patch => HttpMethod::Patch,
        Method::Options => HttpMethod::Options,
    }
}

struct OperationSpec<'a> {
    endpoint: &'a Endpoint,
    method: Method,
    with_key: bool,
    tag: String,
    media_type: &'a str,
    entity: Object,
    envelope: Object,
}

impl OperationSpec<'_> {
    fn build(self) -> Operation {
        let ep = self.endpoint;
        let suffix = if self.with_key { "one" } else { "all" };
        let mut op = OperationBuilder::new()
            .tags(Some(vec![self.tag]))
            .operation_id(Some(format!("{}_{}_{}", ep.name, self.method.as_str().to_lowercase(), suffix)))
            .summary(Some(format!("{} {}", self.method, ep.name)))
            .description(ep.description.clone());

        if self.with_key {
            for pk in &ep.primary_keys {
                let kind = ep.key_kind(pk).cloned().unwrap_or(SemanticType::String);
                op = op.parameter(
                    ParameterBuilder::new()
                        .name(pk)
                        .parameter_in(ParameterIn::Path)
                        .required(Required::True)
                        .schema(Some(property_schema(&kind)))
                        .build(),
                );
            }
        }

        let body = match (self.method, self.with_key) {
            (Method::Post, false) | (Method::Put, true) | (Method::Patch, true) => Some(self.entity),
            (Method::Put, false) | (Method::Patch, false) => Some(batch_schema(self.entity)),
            _ => None,
        };
        if let Some(schema) = body {
            op = op.request_body(Some(
                RequestBodyBuilder::new()
                    .content(self.media_type, ContentBuilder::new().schema(Some(schema)).build())
                    .required(Some(Required::True))
                    .build(),
            ));
        }

        let ok = match self.method {
            Method::Options => ResponseBuilder::new().description("endpoint description"),
            _ => ResponseBuilder::new()
                .description("envelope")
                .content(self.media_type, ContentBuilder::new().schema(Some(self.envelope)).build()),
        };
        op = op.response("200", ok.build());
        op = op.response("403", ResponseBuilder::new().description("forbidden").build());
        if self.with_key {
            op = op.response("404", ResponseBuilder::new().description("not found").build());
        }
        if !self.with_key && matches!(self.method, Method::Put | Method::Patch | Method::Delete) {
            op = op.response("406", ResponseBuilder::new().description("batch disabled").build());
        }
        op.build()
    }
}

/// Whether the OpenAPI document advertises `method` on the collection or item path.
fn offered(endpoint: &Endpoint, method: Method, with_key: bool) -> bool {
    if !endpoint.allows(method) {
        return false;
    }
    match (method, with_key) {
        (Method::Post, true) => false,
        (Method::Put | Method::Patch | Method::Delete, false) => endpoint.allow_batch,
        _ => true,
    }
}

fn item_path(shared: &Shared, endpoint: &Endpoint) -> String {
    let mut path = shared.endpoint_path(endpoint);
    for pk in &endpoint.primary_keys {
        path.push_str(&format!("/{{{}}}", pk));
    }
    path
}

/// Builds the document. The `openapi` field is pinned to `3.0.0`.
pub fn openapi_document(shared: &Shared) -> Result<JsonValue, RestError> {
    let info = &shared.options.info;
    let media_type = shared.idiom.get().media_type();
    let mut paths = PathsBuilder::new();
    let mut tags = Vec::new();

    for endpoint in &shared.endpoints {
        let tag = match &endpoint.model.schema {
            Some(schema) => format!("{}.{}", schema, endpoint.model.name),
            None => endpoint.model.name.clone(),
        };
        if !tags.contains(&tag) {
            tags.push(tag.clone());
        }
        let entity = entity_schema(shared, endpoint, 1);
        let envelope = envelope_schema(entity.clone());

        for (with_key, path) in [(false, shared.endpoint_path(endpoint)), (true, item_path(shared, endpoint))] {
            let mut item = PathItemBuilder::new();
            let mut any = false;
            for method in Method::ALL {
                if !offered(endpoint, method, with_key) {
                    continue;
                }
                let spec = OperationSpec {
                    endpoint,
                    method,
                    with_key,
                    tag: tag.clone(),
                    media_type,
                    entity: entity.clone(),
                    envelope: envelope.clone(),
                };
                item = item.operation(http_method(method), spec.build());
                any = true;
            }
            if any {
                paths = paths.path(path, item.build());
            }
        }
    }

    let doc = OpenApiBuilder::new()
        .info(
            InfoBuilder::new()
                .title(&info.title)
                .version(&info.version)
                .description(info.description.clone())
                .build(),
        )
        .servers(Some(vec![ServerBuilder::new().url(&shared.external_url).build()]))
        .paths(paths.build())
        .tags(Some(tags.into_iter().map(|t| TagBuilder::new().name(t).build()).collect::<Vec<_>>()))
        .build();

    let mut value = serde_json::to_value(&doc).map_err(|e| RestError::internal(format!("cannot encode OpenAPI: {}", e)))?;
    if let Some(obj) = value.as_object_mut() {
        obj.insert("openapi".into(), JsonValue::String("3.0.0".into()));
    }
    Ok(value)
}
