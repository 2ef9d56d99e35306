//! The registry: endpoints plus global options, mounted onto an adapter.

use crate::adapter::{Adapter, Handler, HandlerFuture};
use crate::coerce::{Coercer, DefaultCoercer};
use crate::config::{validate_endpoint, validate_relationships, ApiOptions};
use crate::describe::{describe_endpoint, describe_root, html_index};
use crate::endpoint::dispatch::dispatch;
use crate::endpoint::{DeclaredHandler, Endpoint};
use crate::error::{ConfigError, RestError};
use crate::idiom::{Idiom, IdiomHandle};
use crate::openapi::openapi_document;
use crate::request::{Method, Request, Response};
use crate::response::Outcome;
use crate::session::SessionFactory;
use crate::state::Shared;
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Holds endpoints until [`Api::mount`] freezes them behind the adapter's routes.
pub struct Api {
    options: ApiOptions,
    endpoints: Vec<Endpoint>,
    sessions: Arc<dyn SessionFactory>,
    idiom: IdiomHandle,
    coercer: Arc<dyn Coercer>,
}

impl Api {
    pub fn new(options: ApiOptions, sessions: Arc<dyn SessionFactory>) -> Self {
        Api {
            options,
            endpoints: Vec::new(),
            sessions,
            idiom: IdiomHandle::default(),
            coercer: Arc::new(DefaultCoercer),
        }
    }

    /// Coercer used by endpoints that do not set their own.
    pub fn coercer(mut self, coercer: Arc<dyn Coercer>) -> Self {
        self.coercer = coercer;
        self
    }

    pub fn options(&self) -> &ApiOptions {
        &self.options
    }

    /// Handle to the active idiom. Stays valid after mount; `set` on it switches the
    /// dialect for every subsequent request.
    pub fn idiom(&self) -> IdiomHandle {
        self.idiom.clone()
    }

    pub fn set_idiom(&self, idiom: Arc<dyn Idiom>) {
        self.idiom.set(idiom);
    }

    pub fn add(&mut self, endpoint: Endpoint) -> Result<&mut Self, ConfigError> {
        validate_endpoint(&endpoint)?;
        if self.endpoints.iter().any(|e| e.name == endpoint.name) {
            return Err(ConfigError::DuplicateEndpoint(endpoint.name));
        }
        tracing::debug!(endpoint = %endpoint.name, model = %endpoint.model.name, "endpoint registered");
        self.endpoints.push(endpoint);
        Ok(self)
    }

    pub fn endpoint(&self, name: &str) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.name == name)
    }

    /// Overrides `method` on a registered endpoint with `handler`.
    pub fn declare<H>(&mut self, name: &str, method: Method, handler: H, manual_commit: bool) -> Result<(), ConfigError>
    where
        H: DeclaredHandler + 'static,
    {
        let endpoint = self
            .endpoints
            .iter_mut()
            .find(|e| e.name == name)
            .ok_or_else(|| ConfigError::UnknownEndpoint(name.to_string()))?;
        endpoint.declare_arc(method, Arc::new(handler), manual_commit);
        Ok(())
    }

    fn snapshot(&self, external_url: String) -> Shared {
        Shared {
            options: self.options.clone(),
            endpoints: self.endpoints.iter().cloned().map(Arc::new).collect(),
            sessions: self.sessions.clone(),
            idiom: self.idiom.clone(),
            coercer: self.coercer.clone(),
            external_url,
        }
    }

    /// OPTIONS description of one endpoint, as currently registered.
    pub fn describe(&self, name: &str) -> Option<JsonValue> {
        let shared = self.snapshot(String::new());
        let endpoint = shared.endpoint(name)?.clone();
        Some(describe_endpoint(&shared, &endpoint))
    }

    /// OpenAPI document of the current registration state.
    pub fn openapi(&self, external_url: &str) -> Result<JsonValue, RestError> {
        openapi_document(&self.snapshot(external_url.to_string()))
    }

    /// Validates relationships, then registers every route on `adapter`. Later
    /// registrations on this `Api` do not affect what was mounted.
    pub fn mount<A: Adapter>(&self, adapter: &mut A) -> Result<(), ConfigError> {
        let refs: Vec<&Endpoint> = self.endpoints.iter().collect();
        validate_relationships(&refs)?;

        let root = self.options.root();
        let shared = Arc::new(self.snapshot(adapter.external_url(&root)));

        for endpoint in &shared.endpoints {
            let path = shared.endpoint_path(endpoint);
            for method in Method::ALL {
                if !endpoint.allows(method) {
                    continue;
                }
                let handler = endpoint_handler(shared.clone(), endpoint.clone());
                adapter.register_route(&path, method, &endpoint.primary_keys, handler)?;
            }
        }

        let root_path = if root.is_empty() { "/".to_string() } else { root.clone() };
        if shared.options.allow_options {
            adapter.register_route(&root_path, Method::Options, &[], root_options(shared.clone()))?;
        }
        adapter.register_route(&format!("{}/openapi.json", root), Method::Get, &[], openapi_route(shared.clone()))?;
        adapter.register_route(&format!("{}/", root), Method::Get, &[], index_route(shared.clone()))?;
        tracing::info!(root = %root_path, endpoints = shared.endpoints.len(), "api mounted");
        Ok(())
    }
}

fn endpoint_handler(shared: Arc<Shared>, endpoint: Arc<Endpoint>) -> Handler {
    Arc::new(move |request: Request| -> HandlerFuture {
        let shared = shared.clone();
        let endpoint = endpoint.clone();
        Box::pin(async move { dispatch(&shared, &endpoint, request).await })
    })
}

fn render(shared: &Shared, request: &Request, result: Result<JsonValue, RestError>) -> Response {
    let idiom = shared.idiom.get();
    let encoded = result.and_then(|value| idiom.data_to_response(Outcome::Raw(value), request, 200));
    encoded.unwrap_or_else(|err| idiom.error_to_response(&err))
}

fn root_options(shared: Arc<Shared>) -> Handler {
    Arc::new(move |request: Request| -> HandlerFuture {
        let shared = shared.clone();
        Box::pin(async move { render(&shared, &request, Ok(describe_root(&shared))) })
    })
}

/// The OpenAPI document is always JSON, whatever the active idiom.
fn openapi_route(shared: Arc<Shared>) -> Handler {
    Arc::new(move |_request: Request| -> HandlerFuture {
        let shared = shared.clone();
        Box::pin(async move {
            let result = openapi_document(&shared).and_then(|doc| {
                serde_json::to_vec(&doc).map_err(|e| RestError::internal(format!("cannot encode OpenAPI: {}", e)))
            });
            match result {
                Ok(body) => Response::new(200, "application/json", body),
                Err(err) => {
                    tracing::error!(error = %err.message, "openapi generation failed");
                    Response::new(err.status, "application/json", err.body().to_string())
                }
            }
        })
    })
}

fn index_route(shared: Arc<Shared>) -> Handler {
    Arc::new(move |_request: Request| -> HandlerFuture {
        let shared = shared.clone();
        Box::pin(async move { Response::new(200, "text/html; charset=utf-8", html_index(&shared)) })
    })
}
