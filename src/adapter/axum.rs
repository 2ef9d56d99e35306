use super::{Adapter, Handler};
use crate::error::ConfigError;
use crate::request::{Method, Request, Response};
use axum::body::{to_bytes, Body};
use axum::extract::{Path, Query};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::IntoResponse;
use axum::routing::{MethodFilter, MethodRouter};
use axum::Router;
use std::collections::{BTreeMap, HashMap, HashSet};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::Instrument;

const REQUEST_ID_HEADER: &str = "x-request-id";
const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

fn method_filter(method: Method) -> MethodFilter {
    match method {
        Method::Get => MethodFilter::GET,
        Method::Put => MethodFilter::PUT,
        Method::Post => MethodFilter::POST,
        Method::Delete => MethodFilter::DELETE,
        Method::Patch => MethodFilter::PATCH,
        Method::Options => MethodFilter::OPTIONS,
    }
}

/// Collects routes into an [`axum::Router`].
pub struct AxumAdapter {
    base_url: String,
    body_limit: usize,
    routes: BTreeMap<String, MethodRouter>,
    seen: HashSet<(String, Method)>,
}

impl AxumAdapter {
    /// `base_url` is the scheme and authority the API is reachable at, e.g.
    /// `http://localhost:3000`.
    pub fn new(base_url: impl Into<String>) -> Self {
        AxumAdapter {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            body_limit: DEFAULT_BODY_LIMIT,
            routes: BTreeMap::new(),
            seen: HashSet::new(),
        }
    }

    pub fn body_limit(mut self, bytes: usize) -> Self {
        self.body_limit = bytes;
        self
    }

    fn add(&mut self, path: String, method: Method, handler: Handler) -> Result<(), ConfigError> {
        if !self.seen.insert((path.clone(), method)) {
            return Err(ConfigError::DuplicateRoute {
                method: method.to_string(),
                path,
            });
        }
        let limit = self.body_limit;
        let route = move |params: Option<Path<HashMap<String, String>>>,
                          Query(query): Query<Vec<(String, String)>>,
                          req: axum::extract::Request| {
            let handler = handler.clone();
            async move {
                let params = params.map(|Path(p)| p).unwrap_or_default();
                match normalize(method, params, query, req, limit).await {
                    Ok(request) => into_axum(handler(request).await),
                    Err(status) => status.into_response(),
                }
            }
        };
        let router = self.routes.remove(&path).unwrap_or_else(MethodRouter::new);
        self.routes.insert(path.clone(), router.on(method_filter(method), route));
        tracing::info!(%method, %path, "route mounted");
        Ok(())
    }

    /// The finished router, with body limit and request id handling applied.
    pub fn into_router(self) -> Router {
        let mut router = Router::new();
        for (path, route) in self.routes {
            router = router.route(&path, route);
        }
        router
            .layer(RequestBodyLimitLayer::new(self.body_limit))
            .layer(middleware::from_fn(request_id))
    }
}

impl Adapter for AxumAdapter {
    fn register_route(
        &mut self,
        path: &str,
        method: Method,
        parameters: &[String],
        handler: Handler,
    ) -> Result<(), ConfigError> {
        self.add(path.to_string(), method, handler.clone())?;
        if !parameters.is_empty() {
            let mut with_params = path.trim_end_matches('/').to_string();
            for p in parameters {
                with_params.push_str("/:");
                with_params.push_str(p);
            }
            self.add(with_params, method, handler)?;
        }
        Ok(())
    }

    fn external_url(&self, root: &str) -> String {
        format!("{}{}", self.base_url, root)
    }
}

async fn normalize(
    method: Method,
    path_params: HashMap<String, String>,
    query: Vec<(String, String)>,
    req: axum::extract::Request,
    limit: usize,
) -> Result<Request, StatusCode> {
    let url = req.uri().to_string();
    let mut out = Request::new(method, url);
    out.path_params = path_params;
    for (name, value) in req.headers() {
        if let Ok(v) = value.to_str() {
            out.headers.insert(name.as_str().to_ascii_lowercase(), v.to_string());
        }
    }
    for (k, v) in query {
        out.query.entry(k).or_default().push(v);
    }
    let body = to_bytes(req.into_body(), limit)
        .await
        .map_err(|_| StatusCode::PAYLOAD_TOO_LARGE)?;
    out.body = body.to_vec();
    Ok(out)
}

fn into_axum(resp: Response) -> axum::response::Response {
    let mut out = axum::response::Response::new(Body::from(resp.body));
    *out.status_mut() = StatusCode::from_u16(resp.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    for (name, value) in resp.headers {
        if let (Ok(n), Ok(v)) = (HeaderName::try_from(name), HeaderValue::from_str(&value)) {
            out.headers_mut().append(n, v);
        }
    }
    out
}

/// Wraps the request in a span tagged with its id and echoes the id on the response.
async fn request_id(req: axum::extract::Request, next: Next) -> axum::response::Response {
    let id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let span = tracing::info_span!("request", request_id = %id, method = %req.method(), path = %req.uri().path());
    let mut response = next.run(req).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}
