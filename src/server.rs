//! HTTP front end for the stub engine.
//!
//! Every request runs one matching pass: load endpoints (according to the
//! reload policy), select the first matching endpoint and render its
//! response. Any failure is logged and answered with `404 Not Found`.

use crate::config::{Endpoint, EndpointSource, Fingerprint};
use crate::error::{Result, StubError};
use crate::request::StubRequest;
use crate::selector::select;
use crate::template::TemplateEngine;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Default cap on buffered request bodies (10 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// When endpoint configuration is read from its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReloadPolicy {
    /// Re-read and re-parse on every request
    #[default]
    EveryRequest,
    /// Re-parse only when the source's fingerprint changes
    OnChange,
}

impl FromStr for ReloadPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "every-request" => Ok(ReloadPolicy::EveryRequest),
            "on-change" => Ok(ReloadPolicy::OnChange),
            other => Err(format!(
                "unknown reload policy {:?} (expected every-request or on-change)",
                other
            )),
        }
    }
}

impl fmt::Display for ReloadPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReloadPolicy::EveryRequest => f.write_str("every-request"),
            ReloadPolicy::OnChange => f.write_str("on-change"),
        }
    }
}

struct CachedEndpoints {
    fingerprint: Fingerprint,
    endpoints: Arc<Vec<Endpoint>>,
}

/// Serves stub responses for endpoints read from an [`EndpointSource`].
pub struct StubServer {
    source: Arc<dyn EndpointSource>,
    reload: ReloadPolicy,
    cache: RwLock<Option<CachedEndpoints>>,
    engine: Arc<TemplateEngine>,
    max_body_bytes: usize,
}

/// Rendered response of the matched endpoint.
#[derive(Debug)]
struct StubResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: String,
}

impl IntoResponse for StubResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

impl StubServer {
    pub fn new(source: impl EndpointSource + 'static) -> Self {
        Self {
            source: Arc::new(source),
            reload: ReloadPolicy::default(),
            cache: RwLock::new(None),
            engine: Arc::new(TemplateEngine::new()),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_reload(mut self, reload: ReloadPolicy) -> Self {
        self.reload = reload;
        self
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    /// Build the axum router. Every path and method goes to the stub handler.
    pub fn into_router(self) -> Router {
        Router::new()
            .fallback(handle_request)
            .with_state(Arc::new(self))
    }

    async fn load(&self) -> Result<Vec<Endpoint>> {
        let source = Arc::clone(&self.source);
        tokio::task::spawn_blocking(move || source.load()).await?
    }

    /// Current endpoint list under the configured reload policy.
    pub async fn endpoints(&self) -> Result<Arc<Vec<Endpoint>>> {
        if self.reload == ReloadPolicy::EveryRequest {
            return Ok(Arc::new(self.load().await?));
        }

        let source = Arc::clone(&self.source);
        let Some(fingerprint) = tokio::task::spawn_blocking(move || source.fingerprint()).await??
        else {
            return Ok(Arc::new(self.load().await?));
        };

        if let Some(cached) = self.cache.read().await.as_ref() {
            if cached.fingerprint == fingerprint {
                return Ok(Arc::clone(&cached.endpoints));
            }
        }

        let endpoints = Arc::new(self.load().await?);
        info!(endpoints = endpoints.len(), "Endpoint configuration reloaded");
        *self.cache.write().await = Some(CachedEndpoints {
            fingerprint,
            endpoints: Arc::clone(&endpoints),
        });
        Ok(endpoints)
    }

    /// Run one matching pass for an HTTP request.
    pub async fn respond(&self, request: Request<Body>) -> Result<Response> {
        let (parts, body) = request.into_parts();

        let headers = parts
            .headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = axum::body::to_bytes(body, self.max_body_bytes)
            .await
            .map_err(|e| StubError::RequestBody(e.to_string()))?;

        let request = StubRequest::new(
            parts.method.as_str(),
            parts.uri.path(),
            parts.uri.query(),
            headers,
            &body,
        )?;

        let endpoints = self.endpoints().await?;
        let engine = Arc::clone(&self.engine);
        let response =
            tokio::task::spawn_blocking(move || render_stub(&endpoints, &request, &engine))
                .await??;
        Ok(response.into_response())
    }
}

fn render_stub(
    endpoints: &[Endpoint],
    request: &StubRequest,
    engine: &TemplateEngine,
) -> Result<StubResponse> {
    let selection = select(endpoints, request)?;
    let endpoint = selection.endpoint;

    let status = status_code(endpoint)?;
    let headers = response_headers(endpoint)?;
    let body = engine.render(&selection.response_body, &selection.context)?;

    Ok(StubResponse {
        status,
        headers,
        body,
    })
}

fn invalid_response(endpoint: &Endpoint, reason: impl fmt::Display) -> StubError {
    StubError::InvalidResponse {
        endpoint: endpoint.name.clone(),
        reason: reason.to_string(),
    }
}

fn status_code(endpoint: &Endpoint) -> Result<StatusCode> {
    let status = endpoint.response.status;
    if !(100..=599).contains(&status) {
        return Err(invalid_response(endpoint, format!("invalid status code: {}", status)));
    }
    StatusCode::from_u16(status).map_err(|e| invalid_response(endpoint, e))
}

fn response_headers(endpoint: &Endpoint) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in &endpoint.response.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| invalid_response(endpoint, format!("header {:?}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| invalid_response(endpoint, format!("header {:?}: {}", name, e)))?;
        headers.append(name, value);
    }
    Ok(headers)
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        "404 page not found\n",
    )
        .into_response()
}

async fn handle_request(State(server): State<Arc<StubServer>>, request: Request<Body>) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();

    match server.respond(request).await {
        Ok(response) => response,
        Err(StubError::NoMatch) => {
            warn!(method = %method, uri = %uri, "No matching endpoint found");
            not_found()
        }
        Err(e) => {
            error!(method = %method, uri = %uri, error = %e, "Failed to serve stub");
            not_found()
        }
    }
}
