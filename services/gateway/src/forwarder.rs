//! Upstream request forwarding
//!
//! Builds the outbound request from the inbound one, dispatches it over a
//! pooled `reqwest` client and relays whatever the upstream answers.
//! Dropping the returned future aborts the upstream call.

use axum::{
    async_trait,
    body::{Body, Bytes},
    extract::{FromRequest, Request},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::UpstreamConfig;
use crate::metrics::get_metrics;
use crate::middleware::{CallerIdentity, RequestContext};
use crate::utils::{REQUEST_ID_HEADER, TrustedProxies, get_client_ip};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";
pub const USER_EMAIL_HEADER: &str = "x-user-email";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
pub const GATEWAY_HEADER: &str = "x-gateway";
pub const GATEWAY_NAME: &str = "clinical-gateway";

/// Identity headers only the gateway may set
const IDENTITY_HEADERS: [&str; 3] = [USER_ID_HEADER, USER_ROLE_HEADER, USER_EMAIL_HEADER];

const HOP_BY_HOP_HEADERS: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Transport failures talking to an upstream
#[derive(Debug, Clone, Error)]
pub enum ForwardError {
    #[error("upstream timed out: {0}")]
    Timeout(String),
    #[error("upstream unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for ForwardError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else {
            Self::Unavailable(err.to_string())
        }
    }
}

/// A forwarding target
#[derive(Debug, Clone)]
pub struct Upstream {
    /// Label for logs and metrics
    pub name: String,
    pub base_url: String,
}

impl Upstream {
    #[must_use]
    pub fn new(name: &str, base_url: &str) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Absolute URL for `path`, with the raw query string appended verbatim
    #[must_use]
    pub fn url_for(&self, path: &str, query: Option<&str>) -> String {
        let mut url = self.base_url.clone();
        if !path.starts_with('/') {
            url.push('/');
        }
        url.push_str(path);
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            url.push(if path.contains('?') { '&' } else { '?' });
            url.push_str(query);
        }
        url
    }
}

/// Everything needed to rebuild the inbound request upstream
#[derive(Debug, Clone)]
pub struct ForwardContext {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub caller: Option<CallerIdentity>,
    pub request_id: String,
    pub client_ip: String,
}

#[async_trait]
impl<S> FromRequest<S> for ForwardContext
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let query = req.uri().query().map(String::from);
        let headers = req.headers().clone();
        let ctx = req
            .extensions()
            .get::<RequestContext>()
            .cloned()
            .unwrap_or_else(|| {
                RequestContext::new(get_client_ip(&headers, None, &TrustedProxies::default()))
            });

        let body = Bytes::from_request(req, state)
            .await
            .map_err(IntoResponse::into_response)?;

        Ok(Self {
            method,
            path,
            query,
            headers,
            body,
            caller: ctx.caller,
            request_id: ctx.request_id,
            client_ip: ctx.client_ip,
        })
    }
}

/// Response received from an upstream, relayed as opaque bytes
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl UpstreamResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

impl IntoResponse for UpstreamResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Pooled HTTP client for every upstream
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: reqwest::Client,
}

impl Forwarder {
    pub fn new(config: &UpstreamConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .pool_max_idle_per_host(config.max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .build()?;
        Ok(Self { client })
    }

    /// Send the request to `upstream` at `path` and relay the answer
    pub async fn forward(
        &self,
        ctx: &ForwardContext,
        upstream: &Upstream,
        path: &str,
    ) -> Result<UpstreamResponse, ForwardError> {
        let url = upstream.url_for(path, ctx.query.as_deref());
        let start = Instant::now();
        debug!(
            request_id = %ctx.request_id,
            upstream = %upstream.name,
            method = %ctx.method,
            url = %url,
            "Forwarding request"
        );

        let result = self.dispatch(ctx, &url).await;
        let elapsed = start.elapsed().as_secs_f64();

        match &result {
            Ok(response) => {
                get_metrics().record_upstream_request(
                    &upstream.name,
                    response.status.as_u16(),
                    elapsed,
                );
            }
            Err(e) => {
                warn!(
                    request_id = %ctx.request_id,
                    upstream = %upstream.name,
                    url = %url,
                    error = %e,
                    "Upstream request failed"
                );
                get_metrics().record_upstream_error(&upstream.name, elapsed);
            }
        }
        result
    }

    async fn dispatch(
        &self,
        ctx: &ForwardContext,
        url: &str,
    ) -> Result<UpstreamResponse, ForwardError> {
        let response = self
            .client
            .request(ctx.method.clone(), url)
            .headers(outbound_headers(ctx))
            .body(ctx.body.clone())
            .send()
            .await?;

        let status = response.status();
        let headers = relayable_headers(response.headers());
        let body = response.bytes().await?;

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }

    /// Reverse-proxy variant: strip `prefix` from the inbound path, forward,
    /// and tag the response with CORS and gateway identification headers
    pub async fn proxy(
        &self,
        ctx: &ForwardContext,
        upstream: &Upstream,
        prefix: &str,
    ) -> Result<UpstreamResponse, ForwardError> {
        let stripped = ctx.path.strip_prefix(prefix).unwrap_or(&ctx.path);
        let path = if stripped.is_empty() { "/" } else { stripped };

        let mut response = self.forward(ctx, upstream, path).await?;
        let headers = &mut response.headers;
        headers
            .entry(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .or_insert(HeaderValue::from_static("*"));
        headers
            .entry(header::ACCESS_CONTROL_ALLOW_METHODS)
            .or_insert(HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"));
        headers
            .entry(header::ACCESS_CONTROL_ALLOW_HEADERS)
            .or_insert(HeaderValue::from_static("Content-Type, Authorization"));
        headers.insert(GATEWAY_HEADER, HeaderValue::from_static(GATEWAY_NAME));
        Ok(response)
    }

    /// GET `<upstream>/health` within `timeout`; true on any 2xx
    pub async fn probe(&self, upstream: &Upstream, timeout: Duration) -> bool {
        let url = upstream.url_for("/health", None);
        match self.client.get(&url).timeout(timeout).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(upstream = %upstream.name, error = %e, "Health probe failed");
                false
            }
        }
    }
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

/// Headers named in `Connection` are hop-by-hop as well
fn connection_listed(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect()
}

/// Inbound headers minus hop-by-hop, `Host` and client-supplied identity,
/// overlaid with the gateway's own identity and correlation headers
#[must_use]
pub fn outbound_headers(ctx: &ForwardContext) -> HeaderMap {
    let listed = connection_listed(&ctx.headers);
    let mut headers = HeaderMap::with_capacity(ctx.headers.len() + 5);

    for (name, value) in &ctx.headers {
        if is_hop_by_hop(name)
            || name == header::HOST
            || name == header::CONTENT_LENGTH
            || IDENTITY_HEADERS.contains(&name.as_str())
            || listed.iter().any(|l| l == name.as_str())
        {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    if let Some(caller) = &ctx.caller {
        let identity = [
            (USER_ID_HEADER, caller.user_id.as_str()),
            (USER_ROLE_HEADER, caller.role.as_str()),
            (USER_EMAIL_HEADER, caller.email.as_str()),
        ];
        for (name, value) in identity {
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.insert(name, value);
            }
        }
    }

    if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
        headers.insert(REQUEST_ID_HEADER, value);
    }
    if let Ok(value) = HeaderValue::from_str(&ctx.client_ip) {
        headers.insert(FORWARDED_FOR_HEADER, value);
    }

    headers
}

/// Upstream response headers safe to hand back to the client
fn relayable_headers(upstream: &HeaderMap) -> HeaderMap {
    let listed = connection_listed(upstream);
    let mut headers = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream {
        if is_hop_by_hop(name)
            || name == header::CONTENT_LENGTH
            || listed.iter().any(|l| l == name.as_str())
        {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}
