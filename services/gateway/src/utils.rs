//! Utility functions for the API Gateway

use axum::http::HeaderMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Longest inbound request id that is reused as-is
const MAX_REQUEST_ID_LEN: usize = 128;

/// Proxies whose forwarding headers are believed
#[derive(Debug, Clone, Default)]
pub struct TrustedProxies(Arc<[IpAddr]>);

impl TrustedProxies {
    #[must_use]
    pub fn new(addrs: impl IntoIterator<Item = IpAddr>) -> Self {
        Self(addrs.into_iter().collect())
    }

    #[must_use]
    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.0.contains(ip)
    }
}

/// Extract the client IP
///
/// Forwarding headers are only honored when the peer itself is a trusted
/// proxy. `X-Forwarded-For` is walked right to left, skipping trusted hops,
/// so a client cannot pick its own address by prepending entries.
#[must_use]
pub fn get_client_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trusted: &TrustedProxies,
) -> String {
    let Some(peer) = peer else {
        return "unknown".to_string();
    };
    if !trusted.contains(&peer.ip()) {
        return peer.ip().to_string();
    }

    let hops: Vec<&str> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
        .collect();
    if let Some(client) = hops
        .iter()
        .rev()
        .find(|hop| !matches!(hop.parse::<IpAddr>(), Ok(ip) if trusted.contains(&ip)))
        .or_else(|| hops.first())
    {
        return (*client).to_string();
    }

    if let Some(real_ip) = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
    {
        return real_ip.to_string();
    }

    peer.ip().to_string()
}

/// Whether an inbound correlation id is safe to reuse
#[must_use]
pub fn is_valid_request_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_REQUEST_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
}

/// Percent-escape the characters that would make a `k=v&...` encoding ambiguous
#[must_use]
pub fn escape_query_component(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            '&' => escaped.push_str("%26"),
            '=' => escaped.push_str("%3D"),
            ':' => escaped.push_str("%3A"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// `application/x-www-form-urlencoded` query string for `pairs`, in order
#[must_use]
pub fn encode_query<'a, I>(pairs: I) -> String
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}
