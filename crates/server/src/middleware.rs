//! Request guards: trusted `Host` header check and production HTTPS redirect.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};

/// Host names accepted in the `Host` header. `*` accepts anything and a
/// leading `*.` accepts any subdomain.
#[derive(Clone, Debug)]
pub struct TrustedHosts {
    patterns: Vec<String>,
}

impl TrustedHosts {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.into().to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn allows(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.patterns.iter().any(|p| {
            p == "*"
                || *p == host
                || p
                    .strip_prefix('*')
                    .is_some_and(|suffix| suffix.starts_with('.') && host.ends_with(suffix))
        })
    }
}

pub async fn check_host(
    State(hosts): State<Arc<TrustedHosts>>,
    req: Request,
    next: Next,
) -> Response {
    let host = request_host(&req).map(|h| strip_port(h).to_string());
    if host.as_deref().is_some_and(|h| hosts.allows(h)) {
        return next.run(req).await;
    }
    tracing::warn!(host = ?host, path = %req.uri().path(), "rejected untrusted host");
    (StatusCode::BAD_REQUEST, "Invalid host header").into_response()
}

pub async fn redirect_to_https(req: Request, next: Next) -> Response {
    if is_https(&req) {
        return next.run(req).await;
    }
    let Some(host) = request_host(&req) else {
        return (StatusCode::BAD_REQUEST, "Invalid host header").into_response();
    };
    let host = host.strip_suffix(":80").unwrap_or(host);
    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    match format!("https://{host}{path}").parse::<Uri>() {
        Ok(target) => Redirect::temporary(&target.to_string()).into_response(),
        Err(_) => (StatusCode::BAD_REQUEST, "Invalid host header").into_response(),
    }
}

fn request_host(req: &Request) -> Option<&str> {
    req.headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| req.uri().authority().map(|a| a.as_str()))
}

fn is_https(req: &Request) -> bool {
    req.uri().scheme_str() == Some("https")
        || req
            .headers()
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|p| p.eq_ignore_ascii_case("https"))
}

fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        // [::1]:8000
        return rest.split(']').next().unwrap_or(rest);
    }
    host.rsplit_once(':').map_or(host, |(name, _)| name)
}
