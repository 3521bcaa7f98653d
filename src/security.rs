use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderValue, Method, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::error::Error;

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("invalid allowed origin `{0}`")]
    InvalidOrigin(String),
    #[error("invalid allowed host `{0}`: wildcards must be `*` or a leading `*.`")]
    InvalidHostPattern(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum HostPattern {
    Any,
    Exact(String),
    // stored with the leading dot, e.g. ".onrender.com"
    Subdomain(String),
}

/// Hostnames the service answers to.
///
/// Entries are an exact hostname, `*.domain` for any subdomain of `domain`,
/// or `*` for anything. Matching ignores case and the port.
#[derive(Debug, Clone)]
pub struct HostAllowList {
    patterns: Vec<HostPattern>,
}

impl HostAllowList {
    pub fn new<I, S>(entries: I) -> Result<Self, PolicyError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = entries
            .into_iter()
            .map(|entry| entry.as_ref().trim().to_ascii_lowercase())
            .filter(|entry| !entry.is_empty())
            .map(parse_pattern)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// True when the list contains `*`, so no Host header is needed at all.
    pub fn allows_any(&self) -> bool {
        self.patterns.contains(&HostPattern::Any)
    }

    pub fn is_allowed(&self, host: &str) -> bool {
        let host = strip_port(host).to_ascii_lowercase();
        self.patterns.iter().any(|pattern| match pattern {
            HostPattern::Any => true,
            HostPattern::Exact(exact) => *exact == host,
            HostPattern::Subdomain(suffix) => host.ends_with(suffix.as_str()),
        })
    }
}

fn parse_pattern(entry: String) -> Result<HostPattern, PolicyError> {
    if entry == "*" {
        return Ok(HostPattern::Any);
    }
    if let Some(domain) = entry.strip_prefix("*.") {
        if !domain.is_empty() && !domain.contains('*') {
            return Ok(HostPattern::Subdomain(format!(".{domain}")));
        }
    } else if !entry.contains('*') {
        return Ok(HostPattern::Exact(entry));
    }
    Err(PolicyError::InvalidHostPattern(entry))
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        // [::1]:5000
        return host.find(']').map_or(host, |end| &host[..=end]);
    }
    host.split(':').next().unwrap_or(host)
}

// Host header policy, applied before routing
pub async fn enforce_allowed_hosts(
    State(allowed): State<Arc<HostAllowList>>,
    request: Request,
    next: Next,
) -> Response {
    if allowed.allows_any() {
        return next.run(request).await;
    }

    let host_allowed = request
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| request.uri().host())
        .is_some_and(|host| allowed.is_allowed(host));

    if host_allowed {
        next.run(request).await
    } else {
        Error::InvalidHost.into_response()
    }
}

/// Cross-origin policy: listed origins only, with credentials, `GET`/`POST`
/// and a `Content-Type` request header.
pub fn cors_layer(origins: &[String]) -> Result<CorsLayer, PolicyError> {
    let origins = origins
        .iter()
        .map(|origin| origin.trim())
        .filter(|origin| !origin.is_empty())
        .map(|origin| {
            // credentials cannot be combined with a wildcard origin
            if origin == "*" {
                return Err(PolicyError::InvalidOrigin(origin.to_string()));
            }
            HeaderValue::from_str(origin)
                .map_err(|_| PolicyError::InvalidOrigin(origin.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]))
}
