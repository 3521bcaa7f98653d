use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use tower_http::services::ServeDir;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::config::Args;
use crate::handlers::{analyze_handler, health_handler, index_handler, metrics_handler};
use crate::security::{HostAllowList, PolicyError, cors_layer, enforce_allowed_hosts};
use crate::state::AppState;

/// Transport-level policy wrapped around the routes.
#[derive(Debug, Clone)]
pub struct HttpPolicy {
    pub allowed_origins: Vec<String>,
    pub allowed_hosts: HostAllowList,
    pub static_dir: PathBuf,
}

impl TryFrom<&Args> for HttpPolicy {
    type Error = PolicyError;

    fn try_from(args: &Args) -> Result<Self, Self::Error> {
        Ok(Self {
            allowed_origins: args.allowed_origins.clone(),
            allowed_hosts: HostAllowList::new(&args.allowed_hosts)?,
            static_dir: args.static_dir.clone(),
        })
    }
}

pub fn build_router(state: Arc<AppState>, policy: &HttpPolicy) -> Result<Router, PolicyError> {
    let body_limit = state.validator.body_limit();
    let allowed_hosts = Arc::new(policy.allowed_hosts.clone());

    let router = Router::new()
        .route("/", get(index_handler))
        .route(
            "/analyze",
            post(analyze_handler).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .nest_service("/static", ServeDir::new(&policy.static_dir))
        .with_state(state)
        .layer(cors_layer(&policy.allowed_origins)?)
        .layer(middleware::from_fn_with_state(
            allowed_hosts,
            enforce_allowed_hosts,
        ))
        // access log at INFO so the default filter keeps it
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        );

    Ok(router)
}
