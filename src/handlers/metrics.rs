use std::sync::Arc;

use axum::extract::State;

use crate::error::Error;
use crate::state::AppState;

pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> Result<String, Error> {
    state
        .metrics
        .rate_limit_clients
        .set(i64::try_from(state.rate_limiter.tracked_clients()).unwrap_or(i64::MAX));
    state
        .metrics
        .encode()
        .map_err(|e| Error::Metrics(e.to_string()))
}
