use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{ConnectInfo, Multipart, State};
use axum::http::StatusCode;

use crate::classifier::classify_blocking;
use crate::error::Error;
use crate::models::AnalyzeResponse;
use crate::state::AppState;
use crate::upload::UploadValidationOutcome;

// POST /analyze
pub async fn analyze_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<AnalyzeResponse>, Error> {
    state.metrics.analyze_requests.inc();

    let result = analyze(&state, &peer.ip().to_string(), multipart).await;

    let status = match &result {
        Ok(_) => StatusCode::OK,
        Err(e) => e.status(),
    };
    state
        .metrics
        .responses
        .with_label_values(&[status.as_str()])
        .inc();

    result.map(Json)
}

// Gates run cheapest first: rate limit, model presence, upload, inference
async fn analyze(
    state: &AppState,
    client_id: &str,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<AnalyzeResponse, Error> {
    if !state.rate_limiter.allow(client_id) {
        state.metrics.rate_limited.inc();
        tracing::warn!(client = client_id, "Rate limit exceeded");
        return Err(Error::RateLimited);
    }
    state
        .metrics
        .rate_limit_clients
        .set(i64::try_from(state.rate_limiter.tracked_clients()).unwrap_or(i64::MAX));

    let Some(model) = state.model.clone() else {
        return Err(Error::ModelUnavailable);
    };

    let multipart = multipart.map_err(|e| Error::Multipart(e.body_text()))?;
    let (bytes, filename) = match state.validator.validate_multipart(multipart).await? {
        UploadValidationOutcome::Accepted { bytes, filename } => (bytes, filename),
        UploadValidationOutcome::Rejected(rejection) => {
            tracing::debug!(client = client_id, "Upload rejected: {rejection}");
            return Err(rejection.into());
        }
    };

    let size = bytes.len();
    let timer = state.metrics.inference_latency.start_timer();
    let prediction = classify_blocking(model, bytes).await;
    timer.observe_duration();
    let prediction = prediction?;

    tracing::info!(
        client = client_id,
        filename = %filename,
        size,
        label = %prediction.label,
        confidence = prediction.confidence,
        "Classified upload"
    );

    Ok(AnalyzeResponse::from(&prediction))
}
