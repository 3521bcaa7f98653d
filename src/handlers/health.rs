use std::sync::Arc;

use axum::Json;
use axum::extract::State;

use crate::models::HealthResponse;
use crate::state::AppState;

// health handler, 200 even when the model is missing
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        model_loaded: state.model_loaded(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}
