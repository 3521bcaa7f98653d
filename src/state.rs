use std::sync::Arc;

use crate::classifier::ModelHandle;
use crate::metrics::Metrics;
use crate::rate_limit::RateLimiter;
use crate::upload::UploadValidator;

// app's shared state
pub struct AppState {
    pub rate_limiter: Arc<RateLimiter>,
    pub model: ModelHandle, // None when startup loading failed
    pub validator: UploadValidator,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(
        rate_limiter: Arc<RateLimiter>,
        model: ModelHandle,
        validator: UploadValidator,
        metrics: Metrics,
    ) -> Self {
        metrics.model_loaded.set(i64::from(model.is_some()));
        Self {
            rate_limiter,
            model,
            validator,
            metrics,
        }
    }

    pub fn model_loaded(&self) -> bool {
        self.model.is_some()
    }
}
