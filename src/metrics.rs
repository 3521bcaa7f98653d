use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Prometheus collectors, registered on a registry owned by the app state.
pub struct Metrics {
    registry: Registry,
    pub analyze_requests: IntCounter,
    pub responses: IntCounterVec,
    pub rate_limited: IntCounter,
    pub inference_latency: Histogram,
    pub model_loaded: IntGauge,
    pub rate_limit_clients: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let analyze_requests = IntCounter::new(
            "piece_classifier_analyze_requests_total",
            "Total number of /analyze requests",
        )?;
        let responses = IntCounterVec::new(
            Opts::new(
                "piece_classifier_responses_total",
                "/analyze responses by status code",
            ),
            &["status"],
        )?;
        let rate_limited = IntCounter::new(
            "piece_classifier_rate_limited_total",
            "Requests rejected by the rate limiter",
        )?;
        let inference_latency = Histogram::with_opts(HistogramOpts::new(
            "piece_classifier_inference_latency_seconds",
            "Image decode and model inference latency in seconds",
        ))?;
        let model_loaded = IntGauge::new(
            "piece_classifier_model_loaded",
            "1 if the model loaded at startup, 0 otherwise",
        )?;
        let rate_limit_clients = IntGauge::new(
            "piece_classifier_rate_limit_clients",
            "Clients currently tracked by the rate limiter",
        )?;

        registry.register(Box::new(analyze_requests.clone()))?;
        registry.register(Box::new(responses.clone()))?;
        registry.register(Box::new(rate_limited.clone()))?;
        registry.register(Box::new(inference_latency.clone()))?;
        registry.register(Box::new(model_loaded.clone()))?;
        registry.register(Box::new(rate_limit_clients.clone()))?;

        Ok(Self {
            registry,
            analyze_requests,
            responses,
            rate_limited,
            inference_latency,
            model_loaded,
            rate_limit_clients,
        })
    }

    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_includes_collectors() {
        let metrics = Metrics::new().unwrap();
        metrics.analyze_requests.inc();
        metrics.responses.with_label_values(&["429"]).inc();
        metrics.model_loaded.set(1);

        let text = metrics.encode().unwrap();
        assert!(text.contains("piece_classifier_analyze_requests_total 1"));
        assert!(text.contains("piece_classifier_responses_total{status=\"429\"} 1"));
        assert!(text.contains("piece_classifier_model_loaded 1"));
    }
}
