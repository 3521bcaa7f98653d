use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

// Closed set of classes the model was trained on, in training order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    Bishop,
    King,
    Knight,
    Pawn,
    Queen,
    Rook,
}

impl Label {
    pub const ALL: [Label; 6] = [
        Label::Bishop,
        Label::King,
        Label::Knight,
        Label::Pawn,
        Label::Queen,
        Label::Rook,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Label::Bishop => "Bishop",
            Label::King => "King",
            Label::Knight => "Knight",
            Label::Pawn => "Pawn",
            Label::Queen => "Queen",
            Label::Rook => "Rook",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one successful inference.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionResult {
    pub label: Label,
    /// Highest class probability, in `[0, 1]`.
    pub confidence: f32,
    /// Every label with its probability, in [`Label::ALL`] order.
    pub probabilities: Vec<(Label, f32)>,
}

// `/analyze` success body
#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub result: String,
    pub confidence: String,
    pub all_probabilities: Map<String, Value>,
}

impl From<&PredictionResult> for AnalyzeResponse {
    fn from(prediction: &PredictionResult) -> Self {
        let all_probabilities = prediction
            .probabilities
            .iter()
            .map(|(label, p)| (label.to_string(), Value::String(format_percent(*p))))
            .collect();

        Self {
            result: prediction.label.to_string(),
            confidence: format_percent(prediction.confidence),
            all_probabilities,
        }
    }
}

// `/health` body
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_loaded: bool,
    pub timestamp: String,
}

// 0.97534 -> "97.53%"
pub fn format_percent(fraction: f32) -> String {
    format!("{:.2}%", f64::from(fraction) * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_percent() {
        assert_eq!(format_percent(0.97534), "97.53%");
        assert_eq!(format_percent(1.0), "100.00%");
        assert_eq!(format_percent(0.0), "0.00%");
        assert_eq!(format_percent(0.00049), "0.05%");
    }

    #[test]
    fn test_response_keeps_label_order() {
        let prediction = PredictionResult {
            label: Label::Rook,
            confidence: 0.5,
            probabilities: vec![
                (Label::Bishop, 0.1),
                (Label::King, 0.1),
                (Label::Knight, 0.1),
                (Label::Pawn, 0.1),
                (Label::Queen, 0.1),
                (Label::Rook, 0.5),
            ],
        };

        let body = serde_json::to_value(AnalyzeResponse::from(&prediction)).unwrap();
        assert_eq!(body["result"], "Rook");
        assert_eq!(body["confidence"], "50.00%");

        let keys: Vec<&String> = body["all_probabilities"]
            .as_object()
            .unwrap()
            .keys()
            .collect();
        assert_eq!(
            keys,
            vec!["Bishop", "King", "Knight", "Pawn", "Queen", "Rook"]
        );
    }
}
