//! Image classification: decoding, the model seam, and turning raw class
//! probabilities into a [`PredictionResult`].

mod loader;
mod onnx;

use std::sync::Arc;

use image::DynamicImage;

use crate::models::{Label, PredictionResult};

pub use loader::{ModelSource, load_classifier};

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("model execution failed: {0}")]
    Model(String),
    #[error("model returned {got} scores, expected {expected}")]
    OutputShape { expected: usize, got: usize },
    #[error("model returned a non-finite score")]
    NonFinite,
    #[error("model scores are not a probability distribution")]
    InvalidOutput,
    #[error("inference task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A loaded model. Implementations return one probability per entry of
/// [`Label::ALL`], in that order, each in `[0, 1]` and summing to 1.
pub trait ImageClassifier: Send + Sync {
    fn predict(&self, image: &DynamicImage) -> Result<Vec<f32>, InferenceError>;
}

pub type ModelHandle = Option<Arc<dyn ImageClassifier>>;

// Slack for f32 rounding when checking that scores sum to 1
const PROBABILITY_SUM_TOLERANCE: f32 = 1e-3;

/// Decodes `bytes`, runs `classifier` and assembles the result.
pub fn classify(
    classifier: &dyn ImageClassifier,
    bytes: &[u8],
) -> Result<PredictionResult, InferenceError> {
    let image = image::load_from_memory(bytes)?;
    let scores = classifier.predict(&image)?;
    build_prediction(&scores)
}

/// Runs [`classify`] on the blocking pool.
pub async fn classify_blocking(
    classifier: Arc<dyn ImageClassifier>,
    bytes: axum::body::Bytes,
) -> Result<PredictionResult, InferenceError> {
    tokio::task::spawn_blocking(move || classify(classifier.as_ref(), &bytes)).await?
}

fn build_prediction(scores: &[f32]) -> Result<PredictionResult, InferenceError> {
    if scores.len() != Label::ALL.len() {
        return Err(InferenceError::OutputShape {
            expected: Label::ALL.len(),
            got: scores.len(),
        });
    }
    if scores.iter().any(|p| !p.is_finite()) {
        return Err(InferenceError::NonFinite);
    }
    let sum: f32 = scores.iter().sum();
    if scores.iter().any(|p| !(0.0..=1.0).contains(p))
        || (sum - 1.0).abs() > PROBABILITY_SUM_TOLERANCE
    {
        return Err(InferenceError::InvalidOutput);
    }

    // First maximum wins on ties
    let (best, confidence) = scores
        .iter()
        .copied()
        .enumerate()
        .fold((0, f32::MIN), |(best_i, best_p), (i, p)| {
            if p > best_p { (i, p) } else { (best_i, best_p) }
        });

    Ok(PredictionResult {
        label: Label::ALL[best],
        confidence,
        probabilities: Label::ALL.iter().copied().zip(scores.iter().copied()).collect(),
    })
}

pub(crate) fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{ImageFormat, RgbImage};
    use std::io::Cursor;

    /// Returns fixed probabilities regardless of the image.
    pub struct FixedClassifier(pub Vec<f32>);

    impl ImageClassifier for FixedClassifier {
        fn predict(&self, _image: &DynamicImage) -> Result<Vec<f32>, InferenceError> {
            Ok(self.0.clone())
        }
    }

    pub fn jpeg_bytes() -> Vec<u8> {
        let img = RgbImage::from_fn(32, 32, |x, y| image::Rgb([(x * 8) as u8, (y * 8) as u8, 128]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Jpeg)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_classify_picks_max_probability() {
        let classifier = FixedClassifier(vec![0.05, 0.05, 0.7, 0.1, 0.05, 0.05]);
        let result = classify(&classifier, &jpeg_bytes()).unwrap();

        assert_eq!(result.label, Label::Knight);
        assert!((result.confidence - 0.7).abs() < f32::EPSILON);
        assert_eq!(result.probabilities.len(), 6);
        assert_eq!(result.probabilities[0], (Label::Bishop, 0.05));
        assert_eq!(result.probabilities[5], (Label::Rook, 0.05));
    }

    #[test]
    fn test_classify_rejects_undecodable_bytes() {
        let classifier = FixedClassifier(vec![1.0 / 6.0; 6]);
        let err = classify(&classifier, b"definitely not an image").unwrap_err();
        assert!(matches!(err, InferenceError::Decode(_)));
    }

    #[test]
    fn test_classify_rejects_wrong_output_width() {
        let classifier = FixedClassifier(vec![0.5, 0.5]);
        let err = classify(&classifier, &jpeg_bytes()).unwrap_err();
        assert!(matches!(
            err,
            InferenceError::OutputShape {
                expected: 6,
                got: 2
            }
        ));
    }

    #[test]
    fn test_classify_rejects_nan() {
        let classifier = FixedClassifier(vec![f32::NAN, 0.2, 0.2, 0.2, 0.2, 0.2]);
        let err = classify(&classifier, &jpeg_bytes()).unwrap_err();
        assert!(matches!(err, InferenceError::NonFinite));
    }

    #[test]
    fn test_classify_rejects_raw_logits() {
        let classifier = FixedClassifier(vec![2.0, 1.0, 0.5, -1.0, 0.0, 3.0]);
        let err = classify(&classifier, &jpeg_bytes()).unwrap_err();
        assert!(matches!(err, InferenceError::InvalidOutput));
    }

    #[test]
    fn test_classify_rejects_scores_not_summing_to_one() {
        let classifier = FixedClassifier(vec![0.5, 0.4, 0.3, 0.0, 0.0, 0.0]);
        let err = classify(&classifier, &jpeg_bytes()).unwrap_err();
        assert!(matches!(err, InferenceError::InvalidOutput));

        let classifier = FixedClassifier(vec![1.2, -0.2, 0.0, 0.0, 0.0, 0.0]);
        let err = classify(&classifier, &jpeg_bytes()).unwrap_err();
        assert!(matches!(err, InferenceError::InvalidOutput));
    }

    #[test]
    fn test_softmax_is_a_distribution() {
        let probs = softmax(&[2.0, 1.0, 0.1, -3.0, 0.0, 5.0]);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
        assert!(probs[5] > probs[0]);
    }
}
