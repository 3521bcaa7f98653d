use std::path::Path;

use image::DynamicImage;
use image::imageops::FilterType;
use tract_onnx::prelude::*;

use super::{ImageClassifier, InferenceError, softmax};
use crate::models::Label;

const INPUT_SIZE: u32 = 224;

// ImageNet statistics the backbone was pretrained with
const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const STD: [f32; 3] = [0.229, 0.224, 0.225];

type OnnxPlan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Exported chess piece model executed with tract.
///
/// The graph takes a `1x3x224x224` float tensor and produces one logit per
/// [`Label`]; softmax is applied here.
pub struct OnnxClassifier {
    plan: OnnxPlan,
}

impl OnnxClassifier {
    pub fn load(path: &Path) -> TractResult<Self> {
        let size = INPUT_SIZE as usize;
        let plan = tract_onnx::onnx()
            .model_for_path(path)?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
            )?
            .into_optimized()?
            .into_runnable()?;

        Ok(Self { plan })
    }
}

impl ImageClassifier for OnnxClassifier {
    fn predict(&self, image: &DynamicImage) -> Result<Vec<f32>, InferenceError> {
        let input = preprocess(image)
            .map_err(|e| InferenceError::Model(format!("bad input tensor: {e}")))?;

        let outputs = self
            .plan
            .run(tvec!(input.into()))
            .map_err(|e| InferenceError::Model(e.to_string()))?;

        let output = outputs
            .first()
            .ok_or_else(|| InferenceError::Model("model produced no outputs".to_string()))?;
        let logits = output
            .to_array_view::<f32>()
            .map_err(|e| InferenceError::Model(e.to_string()))?;
        let logits: Vec<f32> = logits.iter().copied().collect();

        if logits.len() != Label::ALL.len() {
            return Err(InferenceError::OutputShape {
                expected: Label::ALL.len(),
                got: logits.len(),
            });
        }

        Ok(softmax(&logits))
    }
}

// RGB, 224x224, scaled to [0, 1], normalized per channel, NCHW
fn preprocess(image: &DynamicImage) -> Result<Tensor, tract_ndarray::ShapeError> {
    let resized = image
        .resize_exact(INPUT_SIZE, INPUT_SIZE, FilterType::Triangle)
        .to_rgb8();

    let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
    let mut data = vec![0f32; 3 * plane];
    for (i, pixel) in resized.pixels().enumerate() {
        for c in 0..3 {
            let value = f32::from(pixel[c]) / 255.0;
            data[c * plane + i] = (value - MEAN[c]) / STD[c];
        }
    }

    let size = INPUT_SIZE as usize;
    let array = tract_ndarray::Array4::from_shape_vec((1, 3, size, size), data)?;
    Ok(array.into_tensor())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn test_preprocess_shape_and_normalization() {
        let white = RgbImage::from_pixel(10, 20, image::Rgb([255, 255, 255]));
        let white = DynamicImage::ImageRgb8(white);
        let tensor = preprocess(&white).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 224, 224]);

        let data = tensor.as_slice::<f32>().unwrap();
        let plane = 224 * 224;
        for c in 0..3 {
            let expected = (1.0 - MEAN[c]) / STD[c];
            assert!((data[c * plane] - expected).abs() < 0.02);
            assert!((data[c * plane + plane - 1] - expected).abs() < 0.02);
        }
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(OnnxClassifier::load(Path::new("/nonexistent/export.onnx")).is_err());
    }
}
