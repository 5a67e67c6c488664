use crate::errors::{Result, TriageError};
use crate::preprocess::ensure_tensor_shape;
use crate::traits::{ClassificationModel, GradientCapture};
use ndarray::prelude::*;

/// Side length of the mock's convolutional feature map.
pub const MOCK_FEATURE_SIZE: usize = 16;
pub const MOCK_CHANNELS: usize = 4;

/// Deterministic stand-in for the ONNX classifier.
///
/// Always returns the configured probabilities. The captured layer lights up
/// a square in the upper-left quadrant for the predicted class only.
#[derive(Debug, Clone)]
pub struct MockModel {
    pub probabilities: Array1<f32>,
    pub layer_name: String,
}

impl MockModel {
    pub fn new(probabilities: &[f32]) -> Self {
        Self {
            probabilities: Array1::from(probabilities.to_vec()),
            layer_name: crate::config::DEFAULT_LAYER_NAME.to_string(),
        }
    }

    pub fn with_layer_name(mut self, layer_name: impl Into<String>) -> Self {
        self.layer_name = layer_name.into();
        self
    }

    fn argmax(&self) -> usize {
        crate::classifier::argmax(self.probabilities.view()).unwrap_or(0)
    }
}

impl ClassificationModel for MockModel {
    fn predict(&self, tensor: ArrayView4<f32>) -> Result<Array1<f32>> {
        ensure_tensor_shape(tensor)?;
        Ok(self.probabilities.clone())
    }

    fn capture(&self, tensor: ArrayView4<f32>, layer: &str) -> Result<GradientCapture> {
        ensure_tensor_shape(tensor)?;
        if layer != self.layer_name {
            return Err(TriageError::LayerNotFound {
                layer: layer.to_string(),
            });
        }

        let size = MOCK_FEATURE_SIZE;
        let activations = Array3::from_shape_fn((size, size, MOCK_CHANNELS), |(y, x, c)| {
            if c == 0 && y < size / 4 && x < size / 4 {
                1.0
            } else {
                0.1
            }
        });
        let target = self.argmax();
        let gradients = Array4::from_shape_fn(
            (self.probabilities.len(), size, size, MOCK_CHANNELS),
            |(k, _, _, c)| match (k == target, c) {
                (true, 0) => 1.0,
                (true, _) => -0.05,
                (false, _) => -1.0,
            },
        );
        GradientCapture::new(self.probabilities.clone(), activations, gradients)
    }
}

/// Model whose explanation layer never exists.
pub fn create_mock_model_without_layer(probabilities: &[f32]) -> MockModel {
    MockModel::new(probabilities).with_layer_name("")
}
