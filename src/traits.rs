use crate::errors::{Result, TriageError};
use ndarray::prelude::*;

/// Network forward passes the classifier and Grad-CAM rely on.
///
/// Implementations only read their weights, so a shared reference is
/// enough for both the classifier and the activation mapper.
pub trait ClassificationModel: Send + Sync {
    /// Class probabilities for a `(1, 512, 512, 1)` tensor.
    fn predict(&self, tensor: ArrayView4<f32>) -> Result<Array1<f32>>;

    /// One forward pass that also captures `layer`'s activations and the
    /// gradient of every class score with respect to them.
    fn capture(&self, tensor: ArrayView4<f32>, layer: &str) -> Result<GradientCapture>;
}

impl<M: ClassificationModel + ?Sized> ClassificationModel for &M {
    fn predict(&self, tensor: ArrayView4<f32>) -> Result<Array1<f32>> {
        (**self).predict(tensor)
    }

    fn capture(&self, tensor: ArrayView4<f32>, layer: &str) -> Result<GradientCapture> {
        (**self).capture(tensor, layer)
    }
}

impl<M: ClassificationModel + ?Sized> ClassificationModel for std::sync::Arc<M> {
    fn predict(&self, tensor: ArrayView4<f32>) -> Result<Array1<f32>> {
        (**self).predict(tensor)
    }

    fn capture(&self, tensor: ArrayView4<f32>, layer: &str) -> Result<GradientCapture> {
        (**self).capture(tensor, layer)
    }
}

/// Outputs of a single forward pass through a convolutional layer.
#[derive(Debug, Clone, PartialEq)]
pub struct GradientCapture {
    /// Class probabilities of this pass.
    pub probabilities: Array1<f32>,
    /// Layer output, `(height, width, channels)`.
    pub activations: Array3<f32>,
    /// `d score[k] / d activations`, `(classes, height, width, channels)`.
    pub gradients: Array4<f32>,
}

impl GradientCapture {
    pub fn new(
        probabilities: Array1<f32>,
        activations: Array3<f32>,
        gradients: Array4<f32>,
    ) -> Result<Self> {
        let (classes, height, width, channels) = gradients.dim();
        if classes != probabilities.len() || (height, width, channels) != activations.dim() {
            return Err(TriageError::invalid_shape(
                format!(
                    "gradients ({}, {:?})",
                    probabilities.len(),
                    activations.shape()
                ),
                gradients.shape(),
            ));
        }
        Ok(Self {
            probabilities,
            activations,
            gradients,
        })
    }

    /// Gradient of one class score, `(height, width, channels)`.
    pub fn class_gradient(&self, class: usize) -> Option<ArrayView3<f32>> {
        (class < self.gradients.len_of(Axis(0))).then(|| self.gradients.index_axis(Axis(0), class))
    }
}
