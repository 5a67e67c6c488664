//! Gradient-weighted class activation mapping.
//!
//! Given the activations `A` of a convolutional layer and the gradient of the
//! predicted class score `y` with respect to them, each channel is weighted
//! by its spatially averaged gradient:
//!
//! ```text
//! w_c = mean_{i,j} dy / dA[i, j, c]
//! L   = relu(sum_c w_c * A[.., .., c])
//! ```
//!
//! `L` is scaled to `[0, 1]`, upsampled to the input resolution, coloured
//! with the jet palette and added onto the original radiograph.

use image::{imageops, imageops::FilterType, DynamicImage, GrayImage, ImageBuffer, Luma, RgbImage};
use ndarray::prelude::*;
use tracing::debug;

use crate::classifier::argmax;
use crate::errors::{Result, TriageError};
use crate::imageops_ai::{add_weighted, apply_jet, array_to_image};
use crate::preprocess::{ensure_tensor_shape, INPUT_SIZE};
use crate::traits::{ClassificationModel, GradientCapture};

/// Weight of the original image in the overlay.
pub const BASE_WEIGHT: f32 = 1.0;
/// Weight of the heatmap in the overlay. The two weights intentionally do
/// not sum to one; bright regions saturate.
pub const HEATMAP_WEIGHT: f32 = 0.4;

#[derive(Debug, Clone)]
pub struct Explanation {
    /// Class the heatmap explains, taken from the same forward pass.
    pub class_index: usize,
    /// Normalized map at the layer's resolution, values in `[0, 1]`.
    pub activation_map: Array2<f32>,
    /// Heatmap blended onto the resized original, `512 × 512` RGB.
    pub overlay: RgbImage,
}

pub struct ActivationMapper<M: ClassificationModel> {
    model: M,
    output_size: u32,
}

impl<M: ClassificationModel> ActivationMapper<M> {
    pub const fn new(model: M) -> Self {
        Self {
            model,
            output_size: INPUT_SIZE,
        }
    }

    pub fn explain(
        &self,
        tensor: ArrayView4<f32>,
        original: ArrayView3<u8>,
        layer: &str,
    ) -> Result<Explanation> {
        ensure_tensor_shape(tensor)?;
        let capture = self.model.capture(tensor, layer)?;
        let (class_index, activation_map) = class_activation_map(&capture)?;
        debug!(
            layer,
            class_index,
            map = ?activation_map.shape(),
            "computed class activation map"
        );

        let heatmap = colorize(&activation_map, self.output_size)?;
        let base = resize_original(original, self.output_size)?;
        let overlay = add_weighted(&base, BASE_WEIGHT, &heatmap, HEATMAP_WEIGHT, 0.0)
            .ok_or_else(|| {
                TriageError::invalid_shape(
                    format!("{0}x{0} overlay", self.output_size),
                    &[heatmap.height() as usize, heatmap.width() as usize],
                )
            })?;

        Ok(Explanation {
            class_index,
            activation_map,
            overlay,
        })
    }
}

/// Selects the predicted class of the captured pass and reduces its
/// gradients to a normalized map at the layer's resolution.
pub fn class_activation_map(capture: &GradientCapture) -> Result<(usize, Array2<f32>)> {
    let class_index = argmax(capture.probabilities.view()).ok_or_else(|| {
        TriageError::model("class selection", "captured pass has no finite probability")
    })?;
    let gradients = capture.class_gradient(class_index).ok_or_else(|| {
        TriageError::invalid_shape(
            format!("gradients for class {class_index}"),
            capture.gradients.shape(),
        )
    })?;

    let (height, width, channels) = capture.activations.dim();
    let spatial = (height * width) as f32;
    let weights: Array1<f32> = gradients
        .axis_iter(Axis(2))
        .map(|channel| channel.sum() / spatial)
        .collect();
    debug_assert_eq!(weights.len(), channels);

    let mut map = capture.activations.map_axis(Axis(2), |units| units.dot(&weights));
    map.mapv_inplace(|v| v.max(0.0));
    normalize_unit_interval(&mut map);
    Ok((class_index, map))
}

/// Divides by the maximum unless the map is entirely zero.
pub fn normalize_unit_interval(map: &mut Array2<f32>) {
    let max = map.fold(0.0f32, |acc, &v| acc.max(v));
    if max != 0.0 {
        map.mapv_inplace(|v| v / max);
    }
}

/// Upsamples the map, quantizes it to 8 bits and applies the jet palette.
pub fn colorize(map: &Array2<f32>, size: u32) -> Result<RgbImage> {
    let (height, width) = map.dim();
    let raw: Vec<f32> = map.iter().copied().collect();
    let map: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_raw(width as u32, height as u32, raw)
            .filter(|_| height > 0 && width > 0)
            .ok_or_else(|| TriageError::invalid_shape("non-empty activation map", &[height, width]))?;

    let resized = imageops::resize(&map, size, size, FilterType::Triangle);
    let quantized = GrayImage::from_fn(size, size, |x, y| {
        let v = resized.get_pixel(x, y).0[0].clamp(0.0, 1.0);
        Luma([(255.0 * v) as u8])
    });
    Ok(apply_jet(&quantized))
}

fn resize_original(original: ArrayView3<u8>, size: u32) -> Result<RgbImage> {
    let rgb = match array_to_image(original)? {
        DynamicImage::ImageRgb8(rgb) => rgb,
        other => other.to_rgb8(),
    };
    Ok(imageops::resize(&rgb, size, size, FilterType::Triangle))
}
