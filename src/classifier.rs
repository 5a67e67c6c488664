use std::fmt;

use ndarray::prelude::*;
use tracing::debug;

use crate::errors::{Result, TriageError};
use crate::preprocess::ensure_tensor_shape;
use crate::traits::ClassificationModel;

/// Number of classes in the classifier head.
pub const NUM_CLASSES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    Bacterial,
    Normal,
    Viral,
    Unknown,
}

impl Label {
    pub const fn from_index(index: usize) -> Self {
        match index {
            0 => Self::Bacterial,
            1 => Self::Normal,
            2 => Self::Viral,
            _ => Self::Unknown,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Bacterial => "bacterial",
            Self::Normal => "normal",
            Self::Viral => "viral",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassificationResult {
    pub label: Label,
    /// Percentage in `[0, 100]`.
    pub confidence: f32,
    pub class_index: usize,
}

impl ClassificationResult {
    pub fn from_probabilities(probabilities: ArrayView1<f32>) -> Result<Self> {
        if probabilities.is_empty() {
            return Err(TriageError::invalid_shape(
                format!("({NUM_CLASSES},)"),
                probabilities.shape(),
            ));
        }
        // All-NaN output maps outside the label set.
        let Some(class_index) = argmax(probabilities) else {
            return Ok(Self {
                label: Label::Unknown,
                confidence: 0.0,
                class_index: probabilities.len(),
            });
        };
        let confidence = (probabilities[class_index] * 100.0).clamp(0.0, 100.0);
        Ok(Self {
            label: Label::from_index(class_index),
            confidence,
            class_index,
        })
    }

    /// Confidence with two decimals, e.g. `"70.00"`.
    pub fn confidence_display(&self) -> String {
        format!("{:.2}", self.confidence)
    }
}

/// Index of the first maximum, ignoring NaN; `None` when nothing is left.
pub fn argmax(values: ArrayView1<f32>) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (index, &value) in values.iter().enumerate() {
        if value.is_nan() {
            continue;
        }
        if best.map_or(true, |(_, max)| value > max) {
            best = Some((index, value));
        }
    }
    best.map(|(index, _)| index)
}

pub struct Classifier<M: ClassificationModel> {
    model: M,
}

impl<M: ClassificationModel> Classifier<M> {
    pub const fn new(model: M) -> Self {
        Self { model }
    }

    pub const fn model(&self) -> &M {
        &self.model
    }

    pub fn probabilities(&self, tensor: ArrayView4<f32>) -> Result<Array1<f32>> {
        ensure_tensor_shape(tensor)?;
        let probabilities = self.model.predict(tensor)?;
        if probabilities.len() != NUM_CLASSES {
            return Err(TriageError::invalid_shape(
                format!("({NUM_CLASSES},) probabilities"),
                probabilities.shape(),
            ));
        }
        Ok(probabilities)
    }

    pub fn predict(&self, tensor: ArrayView4<f32>) -> Result<ClassificationResult> {
        let probabilities = self.probabilities(tensor)?;
        let result = ClassificationResult::from_probabilities(probabilities.view())?;
        debug!(
            label = %result.label,
            confidence = result.confidence,
            "classified"
        );
        Ok(result)
    }
}
