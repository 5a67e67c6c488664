use std::path::{Path, PathBuf};

use ndarray::prelude::*;
use once_cell::sync::OnceCell;
use ort::value::TensorRef;
use ort::{
    execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider},
    session::{builder::SessionBuilder, Session},
};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::{
    config::Settings,
    errors::{Result, TriageError},
    preprocess::TENSOR_SHAPE,
    traits::{ClassificationModel, GradientCapture},
};

/// Suffix of the graph output holding per-class gradients for a layer.
pub const GRADIENT_SUFFIX: &str = "_grad";

/// ONNX classifier session.
///
/// The exported graph takes a `(1, 512, 512, 1)` input. Its first output is
/// the class probabilities; every explainable layer `L` adds an output `L`
/// with its activations `(1, h, w, c)` and an output `L_grad` with the
/// per-class gradients `(classes, h, w, c)`.
pub struct Model {
    session: Mutex<Session>,
    input_name: String,
    probabilities_name: String,
    output_names: Vec<String>,
}

impl Model {
    pub fn new(model_path: &Path, device_id: i32) -> Result<Self> {
        let mut session = SessionBuilder::new()
            .map_err(|e| TriageError::model("session builder initialization", e))?
            .with_execution_providers([
                TensorRTExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
                CUDAExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
            ])
            .map_err(|e| TriageError::model("execution provider setup", e))?
            .with_memory_pattern(true)
            .map_err(|e| TriageError::model("memory pattern setup", e))?
            .commit_from_file(model_path)
            .map_err(|e| {
                TriageError::model(format!("model load: {}", model_path.display()), e)
            })?;

        let input = session
            .inputs
            .first()
            .ok_or_else(|| TriageError::model("model input lookup", "model has no inputs"))?;
        let input_name = input.name.clone();
        if let Some(shape) = input.input_type.tensor_shape() {
            if shape.len() != TENSOR_SHAPE.len() {
                return Err(TriageError::invalid_shape(
                    format!("model input of rank {}", TENSOR_SHAPE.len()),
                    &[shape.len()],
                ));
            }
        }

        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        let probabilities_name = output_names
            .first()
            .cloned()
            .ok_or_else(|| TriageError::model("model output lookup", "model has no outputs"))?;

        // warm up
        let data = Array4::<f32>::zeros(TENSOR_SHAPE);
        session
            .run(ort::inputs![input_name.as_str() => TensorRef::from_array_view(&data)
                .map_err(|e| TriageError::model("warm-up tensor creation", e))?])
            .map_err(|e| TriageError::model("model warm-up run", e))?;

        info!(
            path = %model_path.display(),
            outputs = ?output_names,
            "model loaded"
        );
        Ok(Self {
            session: Mutex::new(session),
            input_name,
            probabilities_name,
            output_names,
        })
    }

    pub fn has_layer(&self, layer: &str) -> bool {
        let gradient_name = format!("{layer}{GRADIENT_SUFFIX}");
        self.output_names.iter().any(|name| name == layer)
            && self.output_names.iter().any(|name| *name == gradient_name)
    }
}

impl ClassificationModel for Model {
    fn predict(&self, tensor: ArrayView4<f32>) -> Result<Array1<f32>> {
        let mut binding = self.session.lock();
        let outputs = binding.run(ort::inputs![
            self.input_name.as_str() => TensorRef::from_array_view(&tensor.as_standard_layout())?
        ])?;
        let probabilities = outputs[self.probabilities_name.as_str()].try_extract_array::<f32>()?;
        Ok(probabilities.iter().copied().collect())
    }

    fn capture(&self, tensor: ArrayView4<f32>, layer: &str) -> Result<GradientCapture> {
        if !self.has_layer(layer) {
            return Err(TriageError::LayerNotFound {
                layer: layer.to_string(),
            });
        }
        let gradient_name = format!("{layer}{GRADIENT_SUFFIX}");

        let mut binding = self.session.lock();
        let outputs = binding.run(ort::inputs![
            self.input_name.as_str() => TensorRef::from_array_view(&tensor.as_standard_layout())?
        ])?;

        let probabilities: Array1<f32> = outputs[self.probabilities_name.as_str()]
            .try_extract_array::<f32>()?
            .iter()
            .copied()
            .collect();
        let activations = outputs[layer]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix4>()?
            .index_axis_move(Axis(0), 0)
            .to_owned();
        let gradients = outputs[gradient_name.as_str()].try_extract_array::<f32>()?;
        // A leading batch axis of one is tolerated.
        let gradients = if gradients.ndim() == 5 {
            gradients.index_axis_move(Axis(0), 0)
        } else {
            gradients
        };
        let gradients = gradients.into_dimensionality::<Ix4>()?.to_owned();

        debug!(
            layer,
            activations = ?activations.shape(),
            gradients = ?gradients.shape(),
            "captured layer gradients"
        );
        GradientCapture::new(probabilities, activations, gradients)
    }
}

/// Lazily loaded, shared model.
///
/// Construction validates the configuration; the weights are read on first
/// use and at most once, even with concurrent callers.
pub struct ModelHandle {
    model_path: PathBuf,
    device_id: i32,
    model: OnceCell<Model>,
}

impl ModelHandle {
    pub fn new(model_path: impl Into<PathBuf>, device_id: i32) -> Result<Self> {
        let model_path = model_path.into();
        if !model_path.is_file() {
            return Err(TriageError::ModelNotFound { path: model_path });
        }
        Ok(Self {
            model_path,
            device_id,
            model: OnceCell::new(),
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(settings.require_model_path()?, settings.device_id())
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn is_loaded(&self) -> bool {
        self.model.get().is_some()
    }

    pub fn get(&self) -> Result<&Model> {
        self.model
            .get_or_try_init(|| Model::new(&self.model_path, self.device_id))
    }
}

impl ClassificationModel for ModelHandle {
    fn predict(&self, tensor: ArrayView4<f32>) -> Result<Array1<f32>> {
        self.get()?.predict(tensor)
    }

    fn capture(&self, tensor: ArrayView4<f32>, layer: &str) -> Result<GradientCapture> {
        self.get()?.capture(tensor, layer)
    }
}
