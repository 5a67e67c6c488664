pub mod classifier;
pub mod config;
pub mod errors;
pub mod grad_cam;
pub mod imageops_ai;
pub mod ingest;
pub mod model;
pub mod preprocess;
pub mod report;
pub mod traits;

pub mod mocks;

use std::path::Path;

use image::RgbImage;
use ndarray::prelude::*;
use tracing::{info, warn};

pub use classifier::{ClassificationResult, Classifier, Label};
pub use config::{Settings, DEFAULT_LAYER_NAME};
pub use errors::{Result, TriageError};
pub use grad_cam::{ActivationMapper, Explanation};
pub use ingest::{ImageIngestor, IngestedImage, SourceImage};
pub use model::{Model, ModelHandle};
pub use preprocess::{PreprocessConfig, Preprocessor};
pub use report::ResultRecord;
pub use traits::*;

/// Decoded pixels, `(height, width, channels)` with 1 or 3 channels.
pub type ImageArray = Array3<u8>;

/// Classifier input, always `(1, 512, 512, 1)` with values in `[0, 1]`.
pub type Tensor = Array4<f32>;

/// Outcome of one pipeline run.
#[derive(Debug, Clone)]
pub struct Diagnosis {
    pub patient_id: String,
    pub result: ClassificationResult,
    /// `None` when the explanation layer is missing from the model.
    pub overlay: Option<RgbImage>,
}

impl Diagnosis {
    pub fn record(&self) -> ResultRecord {
        ResultRecord::new(self.patient_id.clone(), &self.result)
    }
}

/// Ingestion, preprocessing, classification and Grad-CAM in sequence.
///
/// The pipeline keeps no per-image state; the only shared resource is the
/// model it was built with.
pub struct Pipeline<M: ClassificationModel> {
    ingestor: ImageIngestor,
    preprocessor: Preprocessor,
    classifier: Classifier<M>,
    layer_name: String,
}

impl<M: ClassificationModel> Pipeline<M> {
    pub fn new(model: M, layer_name: impl Into<String>) -> Self {
        Self {
            ingestor: ImageIngestor::new(),
            preprocessor: Preprocessor::default(),
            classifier: Classifier::new(model),
            layer_name: layer_name.into(),
        }
    }

    pub fn with_preprocessor(mut self, preprocessor: Preprocessor) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    pub fn layer_name(&self) -> &str {
        &self.layer_name
    }

    pub fn load_image(&self, path: &Path) -> Result<IngestedImage> {
        self.ingestor.load(path)
    }

    pub fn run(&self, path: &Path, patient_id: &str) -> Result<Diagnosis> {
        let ingested = self.load_image(path)?;
        self.run_array(ingested.array.view(), patient_id)
    }

    /// Runs on an already decoded array. A missing explanation layer leaves
    /// the classification intact and yields no overlay.
    pub fn run_array(&self, array: ArrayView3<u8>, patient_id: &str) -> Result<Diagnosis> {
        let tensor = self.preprocessor.transform(array)?;
        let result = self.classifier.predict(tensor.view())?;

        let mapper = ActivationMapper::new(self.classifier.model());
        let overlay = match mapper.explain(tensor.view(), array, &self.layer_name) {
            Ok(explanation) => Some(explanation.overlay),
            Err(err) if err.is_degraded() => {
                warn!(patient_id, error = %err, "explanation unavailable");
                None
            }
            Err(err) => return Err(err),
        };

        info!(
            patient_id,
            label = %result.label,
            confidence = %result.confidence_display(),
            explained = overlay.is_some(),
            "diagnosis complete"
        );
        Ok(Diagnosis {
            patient_id: patient_id.to_string(),
            result,
            overlay,
        })
    }
}

impl Pipeline<ModelHandle> {
    /// Pipeline over the ONNX model named in `settings`. Configuration
    /// problems surface here, before any image is processed.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let model = ModelHandle::from_settings(settings)?;
        Ok(Self::new(model, settings.layer_name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{create_mock_model_without_layer, MockModel};

    fn sample_array() -> ImageArray {
        Array3::from_shape_fn((48, 40, 3), |(y, x, c)| ((x * 5 + y * 3 + c) % 256) as u8)
    }

    #[test]
    fn test_run_array_with_mock() -> Result<()> {
        let pipeline = Pipeline::new(MockModel::new(&[0.1, 0.7, 0.2]), DEFAULT_LAYER_NAME);
        let diagnosis = pipeline.run_array(sample_array().view(), "patient-01")?;

        assert_eq!(diagnosis.result.label, Label::Normal);
        assert_eq!(diagnosis.result.confidence_display(), "70.00");
        let overlay = diagnosis.overlay.as_ref().expect("overlay");
        assert_eq!(overlay.dimensions(), (512, 512));
        assert_eq!(diagnosis.record().to_string(), "patient-01-normal-70.00%");
        Ok(())
    }

    #[test]
    fn test_missing_layer_degrades() -> Result<()> {
        let pipeline = Pipeline::new(
            create_mock_model_without_layer(&[0.8, 0.1, 0.1]),
            DEFAULT_LAYER_NAME,
        );
        let diagnosis = pipeline.run_array(sample_array().view(), "p")?;
        assert_eq!(diagnosis.result.label, Label::Bacterial);
        assert!(diagnosis.overlay.is_none());
        Ok(())
    }

    #[test]
    fn test_invalid_array_is_rejected() {
        let pipeline = Pipeline::new(MockModel::new(&[0.1, 0.7, 0.2]), DEFAULT_LAYER_NAME);
        let array = ImageArray::zeros((10, 10, 2));
        assert!(matches!(
            pipeline.run_array(array.view(), "p"),
            Err(TriageError::InvalidShape { .. })
        ));
    }

    #[test]
    fn test_from_settings_requires_model_path() {
        assert!(matches!(
            Pipeline::from_settings(&Settings::default()),
            Err(TriageError::ConfigInvalid { .. })
        ));
    }
}
