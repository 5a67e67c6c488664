use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while turning a radiograph into a diagnosis.
///
/// Variants fall into three classes. Ingestion and preprocessing errors
/// (`UnsupportedFormat`, `Decode`, `InvalidShape`, `FileSystem`) are caused by
/// the input and can be retried with another file. Model and configuration
/// errors (`ModelNotFound`, `ConfigInvalid`, `Model`) mean no request can be
/// served until the setup is fixed. `LayerNotFound` only affects the
/// explanation: the classification itself is still valid.
#[derive(Error, Debug)]
pub enum TriageError {
    #[error("Unsupported image format: {extension:?} ({path:?})")]
    UnsupportedFormat { path: PathBuf, extension: String },

    #[error("Decode error: {operation} failed for {path:?}")]
    Decode {
        path: PathBuf,
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Invalid shape: expected {expected}, got {actual:?}")]
    InvalidShape {
        expected: String,
        actual: Vec<usize>,
    },

    #[error("Model file not found: {path:?}")]
    ModelNotFound { path: PathBuf },

    #[error("Configuration error: {message}")]
    ConfigInvalid { message: String },

    #[error("Layer {layer:?} is not exposed by the model")]
    LayerNotFound { layer: String },

    #[error("Model error: {operation} failed")]
    Model {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Filesystem error: {operation} failed for {path:?}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, TriageError>;

impl TriageError {
    pub(crate) fn invalid_shape(expected: impl Into<String>, actual: &[usize]) -> Self {
        Self::InvalidShape {
            expected: expected.into(),
            actual: actual.to_vec(),
        }
    }

    pub(crate) fn model(
        operation: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Model {
            operation: operation.into(),
            source: source.into(),
        }
    }

    /// The caller can retry with a different input.
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedFormat { .. }
                | Self::Decode { .. }
                | Self::InvalidShape { .. }
                | Self::FileSystem { .. }
        )
    }

    /// Classification succeeded but no heatmap could be produced.
    pub const fn is_degraded(&self) -> bool {
        matches!(self, Self::LayerNotFound { .. })
    }
}

/// I/O errors without a known path fall back to placeholder context.
/// Call sites that know the path build `FileSystem` directly.
impl From<std::io::Error> for TriageError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("unknown"),
            operation: "unknown".to_string(),
            source: err,
        }
    }
}

impl From<image::ImageError> for TriageError {
    fn from(err: image::ImageError) -> Self {
        Self::Decode {
            path: PathBuf::from("unknown"),
            operation: "image decoding".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<ort::Error> for TriageError {
    fn from(err: ort::Error) -> Self {
        Self::model("ort operation", err)
    }
}

/// Shape errors come from tensor reshaping around inference, so they are
/// reported as model errors.
impl From<ndarray::ShapeError> for TriageError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::model("tensor shape conversion", err)
    }
}
