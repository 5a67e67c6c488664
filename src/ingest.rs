use std::fs;
use std::path::{Path, PathBuf};

use dicom_pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder};
use image::{DynamicImage, GrayImage, ImageBuffer, ImageFormat, Luma};
use ndarray::prelude::*;
use tracing::debug;

use crate::errors::{Result, TriageError};
use crate::imageops_ai::image_to_array;
use crate::ImageArray;

/// Extensions accepted by [`ImageIngestor`], lower-case.
pub const SUPPORTED_EXTENSIONS: [&str; 4] = ["dcm", "jpg", "jpeg", "png"];

/// Which decoder a file needs, decided from its extension alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Clinical,
    Raster(ImageFormat),
}

impl SourceKind {
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        match extension.as_str() {
            "dcm" => Ok(Self::Clinical),
            "jpg" | "jpeg" => Ok(Self::Raster(ImageFormat::Jpeg)),
            "png" => Ok(Self::Raster(ImageFormat::Png)),
            _ => Err(TriageError::UnsupportedFormat {
                path: path.to_path_buf(),
                extension,
            }),
        }
    }
}

/// Raw stored samples of a DICOM image, first frame and first plane.
#[derive(Debug, Clone, PartialEq)]
pub struct ClinicalImage {
    pixels: Array2<f32>,
    bits_allocated: u16,
}

impl ClinicalImage {
    pub fn from_pixels(pixels: Array2<f32>, bits_allocated: u16) -> Self {
        Self {
            pixels,
            bits_allocated,
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        let decode_error = |operation: &str, source: Box<dyn std::error::Error + Send + Sync>| {
            TriageError::Decode {
                path: path.to_path_buf(),
                operation: operation.to_string(),
                source,
            }
        };

        let object = dicom_object::open_file(path)
            .map_err(|e| decode_error("DICOM parsing", Box::new(e)))?;
        let pixel_data = object
            .decode_pixel_data()
            .map_err(|e| decode_error("pixel data decoding", Box::new(e)))?;
        let bits_allocated = pixel_data.bits_allocated();

        let options = ConvertOptions::new().with_modality_lut(ModalityLutOption::None);
        let samples = pixel_data
            .to_ndarray_with_options::<f32>(&options)
            .map_err(|e| decode_error("pixel array conversion", Box::new(e)))?;
        let (frames, rows, columns, planes) = samples.dim();
        if frames == 0 || rows == 0 || columns == 0 || planes == 0 {
            return Err(TriageError::invalid_shape(
                "at least one frame of (rows, columns, samples)",
                samples.shape(),
            ));
        }

        debug!(
            path = %path.display(),
            rows, columns, frames, bits_allocated, "decoded DICOM pixel data"
        );
        // dicom-pixeldata builds on its own ndarray release; copy across.
        let first_plane = samples.slice(dicom_pixeldata::ndarray::s![0, .., .., 0]);
        let pixels = Array2::from_shape_vec((rows, columns), first_plane.iter().copied().collect())?;
        Ok(Self::from_pixels(pixels, bits_allocated))
    }

    pub fn pixels(&self) -> ArrayView2<f32> {
        self.pixels.view()
    }

    /// Clips negatives, scales the maximum to 255 and replicates the plane
    /// into three channels. An image without positive samples stays black.
    pub fn normalize(&self) -> ImageArray {
        let max = self.pixels.fold(0.0f32, |acc, &v| acc.max(v));
        let gray = if max > 0.0 {
            self.pixels.mapv(|v| (v.max(0.0) / max * 255.0) as u8)
        } else {
            Array2::zeros(self.pixels.raw_dim())
        };
        let (height, width) = gray.dim();
        let mut rgb = ImageArray::zeros((height, width, 3));
        for mut channel in rgb.axis_iter_mut(Axis(2)) {
            channel.assign(&gray);
        }
        rgb
    }

    /// Grayscale image at the source bit depth.
    pub fn display(&self) -> DynamicImage {
        let (height, width) = self.pixels.dim();
        let (width, height) = (width as u32, height as u32);
        if self.bits_allocated <= 8 {
            let gray: GrayImage = ImageBuffer::from_fn(width, height, |x, y| {
                let v = self.pixels[[y as usize, x as usize]];
                Luma([v.clamp(0.0, u8::MAX as f32) as u8])
            });
            DynamicImage::ImageLuma8(gray)
        } else {
            let gray: ImageBuffer<Luma<u16>, Vec<u16>> = ImageBuffer::from_fn(width, height, |x, y| {
                let v = self.pixels[[y as usize, x as usize]];
                Luma([v.clamp(0.0, u16::MAX as f32) as u16])
            });
            DynamicImage::ImageLuma16(gray)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RasterImage {
    image: DynamicImage,
}

impl RasterImage {
    pub fn decode(path: &Path, bytes: &[u8], format: ImageFormat) -> Result<Self> {
        let image =
            image::load_from_memory_with_format(bytes, format).map_err(|e| TriageError::Decode {
                path: path.to_path_buf(),
                operation: format!("{format:?} decoding"),
                source: Box::new(e),
            })?;
        Ok(Self::from_image(image))
    }

    /// Stored as RGB; alpha is dropped and grayscale replicated.
    pub fn from_image(image: DynamicImage) -> Self {
        Self {
            image: DynamicImage::ImageRgb8(image.to_rgb8()),
        }
    }

    pub fn normalize(&self) -> ImageArray {
        image_to_array(&self.image)
    }

    pub fn display(&self) -> DynamicImage {
        self.image.clone()
    }
}

/// A decoded source image.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceImage {
    Clinical(ClinicalImage),
    Raster(RasterImage),
}

impl SourceImage {
    pub fn normalize(&self) -> ImageArray {
        match self {
            Self::Clinical(image) => image.normalize(),
            Self::Raster(image) => image.normalize(),
        }
    }

    pub fn display(&self) -> DynamicImage {
        match self {
            Self::Clinical(image) => image.display(),
            Self::Raster(image) => image.display(),
        }
    }
}

/// Normalized pixels for the model and an image for the user.
#[derive(Debug, Clone)]
pub struct IngestedImage {
    pub path: PathBuf,
    pub array: ImageArray,
    pub display: DynamicImage,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ImageIngestor;

impl ImageIngestor {
    pub const fn new() -> Self {
        Self
    }

    pub fn is_supported(path: &Path) -> bool {
        SourceKind::from_path(path).is_ok()
    }

    /// Decodes `path` according to its extension. Unsupported extensions
    /// fail before the file is touched.
    pub fn open(&self, path: &Path) -> Result<SourceImage> {
        match SourceKind::from_path(path)? {
            SourceKind::Clinical => ClinicalImage::open(path).map(SourceImage::Clinical),
            SourceKind::Raster(format) => {
                let bytes = fs::read(path).map_err(|e| TriageError::FileSystem {
                    path: path.to_path_buf(),
                    operation: "image read".to_string(),
                    source: e,
                })?;
                RasterImage::decode(path, &bytes, format).map(SourceImage::Raster)
            }
        }
    }

    pub fn load(&self, path: &Path) -> Result<IngestedImage> {
        let source = self.open(path)?;
        let array = source.normalize();
        debug!(path = %path.display(), shape = ?array.shape(), "image ingested");
        Ok(IngestedImage {
            path: path.to_path_buf(),
            array,
            display: source.display(),
        })
    }
}
