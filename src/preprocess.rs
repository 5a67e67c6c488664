use image::{imageops, imageops::FilterType, DynamicImage, GrayImage};
use ndarray::prelude::*;
use nshare::AsNdarray3;
use tracing::debug;

use crate::errors::{Result, TriageError};
use crate::imageops_ai::{array_to_image, rgb_to_luma, Clahe};
use crate::{ImageArray, Tensor};

/// Side length of the square model input.
pub const INPUT_SIZE: u32 = 512;
pub const DEFAULT_CLIP_LIMIT: f32 = 2.0;
/// CLAHE tiles along (x, y).
pub const DEFAULT_TILE_GRID: (u32, u32) = (4, 4);

/// Shape every tensor handed to the classifier must have.
pub const TENSOR_SHAPE: [usize; 4] = [1, INPUT_SIZE as usize, INPUT_SIZE as usize, 1];

/// CLAHE parameters. The output size is fixed at [`INPUT_SIZE`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreprocessConfig {
    pub clip_limit: f32,
    pub tile_grid: (u32, u32),
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            clip_limit: DEFAULT_CLIP_LIMIT,
            tile_grid: DEFAULT_TILE_GRID,
        }
    }
}

/// Turns an ingested array into the classifier's input tensor.
///
/// The steps run in a fixed order that the model was trained with:
/// resize, luma conversion, CLAHE, scaling to `[0, 1]`, then the batch and
/// channel axes are added.
#[derive(Debug, Clone, Default)]
pub struct Preprocessor {
    config: PreprocessConfig,
}

impl Preprocessor {
    pub const fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }

    pub const fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    pub fn transform(&self, array: ArrayView3<u8>) -> Result<Tensor> {
        let image = array_to_image(array)?;
        let size = INPUT_SIZE;

        let gray = match image {
            DynamicImage::ImageRgb8(rgb) => {
                rgb_to_luma(&imageops::resize(&rgb, size, size, FilterType::Triangle))
            }
            DynamicImage::ImageLuma8(gray) => {
                imageops::resize(&gray, size, size, FilterType::Triangle)
            }
            other => {
                return Err(TriageError::invalid_shape(
                    "8-bit gray or RGB",
                    &[other.height() as usize, other.width() as usize],
                ))
            }
        };

        let equalized = Clahe::new(self.config.clip_limit, self.config.tile_grid).apply(&gray);
        let tensor = to_tensor(&equalized);
        debug!(shape = ?tensor.shape(), "preprocessed tensor");
        Ok(tensor)
    }

    /// Same as [`transform`](Self::transform) for a plain 2-D grayscale grid.
    pub fn transform_gray(&self, array: ArrayView2<u8>) -> Result<Tensor> {
        self.transform(array.insert_axis(Axis(2)))
    }
}

fn to_tensor(image: &GrayImage) -> Tensor {
    // (1, H, W) -> (1, H, W, 1)
    image
        .as_ndarray3()
        .insert_axis(Axis(3))
        .mapv(|v| f32::from(v) / 255.0)
}

/// Fails with `InvalidShape` unless the tensor is exactly (1, 512, 512, 1).
pub fn ensure_tensor_shape(tensor: ArrayView4<f32>) -> Result<()> {
    if tensor.shape() == TENSOR_SHAPE {
        Ok(())
    } else {
        Err(TriageError::invalid_shape(
            format!("{TENSOR_SHAPE:?}"),
            tensor.shape(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkerboard(height: usize, width: usize, channels: usize) -> ImageArray {
        Array3::from_shape_fn((height, width, channels), |(y, x, c)| {
            (((x / 8 + y / 8) % 2) * 180 + c * 20) as u8
        })
    }

    #[test]
    fn test_output_shape_and_range() -> Result<()> {
        let preprocessor = Preprocessor::default();
        for (height, width, channels) in [(64, 64, 3), (300, 700, 3), (1024, 512, 1), (3, 5, 1)] {
            let tensor = preprocessor.transform(checkerboard(height, width, channels).view())?;
            assert_eq!(tensor.shape(), &TENSOR_SHAPE);
            assert!(tensor.iter().all(|&v| (0.0..=1.0).contains(&v)));
        }
        Ok(())
    }

    #[test]
    fn test_gray_and_replicated_rgb_agree() -> Result<()> {
        let gray = Array2::from_shape_fn((40, 60), |(y, x)| ((x * 3 + y * 5) % 256) as u8);
        let mut rgb = ImageArray::zeros((40, 60, 3));
        for mut channel in rgb.axis_iter_mut(Axis(2)) {
            channel.assign(&gray);
        }

        let preprocessor = Preprocessor::default();
        let from_gray = preprocessor.transform_gray(gray.view())?;
        let from_rgb = preprocessor.transform(rgb.view())?;
        assert_eq!(from_gray, from_rgb);
        Ok(())
    }

    #[test]
    fn test_deterministic() -> Result<()> {
        let array = checkerboard(100, 80, 3);
        let preprocessor = Preprocessor::default();
        assert_eq!(
            preprocessor.transform(array.view())?,
            preprocessor.transform(array.view())?
        );
        Ok(())
    }

    #[test]
    fn test_invalid_shapes() {
        let preprocessor = Preprocessor::default();
        for shape in [(0, 10, 3), (10, 0, 1), (10, 10, 2), (10, 10, 4)] {
            let array = ImageArray::zeros(shape);
            assert!(matches!(
                preprocessor.transform(array.view()),
                Err(TriageError::InvalidShape { .. })
            ));
        }
    }

    #[test]
    fn test_clahe_settings_take_effect() -> Result<()> {
        // Narrow band of grey levels so clipping and tiling both matter.
        let array = Array3::from_shape_fn((128, 128, 1), |(y, x, _)| {
            (100 + x / 16 + (y / 32) * 2) as u8
        });
        let default = Preprocessor::default().transform(array.view())?;
        let stronger_clip = Preprocessor::new(PreprocessConfig {
            clip_limit: 40.0,
            ..PreprocessConfig::default()
        })
        .transform(array.view())?;
        let finer_grid = Preprocessor::new(PreprocessConfig {
            tile_grid: (8, 8),
            ..PreprocessConfig::default()
        })
        .transform(array.view())?;

        assert_ne!(default, stronger_clip);
        assert_ne!(default, finer_grid);

        let spread = |t: &Tensor| {
            let (min, max) = t
                .iter()
                .fold((f32::MAX, f32::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
            max - min
        };
        assert!(spread(&stronger_clip) > spread(&default));
        Ok(())
    }

    #[test]
    fn test_uniform_input_reference_value() -> Result<()> {
        // 128x128 tiles of a flat image: clip 128, the 16256 clipped counts
        // spread 63 per bin with residual 128 on the even bins, so
        // cdf(100) = 101 * 63 + 51 + 128 and lut = round(6542 * 255 / 16384).
        let array = Array3::from_elem((40, 40, 1), 100u8);
        let tensor = Preprocessor::default().transform(array.view())?;
        let expected = 102.0 / 255.0;
        assert!(tensor.iter().all(|&v| (v - expected).abs() < 1e-6));
        Ok(())
    }

    #[test]
    fn test_ensure_tensor_shape() {
        assert!(ensure_tensor_shape(Tensor::zeros((1, 512, 512, 1)).view()).is_ok());
        assert!(matches!(
            ensure_tensor_shape(Tensor::zeros((1, 256, 256, 1)).view()),
            Err(TriageError::InvalidShape { .. })
        ));
    }
}
