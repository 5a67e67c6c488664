use image::{DynamicImage, GrayImage, Luma, RgbImage};
use ndarray::prelude::*;
use nshare::AsNdarray3;

use crate::errors::{Result, TriageError};
use crate::ImageArray;

// BT.601 luma in 14-bit fixed point.
const R2Y: u32 = 4899;
const G2Y: u32 = 9617;
const B2Y: u32 = 1868;
const YUV_SHIFT: u32 = 14;

/// Converts an RGB image to single-channel luma.
pub fn rgb_to_luma(image: &RgbImage) -> GrayImage {
    let (width, height) = image.dimensions();
    GrayImage::from_fn(width, height, |x, y| {
        let [r, g, b] = image.get_pixel(x, y).0;
        let luma = (u32::from(r) * R2Y
            + u32::from(g) * G2Y
            + u32::from(b) * B2Y
            + (1 << (YUV_SHIFT - 1)))
            >> YUV_SHIFT;
        Luma([luma.min(255) as u8])
    })
}

/// Wraps an H×W×C array (C = 1 or 3) as an image buffer.
pub fn array_to_image(array: ArrayView3<u8>) -> Result<DynamicImage> {
    let (height, width, channels) = array.dim();
    if height == 0 || width == 0 {
        return Err(TriageError::invalid_shape(
            "non-empty (H, W, C)",
            array.shape(),
        ));
    }
    let raw: Vec<u8> = array.iter().copied().collect();
    let (width, height) = (width as u32, height as u32);
    let image = match channels {
        1 => GrayImage::from_raw(width, height, raw).map(DynamicImage::ImageLuma8),
        3 => RgbImage::from_raw(width, height, raw).map(DynamicImage::ImageRgb8),
        _ => None,
    };
    image.ok_or_else(|| TriageError::invalid_shape("(H, W, 1) or (H, W, 3)", array.shape()))
}

/// Copies an image into an H×W×C array. Luma images keep one channel,
/// everything else becomes RGB.
pub fn image_to_array(image: &DynamicImage) -> ImageArray {
    match image {
        DynamicImage::ImageLuma8(gray) => chw_to_hwc(gray.as_ndarray3()),
        other => chw_to_hwc(other.to_rgb8().as_ndarray3()),
    }
}

fn chw_to_hwc(view: ArrayView3<u8>) -> ImageArray {
    view.permuted_axes([1, 2, 0])
        .as_standard_layout()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_rgb_to_luma_weights() {
        let mut image = RgbImage::new(4, 1);
        image.put_pixel(0, 0, Rgb([255, 0, 0]));
        image.put_pixel(1, 0, Rgb([0, 255, 0]));
        image.put_pixel(2, 0, Rgb([0, 0, 255]));
        image.put_pixel(3, 0, Rgb([200, 200, 200]));

        let luma = rgb_to_luma(&image);
        assert_eq!(luma.get_pixel(0, 0), &Luma([76]));
        assert_eq!(luma.get_pixel(1, 0), &Luma([150]));
        assert_eq!(luma.get_pixel(2, 0), &Luma([29]));
        assert_eq!(luma.get_pixel(3, 0), &Luma([200]));
    }

    #[test]
    fn test_array_image_roundtrip_keeps_layout() -> Result<()> {
        let mut array = ImageArray::zeros((2, 3, 3));
        array[[0, 2, 0]] = 10;
        array[[1, 0, 2]] = 20;

        let image = array_to_image(array.view())?;
        let rgb = image.to_rgb8();
        assert_eq!(rgb.dimensions(), (3, 2));
        assert_eq!(rgb.get_pixel(2, 0), &Rgb([10, 0, 0]));
        assert_eq!(rgb.get_pixel(0, 1), &Rgb([0, 0, 20]));

        assert_eq!(image_to_array(&image), array);
        Ok(())
    }

    #[test]
    fn test_array_to_image_rejects_bad_channels() {
        let array = ImageArray::zeros((4, 4, 2));
        assert!(matches!(
            array_to_image(array.view()),
            Err(TriageError::InvalidShape { .. })
        ));
        let empty = ImageArray::zeros((0, 4, 3));
        assert!(matches!(
            array_to_image(empty.view()),
            Err(TriageError::InvalidShape { .. })
        ));
    }
}
