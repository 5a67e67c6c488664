use image::{ImageBuffer, Pixel, RgbImage};

/// Per-channel `base * alpha + overlay * beta + gamma`, rounded and
/// saturated to 8 bits. The weights need not sum to one.
///
/// Returns `None` when the two images differ in size.
pub fn add_weighted(
    base: &RgbImage,
    alpha: f32,
    overlay: &RgbImage,
    beta: f32,
    gamma: f32,
) -> Option<RgbImage> {
    if base.dimensions() != overlay.dimensions() {
        return None;
    }
    let (width, height) = base.dimensions();
    let mut output: RgbImage = ImageBuffer::new(width, height);
    for ((b, o), out) in base.pixels().zip(overlay.pixels()).zip(output.pixels_mut()) {
        *out = b.map2(o, |bc, oc| {
            super::saturate_cast(f32::from(bc) * alpha + f32::from(oc) * beta + gamma)
        });
    }
    Some(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_saturates_above_255() {
        let base = RgbImage::from_pixel(2, 2, Rgb([250, 100, 0]));
        let overlay = RgbImage::from_pixel(2, 2, Rgb([255, 255, 255]));
        let blended = add_weighted(&base, 1.0, &overlay, 0.4, 0.0).unwrap();
        // 250 + 102 overflows, 100 + 102 does not.
        assert_eq!(blended.get_pixel(1, 1), &Rgb([255, 202, 102]));
    }

    #[test]
    fn test_fractional_overlay_rounds() {
        // 0.4 * 5 = 2.0, 0.4 * 3 = 1.2, 0.4 * 15 = 6.0
        let base = RgbImage::from_pixel(1, 1, Rgb([0, 1, 2]));
        let overlay = RgbImage::from_pixel(1, 1, Rgb([5, 3, 15]));
        let blended = add_weighted(&base, 1.0, &overlay, 0.4, 0.0).unwrap();
        assert_eq!(blended.get_pixel(0, 0), &Rgb([2, 2, 8]));
    }

    #[test]
    fn test_size_mismatch() {
        let base = RgbImage::new(2, 2);
        let overlay = RgbImage::new(3, 2);
        assert!(add_weighted(&base, 1.0, &overlay, 0.4, 0.0).is_none());
    }
}
