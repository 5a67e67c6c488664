use image::{GrayImage, Rgb, RgbImage};
use once_cell::sync::Lazy;

/// Jet palette in RGB order: dark blue at 0, red at 255.
static JET: Lazy<[[u8; 3]; 256]> = Lazy::new(|| {
    let mut table = [[0u8; 3]; 256];
    for (index, entry) in table.iter_mut().enumerate() {
        let x = index as f32 / 255.0;
        let channel = |offset: f32| {
            let value = (1.5 - (4.0 * x - offset).abs()).clamp(0.0, 1.0);
            super::saturate_cast::<u8>(value * 255.0)
        };
        *entry = [channel(3.0), channel(2.0), channel(1.0)];
    }
    table
});

pub fn jet(value: u8) -> Rgb<u8> {
    Rgb(JET[value as usize])
}

/// False-colours an 8-bit intensity map.
pub fn apply_jet(intensity: &GrayImage) -> RgbImage {
    let (width, height) = intensity.dimensions();
    RgbImage::from_fn(width, height, |x, y| jet(intensity.get_pixel(x, y).0[0]))
}
