pub mod blend;
pub mod clahe;
pub mod colormap;
pub mod convert_color;

pub use blend::add_weighted;
pub use clahe::Clahe;
pub use colormap::apply_jet;
pub use convert_color::{array_to_image, image_to_array, rgb_to_luma};

use num_traits::{Bounded, NumCast};

/// Rounds half to even and clamps into `T`'s range, like a saturating cast.
pub fn saturate_cast<T: Bounded + NumCast>(value: f32) -> T {
    let rounded = value.round_ties_even();
    let min = T::min_value().to_f32().unwrap_or(f32::MIN);
    let max = T::max_value().to_f32().unwrap_or(f32::MAX);
    let clamped = if rounded.is_nan() {
        min
    } else {
        rounded.clamp(min, max)
    };
    T::from(clamped).unwrap_or_else(T::max_value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saturate_cast_u8() {
        assert_eq!(saturate_cast::<u8>(-3.0), 0);
        assert_eq!(saturate_cast::<u8>(300.0), 255);
        assert_eq!(saturate_cast::<u8>(2.5), 2);
        assert_eq!(saturate_cast::<u8>(3.5), 4);
        assert_eq!(saturate_cast::<u8>(f32::NAN), 0);
    }
}
