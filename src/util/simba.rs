use simba::simd::{SimdValue, WideF32x4};

use crate::geometry::{SimdFloatType, SimdMaskType, WorldVector4};

/// Number of lanes of the SIMD float type.
pub const LANES: usize = SimdFloatType::LANES;

pub fn fma_dot(a: &WorldVector4, b: &WorldVector4) -> SimdFloatType {
    WideF32x4(a.z.0.mul_add(b.z.0, a.y.0.mul_add(b.y.0, a.x.0 * b.x.0)))
}

/// Builds a SIMD mask from per-lane values.
pub fn mask_from_lanes(lanes: [bool; LANES]) -> SimdMaskType {
    let mut mask = SimdMaskType::splat(false);
    for (i, v) in lanes.into_iter().enumerate() {
        mask.replace(i, v);
    }
    mask
}

/// Bitmask of set lanes, bit i corresponds to lane i.
pub fn move_mask(mask: SimdMaskType) -> u32 {
    let lanes: wide::f32x4 = mask.0;
    lanes.move_mask() as u32
}

/// Indices of the set lanes in ascending order.
pub fn set_lanes(mask: SimdMaskType) -> impl Iterator<Item = usize> {
    let mut bits = move_mask(mask);
    std::iter::from_fn(move || {
        if bits == 0 {
            return None;
        }
        let lane = bits.trailing_zeros() as usize;
        bits &= bits - 1;
        Some(lane)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::assert;
    use proptest::{prelude::Strategy, prop_assert};
    use test_strategy::proptest;

    #[test]
    fn from_lanes() {
        assert!(move_mask(mask_from_lanes([false, true, true, false])) == 0b0110);
    }

    #[test]
    fn set_lanes_ascending() {
        let lanes: Vec<_> = set_lanes(mask_from_lanes([true, false, true, true])).collect();
        assert!(lanes == vec![0, 2, 3]);
        assert!(set_lanes(mask_from_lanes([false; LANES])).next().is_none());
    }

    fn simd_value_strategy() -> impl Strategy<Value = SimdFloatType> {
        proptest::array::uniform4(-1e3f32..1e3f32).prop_map_into()
    }

    fn world_vector4_strategy() -> impl Strategy<Value = WorldVector4> {
        (
            simd_value_strategy(),
            simd_value_strategy(),
            simd_value_strategy(),
        )
            .prop_map(|(x, y, z)| WorldVector4::new(x, y, z))
    }

    #[proptest]
    fn fma_dot_matches_nalgebra_dot(
        #[strategy(world_vector4_strategy())] a: WorldVector4,
        #[strategy(world_vector4_strategy())] b: WorldVector4,
    ) {
        let expected = a.dot(&b);
        let actual = fma_dot(&a, &b);

        // Allow slight float inaccuracy
        for i in 0..LANES {
            let e = expected.extract(i);
            let a = actual.extract(i);

            let difference = (e - a).abs();
            prop_assert!(
                difference < 1e-3 || difference < e.abs() * 1e-3,
                "Mismatch at lane {}: expected {}, got {}",
                i,
                e,
                a
            );
        }
    }
}
