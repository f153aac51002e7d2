use crate::{
    geometry::{FloatType, Ray, SimdFloatType, SimdMaskType, WorldVector4},
    util::simba::fma_dot,
};

use simba::simd::{SimdPartialOrd as _, SimdValue};

use super::{Triangle, WorldPoint, WorldPoint4};

impl Triangle<WorldPoint4> {
    /// Calculates ray intersection with the triangle pack.
    /// Lanes where `two_sided` is false only accept hits on the front face
    /// (the side the normal `(v1 - v0) x (v2 - v0)` points to).
    /// Returns mask of valid intersections and distance along ray.
    /// Adapted from https://en.wikipedia.org/wiki/M%C3%B6ller%E2%80%93Trumbore_intersection_algorithm#Rust_implementation
    pub fn intersect(&self, ray: &Ray, two_sided: SimdMaskType) -> (SimdMaskType, SimdFloatType) {
        let origin = ray.origin.map(|x| SimdFloatType::splat(x));
        let direction: WorldVector4 = ray.direction.map(|x| SimdFloatType::splat(x));

        let e1 = self[1] - self[0];
        let e2 = self[2] - self[0];

        let ray_cross_e2 = direction.cross(&e2);
        let det = fma_dot(&e1, &ray_cross_e2);

        let inv_det = SimdFloatType::ONE / det; // May be infinite
        let s = origin - self[0];
        let u = inv_det * fma_dot(&s, &ray_cross_e2);

        let s_cross_e1 = s.cross(&e1);
        let v = inv_det * fma_dot(&direction, &s_cross_e1);
        let t = inv_det * fma_dot(&e2, &s_cross_e1);

        // det > 0 <=> ray comes from the front side
        let facing = det.simd_gt(SimdFloatType::ZERO) | (two_sided & det.simd_ne(SimdFloatType::ZERO));

        let mask = facing
            & u.simd_ge(SimdFloatType::ZERO)
            & v.simd_ge(SimdFloatType::ZERO)
            & (u + v).simd_le(SimdFloatType::ONE);
        (mask, t)
    }
}

impl Triangle<WorldPoint> {
    /// Scalar counterpart of the packed intersection.
    /// Returns distance along the ray of the hit (possibly negative).
    pub fn intersect(&self, ray: &Ray, two_sided: bool) -> Option<FloatType> {
        let [e1, e2] = self.edges();

        let ray_cross_e2 = ray.direction.cross(&e2);
        let det = e1.dot(&ray_cross_e2);

        if !(det > 0.0 || (two_sided && det != 0.0)) {
            return None;
        }

        let inv_det = 1.0 / det;
        let s = ray.origin - self[0];
        let u = inv_det * s.dot(&ray_cross_e2);
        if u < 0.0 {
            return None;
        }

        let s_cross_e1 = s.cross(&e1);
        let v = inv_det * ray.direction.dot(&s_cross_e1);
        if v < 0.0 || u + v > 1.0 {
            return None;
        }

        Some(inv_det * e2.dot(&s_cross_e1))
    }
}
