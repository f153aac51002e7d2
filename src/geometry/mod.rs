mod aabb;
mod capsule;
mod ray_box_intersection;
mod ray_triangle_intersection;
mod sphere;
mod triangle;

pub use aabb::AABB;
pub use capsule::{Capsule, CapsuleTriangleClip};
pub use ray_box_intersection::RayIntersectionExt;
pub use sphere::BoundingSphere;
pub use triangle::Triangle;

use nalgebra::{Point3, Vector3};
use simba::simd::{WideBoolF32x4, WideF32x4};

pub type FloatType = f32;
pub type SimdFloatType = WideF32x4;
pub type SimdMaskType = WideBoolF32x4;

pub const EPSILON: FloatType = 1e-6;

pub type WorldPoint = Point3<FloatType>;
pub type WorldVector = Vector3<FloatType>;
pub type WorldBox = AABB<WorldPoint>;
pub type WorldPoint4 = Point3<SimdFloatType>;
pub type WorldVector4 = Vector3<SimdFloatType>;

/// Integer coordinates of a grid cell.
pub type CellPoint = Point3<i32>;
/// Inclusive range of grid cells.
pub type CellBox = AABB<CellPoint>;

#[derive(Copy, Clone, Debug)]
pub struct Ray {
    pub origin: WorldPoint,
    /// Normalized direction of the ray
    pub direction: WorldVector,

    /// Componentwise inverse of the ray direction
    /// Zeros in direction get turned into positive infinity regardless of the sign of the zero
    pub inv_direction: WorldVector,
}

impl Ray {
    /// Creates a ray, normalizing the direction.
    /// Direction must not be zero.
    pub fn new(origin: WorldPoint, direction: WorldVector) -> Ray {
        let direction = direction.normalize();
        let inv_direction = direction.map(|x| if x == 0.0 { f32::INFINITY } else { 1.0 / x });

        Ray {
            origin,
            direction,
            inv_direction,
        }
    }

    /// Creates a ray and returns it together with the length of the original direction vector.
    /// Returns None for zero length directions.
    pub fn try_new(origin: WorldPoint, direction: WorldVector) -> Option<(Ray, FloatType)> {
        let length_squared = direction.norm_squared();
        if length_squared == 0.0 || !length_squared.is_finite() {
            return None;
        }
        Some((Ray::new(origin, direction), length_squared.sqrt()))
    }

    pub fn point_at(&self, distance: FloatType) -> WorldPoint {
        self.origin + self.direction * distance
    }

    /// Returns the same ray with origin moved `distance` forward.
    pub fn advanced(&self, distance: FloatType) -> Ray {
        Ray {
            origin: self.point_at(distance),
            ..*self
        }
    }
}
