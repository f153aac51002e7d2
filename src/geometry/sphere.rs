use std::borrow::Borrow;

use super::{FloatType, Ray, WorldBox, WorldPoint};

/// Sphere bounding a BVH node, stored with squared radius.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BoundingSphere {
    pub center: WorldPoint,
    pub radius_squared: FloatType,
}

impl BoundingSphere {
    pub fn new(center: WorldPoint, radius_squared: FloatType) -> BoundingSphere {
        BoundingSphere {
            center,
            radius_squared,
        }
    }

    /// Sphere centered in the bounding box of the points, enclosing all of them.
    /// Returns None for empty input.
    pub fn from_points<P: Borrow<WorldPoint>>(
        points: impl IntoIterator<Item = P> + Clone,
    ) -> Option<BoundingSphere> {
        let center = WorldBox::from_points(points.clone())?.center();
        let radius_squared = points
            .into_iter()
            .map(|p| (p.borrow() - center).norm_squared())
            .fold(0.0, FloatType::max);
        Some(BoundingSphere {
            center,
            radius_squared,
        })
    }

    /// Tests whether the ray segment [0, max_t] touches the sphere.
    pub fn intersects_ray(&self, ray: &Ray, max_t: FloatType) -> bool {
        let oc = self.center - ray.origin;
        let c = oc.norm_squared() - self.radius_squared;
        if c <= 0.0 {
            // Origin inside
            return true;
        }
        let b = oc.dot(&ray.direction);
        if b < 0.0 {
            return false;
        }
        let discriminant = b * b - c;
        if discriminant < 0.0 {
            return false;
        }
        b - discriminant.sqrt() <= max_t
    }

    /// Tests whether the vertical segment going down from `p` to height `min_height`
    /// touches the sphere.
    pub fn intersects_down_ray(&self, p: &WorldPoint, min_height: FloatType) -> bool {
        let pc = self.center - p;
        let c = pc.norm_squared() - self.radius_squared;
        if c < 0.0 {
            return true;
        }
        if pc.y > 0.0 {
            return false;
        }
        let d = pc.y * pc.y - c;
        if d < 0.0 {
            return false;
        }
        let s = d.sqrt();
        self.center.y - s <= p.y && self.center.y + s >= min_height
    }

    pub fn intersects_box(&self, b: &WorldBox) -> bool {
        b.distance_squared(&self.center) <= self.radius_squared
    }

    pub fn bounding_box(&self) -> WorldBox {
        WorldBox::new(self.center, self.center).inflated(self.radius_squared.sqrt())
    }
}
