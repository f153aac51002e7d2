use std::ops::{ControlFlow, Range};

use arrayvec::ArrayVec;
use simba::simd::{SimdPartialOrd as _, SimdValue as _};

use crate::geometry::{FloatType, Ray, SimdFloatType, Triangle, WorldPoint, WorldPoint4};
use crate::scene::faces::{FaceFlags, FaceIdx, FaceIndex};
use crate::scene::geometry_store::GeometryStore;
use crate::util::simba::{LANES, mask_from_lanes, set_lanes};

use super::StaticSceneRayTracer;

/// Ray hits of one batch, (face, distance).
pub type BatchHits = ArrayVec<(FaceIdx, FloatType), LANES>;

/// Up to `LANES` faces that passed filtering, intersected together.
#[derive(Clone, Debug, Default)]
pub struct FaceBatch {
    faces: ArrayVec<(FaceIdx, FaceFlags), LANES>,
}

impl FaceBatch {
    pub fn is_full(&self) -> bool {
        self.faces.is_full()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn clear(&mut self) {
        self.faces.clear();
    }

    /// Adds a face with the sides that collide, `sides` must not be empty.
    pub fn push(&mut self, face: FaceIdx, sides: FaceFlags) {
        debug_assert!(sides.intersects(FaceFlags::CULL_BOTH));
        self.faces.push((face, sides));
    }

    /// Triangle oriented so that its front side is a colliding side.
    fn oriented_triangle<FI: FaceIndex>(
        geometry: &GeometryStore<FI>,
        face: FaceIdx,
        sides: FaceFlags,
    ) -> Triangle<WorldPoint> {
        let triangle = geometry.face_triangle(face);
        if sides.contains(FaceFlags::CULL_CCW) {
            triangle
        } else {
            Triangle::new(triangle[0], triangle[2], triangle[1])
        }
    }

    /// Intersects the batch with the ray, returns hits with distance in [0, max_t].
    pub fn intersect<FI: FaceIndex>(&self, geometry: &GeometryStore<FI>, ray: &Ray, max_t: FloatType) -> BatchHits {
        let mut hits = BatchHits::new();

        if let Ok(lanes) = <[(FaceIdx, FaceFlags); LANES]>::try_from(self.faces.as_slice()) {
            let triangles = lanes.map(|(face, sides)| Self::oriented_triangle(geometry, face, sides));
            let packed = Triangle::<WorldPoint4>::from_lanes(triangles.each_ref());
            let two_sided = mask_from_lanes(lanes.map(|(_, sides)| sides.contains(FaceFlags::CULL_BOTH)));

            let (mask, t) = packed.intersect(ray, two_sided);
            let mask = mask & t.simd_ge(SimdFloatType::ZERO) & t.simd_le(SimdFloatType::splat(max_t));
            for i in set_lanes(mask) {
                hits.push((lanes[i].0, t.extract(i)));
            }
        } else {
            for (face, sides) in &self.faces {
                let triangle = Self::oriented_triangle(geometry, *face, *sides);
                if let Some(t) = triangle.intersect(ray, sides.contains(FaceFlags::CULL_BOTH)) {
                    if (0.0..=max_t).contains(&t) {
                        hits.push((*face, t));
                    }
                }
            }
        }

        hits
    }
}

impl<FI: FaceIndex> StaticSceneRayTracer<FI> {
    /// Filters the faces of a leaf for a ray query and hands them to `f` in batches.
    /// Full batches come first, the remainder is passed as a partial batch at the end.
    pub(super) fn for_each_ray_batch<B>(
        &self,
        faces: Range<u32>,
        ignore_face: Option<FaceIdx>,
        mut f: impl FnMut(&FaceBatch) -> ControlFlow<B>,
    ) -> ControlFlow<B> {
        let mut batch = FaceBatch::default();
        for slot in self.geometry().slots(faces) {
            if !self.accepts(*slot) {
                continue;
            }
            let face = slot.face();
            if Some(face) == ignore_face {
                continue;
            }

            batch.push(face, self.collision_sides(*slot));
            if batch.is_full() {
                f(&batch)?;
                batch.clear();
            }
        }

        if !batch.is_empty() {
            f(&batch)?;
        }
        ControlFlow::Continue(())
    }
}
