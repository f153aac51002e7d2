use std::convert::Infallible;
use std::ops::{ControlFlow, Range};

use itertools::Itertools as _;

use crate::geometry::{BoundingSphere, FloatType, Ray, WorldPoint, WorldVector};
use crate::scene::bvh::BvhVisitor;
use crate::scene::faces::{FaceIdx, FaceIndex};

use super::StaticSceneRayTracer;

/// Face hit by a ray and the distance along the ray.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RayHit {
    pub face: FaceIdx,
    pub t: FloatType,
}

struct NearestHit<'a, FI: FaceIndex> {
    tracer: &'a StaticSceneRayTracer<FI>,
    ray: &'a Ray,
    ignore_face: Option<FaceIdx>,
    max_t: FloatType,
    face: Option<FaceIdx>,
}

impl<FI: FaceIndex> BvhVisitor for NearestHit<'_, FI> {
    type Break = Infallible;

    fn enter(&mut self, sphere: &BoundingSphere) -> bool {
        sphere.intersects_ray(self.ray, self.max_t)
    }

    fn leaf(&mut self, faces: Range<u32>) -> ControlFlow<Infallible> {
        let tracer = self.tracer;
        let ray = self.ray;
        tracer.for_each_ray_batch(faces, self.ignore_face, |batch| {
            for (face, t) in batch.intersect(tracer.geometry(), ray, self.max_t) {
                if t <= self.max_t {
                    self.max_t = t;
                    self.face = Some(face);
                }
            }
            ControlFlow::Continue(())
        })
    }
}

struct AnyHit<'a, FI: FaceIndex> {
    tracer: &'a StaticSceneRayTracer<FI>,
    ray: &'a Ray,
    ignore_face: Option<FaceIdx>,
    max_t: FloatType,
}

impl<FI: FaceIndex> BvhVisitor for AnyHit<'_, FI> {
    type Break = FaceIdx;

    fn enter(&mut self, sphere: &BoundingSphere) -> bool {
        sphere.intersects_ray(self.ray, self.max_t)
    }

    fn leaf(&mut self, faces: Range<u32>) -> ControlFlow<FaceIdx> {
        self.tracer.for_each_ray_batch(faces, self.ignore_face, |batch| {
            match batch.intersect(self.tracer.geometry(), self.ray, self.max_t).first() {
                Some((face, _)) => ControlFlow::Break(*face),
                None => ControlFlow::Continue(()),
            }
        })
    }
}

struct AllHits<'a, FI: FaceIndex> {
    tracer: &'a StaticSceneRayTracer<FI>,
    ray: &'a Ray,
    max_t: FloatType,
    /// Distance of the local ray's origin from the query origin
    start: FloatType,
    hits: Vec<RayHit>,
}

impl<FI: FaceIndex> BvhVisitor for AllHits<'_, FI> {
    type Break = Infallible;

    fn enter(&mut self, sphere: &BoundingSphere) -> bool {
        sphere.intersects_ray(self.ray, self.max_t)
    }

    fn leaf(&mut self, faces: Range<u32>) -> ControlFlow<Infallible> {
        let tracer = self.tracer;
        tracer.for_each_ray_batch(faces, None, |batch| {
            let hits = batch.intersect(tracer.geometry(), self.ray, self.max_t);
            self.hits.extend(hits.into_iter().map(|(face, t)| RayHit {
                face,
                t: self.start + t,
            }));
            ControlFlow::Continue(())
        })
    }
}

impl<FI: FaceIndex> StaticSceneRayTracer<FI> {
    /// Nearest face hit by the ray within `max_t`.
    /// Distances are measured in units of the direction vector's length.
    pub fn trace_ray(
        &self,
        origin: &WorldPoint,
        direction: &WorldVector,
        max_t: FloatType,
        ignore_face: Option<FaceIdx>,
    ) -> Option<RayHit> {
        let (ray, length) = Ray::try_new(*origin, *direction)?;
        let hit = self.trace_ray_normalized(&ray, max_t * length, ignore_face)?;
        Some(RayHit {
            t: hit.t / length,
            ..hit
        })
    }

    /// Nearest face hit by the ray within `max_t`.
    pub fn trace_ray_normalized(&self, ray: &Ray, max_t: FloatType, ignore_face: Option<FaceIdx>) -> Option<RayHit> {
        let mut result = None;
        let _ = self.walk_cells::<Infallible>(ray, max_t, |root, local_ray, start, remaining| {
            let mut visitor = NearestHit {
                tracer: self,
                ray: local_ray,
                ignore_face,
                max_t: *remaining,
                face: None,
            };
            let _ = self.bvh().traverse(root, &mut visitor);
            if let Some(face) = visitor.face {
                *remaining = visitor.max_t;
                result = Some(RayHit {
                    face,
                    t: start + visitor.max_t,
                });
            }
            ControlFlow::Continue(())
        });
        result
    }

    /// Tests whether the ray hits any face within `max_t`.
    pub fn ray_hit(
        &self,
        origin: &WorldPoint,
        direction: &WorldVector,
        max_t: FloatType,
        ignore_face: Option<FaceIdx>,
    ) -> bool {
        self.ray_hit_face(origin, direction, max_t, ignore_face).is_some()
    }

    /// Some face hit by the ray within `max_t`, not necessarily the nearest one.
    pub fn ray_hit_face(
        &self,
        origin: &WorldPoint,
        direction: &WorldVector,
        max_t: FloatType,
        ignore_face: Option<FaceIdx>,
    ) -> Option<FaceIdx> {
        let (ray, length) = Ray::try_new(*origin, *direction)?;
        let found = self.walk_cells(&ray, max_t * length, |root, local_ray, _, remaining| {
            let mut visitor = AnyHit {
                tracer: self,
                ray: local_ray,
                ignore_face,
                max_t: *remaining,
            };
            self.bvh().traverse(root, &mut visitor)
        });
        found.break_value()
    }

    /// Appends all faces hit by the ray within `max_t` to `out`, each face once, in no
    /// particular order. Returns true if anything was hit.
    pub fn trace_ray_all(
        &self,
        origin: &WorldPoint,
        direction: &WorldVector,
        max_t: FloatType,
        out: &mut Vec<RayHit>,
    ) -> bool {
        let Some((ray, length)) = Ray::try_new(*origin, *direction) else {
            return false;
        };

        let mut hits = Vec::new();
        let _ = self.walk_cells::<Infallible>(&ray, max_t * length, |root, local_ray, start, remaining| {
            let mut visitor = AllHits {
                tracer: self,
                ray: local_ray,
                max_t: *remaining,
                start,
                hits: std::mem::take(&mut hits),
            };
            let _ = self.bvh().traverse(root, &mut visitor);
            hits = visitor.hits;
            ControlFlow::Continue(())
        });

        let count = out.len();
        out.extend(hits.into_iter().unique_by(|hit| hit.face).map(|hit| RayHit {
            t: hit.t / length,
            ..hit
        }));
        out.len() > count
    }
}
