use std::convert::Infallible;
use std::ops::{ControlFlow, Range};

use crate::geometry::{BoundingSphere, Capsule, FloatType, WorldBox, WorldPoint, WorldVector};
use crate::scene::bvh::BvhVisitor;
use crate::scene::faces::{FaceFlags, FaceIdx, FaceIndex};
use crate::scene::grid::CellLookup;

use super::StaticSceneRayTracer;

/// Faces whose normal is this close to perpendicular to the movement are never culled.
const DIRECTION_CULL_THRESHOLD: FloatType = 0.001;

/// Deepest penetration of a capsule into the scene.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CapsuleClip {
    /// Penetration depth, always negative
    pub depth: FloatType,
    pub capsule_point: WorldPoint,
    pub face_point: WorldPoint,
    pub face: FaceIdx,
}

struct CapsuleVisitor<'a, FI: FaceIndex> {
    tracer: &'a StaticSceneRayTracer<FI>,
    capsule: &'a Capsule,
    capsule_box: WorldBox,
    move_dir: &'a WorldVector,
    best: Option<CapsuleClip>,
}

impl<FI: FaceIndex> CapsuleVisitor<'_, FI> {
    /// Faces moving away from their only colliding side can't be entered.
    fn culled(&self, sides: FaceFlags, normal: &WorldVector) -> bool {
        let d = normal.dot(self.move_dir);
        (!sides.contains(FaceFlags::CULL_CW) && d > DIRECTION_CULL_THRESHOLD)
            || (!sides.contains(FaceFlags::CULL_CCW) && d < -DIRECTION_CULL_THRESHOLD)
    }
}

impl<FI: FaceIndex> BvhVisitor for CapsuleVisitor<'_, FI> {
    type Break = Infallible;

    fn enter(&mut self, sphere: &BoundingSphere) -> bool {
        sphere.intersects_box(&self.capsule_box)
    }

    fn leaf(&mut self, faces: Range<u32>) -> ControlFlow<Infallible> {
        let geometry = self.tracer.geometry();
        for slot in geometry.slots(faces) {
            if !self.tracer.accepts(*slot) {
                continue;
            }
            let face = slot.face();
            let bound = geometry.face_bound(face);
            if self.culled(self.tracer.collision_sides(*slot), &bound.normal) {
                continue;
            }

            let Some(clip) = self.capsule.clip_triangle(&geometry.face_triangle(face), &bound.normal) else {
                continue;
            };
            let best_depth = self.best.map_or(0.0, |best| best.depth);
            if clip.depth < best_depth {
                self.best = Some(CapsuleClip {
                    depth: clip.depth,
                    capsule_point: clip.capsule_point,
                    face_point: clip.triangle_point,
                    face,
                });
            }
        }
        ControlFlow::Continue(())
    }
}

impl<FI: FaceIndex> StaticSceneRayTracer<FI> {
    /// Deepest penetration of the capsule into faces that it could be moving into.
    pub fn clip_capsule(&self, capsule: &Capsule, move_dir: &WorldVector) -> Option<CapsuleClip> {
        let capsule_box = capsule.bounding_box();
        if !capsule_box.intersects(self.scene.bounding_box()) {
            return None;
        }

        let grid = self.grid();
        let cells = grid.cell_range(&capsule_box)?;
        let mut visitor = CapsuleVisitor {
            tracer: self,
            capsule,
            capsule_box,
            move_dir,
            best: None,
        };
        for cell in cells.iter_cells() {
            if let CellLookup::Leaf(Some(root)) = grid.get_leaf(&cell) {
                let _ = self.bvh().traverse(root, &mut visitor);
            }
        }
        visitor.best
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use assert2::{check, let_assert};
    use test_case::test_case;

    use crate::scene::faces::WideFaceIndex;
    use crate::scene::test_scenes;
    use crate::scene::tracer::WideSceneRayTracer;

    fn tracer() -> WideSceneRayTracer {
        WideSceneRayTracer::new(test_scenes::stacked_triangles::<WideFaceIndex>())
    }

    fn upright(x: FloatType, bottom: FloatType, z: FloatType) -> Capsule {
        Capsule::new(
            WorldPoint::new(x, bottom + 0.5, z),
            WorldPoint::new(x, bottom + 1.5, z),
            0.5,
        )
    }

    #[test]
    fn standing_on_upper_face() {
        let tracer = tracer();
        let capsule = upright(0.5, 2.8, 0.5);
        let_assert!(Some(clip) = tracer.clip_capsule(&capsule, &WorldVector::new(0.0, -1.0, 0.0)));
        check!(clip.face == FaceIdx::from_raw(1));
        check!((clip.depth + 0.2).abs() < 1e-5);
        check!((clip.face_point - WorldPoint::new(0.5, 3.0, 0.5)).norm() < 1e-5);
        check!((clip.capsule_point - WorldPoint::new(0.5, 2.8, 0.5)).norm() < 1e-5);
    }

    #[test]
    fn deepest_face_wins() {
        let tracer = tracer();
        // Long capsule touching both faces, the lower one deeper
        let capsule = Capsule::new(WorldPoint::new(0.5, 0.7, 0.5), WorldPoint::new(0.5, 2.6, 0.5), 0.5);
        let_assert!(Some(clip) = tracer.clip_capsule(&capsule, &WorldVector::zeros()));
        check!(clip.face == FaceIdx::from_raw(0));
        check!((clip.depth + 0.8).abs() < 1e-5);
    }

    #[test_case(0.0, 1.0, 0.0, false ; "moving away from the front")]
    #[test_case(0.0, -1.0, 0.0, true ; "moving into the front")]
    #[test_case(1.0, 0.0, 0.0, true ; "moving sideways")]
    #[test_case(0.0, 0.0005, 0.0, true ; "within threshold")]
    fn direction_culling(x: FloatType, y: FloatType, z: FloatType, expected: bool) {
        let tracer = WideSceneRayTracer::new(test_scenes::stacked_triangles_with_flags::<WideFaceIndex>(
            FaceFlags::CULL_CCW,
        ));
        let capsule = upright(0.5, 2.8, 0.5);
        let clip = tracer.clip_capsule(&capsule, &WorldVector::new(x, y, z));
        check!(clip.map(|c| c.face == FaceIdx::from_raw(1)).unwrap_or(false) == expected);
    }

    #[test]
    fn no_contact() {
        let tracer = tracer();
        check!(tracer.clip_capsule(&upright(0.5, 3.5, 0.5), &WorldVector::zeros()) == None);
        let between = Capsule::new(WorldPoint::new(0.5, 1.8, 0.5), WorldPoint::new(0.5, 2.2, 0.5), 0.3);
        check!(tracer.clip_capsule(&between, &WorldVector::zeros()) == None);
    }

    #[test]
    fn outside_scene_box() {
        let tracer = tracer();
        check!(tracer.clip_capsule(&upright(100.0, 2.8, 0.5), &WorldVector::zeros()) == None);
        check!(tracer.clip_capsule(&upright(0.5, -100.0, 0.5), &WorldVector::zeros()) == None);
    }

    #[test]
    fn skipped_faces_ignored() {
        let tracer = WideSceneRayTracer::new(test_scenes::stacked_triangles_with_flags::<WideFaceIndex>(
            FaceFlags::CULL_BOTH | FaceFlags::USER_INVISIBLE,
        ));
        check!(tracer.clip_capsule(&upright(0.5, 2.8, 0.5), &WorldVector::zeros()) == None);
    }
}
