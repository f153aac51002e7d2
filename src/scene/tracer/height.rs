use std::convert::Infallible;
use std::ops::{ControlFlow, Range};

use crate::geometry::{BoundingSphere, FloatType, WorldPoint};
use crate::scene::bvh::BvhVisitor;
use crate::scene::faces::{FaceIdx, FaceIndex};
use crate::scene::grid::CellLookup;

use super::{RayHit, StaticSceneRayTracer};

/// Surface found below a point.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct HeightHit {
    pub face: FaceIdx,
    pub height: FloatType,
}

/// Looks for the highest face between the point and the current minimum height.
struct HeightBelow<'a, FI: FaceIndex> {
    tracer: &'a StaticSceneRayTracer<FI>,
    point: WorldPoint,
    height: FloatType,
    face: Option<FaceIdx>,
}

impl<FI: FaceIndex> BvhVisitor for HeightBelow<'_, FI> {
    type Break = Infallible;

    fn enter(&mut self, sphere: &BoundingSphere) -> bool {
        sphere.intersects_down_ray(&self.point, self.height)
    }

    fn leaf(&mut self, faces: Range<u32>) -> ControlFlow<Infallible> {
        let geometry = self.tracer.geometry();
        for slot in geometry.slots(faces) {
            if !self.tracer.accepts(*slot) {
                continue;
            }
            let face = slot.face();
            let Some(height) = geometry.face_triangle(face).height_at(self.point.x, self.point.z) else {
                continue;
            };
            if height <= self.point.y && height >= self.height {
                self.height = height;
                self.face = Some(face);
            }
        }
        ControlFlow::Continue(())
    }
}

impl<FI: FaceIndex> StaticSceneRayTracer<FI> {
    /// Highest surface below `point` and above `min_height`.
    ///
    /// Both sides of every face count, cull flags don't apply.
    pub fn get_height_below(&self, point: &WorldPoint, min_height: FloatType) -> Option<HeightHit> {
        let bounding_box = self.scene.bounding_box();
        if point.x < bounding_box.min.x
            || point.x > bounding_box.max.x
            || point.z < bounding_box.min.z
            || point.z > bounding_box.max.z
            || point.y < bounding_box.min.y
            || min_height > bounding_box.max.y
        {
            return None;
        }

        let grid = self.grid();
        let leaf_height = grid.leaf_size().y;
        let start = WorldPoint::new(point.x, point.y.min(bounding_box.max.y), point.z);
        let end_height = min_height.max(bounding_box.min.y);

        let mut cell = grid.cell_of(&start);
        cell.y = cell.y.min(grid.leaf_limits().max.y);
        let end_cell_y = ((end_height / leaf_height).floor() as i32).max(grid.leaf_limits().min.y);

        let mut visitor = HeightBelow {
            tracer: self,
            point: start,
            height: end_height,
            face: None,
        };
        // Top of the cell that is visited next
        let mut next_cell_top = (cell.y + 1) as FloatType * leaf_height;

        while cell.y >= end_cell_y {
            match grid.get_leaf(&cell) {
                CellLookup::Leaf(root) => {
                    if let Some(root) = root {
                        let _ = self.bvh().traverse(root, &mut visitor);
                    }
                    cell.y -= 1;
                }
                CellLookup::Empty { level } => {
                    cell.y &= !((1 << level) - 1);
                    cell.y -= 1;
                }
            }
            next_cell_top = (cell.y + 1) as FloatType * leaf_height;

            if visitor.height > next_cell_top {
                break;
            }
        }

        tracing::trace!(?point, min_height, next_cell_top, found = visitor.face.is_some(), "Height query");
        visitor.face.map(|face| HeightHit {
            face,
            height: visitor.height,
        })
    }

    /// Nearest face straight below `point` within `max_t`.
    pub fn trace_down(&self, point: &WorldPoint, max_t: FloatType) -> Option<RayHit> {
        if !(max_t > 0.0) {
            return None;
        }
        let hit = self.get_height_below(point, point.y - max_t)?;
        Some(RayHit {
            face: hit.face,
            t: point.y - hit.height,
        })
    }
}
