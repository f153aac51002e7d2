use std::convert::Infallible;
use std::ops::{ControlFlow, Range};

use crate::geometry::{BoundingSphere, WorldBox};
use crate::scene::bvh::BvhVisitor;
use crate::scene::faces::{FaceFlags, FaceIdx, FaceIndex};
use crate::scene::grid::CellLookup;

use super::StaticSceneRayTracer;

/// Scratch space of `get_faces`, reused between calls.
#[derive(Clone, Debug, Default)]
pub struct GetFacesContext {
    seen: Vec<u64>,
}

impl GetFacesContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&mut self, face_count: usize) {
        self.seen.clear();
        self.seen.resize(face_count.div_ceil(64), 0);
    }

    /// Marks the face as seen, returns false if it already was.
    fn insert(&mut self, face: FaceIdx) -> bool {
        let (word, bit) = (face.index() / 64, face.index() % 64);
        let mask = 1u64 << bit;
        let fresh = self.seen[word] & mask == 0;
        self.seen[word] |= mask;
        fresh
    }
}

struct FacesVisitor<'a, FI: FaceIndex> {
    tracer: &'a StaticSceneRayTracer<FI>,
    query: &'a WorldBox,
    context: &'a mut GetFacesContext,
    out: &'a mut Vec<FaceIdx>,
}

impl<FI: FaceIndex> BvhVisitor for FacesVisitor<'_, FI> {
    type Break = Infallible;

    fn enter(&mut self, sphere: &BoundingSphere) -> bool {
        sphere.intersects_box(self.query)
    }

    fn leaf(&mut self, faces: Range<u32>) -> ControlFlow<Infallible> {
        let geometry = self.tracer.geometry();
        for slot in geometry.slots(faces) {
            if FI::HAS_FLAGS && (!self.tracer.accepts(*slot) || !slot.flags().intersects(FaceFlags::CULL_BOTH)) {
                continue;
            }
            let face = slot.face();
            if geometry.face_bound(face).bounds.intersects(self.query) && self.context.insert(face) {
                self.out.push(face);
            }
        }
        ControlFlow::Continue(())
    }
}

impl<FI: FaceIndex> StaticSceneRayTracer<FI> {
    /// Appends faces whose bounding box overlaps `query` to `out`, each face once.
    /// Returns the number of faces added.
    pub fn get_faces(&self, out: &mut Vec<FaceIdx>, query: &WorldBox, context: &mut GetFacesContext) -> usize {
        let count = out.len();
        let grid = self.grid();
        let Some(cells) = grid.cell_range(query) else {
            return 0;
        };

        context.reset(self.face_count());
        let mut visitor = FacesVisitor {
            tracer: self,
            query,
            context,
            out,
        };
        for cell in cells.iter_cells() {
            if let CellLookup::Leaf(Some(root)) = grid.get_leaf(&cell) {
                let _ = self.bvh().traverse(root, &mut visitor);
            }
        }
        out.len() - count
    }
}
