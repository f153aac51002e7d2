//! Queries against a loaded scene.

mod batch;
mod capsule;
mod faces;
mod height;
mod ray;

use std::ops::ControlFlow;
use std::sync::Arc;

use crate::geometry::{CellPoint, FloatType, Ray, RayIntersectionExt as _, WorldBox};

use super::bvh::{Bvh, NodeIdx};
use super::dump::{DumpError, SceneDump};
use super::faces::{FaceFlags, FaceIndex, WideFaceIndex};
use super::geometry_store::GeometryStore;
use super::grid::{CellLookup, SparseGrid};
use super::woo::WooRay3d;

pub use capsule::CapsuleClip;
pub use faces::GetFacesContext;
pub use height::HeightHit;
pub use ray::RayHit;

/// Rays starting outside of the scene box start this fraction of the way to the box entry point.
const ENTRY_NUDGE: FloatType = 0.9999;

/// Ray, height, capsule and box queries over a static scene.
///
/// The scene itself is shared and immutable, each tracer keeps its own filter flags.
#[derive(Clone, Debug)]
pub struct StaticSceneRayTracer<FI: FaceIndex> {
    scene: Arc<SceneDump<FI>>,
    skip_flags: FaceFlags,
    use_flags: FaceFlags,
    cull_flags: FaceFlags,
}

/// Tracer over faces with 24 bit indices and per-face flags.
pub type WideSceneRayTracer = StaticSceneRayTracer<WideFaceIndex>;
/// Tracer over faces with 16 bit indices and no flags.
pub type NarrowSceneRayTracer = StaticSceneRayTracer<u16>;

impl<FI: FaceIndex> StaticSceneRayTracer<FI> {
    pub fn new(scene: impl Into<Arc<SceneDump<FI>>>) -> Self {
        let scene = scene.into();
        StaticSceneRayTracer {
            skip_flags: scene.default_skip_flags(),
            use_flags: scene.default_use_flags(),
            cull_flags: FaceFlags::empty(),
            scene,
        }
    }

    /// Loads a dump in either layout.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DumpError> {
        Ok(Self::new(SceneDump::from_bytes(bytes)?))
    }

    pub fn scene(&self) -> &Arc<SceneDump<FI>> {
        &self.scene
    }

    pub fn bounding_box(&self) -> &WorldBox {
        self.scene.bounding_box()
    }

    pub fn face_count(&self) -> usize {
        self.scene.geometry().face_count()
    }

    /// Faces having any of these flags are ignored.
    pub fn skip_flags(&self) -> FaceFlags {
        self.skip_flags
    }

    pub fn set_skip_flags(&mut self, flags: FaceFlags) {
        self.skip_flags = flags;
    }

    /// Faces must have at least one of these flags to be considered.
    pub fn use_flags(&self) -> FaceFlags {
        self.use_flags
    }

    pub fn set_use_flags(&mut self, flags: FaceFlags) {
        self.use_flags = flags;
    }

    /// Cull bits added to every face's own for ray queries and capsule clipping.
    pub fn cull_flags(&self) -> FaceFlags {
        self.cull_flags
    }

    pub fn set_cull_flags(&mut self, flags: FaceFlags) {
        self.cull_flags = flags;
    }

    fn geometry(&self) -> &GeometryStore<FI> {
        self.scene.geometry()
    }

    fn bvh(&self) -> &Bvh {
        self.scene.bvh()
    }

    fn grid(&self) -> &SparseGrid {
        self.scene.grid()
    }

    /// Skip/use filtering, flagless faces always pass.
    fn accepts(&self, slot: FI) -> bool {
        if !FI::HAS_FLAGS {
            return true;
        }
        let flags = slot.flags();
        !flags.intersects(self.skip_flags) && flags.intersects(self.use_flags)
    }

    /// Sides of the face that collide, faces without any cull bit collide from the front.
    fn collision_sides(&self, slot: FI) -> FaceFlags {
        let sides = (slot.flags() | self.cull_flags) & FaceFlags::CULL_BOTH;
        if sides.is_empty() { FaceFlags::CULL_CCW } else { sides }
    }

    /// Walks the grid cells along the ray segment [0, max_t] and calls `visit` for every cell
    /// that has a BVH.
    ///
    /// `visit` gets the cell's BVH root, the ray moved to the walk start, distance of the
    /// walk start from the original origin, and the remaining length of the segment from the
    /// walk start. It may shorten the remaining length, the walk stops once the next cell lies
    /// beyond it or beyond the scene box.
    fn walk_cells<B>(
        &self,
        ray: &Ray,
        max_t: FloatType,
        mut visit: impl FnMut(NodeIdx, &Ray, FloatType, &mut FloatType) -> ControlFlow<B>,
    ) -> ControlFlow<B> {
        if !(max_t > 0.0) {
            return ControlFlow::Continue(());
        }

        let grid = self.grid();
        let bounding_box = self.scene.bounding_box();

        let Some(entry) = bounding_box.entry_distance(ray, max_t) else {
            return ControlFlow::Continue(());
        };
        let start = if bounding_box.contains_point(&ray.origin) { 0.0 } else { entry * ENTRY_NUDGE };

        // The walk ends one cell diagonal past the box exit, faces lying on the exit plane
        // may be binned only into the cell beyond it
        let (_, exit) = bounding_box.intersect(ray);
        let walk_end = max_t.min(exit + grid.leaf_size().norm());
        let end_cell = grid.cell_of(&ray.point_at(walk_end));

        let local_ray = ray.advanced(start);
        let walk_remaining = walk_end - start;
        let mut remaining = max_t - start;

        let mut woo = WooRay3d::new(&local_ray.origin, &local_ray.direction, grid.leaf_size());
        let steps = cell_distance(&woo.current_cell(), &end_cell) * 4 + 1;

        for _ in 0..steps {
            let cell = woo.current_cell();
            let mut empty_level = 0;
            if grid.leaf_limits().contains_cell(&cell) {
                match grid.get_leaf(&cell) {
                    CellLookup::Leaf(Some(root)) => visit(root, &local_ray, start, &mut remaining)?,
                    CellLookup::Leaf(None) => {}
                    CellLookup::Empty { level } => empty_level = level,
                }
            }

            // Steps through the rest of an empty block at once
            loop {
                if (remaining.min(walk_remaining) as f64) < woo.next_cell() {
                    return ControlFlow::Continue(());
                }
                if empty_level == 0 || !same_block(&woo.current_cell(), &cell, empty_level) {
                    break;
                }
            }
        }

        ControlFlow::Continue(())
    }
}

/// Manhattan distance between two cells.
fn cell_distance(a: &CellPoint, b: &CellPoint) -> u64 {
    (0..3).map(|i| (a[i] as i64 - b[i] as i64).unsigned_abs()).sum()
}

fn same_block(a: &CellPoint, b: &CellPoint, level: u32) -> bool {
    (0..3).all(|i| a[i] >> level == b[i] >> level)
}
