use nalgebra::Vector3;

use crate::geometry::{CellPoint, WorldPoint, WorldVector};

/// Incremental walk through the grid cells crossed by a ray (Amanatides & Woo).
///
/// Boundary distances are kept in f64 so that long walks don't drift away from the
/// cell coordinates.
#[derive(Clone, Debug)]
pub struct WooRay3d {
    cell: CellPoint,
    step: Vector3<i32>,
    /// Distance along the ray to the next cell boundary on each axis
    t_max: Vector3<f64>,
    /// Distance along the ray between two boundaries on each axis
    t_delta: Vector3<f64>,
}

impl WooRay3d {
    pub fn new(start: &WorldPoint, direction: &WorldVector, leaf_size: &WorldVector) -> WooRay3d {
        let mut cell = CellPoint::origin();
        let mut step = Vector3::zeros();
        let mut t_max = Vector3::repeat(f64::INFINITY);
        let mut t_delta = Vector3::repeat(f64::INFINITY);

        for i in 0..3 {
            let size = leaf_size[i] as f64;
            let p = start[i] as f64;
            let d = direction[i] as f64;
            let c = (p / size).floor();
            cell[i] = c as i32;

            if d > 0.0 {
                step[i] = 1;
                t_max[i] = ((c + 1.0) * size - p) / d;
                t_delta[i] = size / d;
            } else if d < 0.0 {
                step[i] = -1;
                t_max[i] = (c * size - p) / d;
                t_delta[i] = -size / d;
            }
        }

        WooRay3d {
            cell,
            step,
            t_max,
            t_delta,
        }
    }

    pub fn current_cell(&self) -> CellPoint {
        self.cell
    }

    /// Moves to the next cell and returns the distance at which the ray enters it.
    pub fn next_cell(&mut self) -> f64 {
        let axis = if self.t_max.x < self.t_max.y {
            if self.t_max.x < self.t_max.z { 0 } else { 2 }
        } else if self.t_max.y < self.t_max.z {
            1
        } else {
            2
        };

        let t = self.t_max[axis];
        self.cell[axis] += self.step[axis];
        self.t_max[axis] += self.t_delta[axis];
        t
    }
}
