use std::ops::{Index, Sub};

use nalgebra::{
    ClosedAddAssign, ClosedMulAssign, ClosedSubAssign, DefaultAllocator, DimName, OPoint,
    OVector, Scalar, allocator::Allocator,
};
use simba::simd::SimdValue;

use super::{EPSILON, FloatType, SimdFloatType, WorldBox, WorldPoint, WorldPoint4};

#[derive(Clone, Debug, PartialEq)]
pub struct Triangle<Point>([Point; 3]);

impl<Point> Triangle<Point> {
    pub fn new(a: Point, b: Point, c: Point) -> Triangle<Point> {
        Triangle([a, b, c])
    }

    pub fn iter<'a>(&'a self) -> impl Iterator<Item = &'a Point> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        3
    }

    pub fn map<Point2, F: FnMut(&Point) -> Point2>(&self, mut f: F) -> Triangle<Point2> {
        Triangle([f(&self[0]), f(&self[1]), f(&self[2])])
    }
}

impl<Point> Index<usize> for Triangle<Point> {
    type Output = Point;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl<T: Scalar, D: DimName> Triangle<OPoint<T, D>>
where
    DefaultAllocator: Allocator<D>,
{
    pub fn map_coords<T2: Scalar, F: FnMut(T) -> T2>(&self, mut f: F) -> Triangle<OPoint<T2, D>> {
        self.map(|x| x.map(&mut f))
    }
}

impl<T: Scalar, D: DimName> Triangle<OPoint<T, D>>
where
    DefaultAllocator: Allocator<D>,
    for<'a> &'a OPoint<T, D>: Sub<Output = OVector<T, D>>,
{
    /// Returns edge vectors, coming from self[0]
    pub fn edges(&self) -> [OVector<T, D>; 2] {
        [&self.0[1] - &self.0[0], &self.0[2] - &self.0[0]]
    }
}

impl<T: Scalar, D: DimName> Triangle<OPoint<T, D>>
where
    DefaultAllocator: Allocator<D>,
    for<'a> &'a OPoint<T, D>: Sub<Output = OVector<T, D>>,
    T: ClosedAddAssign + ClosedSubAssign + ClosedMulAssign,
{
    /// Returns a normal vector of the triangle, not normalized.
    pub fn normal(&self) -> OVector<T, D> {
        let [e1, e2] = self.edges();
        e1.cross(&e2)
    }
}

impl Triangle<WorldPoint> {
    pub fn bounding_box(&self) -> WorldBox {
        let mut ret = WorldBox::new(self[0], self[0]);
        ret.add_point(&self[1]);
        ret.add_point(&self[2]);
        ret
    }

    /// Height (y) of the triangle plane above point (x, z), if the point projects inside
    /// the triangle along the vertical axis. Both windings are accepted.
    pub fn height_at(&self, x: FloatType, z: FloatType) -> Option<FloatType> {
        let [e1, e2] = self.edges();
        let det = e1.x * e2.z - e1.z * e2.x;
        if det.abs() < EPSILON {
            // Vertical triangle
            return None;
        }
        let inv_det = 1.0 / det;
        let dx = x - self[0].x;
        let dz = z - self[0].z;
        let u = (dx * e2.z - dz * e2.x) * inv_det;
        let v = (e1.x * dz - e1.z * dx) * inv_det;
        if u < 0.0 || v < 0.0 || u + v > 1.0 {
            return None;
        }
        Some(self[0].y + u * e1.y + v * e2.y)
    }
}

impl Triangle<WorldPoint4> {
    /// Packs four triangles into one SIMD triangle, one per lane.
    pub fn from_lanes(triangles: [&Triangle<WorldPoint>; 4]) -> Triangle<WorldPoint4> {
        let vertex = |v: usize| {
            let coord = |c: usize| {
                SimdFloatType::from([
                    triangles[0][v][c],
                    triangles[1][v][c],
                    triangles[2][v][c],
                    triangles[3][v][c],
                ])
            };
            WorldPoint4::new(coord(0), coord(1), coord(2))
        };
        Triangle::new(vertex(0), vertex(1), vertex(2))
    }

    pub fn extract(&self, lane: usize) -> Triangle<WorldPoint> {
        self.map_coords(|x| x.extract(lane))
    }
}
