use std::borrow::Borrow;
use std::ops::Sub;

use nalgebra::{
    ClosedAddAssign, ClosedDivAssign, DefaultAllocator, DimName, OPoint, Point, Scalar,
    allocator::Allocator,
};
use num_traits::One;

use super::{CellBox, CellPoint, FloatType, WorldBox, WorldPoint, WorldVector};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AABB<Point> {
    pub min: Point,
    pub max: Point,
}

impl<Point> AABB<Point> {
    pub fn new(min: Point, max: Point) -> AABB<Point> {
        AABB { min, max }
    }

    pub fn map<Point2, F: FnMut(&Point) -> Point2>(&self, mut f: F) -> AABB<Point2> {
        AABB {
            min: f(&self.min),
            max: f(&self.max),
        }
    }

    pub fn zip_map<Point2, Point3, F: FnMut(&Point, &Point2) -> Point3>(
        &self,
        rhs: &AABB<Point2>,
        mut f: F,
    ) -> AABB<Point3> {
        AABB {
            min: f(&self.min, &rhs.min),
            max: f(&self.max, &rhs.max),
        }
    }
}

impl<T: Scalar, D: DimName> AABB<OPoint<T, D>>
where
    DefaultAllocator: Allocator<D>,
{
    pub fn map_coords<T2: Scalar, F: FnMut(T) -> T2>(&self, mut f: F) -> AABB<OPoint<T2, D>> {
        self.map(|x| x.map(&mut f))
    }
}

impl<Point: Sub + Copy> AABB<Point> {
    pub fn size(&self) -> Point::Output {
        self.max - self.min
    }
}

impl<T: Scalar + ClosedAddAssign + ClosedDivAssign + One, const D: usize> AABB<Point<T, D>> {
    pub fn center(&self) -> Point<T, D> {
        let two = T::one() + T::one();
        let avg_coords = (&self.min.coords + &self.max.coords) / two;
        Point::from(avg_coords)
    }
}

impl<Point> From<[Point; 2]> for AABB<Point> {
    fn from(value: [Point; 2]) -> Self {
        let [min, max] = value;
        AABB { min, max }
    }
}

impl<Point> From<(Point, Point)> for AABB<Point> {
    fn from(value: (Point, Point)) -> Self {
        let (min, max) = value;
        AABB { min, max }
    }
}

impl WorldBox {
    /// Box that contains nothing, adding a point to it produces a box containing only that point.
    pub fn empty() -> WorldBox {
        AABB {
            min: WorldPoint::from(WorldVector::repeat(FloatType::INFINITY)),
            max: WorldPoint::from(WorldVector::repeat(FloatType::NEG_INFINITY)),
        }
    }

    /// Returns the smallest box containing all the points, or None if the iterator is empty.
    pub fn from_points(points: impl IntoIterator<Item = impl Borrow<WorldPoint>>) -> Option<WorldBox> {
        let mut ret = WorldBox::empty();
        for p in points {
            ret.add_point(p.borrow());
        }
        if ret.is_empty() { None } else { Some(ret) }
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn add_point(&mut self, p: &WorldPoint) {
        self.min = self.min.inf(p);
        self.max = self.max.sup(p);
    }

    pub fn add_box(&mut self, other: &WorldBox) {
        self.min = self.min.inf(&other.min);
        self.max = self.max.sup(&other.max);
    }

    /// Returns the box grown by `amount` in every direction.
    pub fn inflated(&self, amount: FloatType) -> WorldBox {
        let v = WorldVector::repeat(amount);
        AABB {
            min: self.min - v,
            max: self.max + v,
        }
    }

    /// Point containment test, boundary is inside.
    pub fn contains_point(&self, p: &WorldPoint) -> bool {
        (0..3).all(|i| p[i] >= self.min[i] && p[i] <= self.max[i])
    }

    /// Overlap test, touching boxes overlap.
    pub fn intersects(&self, other: &WorldBox) -> bool {
        (0..3).all(|i| self.min[i] <= other.max[i] && other.min[i] <= self.max[i])
    }

    /// Squared distance from the point to the closest point of the box, zero inside.
    pub fn distance_squared(&self, p: &WorldPoint) -> FloatType {
        (0..3)
            .map(|i| {
                let d = (self.min[i] - p[i]).max(0.0).max(p[i] - self.max[i]);
                d * d
            })
            .sum()
    }
}

impl CellBox {
    pub fn contains_cell(&self, c: &CellPoint) -> bool {
        (0..3).all(|i| c[i] >= self.min[i] && c[i] <= self.max[i])
    }

    /// Intersection of two inclusive cell ranges, None if they don't overlap.
    pub fn clip(&self, other: &CellBox) -> Option<CellBox> {
        let ret: CellBox = AABB {
            min: self.min.coords.zip_map(&other.min.coords, i32::max).into(),
            max: self.max.coords.zip_map(&other.max.coords, i32::min).into(),
        };
        if (0..3).all(|i| ret.min[i] <= ret.max[i]) {
            Some(ret)
        } else {
            None
        }
    }

    /// Iterates all cells of the range, x changes fastest.
    pub fn iter_cells(&self) -> impl Iterator<Item = CellPoint> + use<> {
        let AABB { min, max } = self.clone();
        (min.z..=max.z).flat_map(move |z| {
            (min.y..=max.y).flat_map(move |y| (min.x..=max.x).map(move |x| CellPoint::new(x, y, z)))
        })
    }
}
