use super::{EPSILON, FloatType, Triangle, WorldBox, WorldPoint, WorldVector};

/// Segment `a`-`b` swept by a sphere of `radius`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Capsule {
    pub a: WorldPoint,
    pub b: WorldPoint,
    pub radius: FloatType,
}

/// Penetration of a capsule into a triangle.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CapsuleTriangleClip {
    /// Negative penetration depth
    pub depth: FloatType,
    /// Deepest point of the capsule surface
    pub capsule_point: WorldPoint,
    /// Matching point on the triangle
    pub triangle_point: WorldPoint,
}

impl Capsule {
    pub fn new(a: WorldPoint, b: WorldPoint, radius: FloatType) -> Capsule {
        Capsule { a, b, radius }
    }

    pub fn bounding_box(&self) -> WorldBox {
        let mut ret = WorldBox::new(self.a, self.a);
        ret.add_point(&self.b);
        ret.inflated(self.radius)
    }

    /// Clips the capsule against a triangle with unit normal `normal`.
    /// Returns None if they don't overlap.
    pub fn clip_triangle(
        &self,
        triangle: &Triangle<WorldPoint>,
        normal: &WorldVector,
    ) -> Option<CapsuleTriangleClip> {
        if let Some(clip) = self.clip_piercing(triangle, normal) {
            return Some(clip);
        }

        let mut best = {
            let t = closest_point_on_triangle(&self.a, triangle);
            (self.a, t, (self.a - t).norm_squared())
        };
        let mut consider = |s: WorldPoint, t: WorldPoint| {
            let d = (s - t).norm_squared();
            if d < best.2 {
                best = (s, t, d);
            }
        };

        consider(self.b, closest_point_on_triangle(&self.b, triangle));
        for (p, q) in [(0, 1), (1, 2), (2, 0)] {
            let (s, t) = closest_points_segments(&self.a, &self.b, &triangle[p], &triangle[q]);
            consider(s, t);
        }

        let (s, t, distance_squared) = best;
        if distance_squared >= self.radius * self.radius {
            return None;
        }
        let distance = distance_squared.sqrt();
        let direction = if distance > EPSILON {
            (s - t) / distance
        } else {
            *normal
        };

        Some(CapsuleTriangleClip {
            depth: distance - self.radius,
            capsule_point: s - direction * self.radius,
            triangle_point: t,
        })
    }

    /// Handles the case when the capsule axis passes through the triangle.
    fn clip_piercing(
        &self,
        triangle: &Triangle<WorldPoint>,
        normal: &WorldVector,
    ) -> Option<CapsuleTriangleClip> {
        let da = normal.dot(&(self.a - triangle[0]));
        let db = normal.dot(&(self.b - triangle[0]));
        if da * db > 0.0 || da == db {
            return None;
        }

        let crossing = self.a + (self.b - self.a) * (da / (da - db));
        if (closest_point_on_triangle(&crossing, triangle) - crossing).norm_squared() > EPSILON {
            return None;
        }

        let (deepest, d) = if da < db { (self.a, da) } else { (self.b, db) };
        Some(CapsuleTriangleClip {
            depth: d - self.radius,
            capsule_point: deepest - normal * self.radius,
            triangle_point: closest_point_on_triangle(&deepest, triangle),
        })
    }
}

/// Closest point on a triangle to `p`.
/// From Ericson, Real-Time Collision Detection, 5.1.5
fn closest_point_on_triangle(p: &WorldPoint, triangle: &Triangle<WorldPoint>) -> WorldPoint {
    let (a, b, c) = (triangle[0], triangle[1], triangle[2]);
    let ab = b - a;
    let ac = c - a;

    let ap = p - a;
    let d1 = ab.dot(&ap);
    let d2 = ac.dot(&ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return a;
    }

    let bp = p - b;
    let d3 = ab.dot(&bp);
    let d4 = ac.dot(&bp);
    if d3 >= 0.0 && d4 <= d3 {
        return b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        return a + ab * (d1 / (d1 - d3));
    }

    let cp = p - c;
    let d5 = ab.dot(&cp);
    let d6 = ac.dot(&cp);
    if d6 >= 0.0 && d5 <= d6 {
        return c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        return a + ac * (d2 / (d2 - d6));
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        return b + (c - b) * ((d4 - d3) / ((d4 - d3) + (d5 - d6)));
    }

    let denom = 1.0 / (va + vb + vc);
    a + ab * (vb * denom) + ac * (vc * denom)
}

/// Closest points between segments p1-q1 and p2-q2.
/// From Ericson, Real-Time Collision Detection, 5.1.9
fn closest_points_segments(
    p1: &WorldPoint,
    q1: &WorldPoint,
    p2: &WorldPoint,
    q2: &WorldPoint,
) -> (WorldPoint, WorldPoint) {
    let d1 = q1 - p1;
    let d2 = q2 - p2;
    let r = p1 - p2;
    let a = d1.norm_squared();
    let e = d2.norm_squared();
    let f = d2.dot(&r);

    let (s, t) = if a <= EPSILON && e <= EPSILON {
        (0.0, 0.0)
    } else if a <= EPSILON {
        (0.0, (f / e).clamp(0.0, 1.0))
    } else {
        let c = d1.dot(&r);
        if e <= EPSILON {
            ((-c / a).clamp(0.0, 1.0), 0.0)
        } else {
            let b = d1.dot(&d2);
            let denom = a * e - b * b;
            let s = if denom != 0.0 {
                ((b * f - c * e) / denom).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let t = (b * s + f) / e;
            if t < 0.0 {
                ((-c / a).clamp(0.0, 1.0), 0.0)
            } else if t > 1.0 {
                (((b - c) / a).clamp(0.0, 1.0), 1.0)
            } else {
                (s, t)
            }
        }
    };

    (p1 + d1 * s, p2 + d2 * t)
}

#[cfg(test)]
mod test {
    use super::*;
    use assert2::{assert, let_assert};

    /// Large triangle in the y = 0 plane, normal pointing up
    fn ground() -> (Triangle<WorldPoint>, WorldVector) {
        let t = Triangle::new(
            WorldPoint::new(-10.0, 0.0, -10.0),
            WorldPoint::new(0.0, 0.0, 10.0),
            WorldPoint::new(10.0, 0.0, -10.0),
        );
        let n = t.normal().normalize();
        (t, n)
    }

    #[test]
    fn ground_normal_points_up() {
        let (_, n) = ground();
        assert!((n.y - 1.0).abs() < 1e-6);
    }

    #[test]
    fn standing_capsule_penetrates() {
        let (t, n) = ground();
        let c = Capsule::new(WorldPoint::new(0.0, 0.3, 0.0), WorldPoint::new(0.0, 2.0, 0.0), 0.5);
        let_assert!(Some(clip) = c.clip_triangle(&t, &n));
        assert!((clip.depth + 0.2).abs() < 1e-5);
        assert!((clip.capsule_point - WorldPoint::new(0.0, -0.2, 0.0)).norm() < 1e-5);
        assert!((clip.triangle_point - WorldPoint::new(0.0, 0.0, 0.0)).norm() < 1e-5);
    }

    #[test]
    fn hovering_capsule_misses() {
        let (t, n) = ground();
        let c = Capsule::new(WorldPoint::new(0.0, 0.6, 0.0), WorldPoint::new(0.0, 2.0, 0.0), 0.5);
        assert!(c.clip_triangle(&t, &n).is_none());
    }

    #[test]
    fn piercing_capsule() {
        let (t, n) = ground();
        let c = Capsule::new(WorldPoint::new(0.0, -1.0, 0.0), WorldPoint::new(0.0, 2.0, 0.0), 0.5);
        let_assert!(Some(clip) = c.clip_triangle(&t, &n));
        assert!((clip.depth + 1.5).abs() < 1e-5);
        assert!((clip.triangle_point - WorldPoint::new(0.0, 0.0, 0.0)).norm() < 1e-5);
    }

    #[test]
    fn lying_capsule_touches_edge() {
        let (t, n) = ground();
        // Parallel to the z = -10 edge, slightly outside of it and below the plane
        let c = Capsule::new(
            WorldPoint::new(-5.0, -0.1, -10.2),
            WorldPoint::new(5.0, -0.1, -10.2),
            0.5,
        );
        let_assert!(Some(clip) = c.clip_triangle(&t, &n));
        let expected_distance = (0.1f32 * 0.1 + 0.2 * 0.2).sqrt();
        assert!((clip.depth - (expected_distance - 0.5)).abs() < 1e-4);
        assert!((clip.triangle_point.z + 10.0).abs() < 1e-4);
    }

    #[test]
    fn bounding_box() {
        let c = Capsule::new(WorldPoint::new(0.0, 0.0, 0.0), WorldPoint::new(1.0, 2.0, 3.0), 0.5);
        let b = c.bounding_box();
        assert!(b.min == WorldPoint::new(-0.5, -0.5, -0.5));
        assert!(b.max == WorldPoint::new(1.5, 2.5, 3.5));
    }
}
