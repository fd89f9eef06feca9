//! Splitting planes and point/triangle classification for the BSP builder.

use bevy::math::Vec3;

/// Which side of a plane a point or triangle lies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Front,
    Back,
    Coplanar,
    /// Triangle with vertices on both sides.
    Straddling,
}

/// A plane through `point` with unit `normal`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub point: Vec3,
}

impl Plane {
    /// Plane through `point`. `normal` is normalized; a zero normal falls
    /// back to +Y.
    pub fn new(normal: Vec3, point: Vec3) -> Self {
        Self {
            normal: normal.try_normalize().unwrap_or(Vec3::Y),
            point,
        }
    }

    /// Plane through a triangle, normal from counter-clockwise winding.
    pub fn from_triangle(a: Vec3, b: Vec3, c: Vec3) -> Self {
        Self::new((b - a).cross(c - a), a)
    }

    pub fn signed_distance(&self, p: Vec3) -> f32 {
        self.normal.dot(p - self.point)
    }

    /// Classify a point with a tolerance band of `epsilon` on either side.
    pub fn classify_point(&self, p: Vec3, epsilon: f32) -> Side {
        let d = self.signed_distance(p);
        if d > epsilon {
            Side::Front
        } else if d < -epsilon {
            Side::Back
        } else {
            Side::Coplanar
        }
    }

    pub fn classify_triangle(&self, triangle: &[Vec3; 3], epsilon: f32) -> Side {
        let mut front = 0;
        let mut back = 0;
        for p in triangle {
            match self.classify_point(*p, epsilon) {
                Side::Front => front += 1,
                Side::Back => back += 1,
                _ => {}
            }
        }
        match (front, back) {
            (0, 0) => Side::Coplanar,
            (_, 0) => Side::Front,
            (0, _) => Side::Back,
            _ => Side::Straddling,
        }
    }

    /// Where the segment `a -> b` crosses the plane.
    ///
    /// Uses `t = n·(p - a) / n·(b - a)`; returns `a` for a segment parallel
    /// to the plane.
    pub fn intersect_segment(&self, a: Vec3, b: Vec3) -> Vec3 {
        let direction = b - a;
        let denom = self.normal.dot(direction);
        if denom.abs() < f32::EPSILON {
            return a;
        }
        let t = (self.normal.dot(self.point - a) / denom).clamp(0.0, 1.0);
        a + direction * t
    }

    /// Same plane, opposite facing.
    pub fn flipped(&self) -> Plane {
        Plane {
            normal: -self.normal,
            point: self.point,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_point_sides() {
        let plane = Plane::new(Vec3::Y, Vec3::new(0.0, 1.0, 0.0));
        assert_eq!(plane.classify_point(Vec3::new(3.0, 2.0, 0.0), 1e-6), Side::Front);
        assert_eq!(plane.classify_point(Vec3::new(3.0, 0.0, 0.0), 1e-6), Side::Back);
        assert_eq!(plane.classify_point(Vec3::new(-7.0, 1.0, 2.0), 1e-6), Side::Coplanar);
    }

    #[test]
    fn test_classify_triangle_touching_counts_as_side() {
        let plane = Plane::new(Vec3::X, Vec3::ZERO);
        let touching = [Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0), Vec3::new(1.0, 1.0, 0.0)];
        assert_eq!(plane.classify_triangle(&touching, 1e-6), Side::Front);
        let straddling = [Vec3::new(-1.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0), Vec3::Y];
        assert_eq!(plane.classify_triangle(&straddling, 1e-6), Side::Straddling);
    }

    #[test]
    fn test_intersect_segment_lands_on_plane() {
        let plane = Plane::new(Vec3::new(1.0, 1.0, 0.0), Vec3::new(0.5, 0.5, 0.0));
        let hit = plane.intersect_segment(Vec3::ZERO, Vec3::new(2.0, 2.0, 0.0));
        assert!(plane.signed_distance(hit).abs() < 1e-5, "hit {:?} is off the plane", hit);
    }

    #[test]
    fn test_from_triangle_normal_follows_winding() {
        let plane = Plane::from_triangle(Vec3::ZERO, Vec3::X, Vec3::Y);
        assert!((plane.normal - Vec3::Z).length() < 1e-6);
    }
}
