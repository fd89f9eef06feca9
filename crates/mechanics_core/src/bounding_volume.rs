//! Axis-aligned bounding boxes.
//!
//! Tree nodes and collision probes each own one `Aabb`. `center` and
//! `half_extent` are stored alongside `min`/`max` because the octree split
//! and the SAT-style extent transform read them far more often than the box
//! changes.

use bevy::math::{Mat3, Vec3};

use crate::vqs::Vqs;

/// Corner selection for the eight octants, as (high x, high y, high z).
///
/// The order is fixed; `Octree` child slot `i` always covers octant `i`.
const OCTANT_PATTERN: [(bool, bool, bool); 8] = [
    (true, true, true),
    (false, true, true),
    (false, false, true),
    (true, false, true),
    (true, true, false),
    (false, true, false),
    (false, false, false),
    (true, false, false),
];

/// Triangulation of the box corners returned by [`Aabb::corners`].
const BOX_TRIANGLES: [[usize; 3]; 12] = [
    // -z
    [0, 2, 1],
    [1, 2, 3],
    // +z
    [4, 5, 6],
    [5, 7, 6],
    // -y
    [0, 1, 4],
    [1, 5, 4],
    // +y
    [2, 6, 3],
    [3, 6, 7],
    // -x
    [0, 4, 2],
    [2, 4, 6],
    // +x
    [1, 3, 5],
    [3, 7, 5],
];

/// World-space axis-aligned box. Invariant: `min <= max` per axis,
/// `center == (min + max) / 2`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
    pub center: Vec3,
    pub half_extent: Vec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::from_center_half_extent(Vec3::ZERO, Vec3::splat(0.5))
    }
}

impl Aabb {
    /// Box from two corners. The corners are sorted per axis, so either
    /// order works.
    pub fn from_min_max(a: Vec3, b: Vec3) -> Self {
        let min = a.min(b);
        let max = a.max(b);
        Self {
            min,
            max,
            center: (min + max) * 0.5,
            half_extent: (max - min) * 0.5,
        }
    }

    pub fn from_center_half_extent(center: Vec3, half_extent: Vec3) -> Self {
        let half_extent = half_extent.abs();
        Self {
            min: center - half_extent,
            max: center + half_extent,
            center,
            half_extent,
        }
    }

    /// Tightest box around `points`, or `None` when there are none.
    pub fn from_points(points: &[Vec3]) -> Option<Self> {
        let (first, rest) = points.split_first()?;
        let (min, max) = rest
            .iter()
            .fold((*first, *first), |(min, max), p| (min.min(*p), max.max(*p)));
        Some(Self::from_min_max(min, max))
    }

    /// Grow the box to include `point`.
    pub fn extend(&mut self, point: Vec3) {
        *self = Self::from_min_max(self.min.min(point), self.max.max(point));
    }

    /// Inclusive containment: points on the faces are inside.
    pub fn contains_point(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    pub fn contains_aabb(&self, other: &Aabb) -> bool {
        self.contains_point(other.min) && self.contains_point(other.max)
    }

    /// Overlap test. Boxes that only touch count as intersecting.
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.cmple(other.max).all() && other.min.cmple(self.max).all()
    }

    /// One of the eight boxes obtained by splitting at the center.
    ///
    /// Indices wrap modulo 8.
    pub fn octant(&self, index: usize) -> Aabb {
        let (hx, hy, hz) = OCTANT_PATTERN[index % 8];
        let pick = |high: bool, lo: f32, mid: f32, hi: f32| if high { (mid, hi) } else { (lo, mid) };
        let (x0, x1) = pick(hx, self.min.x, self.center.x, self.max.x);
        let (y0, y1) = pick(hy, self.min.y, self.center.y, self.max.y);
        let (z0, z1) = pick(hz, self.min.z, self.center.z, self.max.z);
        Aabb::from_min_max(Vec3::new(x0, y0, z0), Vec3::new(x1, y1, z1))
    }

    /// The eight corners. Bit 0 of the index selects max x, bit 1 max y,
    /// bit 2 max z.
    pub fn corners(&self) -> [Vec3; 8] {
        std::array::from_fn(|i| {
            Vec3::new(
                if i & 1 != 0 { self.max.x } else { self.min.x },
                if i & 2 != 0 { self.max.y } else { self.min.y },
                if i & 4 != 0 { self.max.z } else { self.min.z },
            )
        })
    }

    /// The box surface as 12 outward-wound triangles.
    pub fn box_triangles(&self) -> [[Vec3; 3]; 12] {
        let corners = self.corners();
        BOX_TRIANGLES.map(|[a, b, c]| [corners[a], corners[b], corners[c]])
    }

    /// Index list matching [`Aabb::corners`] for the 12 box triangles.
    pub fn box_indices() -> impl Iterator<Item = u32> {
        BOX_TRIANGLES.into_iter().flatten().map(|i| i as u32)
    }

    /// World box of this (local) box after applying `vqs`.
    ///
    /// The center goes through the full transform; the half extents go
    /// through `|R| * S`, which gives the tightest axis-aligned box around
    /// the rotated one.
    pub fn transformed(&self, vqs: &Vqs) -> Aabb {
        let rotation = Mat3::from_quat(vqs.rotation);
        let abs_rotation = Mat3::from_cols(
            rotation.x_axis.abs(),
            rotation.y_axis.abs(),
            rotation.z_axis.abs(),
        );
        let center = vqs.transform_point(self.center);
        let half_extent = abs_rotation * (vqs.scale.abs() * self.half_extent);
        Aabb::from_center_half_extent(center, half_extent)
    }

    /// Full edge lengths.
    pub fn extent(&self) -> Vec3 {
        self.max - self.min
    }

    /// Largest half extent.
    pub fn size(&self) -> f32 {
        self.half_extent.max_element()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::math::Quat;

    #[test]
    fn test_from_points_is_tight() {
        let points = [
            Vec3::new(1.0, -2.0, 0.0),
            Vec3::new(-1.0, 3.0, 0.5),
            Vec3::new(0.0, 0.0, -4.0),
        ];
        let aabb = Aabb::from_points(&points).unwrap();
        assert_eq!(aabb.min, Vec3::new(-1.0, -2.0, -4.0));
        assert_eq!(aabb.max, Vec3::new(1.0, 3.0, 0.5));
        assert_eq!(aabb.center, (aabb.min + aabb.max) * 0.5);
        assert!(Aabb::from_points(&[]).is_none());
    }

    #[test]
    fn test_contains_point_is_inclusive() {
        let aabb = Aabb::from_min_max(Vec3::ZERO, Vec3::ONE);
        assert!(aabb.contains_point(Vec3::ONE), "max corner is inside");
        assert!(aabb.contains_point(Vec3::new(0.0, 0.5, 1.0)));
        assert!(!aabb.contains_point(Vec3::new(1.01, 0.5, 0.5)));
    }

    #[test]
    fn test_touching_boxes_intersect() {
        let a = Aabb::from_min_max(Vec3::ZERO, Vec3::ONE);
        let b = Aabb::from_min_max(Vec3::new(1.0, 0.0, 0.0), Vec3::new(2.0, 1.0, 1.0));
        let c = Aabb::from_min_max(Vec3::splat(5.0), Vec3::splat(6.0));
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn test_octants_tile_the_parent() {
        let parent = Aabb::from_min_max(Vec3::new(-2.0, 0.0, 4.0), Vec3::new(2.0, 8.0, 6.0));
        let mut volume = 0.0;
        for i in 0..8 {
            let child = parent.octant(i);
            assert!(parent.contains_aabb(&child), "octant {} escapes parent", i);
            assert!((child.half_extent - parent.half_extent * 0.5).length() < 1e-6);
            let e = child.extent();
            volume += e.x * e.y * e.z;
        }
        let e = parent.extent();
        assert!((volume - e.x * e.y * e.z).abs() < 1e-4, "octants must cover the parent");

        // all eight centers are distinct
        let centers: Vec<Vec3> = (0..8).map(|i| parent.octant(i).center).collect();
        for i in 0..8 {
            for j in (i + 1)..8 {
                assert_ne!(centers[i], centers[j]);
            }
        }
    }

    #[test]
    fn test_first_and_seventh_octant_are_upper_and_lower_corners() {
        let parent = Aabb::from_min_max(Vec3::ZERO, Vec3::splat(2.0));
        assert_eq!(parent.octant(0).min, Vec3::ONE);
        assert_eq!(parent.octant(6).max, Vec3::ONE);
    }

    #[test]
    fn test_transformed_rotated_box_grows() {
        let local = Aabb::from_center_half_extent(Vec3::ZERO, Vec3::ONE);
        let vqs = Vqs::from_translation_rotation(
            Vec3::new(10.0, 0.0, 0.0),
            Quat::from_rotation_z(std::f32::consts::FRAC_PI_4),
        );
        let world = local.transformed(&vqs);
        let expected = std::f32::consts::SQRT_2;
        assert!((world.half_extent.x - expected).abs() < 1e-5);
        assert!((world.half_extent.z - 1.0).abs() < 1e-5);
        assert!((world.center - Vec3::new(10.0, 0.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_box_triangles_face_outward() {
        let aabb = Aabb::from_min_max(Vec3::splat(-1.0), Vec3::splat(1.0));
        for [a, b, c] in aabb.box_triangles() {
            let normal = (b - a).cross(c - a);
            let centroid = (a + b + c) / 3.0;
            assert!(normal.dot(centroid - aabb.center) > 0.0, "inward triangle {:?}", [a, b, c]);
        }
        assert_eq!(Aabb::box_indices().count(), 36);
    }
}
