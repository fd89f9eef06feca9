//! GJK intersection test for convex point clouds.
//!
//! The simplex walk keeps, after every step, only the sub-simplex that
//! supports the point closest to the origin (vertex, edge, face or the whole
//! tetrahedron), and searches next along the negated closest point. The
//! shapes intersect once the closest point reaches the origin; they are
//! separated as soon as a support point fails to pass the origin or stops
//! making progress. Every query runs on a fresh simplex and is bounded by
//! `GjkConfig::max_iterations`.

use bevy::math::{Vec3, Vec4};

use crate::bounding_volume::Aabb;
use crate::config::GjkConfig;
use crate::debug_draw::{LineBatch, TriangleBatch};
use crate::vqs::Vqs;

/// Relative progress below which a new support point is considered to add
/// nothing to the simplex.
const PROGRESS_EPSILON: f32 = 1e-6;

/// Squared length below which edge or face normals are degenerate.
const DEGENERATE_EPSILON: f32 = 1e-12;

// =============================================================================
// Shapes
// =============================================================================

/// A convex shape given by a world-space point cloud.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConvexHull {
    pub points: Vec<Vec3>,
}

impl ConvexHull {
    pub fn new(points: Vec<Vec3>) -> Self {
        Self { points }
    }

    /// Transform local-space points into world space.
    pub fn from_local(points: &[Vec3], transform: &Vqs) -> Self {
        Self {
            points: points.iter().map(|p| transform.transform_point(*p)).collect(),
        }
    }

    /// The eight corners of a box.
    pub fn from_aabb(aabb: &Aabb) -> Self {
        Self {
            points: aabb.corners().to_vec(),
        }
    }

    /// Point furthest along `direction`. Returns the origin for an empty hull.
    pub fn support(&self, direction: Vec3) -> Vec3 {
        self.points
            .iter()
            .copied()
            .max_by(|a, b| a.dot(direction).total_cmp(&b.dot(direction)))
            .unwrap_or(Vec3::ZERO)
    }

    /// Average of the points.
    pub fn centroid(&self) -> Vec3 {
        if self.points.is_empty() {
            return Vec3::ZERO;
        }
        self.points.iter().copied().sum::<Vec3>() / self.points.len() as f32
    }

    pub fn bounds(&self) -> Option<Aabb> {
        Aabb::from_points(&self.points)
    }
}

/// Support point of the Minkowski difference `a - b`.
#[inline]
pub fn minkowski_support(a: &ConvexHull, b: &ConvexHull, direction: Vec3) -> Vec3 {
    a.support(direction) - b.support(-direction)
}

// =============================================================================
// Simplex
// =============================================================================

/// Up to four Minkowski-difference points.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Simplex {
    pub points: Vec<Vec3>,
}

impl Simplex {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Edge index pairs for the current simplex size.
    pub fn edge_indices(&self) -> &'static [u32] {
        match self.points.len() {
            2 => &[0, 1],
            3 => &[0, 1, 1, 2, 2, 0],
            4 => &[0, 1, 1, 2, 2, 0, 0, 3, 1, 3, 2, 3],
            _ => &[],
        }
    }

    /// Face triangulation for a triangle or tetrahedron simplex.
    pub fn triangle_indices(&self) -> &'static [u32] {
        match self.points.len() {
            3 => &[0, 1, 2],
            4 => &[0, 1, 2, 0, 3, 1, 1, 3, 2, 2, 3, 0],
            _ => &[],
        }
    }

    pub fn debug_lines(&self, color: Vec4) -> LineBatch {
        let mut batch = LineBatch::default();
        let indices = self.edge_indices();
        for pair in indices.chunks_exact(2) {
            batch.push_line(self.points[pair[0] as usize], self.points[pair[1] as usize], color);
        }
        batch
    }

    pub fn debug_triangles(&self, color: Vec4) -> TriangleBatch {
        let mut batch = TriangleBatch::default();
        batch.push_mesh(&self.points, self.triangle_indices(), color);
        batch
    }
}

// =============================================================================
// Query
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GjkOutcome {
    Intersecting,
    Separated,
    /// Ran out of iterations without deciding. Treated as no contact.
    MaxIterationsReached,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GjkResult {
    pub outcome: GjkOutcome,
    /// Final simplex, kept for debug drawing.
    pub simplex: Simplex,
    /// Support points evaluated.
    pub iterations: usize,
}

impl GjkResult {
    pub fn intersecting(&self) -> bool {
        self.outcome == GjkOutcome::Intersecting
    }
}

/// Test two convex hulls for intersection.
///
/// `initial_direction` seeds the first support query; the vector between
/// the shape centers is the usual choice. A zero vector falls back to +X.
pub fn gjk_intersect(
    a: &ConvexHull,
    b: &ConvexHull,
    initial_direction: Vec3,
    config: &GjkConfig,
) -> GjkResult {
    let tolerance_sq = config.tolerance * config.tolerance;
    let mut simplex = Simplex::default();

    let direction = initial_direction.try_normalize().unwrap_or(Vec3::X);
    let first = minkowski_support(a, b, direction);
    simplex.points.push(first);
    let mut closest = first;
    let mut iterations = 1;

    while iterations < config.max_iterations {
        if closest.length_squared() <= tolerance_sq {
            return GjkResult {
                outcome: GjkOutcome::Intersecting,
                simplex,
                iterations,
            };
        }

        let direction = -closest.normalize();
        let point = minkowski_support(a, b, direction);
        iterations += 1;

        // The support plane does not reach the origin.
        if point.dot(direction) < 0.0 {
            return GjkResult {
                outcome: GjkOutcome::Separated,
                simplex,
                iterations,
            };
        }

        // No closer point exists in this direction.
        let closest_sq = closest.length_squared();
        if closest_sq - closest.dot(point) <= PROGRESS_EPSILON * closest_sq {
            return GjkResult {
                outcome: GjkOutcome::Separated,
                simplex,
                iterations,
            };
        }

        simplex.points.push(point);
        let (new_closest, reduced) = closest_on_simplex(&simplex.points);
        simplex.points = reduced;
        closest = new_closest;
    }

    let outcome = if closest.length_squared() <= tolerance_sq {
        GjkOutcome::Intersecting
    } else {
        GjkOutcome::MaxIterationsReached
    };
    GjkResult {
        outcome,
        simplex,
        iterations,
    }
}

/// Closest point to the origin on the simplex, plus the smallest
/// sub-simplex containing it.
fn closest_on_simplex(points: &[Vec3]) -> (Vec3, Vec<Vec3>) {
    match *points {
        [a] => (a, vec![a]),
        [a, b] => closest_on_segment(a, b),
        [a, b, c] => closest_on_triangle(a, b, c),
        [a, b, c, d] => closest_on_tetrahedron(a, b, c, d),
        _ => (Vec3::ZERO, points.to_vec()),
    }
}

fn closest_on_segment(a: Vec3, b: Vec3) -> (Vec3, Vec<Vec3>) {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq < DEGENERATE_EPSILON {
        return (a, vec![a]);
    }
    let t = (-a).dot(ab) / len_sq;
    if t <= 0.0 {
        (a, vec![a])
    } else if t >= 1.0 {
        (b, vec![b])
    } else {
        (a + ab * t, vec![a, b])
    }
}

/// Voronoi-region test over the triangle's three vertex, three edge and one
/// face regions.
fn closest_on_triangle(a: Vec3, b: Vec3, c: Vec3) -> (Vec3, Vec<Vec3>) {
    let ab = b - a;
    let ac = c - a;
    if ab.cross(ac).length_squared() < DEGENERATE_EPSILON {
        return closest_of(&[closest_on_segment(a, b), closest_on_segment(b, c), closest_on_segment(a, c)]);
    }

    let ao = -a;
    let d1 = ab.dot(ao);
    let d2 = ac.dot(ao);
    if d1 <= 0.0 && d2 <= 0.0 {
        return (a, vec![a]);
    }

    let bo = -b;
    let d3 = ab.dot(bo);
    let d4 = ac.dot(bo);
    if d3 >= 0.0 && d4 <= d3 {
        return (b, vec![b]);
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return (a + ab * v, vec![a, b]);
    }

    let co = -c;
    let d5 = ab.dot(co);
    let d6 = ac.dot(co);
    if d6 >= 0.0 && d5 <= d6 {
        return (c, vec![c]);
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return (a + ac * w, vec![a, c]);
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return (b + (c - b) * w, vec![b, c]);
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    (a + ab * v + ac * w, vec![a, b, c])
}

/// Is `p` on the opposite side of plane `abc` from `d`? Faces of a flat
/// tetrahedron count as outside so they still get tested.
fn outside_face(p: Vec3, a: Vec3, b: Vec3, c: Vec3, d: Vec3) -> bool {
    let normal = (b - a).cross(c - a);
    let sign_p = (p - a).dot(normal);
    let sign_d = (d - a).dot(normal);
    if sign_d * sign_d < DEGENERATE_EPSILON {
        return true;
    }
    sign_p * sign_d < 0.0
}

fn closest_on_tetrahedron(a: Vec3, b: Vec3, c: Vec3, d: Vec3) -> (Vec3, Vec<Vec3>) {
    let faces = [(a, b, c, d), (a, c, d, b), (a, d, b, c), (b, d, c, a)];
    let candidates: Vec<(Vec3, Vec<Vec3>)> = faces
        .iter()
        .filter(|(p, q, r, s)| outside_face(Vec3::ZERO, *p, *q, *r, *s))
        .map(|(p, q, r, _)| closest_on_triangle(*p, *q, *r))
        .collect();

    if candidates.is_empty() {
        // origin enclosed
        return (Vec3::ZERO, vec![a, b, c, d]);
    }
    closest_of(&candidates)
}

fn closest_of(candidates: &[(Vec3, Vec<Vec3>)]) -> (Vec3, Vec<Vec3>) {
    candidates
        .iter()
        .min_by(|x, y| x.0.length_squared().total_cmp(&y.0.length_squared()))
        .cloned()
        .unwrap_or((Vec3::ZERO, Vec::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::math::Quat;

    fn unit_cube_at(center: Vec3) -> ConvexHull {
        ConvexHull::from_aabb(&Aabb::from_center_half_extent(center, Vec3::splat(0.5)))
    }

    fn query(a: &ConvexHull, b: &ConvexHull) -> GjkResult {
        gjk_intersect(a, b, a.centroid() - b.centroid(), &GjkConfig::default())
    }

    #[test]
    fn test_coincident_cubes_intersect() {
        let a = unit_cube_at(Vec3::ZERO);
        let b = unit_cube_at(Vec3::ZERO);
        assert_eq!(query(&a, &b).outcome, GjkOutcome::Intersecting);
    }

    #[test]
    fn test_far_cubes_are_separated() {
        let a = unit_cube_at(Vec3::ZERO);
        let b = unit_cube_at(Vec3::new(100.0, 0.0, 0.0));
        let result = query(&a, &b);
        assert_eq!(result.outcome, GjkOutcome::Separated);
        assert!(result.iterations <= 3, "far shapes should reject almost immediately");
    }

    #[test]
    fn test_overlapping_rotated_boxes_intersect() {
        let corners = Aabb::from_center_half_extent(Vec3::ZERO, Vec3::new(1.0, 0.2, 0.2)).corners();
        let a = ConvexHull::from_local(
            &corners,
            &Vqs::from_translation_rotation(Vec3::new(0.5, 0.1, 0.0), Quat::from_rotation_z(0.7)),
        );
        let b = ConvexHull::from_local(&corners, &Vqs::from_translation_rotation(Vec3::ZERO, Quat::from_rotation_y(1.2)));
        assert!(query(&a, &b).intersecting());
    }

    #[test]
    fn test_near_miss_is_separated() {
        let a = unit_cube_at(Vec3::ZERO);
        let b = unit_cube_at(Vec3::new(1.05, 0.3, -0.2));
        assert_eq!(query(&a, &b).outcome, GjkOutcome::Separated);
    }

    #[test]
    fn test_zero_direction_falls_back() {
        let a = unit_cube_at(Vec3::new(0.2, 0.0, 0.0));
        let b = unit_cube_at(Vec3::ZERO);
        let result = gjk_intersect(&a, &b, Vec3::ZERO, &GjkConfig::default());
        assert!(result.intersecting());
    }

    #[test]
    fn test_iteration_cap_is_reported() {
        let a = unit_cube_at(Vec3::ZERO);
        let b = unit_cube_at(Vec3::new(0.1, 0.2, 0.3));
        let config = GjkConfig {
            max_iterations: 1,
            ..GjkConfig::default()
        };
        let result = gjk_intersect(&a, &b, Vec3::X, &config);
        assert_eq!(result.outcome, GjkOutcome::MaxIterationsReached);
        assert_eq!(result.iterations, 1);
    }

    #[test]
    fn test_each_query_starts_fresh() {
        let a = unit_cube_at(Vec3::ZERO);
        let b = unit_cube_at(Vec3::new(0.3, 0.0, 0.0));
        let first = query(&a, &b);
        let second = query(&a, &b);
        assert_eq!(first, second, "queries must not share simplex state");
        assert!(first.simplex.len() <= 4);
    }

    #[test]
    fn test_triangle_closest_point_regions() {
        // origin above the face interior
        let (p, features) = closest_on_triangle(
            Vec3::new(-1.0, -1.0, 1.0),
            Vec3::new(1.0, -1.0, 1.0),
            Vec3::new(0.0, 1.0, 1.0),
        );
        assert!((p - Vec3::new(0.0, 0.0, 1.0)).length() < 1e-6);
        assert_eq!(features.len(), 3);

        // origin beyond vertex a
        let (p, features) = closest_on_triangle(Vec3::new(1.0, 1.0, 0.0), Vec3::new(2.0, 1.0, 0.0), Vec3::new(1.0, 2.0, 0.0));
        assert_eq!(p, Vec3::new(1.0, 1.0, 0.0));
        assert_eq!(features.len(), 1);
    }

    #[test]
    fn test_tetrahedron_encloses_origin() {
        let (p, features) = closest_on_tetrahedron(
            Vec3::new(1.0, -1.0, -1.0),
            Vec3::new(-1.0, -1.0, -1.0),
            Vec3::new(0.0, 1.0, -1.0),
            Vec3::new(0.0, 0.0, 1.0),
        );
        assert_eq!(p, Vec3::ZERO);
        assert_eq!(features.len(), 4);
    }

    #[test]
    fn test_simplex_debug_buffers() {
        let simplex = Simplex {
            points: vec![Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::Z],
        };
        assert_eq!(simplex.debug_lines(Vec4::ONE).line_count(), 6);
        assert_eq!(simplex.debug_triangles(Vec4::ONE).triangle_count(), 4);
    }
}
