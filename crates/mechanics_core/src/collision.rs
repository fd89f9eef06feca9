//! Phased collision query of a moving convex probe against an octree.
//!
//! 1. Broad phase: probe box against the root box.
//! 2. Mid phase: descend into every child whose box overlaps the probe.
//! 3. Narrow phase: GJK between the probe hull and each reached leaf.
//!
//! The query stops at the first leaf GJK reports as intersecting.

use bevy::math::{Vec3, Vec4};
use serde::{Deserialize, Serialize};

use crate::bounding_volume::Aabb;
use crate::config::GjkConfig;
use crate::debug_draw::LineBatch;
use crate::gjk::{gjk_intersect, ConvexHull, GjkOutcome, Simplex};
use crate::octree::{NodeId, Octree};
use crate::vqs::Vqs;

/// What the probe is tested against once a leaf is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NarrowPhaseTarget {
    /// The leaf's bounding box.
    #[default]
    LeafBounds,
    /// The convex hull of the leaf's vertices.
    LeafVertices,
}

/// A moving convex shape in world space.
#[derive(Debug, Clone, PartialEq)]
pub struct CollisionProbe {
    pub shape: ConvexHull,
    pub bounds: Aabb,
}

impl CollisionProbe {
    /// Probe from local-space points placed by `transform`.
    pub fn new(local_points: &[Vec3], transform: &Vqs) -> Self {
        Self::from_hull(ConvexHull::from_local(local_points, transform))
    }

    pub fn from_hull(shape: ConvexHull) -> Self {
        let bounds = shape
            .bounds()
            .unwrap_or_else(|| Aabb::from_center_half_extent(Vec3::ZERO, Vec3::ZERO));
        Self { shape, bounds }
    }

    /// A box probe; the hull is the box's eight corners.
    pub fn from_aabb(aabb: Aabb) -> Self {
        Self {
            shape: ConvexHull::from_aabb(&aabb),
            bounds: aabb,
        }
    }
}

/// Result of one probe query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollisionReport {
    pub hit: bool,
    /// Leaf that produced the hit.
    pub leaf: Option<NodeId>,
    /// Simplex of the last narrow-phase test.
    pub simplex: Simplex,
    /// Outcome of the last narrow-phase test, if one ran.
    pub outcome: Option<GjkOutcome>,
    /// Nodes whose boxes overlapped the probe, in visit order.
    pub visited: Vec<NodeId>,
    pub narrow_phase_tests: usize,
}

impl CollisionReport {
    /// Boxes of the visited nodes plus the final simplex.
    pub fn debug_lines(&self, octree: &Octree, box_color: Vec4, simplex_color: Vec4) -> LineBatch {
        let mut batch = LineBatch::default();
        for id in &self.visited {
            if let Some(node) = octree.get(*id) {
                batch.push_box(&node.bounds, box_color);
            }
        }
        batch.append(&self.simplex.debug_lines(simplex_color));
        batch
    }
}

/// Run the broad, mid and narrow phases for `probe` against `octree`.
pub fn detect_collision(probe: &CollisionProbe, octree: &Octree, config: &GjkConfig) -> CollisionReport {
    let mut report = CollisionReport::default();
    let Some(root) = octree.root() else {
        return report;
    };

    if !probe.bounds.intersects(&octree.node(root).bounds) {
        return report;
    }

    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        let node = octree.node(id);
        if !probe.bounds.intersects(&node.bounds) {
            continue;
        }
        report.visited.push(id);

        if node.is_leaf() {
            let target = match config.narrow_phase {
                NarrowPhaseTarget::LeafVertices if !node.vertices.is_empty() => {
                    ConvexHull::new(node.vertices.clone())
                }
                _ => ConvexHull::from_aabb(&node.bounds),
            };
            let direction = probe.bounds.center - node.bounds.center;
            let result = gjk_intersect(&probe.shape, &target, direction, config);
            report.narrow_phase_tests += 1;
            report.outcome = Some(result.outcome);
            report.simplex = result.simplex;

            if result.outcome == GjkOutcome::Intersecting {
                report.hit = true;
                report.leaf = Some(id);
                return report;
            }
            continue;
        }

        // reversed so children pop in octant order
        stack.extend(node.children.iter().rev().flatten().copied());
    }
    report
}
