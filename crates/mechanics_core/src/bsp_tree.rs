//! Binary space partitioning over an indexed triangle mesh.
//!
//! Each node splits its triangles with a plane anchored at the center of
//! their bounding box. The plane normal comes from a fixed palette of 14
//! directions (axis planes, then diagonals, each followed by its flip). If
//! the split leaves one side with far more vertices than the other, the
//! anchor moves to the center of the larger side and the next normal in the
//! palette is tried. Children start one palette slot further along than
//! their parent.
//!
//! Triangles crossing the plane are clipped edge by edge and the pieces
//! re-triangulated, so every node's triangle list covers exactly the region
//! its parent's list covered on that side.

use bevy::log::{debug, info};
use bevy::math::{Vec3, Vec4};
use rand::Rng;

use crate::bounding_volume::Aabb;
use crate::config::BspConfig;
use crate::debug_draw::{random_color, TriangleBatch};
use crate::octree::NodeId;
use crate::plane::{Plane, Side};

/// Number of candidate split normals.
pub const PALETTE_SIZE: usize = 14;

/// Candidate split normals in trial order, normalized.
pub fn split_palette() -> [Vec3; PALETTE_SIZE] {
    [
        Vec3::X,
        Vec3::Z,
        Vec3::Y,
        Vec3::NEG_X,
        Vec3::NEG_Z,
        Vec3::NEG_Y,
        Vec3::new(1.0, 1.0, 1.0).normalize(),
        Vec3::new(0.0, 1.0, 1.0).normalize(),
        Vec3::new(1.0, 0.0, 1.0).normalize(),
        Vec3::new(1.0, 1.0, 0.0).normalize(),
        Vec3::new(-1.0, -1.0, -1.0).normalize(),
        Vec3::new(0.0, -1.0, -1.0).normalize(),
        Vec3::new(-1.0, 0.0, -1.0).normalize(),
        Vec3::new(-1.0, -1.0, 0.0).normalize(),
    ]
}

// =============================================================================
// Triangle classification and clipping
// =============================================================================

/// A triangle list: three consecutive indices per triangle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriangleSoup {
    pub vertices: Vec<Vec3>,
    pub indices: Vec<u32>,
}

impl TriangleSoup {
    pub fn triangles(&self) -> impl Iterator<Item = [Vec3; 3]> + '_ {
        self.indices.chunks_exact(3).filter_map(|tri| {
            Some([
                *self.vertices.get(tri[0] as usize)?,
                *self.vertices.get(tri[1] as usize)?,
                *self.vertices.get(tri[2] as usize)?,
            ])
        })
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Sum of triangle areas.
    pub fn area(&self) -> f32 {
        self.triangles()
            .map(|[a, b, c]| (b - a).cross(c - a).length() * 0.5)
            .sum()
    }

    fn push_triangle(&mut self, triangle: [Vec3; 3]) {
        let base = self.vertices.len() as u32;
        self.vertices.extend_from_slice(&triangle);
        self.indices.extend_from_slice(&[base, base + 1, base + 2]);
    }

    /// Fan-triangulate a clipped polygon of 3 or 4 vertices.
    fn push_polygon(&mut self, polygon: &[Vec3]) {
        let base = self.vertices.len() as u32;
        match polygon.len() {
            3 => {
                self.vertices.extend_from_slice(polygon);
                self.indices.extend_from_slice(&[base, base + 1, base + 2]);
            }
            4 => {
                self.vertices.extend_from_slice(polygon);
                self.indices.extend_from_slice(&[
                    base,
                    base + 1,
                    base + 2,
                    base,
                    base + 2,
                    base + 3,
                ]);
            }
            // A clipped triangle always yields 3 or 4 points per side.
            _ => {}
        }
    }
}

/// Front and back halves of a split.
#[derive(Debug, Clone, Default)]
pub struct SplitResult {
    pub front: TriangleSoup,
    pub back: TriangleSoup,
}

/// Clip one edge `v1 -> v2` against the plane, appending to the front and
/// back polygons. Only the edge end (and any crossing point) is emitted;
/// the start was emitted by the previous edge.
fn split_edge(
    plane: &Plane,
    (v1, side1): (Vec3, Side),
    (v2, side2): (Vec3, Side),
    front: &mut Vec<Vec3>,
    back: &mut Vec<Vec3>,
) {
    use Side::*;
    match (side1, side2) {
        (Front, Front) | (Coplanar, Front) | (Front, Coplanar) | (Coplanar, Coplanar) => {
            front.push(v2);
        }
        (Back, Front) => {
            let hit = plane.intersect_segment(v1, v2);
            front.push(hit);
            front.push(v2);
            back.push(hit);
        }
        (Back, Coplanar) => {
            front.push(v2);
            back.push(v2);
        }
        (Front, Back) => {
            let hit = plane.intersect_segment(v1, v2);
            front.push(hit);
            back.push(hit);
            back.push(v2);
        }
        (Coplanar, Back) => {
            back.push(v1);
            back.push(v2);
        }
        (Back, Back) => {
            back.push(v2);
        }
        // Point classification never yields Straddling.
        _ => {}
    }
}

/// Distribute the triangles of `soup` to the two sides of `plane`.
///
/// Coplanar triangles go to the front. Triangles with vertices strictly on
/// both sides are clipped.
pub fn split_triangles(soup: &TriangleSoup, plane: &Plane, epsilon: f32) -> SplitResult {
    let mut result = SplitResult::default();
    let mut front_polygon = Vec::with_capacity(4);
    let mut back_polygon = Vec::with_capacity(4);

    for triangle in soup.triangles() {
        match plane.classify_triangle(&triangle, epsilon) {
            Side::Front | Side::Coplanar => result.front.push_triangle(triangle),
            Side::Back => result.back.push_triangle(triangle),
            Side::Straddling => {
                front_polygon.clear();
                back_polygon.clear();
                let sides = triangle.map(|v| plane.classify_point(v, epsilon));
                for i in 0..3 {
                    let j = (i + 1) % 3;
                    split_edge(
                        plane,
                        (triangle[i], sides[i]),
                        (triangle[j], sides[j]),
                        &mut front_polygon,
                        &mut back_polygon,
                    );
                }
                result.front.push_polygon(&front_polygon);
                result.back.push_polygon(&back_polygon);
            }
        }
    }
    result
}

// =============================================================================
// Tree
// =============================================================================

#[derive(Debug, Clone)]
pub struct BspNode {
    pub plane: Plane,
    pub geometry: TriangleSoup,
    pub front: Option<NodeId>,
    pub back: Option<NodeId>,
    pub parent: Option<NodeId>,
    pub depth: usize,
    /// Set on leaves, used to tell leaves apart when drawn.
    pub color: Option<Vec4>,
}

impl BspNode {
    pub fn is_leaf(&self) -> bool {
        self.color.is_some()
    }
}

/// Summary of a build, logged once per tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub node_count: usize,
    pub leaf_count: usize,
    pub total_leaf_vertices: usize,
    pub max_leaf_vertices: usize,
    /// Nodes that ran out of palette normals without a balanced split.
    pub unbalanced_splits: usize,
}

#[derive(Debug, Clone, Default)]
pub struct BspTree {
    nodes: Vec<BspNode>,
    root: Option<NodeId>,
    leaves: Vec<NodeId>,
    stats: BuildStats,
}

struct BuildContext<'a, R: Rng> {
    config: &'a BspConfig,
    palette: [Vec3; PALETTE_SIZE],
    min_vertices: usize,
    rng: &'a mut R,
}

impl BspTree {
    /// Build from an indexed mesh. Leaf colours come from the thread RNG.
    pub fn build(indices: &[u32], vertices: &[Vec3], config: &BspConfig) -> Self {
        Self::build_with_rng(indices, vertices, config, &mut rand::thread_rng())
    }

    /// Build with an explicit RNG for reproducible leaf colours.
    pub fn build_with_rng(
        indices: &[u32],
        vertices: &[Vec3],
        config: &BspConfig,
        rng: &mut impl Rng,
    ) -> Self {
        let mut soup = TriangleSoup::default();
        for tri in indices.chunks_exact(3) {
            let corners = [
                vertices.get(tri[0] as usize),
                vertices.get(tri[1] as usize),
                vertices.get(tri[2] as usize),
            ];
            if let [Some(a), Some(b), Some(c)] = corners {
                soup.push_triangle([*a, *b, *c]);
            }
        }

        let mut ctx = BuildContext {
            config,
            palette: split_palette(),
            min_vertices: config.max_triangles_per_leaf.max(1) * 3,
            rng,
        };
        let mut tree = BspTree::default();
        tree.root = tree.build_node(&mut ctx, soup, None, 0, 0);

        tree.stats.node_count = tree.nodes.len();
        tree.stats.leaf_count = tree.leaves.len();
        for id in &tree.leaves {
            let count = tree.nodes[id.0].geometry.vertices.len();
            tree.stats.total_leaf_vertices += count;
            tree.stats.max_leaf_vertices = tree.stats.max_leaf_vertices.max(count);
        }

        info!(
            "BSP tree built: {} nodes, {} leaves, {} leaf vertices (max {})",
            tree.stats.node_count,
            tree.stats.leaf_count,
            tree.stats.total_leaf_vertices,
            tree.stats.max_leaf_vertices
        );
        if tree.stats.unbalanced_splits > 0 {
            debug!(
                "BSP tree: {} nodes exhausted the split palette without a balanced split",
                tree.stats.unbalanced_splits
            );
        }
        tree
    }

    fn build_node<R: Rng>(
        &mut self,
        ctx: &mut BuildContext<'_, R>,
        soup: TriangleSoup,
        parent: Option<NodeId>,
        depth: usize,
        start_index: usize,
    ) -> Option<NodeId> {
        if soup.vertices.len() < ctx.min_vertices || depth > ctx.config.max_depth {
            return None;
        }
        if let Some(parent) = parent {
            // no progress, the split failed to shrink the set
            if soup.vertices.len() >= self.nodes[parent.0].geometry.vertices.len() {
                return None;
            }
        }

        let center = Aabb::from_points(&soup.vertices)
            .map(|b| b.center)
            .unwrap_or(Vec3::ZERO);
        let mut plane = Plane::new(ctx.palette[start_index % PALETTE_SIZE], center);
        let mut split_plane = plane;
        let mut split = SplitResult::default();
        let mut balanced = false;

        let total = soup.vertices.len() as f32;
        for normal in ctx.palette.iter().skip(start_index) {
            plane.normal = *normal;
            split = split_triangles(&soup, &plane, ctx.config.epsilon);
            split_plane = plane;

            let front_ratio = split.front.vertices.len() as f32 / total;
            let back_ratio = split.back.vertices.len() as f32 / total;
            if (front_ratio - back_ratio).abs() <= ctx.config.imbalance_ratio {
                balanced = true;
                break;
            }

            let larger = if split.front.vertices.len() > split.back.vertices.len() {
                &split.front.vertices
            } else {
                &split.back.vertices
            };
            if let Some(bounds) = Aabb::from_points(larger) {
                plane.point = bounds.center;
            }
        }
        if !balanced {
            self.stats.unbalanced_splits += 1;
        }

        let id = NodeId(self.nodes.len());
        self.nodes.push(BspNode {
            plane: split_plane,
            geometry: soup,
            front: None,
            back: None,
            parent,
            depth,
            color: None,
        });

        let front = self.build_node(ctx, split.front, Some(id), depth + 1, start_index + 1);
        let back = self.build_node(ctx, split.back, Some(id), depth + 1, start_index + 1);

        let node = &mut self.nodes[id.0];
        node.front = front;
        node.back = back;
        // one-sided nodes are leaves too
        if front.is_none() || back.is_none() {
            node.color = Some(random_color(ctx.rng));
            self.leaves.push(id);
        }
        Some(id)
    }

    /// Drop every node and the leaf list.
    pub fn destroy(&mut self) {
        self.nodes.clear();
        self.leaves.clear();
        self.root = None;
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &BspNode {
        &self.nodes[id.0]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Leaf ids in the order they were finished (post-order).
    pub fn leaves(&self) -> &[NodeId] {
        &self.leaves
    }

    pub fn stats(&self) -> BuildStats {
        self.stats
    }

    /// One coloured triangle batch per leaf.
    pub fn leaf_batches(&self) -> impl Iterator<Item = TriangleBatch> + '_ {
        self.leaves.iter().map(|id| {
            let node = &self.nodes[id.0];
            let mut batch = TriangleBatch::default();
            batch.push_mesh(
                &node.geometry.vertices,
                &node.geometry.indices,
                node.color.unwrap_or(Vec4::ONE),
            );
            batch
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Flat grid of `n x n` quads in the XZ plane with a bump in Y.
    fn bumpy_grid(n: u32) -> (Vec<Vec3>, Vec<u32>) {
        let mut vertices = Vec::new();
        for z in 0..=n {
            for x in 0..=n {
                let fx = x as f32;
                let fz = z as f32;
                let y = (fx * 0.7).sin() * (fz * 0.5).cos();
                vertices.push(Vec3::new(fx, y, fz));
            }
        }
        let row = n + 1;
        let mut indices = Vec::new();
        for z in 0..n {
            for x in 0..n {
                let i = z * row + x;
                indices.extend_from_slice(&[i, i + row, i + 1, i + 1, i + row, i + row + 1]);
            }
        }
        (vertices, indices)
    }

    fn input_area(vertices: &[Vec3], indices: &[u32]) -> f32 {
        indices
            .chunks_exact(3)
            .map(|t| {
                let (a, b, c) = (vertices[t[0] as usize], vertices[t[1] as usize], vertices[t[2] as usize]);
                (b - a).cross(c - a).length() * 0.5
            })
            .sum()
    }

    #[test]
    fn test_palette_is_unit_length() {
        for normal in split_palette() {
            assert!((normal.length() - 1.0).abs() < 1e-6);
        }
        assert_eq!(split_palette()[0], Vec3::X, "YZ plane first");
    }

    #[test]
    fn test_split_conserves_area_and_sides() {
        let (vertices, indices) = bumpy_grid(8);
        let mut soup = TriangleSoup::default();
        for t in indices.chunks_exact(3) {
            soup.push_triangle([vertices[t[0] as usize], vertices[t[1] as usize], vertices[t[2] as usize]]);
        }
        let plane = Plane::new(Vec3::new(1.0, 0.0, 1.0), Vec3::new(3.3, 0.0, 4.1));
        let eps = 1e-5;
        let split = split_triangles(&soup, &plane, eps);

        let total = split.front.area() + split.back.area();
        assert!((total - soup.area()).abs() < 1e-3, "clipping lost area: {} vs {}", total, soup.area());
        for v in &split.front.vertices {
            assert!(plane.signed_distance(*v) >= -1e-4, "front vertex behind plane");
        }
        for v in &split.back.vertices {
            assert!(plane.signed_distance(*v) <= 1e-4, "back vertex in front of plane");
        }
        assert!(split.front.triangle_count() > 0 && split.back.triangle_count() > 0);
    }

    #[test]
    fn test_clip_single_triangle_into_triangle_and_quad() {
        let mut soup = TriangleSoup::default();
        soup.push_triangle([Vec3::new(-1.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0), Vec3::new(1.0, 1.0, 0.0)]);
        let plane = Plane::new(Vec3::X, Vec3::new(0.5, 0.0, 0.0));
        let split = split_triangles(&soup, &plane, 1e-8);
        // front keeps the two right-hand corners: a quad, two triangles
        assert_eq!(split.front.triangle_count(), 2);
        assert_eq!(split.back.triangle_count(), 1);
    }

    #[test]
    fn test_coplanar_triangle_goes_front() {
        let mut soup = TriangleSoup::default();
        soup.push_triangle([Vec3::ZERO, Vec3::X, Vec3::Z]);
        let plane = Plane::new(Vec3::Y, Vec3::ZERO);
        let split = split_triangles(&soup, &plane, 1e-8);
        assert_eq!(split.front.triangle_count(), 1);
        assert_eq!(split.back.triangle_count(), 0);
    }

    #[test]
    fn test_build_leaves_cover_input() {
        let (vertices, indices) = bumpy_grid(16);
        let config = BspConfig {
            max_triangles_per_leaf: 8,
            ..BspConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(11);
        let tree = BspTree::build_with_rng(&indices, &vertices, &config, &mut rng);

        assert!(!tree.is_empty());
        assert!(tree.leaves().len() > 1, "a 512-triangle grid should split");
        for id in tree.leaves() {
            assert!(tree.node(*id).is_leaf());
            assert!(tree.node(*id).depth <= config.max_depth);
        }
        // Leaves with both children missing partition the mesh; one-sided
        // leaves overlap their child, so only the root area is checked.
        let root = tree.node(tree.root().unwrap());
        let area = root.geometry.area();
        assert!((area - input_area(&vertices, &indices)).abs() < 1e-3);
    }

    #[test]
    fn test_children_shrink() {
        let (vertices, indices) = bumpy_grid(12);
        let config = BspConfig {
            max_triangles_per_leaf: 4,
            ..BspConfig::default()
        };
        let tree = BspTree::build(&indices, &vertices, &config);
        for i in 0..tree.node_count() {
            let node = tree.node(NodeId(i));
            for child in [node.front, node.back].into_iter().flatten() {
                assert!(
                    tree.node(child).geometry.vertices.len() < node.geometry.vertices.len(),
                    "child must hold fewer vertices than its parent"
                );
                assert_eq!(tree.node(child).parent, Some(NodeId(i)));
            }
        }
    }

    #[test]
    fn test_small_mesh_has_no_root() {
        let (vertices, indices) = bumpy_grid(2);
        let tree = BspTree::build(&indices, &vertices, &BspConfig::default());
        assert!(tree.is_empty());
        assert_eq!(tree.stats(), BuildStats::default());
    }

    #[test]
    fn test_stats_match_leaves() {
        let (vertices, indices) = bumpy_grid(10);
        let config = BspConfig {
            max_triangles_per_leaf: 6,
            ..BspConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(3);
        let tree = BspTree::build_with_rng(&indices, &vertices, &config, &mut rng);
        let stats = tree.stats();
        assert_eq!(stats.node_count, tree.node_count());
        assert_eq!(stats.leaf_count, tree.leaves().len());
        let batches: Vec<_> = tree.leaf_batches().collect();
        let batch_vertices: usize = batches.iter().map(|b| b.vertices.len()).sum();
        assert_eq!(batch_vertices, stats.total_leaf_vertices);
    }

    #[test]
    fn test_destroy_clears_leaf_list() {
        let (vertices, indices) = bumpy_grid(8);
        let config = BspConfig {
            max_triangles_per_leaf: 4,
            ..BspConfig::default()
        };
        let mut tree = BspTree::build(&indices, &vertices, &config);
        tree.destroy();
        assert!(tree.is_empty());
        assert!(tree.leaves().is_empty());
    }
}
