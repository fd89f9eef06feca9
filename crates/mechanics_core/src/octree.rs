//! Octree over a static vertex set.
//!
//! The tree is built once from a vertex list and a starting box and never
//! mutated afterwards; a rebuild replaces it wholesale. Nodes live in a flat
//! arena addressed by [`NodeId`], so dropping the `Octree` frees everything.
//!
//! # Build rule
//!
//! A subtree exists only while it holds at least `max_triangles_per_leaf * 3`
//! vertices. Each node tries all eight octants of its box; octants that fall
//! below the threshold are pruned. A node whose octants were all pruned is a
//! leaf. `max_depth` stops recursion on inputs whose vertices keep landing
//! in the same octant (coincident points never drop below the threshold).

use bevy::log::debug;
use bevy::math::Vec3;
use rand::Rng;

use crate::bounding_volume::Aabb;
use crate::config::OctreeConfig;
use crate::debug_draw::{random_color, LineBatch};

/// Index of a node in its tree's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Leaf,
    Internal,
}

#[derive(Debug, Clone)]
pub struct OctreeNode {
    pub bounds: Aabb,
    /// Every input vertex inside `bounds`.
    pub vertices: Vec<Vec3>,
    /// Child slot `i` covers `bounds.octant(i)`.
    pub children: [Option<NodeId>; 8],
    pub kind: NodeKind,
    pub depth: usize,
}

impl OctreeNode {
    pub fn is_leaf(&self) -> bool {
        self.kind == NodeKind::Leaf
    }

    pub fn child_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.children.iter().flatten().copied()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Octree {
    nodes: Vec<OctreeNode>,
    root: Option<NodeId>,
}

impl Octree {
    /// Build a tree over `vertices` starting from `bounds`.
    ///
    /// The root is absent when the input is already below the leaf
    /// threshold.
    pub fn build(vertices: &[Vec3], bounds: Aabb, config: &OctreeConfig) -> Self {
        let mut tree = Octree::default();
        let min_vertices = config.max_triangles_per_leaf.max(1) * 3;
        let contained: Vec<Vec3> = vertices
            .iter()
            .copied()
            .filter(|v| bounds.contains_point(*v))
            .collect();

        tree.root = tree.build_node(contained, bounds, 0, min_vertices, config.max_depth);
        tree.mark_leaf_nodes();

        debug!(
            "Octree built: {} nodes, {} leaves, depth {}, {} input vertices",
            tree.node_count(),
            tree.leaves().count(),
            tree.depth(),
            vertices.len()
        );
        tree
    }

    fn build_node(
        &mut self,
        vertices: Vec<Vec3>,
        bounds: Aabb,
        depth: usize,
        min_vertices: usize,
        max_depth: usize,
    ) -> Option<NodeId> {
        if vertices.len() < min_vertices {
            return None;
        }

        let id = NodeId(self.nodes.len());
        self.nodes.push(OctreeNode {
            bounds,
            vertices: Vec::new(),
            children: [None; 8],
            kind: NodeKind::Leaf,
            depth,
        });

        let mut children = [None; 8];
        if depth < max_depth {
            for (i, slot) in children.iter_mut().enumerate() {
                let child_bounds = bounds.octant(i);
                let inside: Vec<Vec3> = vertices
                    .iter()
                    .copied()
                    .filter(|v| child_bounds.contains_point(*v))
                    .collect();
                *slot = self.build_node(inside, child_bounds, depth + 1, min_vertices, max_depth);
            }
        }

        let node = &mut self.nodes[id.0];
        node.vertices = vertices;
        node.children = children;
        Some(id)
    }

    /// Bottom-up pass: any node with a live child is internal.
    fn mark_leaf_nodes(&mut self) {
        // Children always have larger ids than their parent.
        for i in (0..self.nodes.len()).rev() {
            let has_child = self.nodes[i].children.iter().any(Option::is_some);
            self.nodes[i].kind = if has_child {
                NodeKind::Internal
            } else {
                NodeKind::Leaf
            };
        }
    }

    /// Drop every node. Equivalent to replacing the tree with an empty one.
    pub fn destroy(&mut self) {
        self.nodes.clear();
        self.root = None;
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &OctreeNode {
        &self.nodes[id.0]
    }

    pub fn get(&self, id: NodeId) -> Option<&OctreeNode> {
        self.nodes.get(id.0)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Number of levels; 0 for an empty tree.
    pub fn depth(&self) -> usize {
        self.nodes.iter().map(|n| n.depth + 1).max().unwrap_or(0)
    }

    pub fn leaves(&self) -> impl Iterator<Item = (NodeId, &OctreeNode)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_leaf())
            .map(|(i, n)| (NodeId(i), n))
    }

    /// Pre-order node ids, children visited in octant order.
    pub fn walk(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<NodeId> = self.root.into_iter().collect();
        while let Some(id) = stack.pop() {
            order.push(id);
            let node = self.node(id);
            stack.extend(node.children.iter().rev().flatten().copied());
        }
        order
    }

    /// Node boxes as lines, one random colour per depth level.
    pub fn debug_boxes(&self, rng: &mut impl Rng) -> LineBatch {
        let colors: Vec<_> = (0..self.depth()).map(|_| random_color(rng)).collect();
        let mut batch = LineBatch::default();
        for node in &self.nodes {
            batch.push_box(&node.bounds, colors[node.depth]);
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn random_cloud(seed: u64, count: usize, half: f32) -> Vec<Vec3> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count)
            .map(|_| {
                Vec3::new(
                    rng.gen_range(-half..=half),
                    rng.gen_range(-half..=half),
                    rng.gen_range(-half..=half),
                )
            })
            .collect()
    }

    fn small_leaf_config() -> OctreeConfig {
        OctreeConfig {
            max_triangles_per_leaf: 4,
            max_depth: 16,
        }
    }

    #[test]
    fn test_leaf_vertices_inside_leaf_bounds() {
        let vertices = random_cloud(1, 2000, 10.0);
        let bounds = Aabb::from_points(&vertices).unwrap();
        let tree = Octree::build(&vertices, bounds, &small_leaf_config());

        assert!(tree.leaves().count() > 1, "2000 points should subdivide");
        for (id, leaf) in tree.leaves() {
            for v in &leaf.vertices {
                assert!(leaf.bounds.contains_point(*v), "leaf {:?} holds outside vertex {:?}", id, v);
            }
        }
    }

    #[test]
    fn test_below_threshold_has_no_root() {
        let vertices = random_cloud(2, 20, 1.0);
        let bounds = Aabb::from_points(&vertices).unwrap();
        let tree = Octree::build(&vertices, bounds, &OctreeConfig::default());
        assert!(tree.is_empty(), "20 vertices < 30 * 3");
        assert_eq!(tree.node_count(), 0);
        assert_eq!(tree.depth(), 0);
    }

    #[test]
    fn test_node_kind_matches_children() {
        let vertices = random_cloud(3, 1500, 5.0);
        let bounds = Aabb::from_points(&vertices).unwrap();
        let tree = Octree::build(&vertices, bounds, &small_leaf_config());
        for id in tree.walk() {
            let node = tree.node(id);
            let has_child = node.child_ids().next().is_some();
            assert_eq!(node.is_leaf(), !has_child);
            for child in node.child_ids() {
                assert_eq!(tree.node(child).depth, node.depth + 1);
                assert!(node.bounds.contains_aabb(&tree.node(child).bounds));
            }
        }
    }

    #[test]
    fn test_coincident_vertices_stop_at_max_depth() {
        let vertices = vec![Vec3::splat(0.3); 500];
        let bounds = Aabb::from_min_max(Vec3::ZERO, Vec3::ONE);
        let config = OctreeConfig {
            max_triangles_per_leaf: 1,
            max_depth: 6,
        };
        let tree = Octree::build(&vertices, bounds, &config);
        assert_eq!(tree.depth(), 7, "levels 0..=max_depth");
        assert_eq!(tree.leaves().count(), 1);
    }

    #[test]
    fn test_walk_visits_every_node_once() {
        let vertices = random_cloud(4, 3000, 8.0);
        let bounds = Aabb::from_points(&vertices).unwrap();
        let tree = Octree::build(&vertices, bounds, &small_leaf_config());
        let mut order = tree.walk();
        assert_eq!(order[0], tree.root().unwrap());
        order.sort();
        order.dedup();
        assert_eq!(order.len(), tree.node_count());
    }

    #[test]
    fn test_destroy_clears_tree() {
        let vertices = random_cloud(5, 500, 2.0);
        let bounds = Aabb::from_points(&vertices).unwrap();
        let mut tree = Octree::build(&vertices, bounds, &small_leaf_config());
        assert!(!tree.is_empty());
        tree.destroy();
        assert!(tree.is_empty());
        assert_eq!(tree.walk().len(), 0);
    }

    #[test]
    fn test_debug_boxes_one_box_per_node() {
        let vertices = random_cloud(6, 800, 3.0);
        let bounds = Aabb::from_points(&vertices).unwrap();
        let tree = Octree::build(&vertices, bounds, &small_leaf_config());
        let mut rng = StdRng::seed_from_u64(0);
        let batch = tree.debug_boxes(&mut rng);
        assert_eq!(batch.line_count(), tree.node_count() * 12);
    }
}
