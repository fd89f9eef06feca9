//! Upload-ready debug geometry.
//!
//! The mechanics stages never talk to the GPU. Anything a renderer might
//! want to show (tree boxes, the GJK simplex, spring segments, spline
//! polylines) is emitted as a `LineBatch` or `TriangleBatch` whose vertex
//! slice can be handed to a vertex buffer with `bytemuck::cast_slice`.

use bevy::math::{Vec3, Vec4};
use rand::Rng;

use crate::bounding_volume::Aabb;

/// Box edges as pairs of corner indices (see [`Aabb::corners`]).
const BOX_EDGES: [[u32; 2]; 12] = [
    [0, 1],
    [2, 3],
    [4, 5],
    [6, 7],
    [0, 2],
    [1, 3],
    [4, 6],
    [5, 7],
    [0, 4],
    [1, 5],
    [2, 6],
    [3, 7],
];

/// Position + RGBA colour, laid out for direct upload.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DebugVertex {
    pub position: [f32; 3],
    pub color: [f32; 4],
}

impl DebugVertex {
    pub fn new(position: Vec3, color: Vec4) -> Self {
        Self {
            position: position.to_array(),
            color: color.to_array(),
        }
    }

    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }
}

/// Opaque colour with random RGB channels.
pub fn random_color(rng: &mut impl Rng) -> Vec4 {
    Vec4::new(rng.gen(), rng.gen(), rng.gen(), 1.0)
}

/// Indexed line list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineBatch {
    pub vertices: Vec<DebugVertex>,
    /// Two indices per line.
    pub indices: Vec<u32>,
}

impl LineBatch {
    pub fn push_line(&mut self, a: Vec3, b: Vec3, color: Vec4) {
        let base = self.vertices.len() as u32;
        self.vertices.push(DebugVertex::new(a, color));
        self.vertices.push(DebugVertex::new(b, color));
        self.indices.extend_from_slice(&[base, base + 1]);
    }

    /// Connected line strip through `points`.
    pub fn push_strip(&mut self, points: &[Vec3], color: Vec4) {
        let base = self.vertices.len() as u32;
        self.vertices
            .extend(points.iter().map(|p| DebugVertex::new(*p, color)));
        for i in 1..points.len() as u32 {
            self.indices.extend_from_slice(&[base + i - 1, base + i]);
        }
    }

    /// The 12 edges of a box.
    pub fn push_box(&mut self, aabb: &Aabb, color: Vec4) {
        let base = self.vertices.len() as u32;
        self.vertices
            .extend(aabb.corners().iter().map(|c| DebugVertex::new(*c, color)));
        for [a, b] in BOX_EDGES {
            self.indices.extend_from_slice(&[base + a, base + b]);
        }
    }

    pub fn line_count(&self) -> usize {
        self.indices.len() / 2
    }

    pub fn append(&mut self, other: &LineBatch) {
        let base = self.vertices.len() as u32;
        self.vertices.extend_from_slice(&other.vertices);
        self.indices.extend(other.indices.iter().map(|i| base + i));
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }
}

/// Indexed triangle list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriangleBatch {
    pub vertices: Vec<DebugVertex>,
    /// Three indices per triangle.
    pub indices: Vec<u32>,
}

impl TriangleBatch {
    pub fn push_triangle(&mut self, triangle: [Vec3; 3], color: Vec4) {
        let base = self.vertices.len() as u32;
        self.vertices
            .extend(triangle.iter().map(|p| DebugVertex::new(*p, color)));
        self.indices.extend_from_slice(&[base, base + 1, base + 2]);
    }

    /// Append an already-indexed mesh.
    pub fn push_mesh(&mut self, positions: &[Vec3], indices: &[u32], color: Vec4) {
        let base = self.vertices.len() as u32;
        self.vertices
            .extend(positions.iter().map(|p| DebugVertex::new(*p, color)));
        self.indices.extend(indices.iter().map(|i| base + i));
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_box_has_twelve_edges_on_eight_corners() {
        let mut batch = LineBatch::default();
        batch.push_box(&Aabb::from_min_max(Vec3::ZERO, Vec3::ONE), Vec4::ONE);
        assert_eq!(batch.vertices.len(), 8);
        assert_eq!(batch.line_count(), 12);
        for pair in batch.indices.chunks(2) {
            let a = batch.vertices[pair[0] as usize].position();
            let b = batch.vertices[pair[1] as usize].position();
            assert!((a.distance(b) - 1.0).abs() < 1e-6, "box edge must have unit length");
        }
    }

    #[test]
    fn test_append_offsets_indices() {
        let mut a = LineBatch::default();
        a.push_line(Vec3::ZERO, Vec3::X, Vec4::ONE);
        let mut b = LineBatch::default();
        b.push_strip(&[Vec3::ZERO, Vec3::Y, Vec3::Z], Vec4::ONE);
        a.append(&b);
        assert_eq!(a.indices, vec![0, 1, 2, 3, 3, 4]);
    }

    #[test]
    fn test_vertex_bytes_match_layout() {
        let mut batch = TriangleBatch::default();
        batch.push_triangle([Vec3::ZERO, Vec3::X, Vec3::Y], Vec4::ONE);
        assert_eq!(batch.vertex_bytes().len(), 3 * 7 * 4);
        assert_eq!(batch.index_bytes().len(), 3 * 4);
    }

    #[test]
    fn test_random_color_is_opaque() {
        let mut rng = StdRng::seed_from_u64(7);
        let color = random_color(&mut rng);
        assert_eq!(color.w, 1.0);
        assert!(color.x >= 0.0 && color.x <= 1.0);
    }
}
