//! Piece identity and payloads

use crate::math::Aabb;
use crate::core::types::DVec3;
use crate::streaming::sampler::Extent;

/// Identity of one partition of a dataset
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PieceId {
    /// Index within `[0, count)`
    pub index: u32,
    /// Number of pieces the dataset is divided into
    pub count: u32,
    pub ghost_level: u32,
}

impl PieceId {
    pub fn new(index: u32, count: u32) -> Self {
        Self { index, count, ghost_level: 0 }
    }

    pub fn with_ghost_level(mut self, ghost_level: u32) -> Self {
        self.ghost_level = ghost_level;
        self
    }

    /// Cache slot key. Distinct (index, count) pairs always map to distinct keys.
    pub fn key(&self) -> PieceKey {
        PieceKey(((self.count as u64) << 32) | self.index as u64)
    }

    /// The `k`-th of `degree` children this piece splits into
    pub fn child(&self, degree: u32, k: u32) -> PieceId {
        PieceId {
            index: self.index * degree + k,
            count: self.count * degree,
            ghost_level: self.ghost_level,
        }
    }

    /// Parent piece when pieces split `degree` ways, `None` at the root level
    pub fn parent(&self, degree: u32) -> Option<PieceId> {
        if degree < 2 || self.count < degree || self.count % degree != 0 {
            return None;
        }
        Some(PieceId {
            index: self.index / degree,
            count: self.count / degree,
            ghost_level: self.ghost_level,
        })
    }
}

impl std::fmt::Display for PieceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.index, self.count)?;
        if self.ghost_level > 0 {
            write!(f, "+g{}", self.ghost_level)?;
        }
        Ok(())
    }
}

/// Stable integer key derived from a piece's (index, count) pair
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PieceKey(pub u64);

impl PieceKey {
    pub fn index(&self) -> u32 {
        self.0 as u32
    }

    pub fn count(&self) -> u32 {
        (self.0 >> 32) as u32
    }
}

/// Triangle surface with one scalar per point
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PolyMesh {
    pub points: Vec<[f32; 3]>,
    pub triangles: Vec<[u32; 3]>,
    pub scalars: Vec<f32>,
}

impl PolyMesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Append another mesh, re-indexing its triangles
    pub fn append(&mut self, other: &PolyMesh) {
        let offset = self.points.len() as u32;
        self.points.extend_from_slice(&other.points);
        self.scalars.extend_from_slice(&other.scalars);
        self.triangles.extend(
            other
                .triangles
                .iter()
                .map(|t| [t[0] + offset, t[1] + offset, t[2] + offset]),
        );
    }

    /// Vertex positions as raw bytes for upload
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.points)
    }

    /// Bounds of the points
    pub fn bounds(&self) -> Aabb {
        let mut aabb = Aabb::EMPTY;
        for p in &self.points {
            aabb.expand(DVec3::new(p[0] as f64, p[1] as f64, p[2] as f64));
        }
        aabb
    }

    /// Min and max point scalar, `None` without scalars
    pub fn scalar_range(&self) -> Option<[f64; 2]> {
        scalar_range(&self.scalars)
    }
}

/// Regular grid of point scalars
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ImageBlock {
    pub extent: Extent,
    pub origin: [f64; 3],
    pub spacing: [f64; 3],
    pub scalars: Vec<f32>,
}

impl ImageBlock {
    pub fn scalar_range(&self) -> Option<[f64; 2]> {
        scalar_range(&self.scalars)
    }
}

/// Geometry or field carried by a piece
#[derive(Clone, Debug, Default, PartialEq)]
pub enum PieceContent {
    #[default]
    Empty,
    Poly(PolyMesh),
    Image(ImageBlock),
}

/// One fetched piece, tagged with what the producer actually delivered
#[derive(Clone, Debug, PartialEq)]
pub struct PieceData {
    pub id: PieceId,
    /// Achieved resolution in `[0, 1]`
    pub resolution: f64,
    /// World bounds, empty when unknown
    pub bounds: Aabb,
    pub content: PieceContent,
}

impl PieceData {
    pub fn new(id: PieceId, resolution: f64, content: PieceContent) -> Self {
        let bounds = match &content {
            PieceContent::Poly(mesh) => mesh.bounds(),
            _ => Aabb::EMPTY,
        };
        Self { id, resolution, bounds, content }
    }

    /// A piece with no content (e.g. one the producer could not deliver)
    pub fn empty(id: PieceId, resolution: f64) -> Self {
        Self::new(id, resolution, PieceContent::Empty)
    }

    pub fn with_bounds(mut self, bounds: Aabb) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn as_poly(&self) -> Option<&PolyMesh> {
        match &self.content {
            PieceContent::Poly(mesh) => Some(mesh),
            _ => None,
        }
    }

    /// Range of the payload's scalars, scanning every value
    pub fn scalar_range(&self) -> Option<[f64; 2]> {
        match &self.content {
            PieceContent::Poly(mesh) => mesh.scalar_range(),
            PieceContent::Image(image) => image.scalar_range(),
            PieceContent::Empty => None,
        }
    }
}

fn scalar_range(values: &[f32]) -> Option<[f64; 2]> {
    let mut iter = values.iter().copied().filter(|v| v.is_finite());
    let first = iter.next()? as f64;
    Some(iter.fold([first, first], |[lo, hi], v| [lo.min(v as f64), hi.max(v as f64)]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle(z: f32) -> PolyMesh {
        PolyMesh {
            points: vec![[0.0, 0.0, z], [1.0, 0.0, z], [0.0, 1.0, z]],
            triangles: vec![[0, 1, 2]],
            scalars: vec![z, z + 1.0, z + 2.0],
        }
    }

    #[test]
    fn test_keys_are_distinct() {
        let mut seen = std::collections::HashSet::new();
        for count in 1..=16u32 {
            for index in 0..count {
                assert!(seen.insert(PieceId::new(index, count).key()));
            }
        }
        let key = PieceId::new(3, 8).key();
        assert_eq!((key.index(), key.count()), (3, 8));
    }

    #[test]
    fn test_key_ignores_ghost_level() {
        let a = PieceId::new(1, 4);
        assert_eq!(a.key(), a.with_ghost_level(2).key());
    }

    #[test]
    fn test_child_and_parent() {
        let root = PieceId::new(1, 2);
        let child = root.child(4, 3);
        assert_eq!(child, PieceId::new(7, 8));
        assert_eq!(child.parent(4), Some(root));
        assert_eq!(PieceId::new(0, 1).parent(2), None);
        assert_eq!(format!("{}", child.with_ghost_level(1)), "7/8+g1");
    }

    #[test]
    fn test_append_reindexes() {
        let mut mesh = triangle(0.0);
        mesh.append(&triangle(1.0));
        assert_eq!(mesh.points.len(), 6);
        assert_eq!(mesh.triangles[1], [3, 4, 5]);
        assert_eq!(mesh.scalar_range(), Some([0.0, 3.0]));
        assert_eq!(mesh.vertex_bytes().len(), 6 * 12);
    }

    #[test]
    fn test_piece_bounds_from_mesh() {
        let piece = PieceData::new(PieceId::new(0, 1), 1.0, PieceContent::Poly(triangle(2.0)));
        assert_eq!(piece.bounds.min, DVec3::new(0.0, 0.0, 2.0));
        assert_eq!(piece.bounds.max, DVec3::new(1.0, 1.0, 2.0));

        let empty = PieceData::empty(PieceId::new(0, 1), 0.0);
        assert!(empty.bounds.is_empty());
        assert!(empty.scalar_range().is_none());
    }
}
