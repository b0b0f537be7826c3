//! World-space view frustum for culling

use crate::core::types::DVec3;
use super::aabb::Aabb;

/// A plane defined by normal and distance from origin
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plane {
    pub normal: DVec3,
    pub distance: f64,
}

impl Plane {
    pub fn new(normal: DVec3, distance: f64) -> Self {
        Self { normal, distance }
    }

    /// Plane through `a`, `b`, `c` whose normal points towards `inside`
    fn through(a: DVec3, b: DVec3, c: DVec3, inside: DVec3) -> Self {
        let mut normal = (b - a).cross(c - a).normalize_or_zero();
        if normal.dot(inside - a) < 0.0 {
            normal = -normal;
        }
        Self {
            normal,
            distance: -normal.dot(a),
        }
    }

    /// Signed distance from point to plane (positive = in front)
    pub fn distance_to_point(&self, point: DVec3) -> f64 {
        self.normal.dot(point) + self.distance
    }
}

/// Corner indices of each frustum face. Corners are indexed by
/// bit 0 = right, bit 1 = top, bit 2 = far.
const FACES: [[usize; 3]; 6] = [
    [0, 1, 2], // near
    [4, 5, 6], // far
    [0, 2, 4], // left
    [1, 3, 5], // right
    [2, 3, 6], // top
    [0, 1, 4], // bottom
];

/// View frustum described by its 8 world-space corners and the 6 planes
/// bounding them (Near, Far, Left, Right, Top, Bottom), normals pointing inward.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frustum {
    pub corners: [DVec3; 8],
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Build the frustum from world-space corners (bit 0 = right, bit 1 = top,
    /// bit 2 = far)
    pub fn from_corners(corners: [DVec3; 8]) -> Self {
        let centroid = corners.iter().copied().sum::<DVec3>() / 8.0;
        let planes = FACES.map(|[a, b, c]| {
            Plane::through(corners[a], corners[b], corners[c], centroid)
        });
        Self { corners, planes }
    }

    /// Build from 8 homogeneous corners packed as 32 doubles (x, y, z, w)
    pub fn from_homogeneous(values: &[f64; 32]) -> Self {
        let corners = std::array::from_fn(|i| {
            let w = if values[i * 4 + 3] != 0.0 { values[i * 4 + 3] } else { 1.0 };
            DVec3::new(values[i * 4], values[i * 4 + 1], values[i * 4 + 2]) / w
        });
        Self::from_corners(corners)
    }

    /// Pack the corners as 32 homogeneous doubles
    pub fn to_homogeneous(&self) -> [f64; 32] {
        let mut out = [0.0; 32];
        for (i, c) in self.corners.iter().enumerate() {
            out[i * 4] = c.x;
            out[i * 4 + 1] = c.y;
            out[i * 4 + 2] = c.z;
            out[i * 4 + 3] = 1.0;
        }
        out
    }

    /// Distance from `eye` to the farthest corner on the far plane
    pub fn far_distance(&self, eye: DVec3) -> f64 {
        self.corners[4..]
            .iter()
            .map(|c| eye.distance(*c))
            .fold(0.0, f64::max)
    }

    /// Check if point is inside frustum
    pub fn contains_point(&self, point: DVec3) -> bool {
        self.planes.iter().all(|p| p.distance_to_point(point) >= 0.0)
    }

    /// Check if AABB intersects frustum (conservative test)
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        for plane in &self.planes {
            // Find the corner most aligned with plane normal (p-vertex)
            let p = DVec3::new(
                if plane.normal.x >= 0.0 { aabb.max.x } else { aabb.min.x },
                if plane.normal.y >= 0.0 { aabb.max.y } else { aabb.min.y },
                if plane.normal.z >= 0.0 { aabb.max.z } else { aabb.min.z },
            );

            // If p-vertex is outside, AABB is completely outside
            if plane.distance_to_point(p) < 0.0 {
                return false;
            }
        }
        true
    }
}
