//! Camera snapshots and projection for streaming views

use crate::core::types::{DMat4, DVec3};

/// Camera pose as seen by the streaming view: eye, up vector and focal point.
///
/// Snapshots are compared by value; any difference means the camera moved.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CameraState {
    pub eye: DVec3,
    pub up: DVec3,
    pub focal: DVec3,
}

impl CameraState {
    pub fn new(eye: DVec3, focal: DVec3, up: DVec3) -> Self {
        Self { eye, up, focal }
    }

    /// Flat (eye, up, focal) 9-tuple
    pub fn to_array(&self) -> [f64; 9] {
        [
            self.eye.x, self.eye.y, self.eye.z,
            self.up.x, self.up.y, self.up.z,
            self.focal.x, self.focal.y, self.focal.z,
        ]
    }

    /// Get view matrix (world to camera space)
    pub fn view_matrix(&self) -> DMat4 {
        DMat4::look_at_rh(self.eye, self.focal, self.up)
    }
}

impl Default for CameraState {
    fn default() -> Self {
        Self::new(DVec3::new(0.0, 0.0, 5.0), DVec3::ZERO, DVec3::Y)
    }
}

/// Perspective projection parameters
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Projection {
    /// Vertical field of view in radians
    pub fov_y: f64,
    /// Aspect ratio (width / height)
    pub aspect: f64,
    /// Near clip plane
    pub near: f64,
    /// Far clip plane
    pub far: f64,
}

impl Projection {
    /// Create a projection from a vertical field of view in degrees
    pub fn new(fov_y_degrees: f64, aspect: f64, near: f64, far: f64) -> Self {
        Self {
            fov_y: fov_y_degrees.to_radians(),
            aspect,
            near,
            far,
        }
    }

    /// Get projection matrix (camera to clip space, depth in [0, 1])
    pub fn matrix(&self) -> DMat4 {
        DMat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far)
    }

    /// World-space corners of the view frustum for `camera`.
    ///
    /// Corners come from transforming the normalized device cube by the inverse
    /// view-projection. Index bit 0 selects +x, bit 1 selects +y and bit 2
    /// selects the far plane, so corners 4..8 lie on the far plane.
    pub fn world_corners(&self, camera: &CameraState) -> [DVec3; 8] {
        let inverse = (self.matrix() * camera.view_matrix()).inverse();
        std::array::from_fn(|i| {
            let ndc = DVec3::new(
                if i & 1 != 0 { 1.0 } else { -1.0 },
                if i & 2 != 0 { 1.0 } else { -1.0 },
                if i & 4 != 0 { 1.0 } else { 0.0 },
            );
            inverse.project_point3(ndc)
        })
    }
}

impl Default for Projection {
    fn default() -> Self {
        Self::new(30.0, 1.0, 0.1, 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_array_roundtrip_order() {
        let cam = CameraState::new(
            DVec3::new(1.0, 2.0, 3.0),
            DVec3::new(7.0, 8.0, 9.0),
            DVec3::new(4.0, 5.0, 6.0),
        );
        assert_eq!(cam.to_array(), [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
    }

    #[test]
    fn test_camera_equality_detects_motion() {
        let a = CameraState::default();
        let mut b = a;
        assert_eq!(a, b);
        b.eye.x += 1e-9;
        assert_ne!(a, b);
    }

    #[test]
    fn test_world_corners_near_and_far() {
        let camera = CameraState::new(DVec3::ZERO, DVec3::new(0.0, 0.0, -1.0), DVec3::Y);
        let projection = Projection::new(60.0, 1.0, 1.0, 100.0);
        let corners = projection.world_corners(&camera);

        // Near corners sit at z = -near, far corners at z = -far
        for c in &corners[..4] {
            assert!((c.z + 1.0).abs() < 1e-6, "near corner {:?}", c);
        }
        for c in &corners[4..] {
            assert!((c.z + 100.0).abs() < 1e-4, "far corner {:?}", c);
        }

        // +x corners are to the right of -x corners
        assert!(corners[1].x > corners[0].x);
        assert!(corners[2].y > corners[0].y);
    }
}
