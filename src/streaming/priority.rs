//! Piece priority from visibility and camera distance

use crate::core::CameraState;
use crate::core::types::DVec3;
use crate::math::{Aabb, Frustum};

/// Camera pose and the world-space frustum derived from it
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewSnapshot {
    pub camera: CameraState,
    pub frustum: Frustum,
}

impl ViewSnapshot {
    pub fn new(camera: CameraState, frustum: Frustum) -> Self {
        Self { camera, frustum }
    }
}

/// Score a piece against a camera eye and frustum.
///
/// - Empty bounds (not known yet): `inherited` unchanged
/// - Outside the frustum: 0
/// - Otherwise `inherited` scaled by how close the box centre is, relative to
///   the far corners of the frustum. Boxes behind the far corners or with a
///   degenerate distance score 0.
pub fn visibility_score(bounds: &Aabb, eye: DVec3, frustum: &Frustum, inherited: f64) -> f64 {
    if bounds.is_empty() {
        return inherited;
    }
    if !frustum.intersects_aabb(bounds) {
        return 0.0;
    }

    let far = frustum.far_distance(eye);
    let mut dist = 1.0 - eye.distance(bounds.center()) / far;
    if !(0.0..=1.0).contains(&dist) {
        dist = 0.0;
    }
    inherited * dist
}

/// Ranks pieces for fetching against the most recent view snapshot
#[derive(Clone, Debug, Default)]
pub struct VisibilityPriority {
    view: Option<ViewSnapshot>,
}

impl VisibilityPriority {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new view. Returns true if it differs from the previous one.
    pub fn set_view(&mut self, view: &ViewSnapshot) -> bool {
        if self.view.as_ref() == Some(view) {
            return false;
        }
        self.view = Some(*view);
        true
    }

    pub fn view(&self) -> Option<&ViewSnapshot> {
        self.view.as_ref()
    }

    /// Priority of a piece with `bounds` in `[0, inherited]`.
    ///
    /// Before any view has been set nothing can be rejected, so `inherited`
    /// is returned unchanged.
    pub fn score(&self, bounds: &Aabb, inherited: f64) -> f64 {
        match &self.view {
            Some(view) => visibility_score(bounds, view.camera.eye, &view.frustum, inherited),
            None => inherited,
        }
    }
}
