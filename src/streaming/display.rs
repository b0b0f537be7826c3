//! Display surface used by the streaming view
//!
//! The view never talks to a window directly. It clears, renders into a back
//! buffer, copies back to front and asks for the camera through
//! [`DisplaySurface`]. [`RecordingSurface`] is a headless implementation that
//! records what was drawn, for the viewer binary and tests.

use crate::core::{CameraState, Projection};
use crate::streaming::piece::PieceId;
use crate::streaming::representation::RenderOutput;

/// One representation's contribution to a pass
#[derive(Clone, Copy, Debug)]
pub struct RenderItem<'a> {
    pub representation: &'a str,
    pub output: RenderOutput<'a>,
}

/// Events raised by the surface while rendering
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SurfaceEvents {
    /// The surface wants another render (e.g. an expose event arrived)
    pub render_requested: bool,
}

/// Windowing-side collaborator of the view
pub trait DisplaySurface {
    /// Clear the back buffer
    fn clear(&mut self);

    /// Draw `items` into the back buffer on top of what is already there
    fn render_back_buffer(&mut self, items: &[RenderItem<'_>]) -> SurfaceEvents;

    /// Present the back buffer
    fn copy_back_to_front(&mut self);

    fn camera_state(&self) -> CameraState;

    /// World-space frustum corners for `camera` as 8 homogeneous points
    fn world_frustum(&self, camera: &CameraState) -> [f64; 32];
}

/// Something drawn into a [`RecordingSurface`]
#[derive(Clone, Debug, PartialEq)]
pub struct DrawRecord {
    pub representation: String,
    /// Piece drawn, `None` for an aggregate
    pub piece: Option<PieceId>,
    pub triangles: usize,
    pub bytes: usize,
}

/// Counters kept by a [`RecordingSurface`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SurfaceStats {
    pub clears: u64,
    pub renders: u64,
    pub presents: u64,
    pub bytes_uploaded: u64,
}

/// Headless surface that records draws instead of rasterizing them
#[derive(Clone, Debug)]
pub struct RecordingSurface {
    camera: CameraState,
    projection: Projection,
    back: Vec<DrawRecord>,
    front: Vec<DrawRecord>,
    stats: SurfaceStats,
    /// Raise a render request from inside the next `render_back_buffer`
    request_render: bool,
}

impl RecordingSurface {
    pub fn new(camera: CameraState, projection: Projection) -> Self {
        Self {
            camera,
            projection,
            back: Vec::new(),
            front: Vec::new(),
            stats: SurfaceStats::default(),
            request_render: false,
        }
    }

    pub fn set_camera(&mut self, camera: CameraState) {
        self.camera = camera;
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    /// Make the next render report a render request, as a window would
    /// when it is exposed mid-draw
    pub fn request_render_during_next_pass(&mut self) {
        self.request_render = true;
    }

    pub fn back_buffer(&self) -> &[DrawRecord] {
        &self.back
    }

    /// What was last presented
    pub fn front_buffer(&self) -> &[DrawRecord] {
        &self.front
    }

    pub fn stats(&self) -> SurfaceStats {
        self.stats
    }
}

impl Default for RecordingSurface {
    fn default() -> Self {
        Self::new(CameraState::default(), Projection::default())
    }
}

impl DisplaySurface for RecordingSurface {
    fn clear(&mut self) {
        self.back.clear();
        self.stats.clears += 1;
    }

    fn render_back_buffer(&mut self, items: &[RenderItem<'_>]) -> SurfaceEvents {
        self.stats.renders += 1;
        for item in items {
            let bytes = item.output.vertex_bytes().len();
            self.stats.bytes_uploaded += bytes as u64;
            let piece = match item.output {
                RenderOutput::Piece(data) => Some(data.id),
                RenderOutput::Aggregate(_) => None,
            };
            self.back.push(DrawRecord {
                representation: item.representation.to_string(),
                piece,
                triangles: item.output.mesh().map_or(0, |m| m.triangles.len()),
                bytes,
            });
        }
        SurfaceEvents {
            render_requested: std::mem::take(&mut self.request_render),
        }
    }

    fn copy_back_to_front(&mut self) {
        self.front.clone_from(&self.back);
        self.stats.presents += 1;
    }

    fn camera_state(&self) -> CameraState {
        self.camera
    }

    fn world_frustum(&self, camera: &CameraState) -> [f64; 32] {
        let mut out = [0.0; 32];
        for (i, corner) in self.projection.world_corners(camera).iter().enumerate() {
            out[i * 4..i * 4 + 4].copy_from_slice(&[corner.x, corner.y, corner.z, 1.0]);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Frustum;
    use crate::streaming::piece::{PieceContent, PieceData, PolyMesh};

    fn triangle_piece() -> PieceData {
        PieceData::new(
            PieceId::new(1, 2),
            0.5,
            PieceContent::Poly(PolyMesh {
                points: vec![[0.0; 3], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
                triangles: vec![[0, 1, 2]],
                scalars: vec![0.0; 3],
            }),
        )
    }

    #[test]
    fn test_back_buffer_accumulates_until_clear() {
        let mut surface = RecordingSurface::default();
        let data = triangle_piece();
        let items = [RenderItem {
            representation: "terrain",
            output: RenderOutput::Piece(&data),
        }];

        surface.render_back_buffer(&items);
        surface.render_back_buffer(&items);
        assert_eq!(surface.back_buffer().len(), 2);
        assert!(surface.front_buffer().is_empty());

        surface.copy_back_to_front();
        surface.clear();
        assert!(surface.back_buffer().is_empty());
        assert_eq!(surface.front_buffer().len(), 2);
        assert_eq!(surface.front_buffer()[0].piece, Some(PieceId::new(1, 2)));
        assert_eq!(surface.front_buffer()[0].triangles, 1);

        let stats = surface.stats();
        assert_eq!((stats.clears, stats.renders, stats.presents), (1, 2, 1));
        assert_eq!(stats.bytes_uploaded, 2 * 36);
    }

    #[test]
    fn test_render_request_is_one_shot() {
        let mut surface = RecordingSurface::default();
        surface.request_render_during_next_pass();
        assert!(surface.render_back_buffer(&[]).render_requested);
        assert!(!surface.render_back_buffer(&[]).render_requested);
    }

    #[test]
    fn test_world_frustum_matches_projection() {
        let surface = RecordingSurface::default();
        let camera = surface.camera_state();
        let frustum = Frustum::from_homogeneous(&surface.world_frustum(&camera));
        let expected = surface.projection().world_corners(&camera);
        for (a, b) in frustum.corners.iter().zip(expected.iter()) {
            assert!(a.distance(*b) < 1e-9);
        }
        assert!(frustum.contains_point(camera.focal));
    }
}
