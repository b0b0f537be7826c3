//! Piece producers and scalar-range metadata
//!
//! A [`PieceSource`] delivers piece P of N at a requested resolution, tagged
//! with what it actually produced. [`HeightFieldSource`] is a synthetic source
//! that triangulates a fractal noise terrain, mainly for the viewer binary,
//! benchmarks and tests.

use std::collections::HashMap;

use noise::{Fbm, MultiFractal, NoiseFn, Perlin};

use crate::core::types::DVec3;
use crate::core::{Error, Result};
use crate::math::Aabb;
use crate::streaming::options::StreamOptions;
use crate::streaming::piece::{ImageBlock, PieceContent, PieceData, PieceId, PieceKey, PolyMesh};
use crate::streaming::sampler::{Extent, ResolutionSampler, piece_extent, strided_indices};

/// A request for one piece at one resolution
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PieceRequest {
    pub id: PieceId,
    pub resolution: f64,
}

impl PieceRequest {
    pub fn new(id: PieceId, resolution: f64) -> Self {
        Self { id, resolution }
    }
}

/// Producer of dataset pieces
pub trait PieceSource {
    /// Index bounds of the full dataset
    fn whole_extent(&self) -> Extent;

    fn spacing(&self) -> [f64; 3];

    /// Bumped whenever previously produced pieces become stale
    fn generation(&self) -> u64;

    /// World bounds of a piece if known before fetching, otherwise empty
    fn piece_bounds(&self, id: &PieceId) -> Aabb;

    /// Produce a piece. The returned data is tagged with the piece and
    /// resolution actually delivered, which may differ from the request.
    fn fetch(&mut self, request: &PieceRequest) -> Result<PieceData>;

    /// Pick up new sampling configuration
    fn configure(&mut self, _options: &StreamOptions) {}
}

/// Output geometry of a [`HeightFieldSource`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HeightFieldOutput {
    /// Triangulated surface, heights along +z
    #[default]
    Surface,
    /// Raw height samples as an image block
    Image,
}

/// Parameters of the synthetic terrain
#[derive(Clone, Debug)]
pub struct HeightFieldParams {
    pub seed: u32,
    /// Samples along x and y
    pub samples: u32,
    /// World distance between samples
    pub spacing: f64,
    pub scale: f64,        // Horizontal noise scale (larger = smoother)
    pub height_scale: f64, // Max height
    pub octaves: u32,
    pub output: HeightFieldOutput,
}

impl Default for HeightFieldParams {
    fn default() -> Self {
        Self {
            seed: 12345,
            samples: 257,
            spacing: 1.0,
            scale: 64.0,
            height_scale: 32.0,
            octaves: 4,
            output: HeightFieldOutput::Surface,
        }
    }
}

/// Fractal noise terrain served as pieces of a 2-D structured grid
pub struct HeightFieldSource {
    params: HeightFieldParams,
    noise: Fbm<Perlin>,
    sampler: ResolutionSampler,
    generation: u64,
    fetches: u64,
}

impl HeightFieldSource {
    pub fn new(params: HeightFieldParams) -> Self {
        let noise = Fbm::<Perlin>::new(params.seed).set_octaves(params.octaves as usize);
        let mut sampler = ResolutionSampler::from_options(&StreamOptions::default());
        let last = params.samples.max(1) as i32 - 1;
        sampler.set_whole_extent([0, last, 0, last, 0, 0], [params.spacing, params.spacing, 1.0]);

        Self {
            params,
            noise,
            sampler,
            generation: 0,
            fetches: 0,
        }
    }

    pub fn params(&self) -> &HeightFieldParams {
        &self.params
    }

    /// Number of pieces produced so far
    pub fn fetch_count(&self) -> u64 {
        self.fetches
    }

    /// Reseed the terrain. Everything produced before becomes stale.
    pub fn reseed(&mut self, seed: u32) {
        self.params.seed = seed;
        self.noise = Fbm::<Perlin>::new(seed).set_octaves(self.params.octaves as usize);
        self.generation += 1;
        log::debug!("Height field reseeded ({}), generation {}", seed, self.generation);
    }

    /// Terrain height at sample (i, j), in `[0, height_scale]`
    pub fn height_at(&self, i: i32, j: i32) -> f64 {
        let nx = i as f64 * self.params.spacing / self.params.scale;
        let ny = j as f64 * self.params.spacing / self.params.scale;
        let normalized = ((self.noise.get([nx, ny]) + 1.0) / 2.0).clamp(0.0, 1.0);
        normalized * self.params.height_scale
    }

    fn surface(&self, xs: &[i32], ys: &[i32]) -> PolyMesh {
        let mut mesh = PolyMesh::new();
        let spacing = self.params.spacing;
        for &j in ys {
            for &i in xs {
                let h = self.height_at(i, j);
                mesh.points.push([(i as f64 * spacing) as f32, (j as f64 * spacing) as f32, h as f32]);
                mesh.scalars.push(h as f32);
            }
        }

        let row = xs.len() as u32;
        for y in 0..ys.len().saturating_sub(1) as u32 {
            for x in 0..row.saturating_sub(1) {
                let a = y * row + x;
                let b = a + 1;
                let c = a + row;
                let d = c + 1;
                mesh.triangles.push([a, b, d]);
                mesh.triangles.push([a, d, c]);
            }
        }
        mesh
    }

    fn image(&self, xs: &[i32], ys: &[i32], strides: [i32; 3]) -> ImageBlock {
        let mut scalars = Vec::with_capacity(xs.len() * ys.len());
        for &j in ys {
            for &i in xs {
                scalars.push(self.height_at(i, j) as f32);
            }
        }
        let lo_x = xs.first().copied().unwrap_or(0);
        let lo_y = ys.first().copied().unwrap_or(0);
        ImageBlock {
            extent: [0, xs.len() as i32 - 1, 0, ys.len() as i32 - 1, 0, 0],
            origin: [lo_x as f64 * self.params.spacing, lo_y as f64 * self.params.spacing, 0.0],
            spacing: [
                self.params.spacing * strides[0] as f64,
                self.params.spacing * strides[1] as f64,
                1.0,
            ],
            scalars,
        }
    }
}

impl PieceSource for HeightFieldSource {
    fn whole_extent(&self) -> Extent {
        self.sampler.whole_extent()
    }

    fn spacing(&self) -> [f64; 3] {
        [self.params.spacing, self.params.spacing, 1.0]
    }

    fn generation(&self) -> u64 {
        self.generation
    }

    fn piece_bounds(&self, id: &PieceId) -> Aabb {
        let Some(ext) = piece_extent(&self.whole_extent(), id.index, id.count, self.sampler.degree()) else {
            return Aabb::EMPTY;
        };
        let s = self.params.spacing;
        Aabb::new(
            DVec3::new(ext[0] as f64 * s, ext[2] as f64 * s, 0.0),
            DVec3::new(ext[1] as f64 * s, ext[3] as f64 * s, self.params.height_scale),
        )
    }

    fn fetch(&mut self, request: &PieceRequest) -> Result<PieceData> {
        let id = request.id;
        let resolution = request.resolution.clamp(0.0, 1.0);

        let Some((ext, sampling)) = self.sampler.sample_piece(resolution, id.index, id.count) else {
            if id.index >= id.count {
                return Err(Error::Source(format!("piece {} does not exist", id)));
            }
            // Too small to split this far; nothing to show for this piece
            return Ok(PieceData::empty(id, resolution));
        };

        let xs = strided_indices(ext[0], ext[1], sampling.strides[0]);
        let ys = strided_indices(ext[2], ext[3], sampling.strides[1]);
        self.fetches += 1;

        let content = match self.params.output {
            HeightFieldOutput::Surface => PieceContent::Poly(self.surface(&xs, &ys)),
            HeightFieldOutput::Image => PieceContent::Image(self.image(&xs, &ys, sampling.strides)),
        };
        log::trace!(
            "Produced piece {} at resolution {:.3} ({}x{} samples)",
            id,
            resolution,
            xs.len(),
            ys.len()
        );
        Ok(PieceData::new(id, resolution, content).with_bounds(self.piece_bounds(&id)))
    }

    fn configure(&mut self, options: &StreamOptions) {
        self.sampler
            .configure(options.sampling_rate, options.tree_height, options.branching_degree);
    }
}

/// Best known scalar range for a piece
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RangeHint {
    pub range: [f64; 2],
    /// Resolution the record was computed at
    pub resolution: f64,
    /// Record is at least as fine as the request and can be used as is
    pub finer: bool,
}

/// Scalar-range metadata collaborator
pub trait RangeSource {
    fn range_hint(&self, id: &PieceId, resolution: f64) -> Option<RangeHint>;

    /// Remember a range computed from actual piece data
    fn record(&mut self, id: &PieceId, resolution: f64, range: [f64; 2]);

    /// Pick up a new piece tree shape
    fn configure(&mut self, _options: &StreamOptions) {}
}

/// In-memory range records. Pieces without a record of their own fall back
/// to the nearest ancestor, which is reported as coarser.
#[derive(Clone, Debug)]
pub struct RangeTable {
    degree: u32,
    records: HashMap<PieceKey, (f64, [f64; 2])>,
}

impl RangeTable {
    pub fn new(degree: u32) -> Self {
        Self {
            degree,
            records: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn set_degree(&mut self, degree: u32) {
        if degree != self.degree {
            self.degree = degree;
            self.records.clear();
        }
    }
}

impl RangeSource for RangeTable {
    fn range_hint(&self, id: &PieceId, resolution: f64) -> Option<RangeHint> {
        if let Some(&(recorded, range)) = self.records.get(&id.key()) {
            return Some(RangeHint {
                range,
                resolution: recorded,
                finer: recorded >= resolution,
            });
        }

        let mut current = id.parent(self.degree);
        while let Some(parent) = current {
            if let Some(&(recorded, range)) = self.records.get(&parent.key()) {
                return Some(RangeHint {
                    range,
                    resolution: recorded,
                    finer: false,
                });
            }
            current = parent.parent(self.degree);
        }
        None
    }

    fn configure(&mut self, options: &StreamOptions) {
        self.set_degree(options.branching_degree);
    }

    fn record(&mut self, id: &PieceId, resolution: f64, range: [f64; 2]) {
        match self.records.get(&id.key()) {
            Some(&(existing, _)) if existing > resolution => {}
            _ => {
                self.records.insert(id.key(), (resolution, range));
            }
        }
    }
}
