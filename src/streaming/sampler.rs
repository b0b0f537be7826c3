//! Resolution to sampling conversion
//!
//! Maps a continuous resolution in `[0, 1]` onto integer per-axis strides over
//! a structured whole extent. The mapping is driven by a *split path*: the
//! sequence of axes that would be subdivided, one level at a time, if the
//! resolution kept increasing. The path is built once per whole extent; a
//! resolution then selects how many of its leading entries are coarsened.
//!
//! - Resolution 1.0: stride 1 on every axis
//! - Resolution 0.0: `height * log_rate(degree)` leading path entries applied
//!
//! Extents use the VTK layout `[xlo, xhi, ylo, yhi, zlo, zhi]` with inclusive
//! sample indices.

use crate::streaming::options::StreamOptions;

/// Inclusive structured index bounds `[xlo, xhi, ylo, yhi, zlo, zhi]`
pub type Extent = [i32; 6];

/// Strided view of a whole extent at one resolution
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sampling {
    /// Subsampling step per axis, always >= 1
    pub strides: [i32; 3],
    /// Whole extent expressed in strided sample indices
    pub extent: Extent,
    /// Original spacing multiplied by the stride
    pub spacing: [f64; 3],
}

impl Sampling {
    /// Number of samples covered by the strided extent
    pub fn sample_count(&self) -> u64 {
        extent_sample_count(&self.extent)
    }
}

/// Converts requested resolutions into strides over a fixed whole extent
#[derive(Clone, Debug)]
pub struct ResolutionSampler {
    rate: u32,
    height: u32,
    degree: u32,
    whole_extent: Extent,
    spacing: [f64; 3],
    /// Axis split at each level, coarsest first
    split_path: Vec<usize>,
    /// Last (resolution, result) pair, reused while nothing changed
    last: Option<(f64, Sampling)>,
    computations: u64,
}

impl ResolutionSampler {
    /// Create a sampler. Callers pass already-clamped configuration
    /// (see [`StreamOptions::sanitized`]).
    pub fn new(rate: u32, height: u32, degree: u32) -> Self {
        Self {
            rate,
            height,
            degree,
            whole_extent: [0, -1, 0, -1, 0, -1],
            spacing: [1.0; 3],
            split_path: Vec::new(),
            last: None,
            computations: 0,
        }
    }

    /// Create a sampler from option values
    pub fn from_options(options: &StreamOptions) -> Self {
        Self::new(options.sampling_rate, options.tree_height, options.branching_degree)
    }

    /// Update rate, height and degree. Cached results are dropped on change.
    pub fn configure(&mut self, rate: u32, height: u32, degree: u32) {
        if (rate, height, degree) != (self.rate, self.height, self.degree) {
            self.rate = rate;
            self.height = height;
            self.degree = degree;
            self.rebuild_split_path();
        }
    }

    /// Set the whole extent and spacing being sampled.
    ///
    /// The split path is only rebuilt when the extent actually changes.
    pub fn set_whole_extent(&mut self, extent: Extent, spacing: [f64; 3]) {
        if extent != self.whole_extent {
            self.whole_extent = extent;
            self.spacing = spacing;
            self.rebuild_split_path();
        } else if spacing != self.spacing {
            self.spacing = spacing;
            self.last = None;
        }
    }

    pub fn whole_extent(&self) -> Extent {
        self.whole_extent
    }

    /// Axis subdivided at each level, coarsest first
    pub fn split_path(&self) -> &[usize] {
        &self.split_path
    }

    /// Number of times a sampling has actually been computed (cache misses)
    pub fn computations(&self) -> u64 {
        self.computations
    }

    /// Number of leading split-path entries applied at `resolution`
    pub fn coarsening_levels(&self, resolution: f64) -> usize {
        if self.rate < 2 || resolution >= 1.0 {
            return 0;
        }
        let resolution = resolution.max(0.0);
        let levels = self.height as f64 * (self.degree as f64).ln() / (self.rate as f64).ln();
        // Depth-aligned resolutions land on whole numbers; guard the floor.
        let count = (levels * (1.0 - resolution) + 1e-9).floor();
        (count.max(0.0) as usize).min(self.split_path.len())
    }

    /// Per-axis strides at `resolution` without touching the cache
    pub fn strides_for(&self, resolution: f64) -> [i32; 3] {
        let mut strides = [1i32; 3];
        for &axis in &self.split_path[..self.coarsening_levels(resolution)] {
            strides[axis] = strides[axis].saturating_mul(self.rate as i32);
        }
        strides
    }

    /// Compute (or reuse) the sampling for `resolution`
    pub fn sample(&mut self, resolution: f64) -> Sampling {
        if let Some((r, sampling)) = self.last {
            if r == resolution {
                return sampling;
            }
        }

        let strides = self.strides_for(resolution);
        let sampling = Sampling {
            strides,
            extent: strided_extent(&self.whole_extent, strides),
            spacing: std::array::from_fn(|a| self.spacing[a] * strides[a] as f64),
        };
        self.computations += 1;
        self.last = Some((resolution, sampling));
        sampling
    }

    /// True when `to` samples strictly more points than `from`
    pub fn is_finer(&self, from: f64, to: f64) -> bool {
        let a = strided_extent(&self.whole_extent, self.strides_for(from));
        let b = strided_extent(&self.whole_extent, self.strides_for(to));
        extent_sample_count(&b) > extent_sample_count(&a)
    }

    /// Branching degree of the piece tree
    pub fn degree(&self) -> u32 {
        self.degree
    }

    /// Extent of piece `index` of `count` (in whole-extent indices) and the
    /// sampling to read it with at `resolution`
    pub fn sample_piece(&mut self, resolution: f64, index: u32, count: u32) -> Option<(Extent, Sampling)> {
        let extent = piece_extent(&self.whole_extent, index, count, self.degree)?;
        Some((extent, self.sample(resolution)))
    }

    /// Build the split path: repeatedly pick the axis with the largest
    /// remaining span (ties go to the later axis) that can still be divided
    /// by the rate.
    fn rebuild_split_path(&mut self) {
        self.split_path.clear();
        self.last = None;

        if self.rate < 2 {
            return;
        }
        let rate = self.rate as i64;
        let mut spans: [i64; 3] = std::array::from_fn(|a| {
            (self.whole_extent[2 * a + 1] as i64 - self.whole_extent[2 * a] as i64 + 1).max(0)
        });

        loop {
            let mut chosen: Option<usize> = None;
            for axis in (0..3).rev() {
                if spans[axis] / rate < 1 {
                    continue;
                }
                match chosen {
                    Some(best) if spans[best] >= spans[axis] => {}
                    _ => chosen = Some(axis),
                }
            }
            let Some(axis) = chosen else { break };
            self.split_path.push(axis);
            spans[axis] /= rate;
        }

        log::trace!(
            "Split path for extent {:?}: {} levels",
            self.whole_extent,
            self.split_path.len()
        );
    }
}

/// Whole extent resampled by `strides`, rounding up so remainders stay covered
pub fn strided_extent(extent: &Extent, strides: [i32; 3]) -> Extent {
    let mut out = *extent;
    for axis in 0..3 {
        let (lo, hi) = (extent[2 * axis], extent[2 * axis + 1]);
        if hi < lo {
            continue;
        }
        let stride = strides[axis].max(1);
        let samples = hi - lo + 1;
        let strided = (samples + stride - 1) / stride;
        out[2 * axis] = lo.div_euclid(stride);
        out[2 * axis + 1] = out[2 * axis] + strided - 1;
    }
    out
}

/// Number of samples in an inclusive extent (0 if any axis is empty)
pub fn extent_sample_count(extent: &Extent) -> u64 {
    (0..3)
        .map(|a| (extent[2 * a + 1] as i64 - extent[2 * a] as i64 + 1).max(0) as u64)
        .product()
}

/// Sample indices from `lo` to `hi` every `stride`, always ending on `hi`
/// so that neighbouring pieces share their boundary sample.
pub fn strided_indices(lo: i32, hi: i32, stride: i32) -> Vec<i32> {
    if hi < lo {
        return Vec::new();
    }
    let stride = stride.max(1) as usize;
    let mut out: Vec<i32> = (lo..=hi).step_by(stride).collect();
    if out.last() != Some(&hi) {
        out.push(hi);
    }
    out
}

/// Extent of piece `index` of `count` in a piece tree where every piece
/// splits into `degree` children.
///
/// A count that is a multiple of `degree` is resolved through its parent, so
/// children always tile their parent's extent. Any other count is a root
/// level cut directly from `whole`. Neighbouring pieces share boundary
/// samples. Returns `None` when the extent cannot be divided that far.
pub fn piece_extent(whole: &Extent, index: u32, count: u32, degree: u32) -> Option<Extent> {
    if count == 0 || index >= count {
        return None;
    }
    if degree >= 2 && count % degree == 0 {
        let parent = piece_extent(whole, index / degree, count / degree, degree)?;
        return split_extent(&parent, index % degree, degree);
    }
    split_extent(whole, index, count)
}

/// Part `index` of `count` of `ext`, halving the largest axis repeatedly
fn split_extent(ext: &Extent, index: u32, count: u32) -> Option<Extent> {
    let mut ext = *ext;
    let (mut index, mut count) = (index, count);

    while count > 1 {
        let mut axis = 2;
        for a in (0..2).rev() {
            if ext[2 * a + 1] - ext[2 * a] > ext[2 * axis + 1] - ext[2 * axis] {
                axis = a;
            }
        }
        let size = ext[2 * axis + 1] - ext[2 * axis];
        if size < 1 {
            return None;
        }

        let left = count / 2;
        let mid = ext[2 * axis] + ((size as i64 * left as i64) / count as i64) as i32;
        if index < left {
            ext[2 * axis + 1] = mid;
            count = left;
        } else {
            ext[2 * axis] = mid;
            index -= left;
            count -= left;
        }
    }
    Some(ext)
}
