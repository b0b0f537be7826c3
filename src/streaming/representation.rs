//! Streaming representations
//!
//! A representation owns everything needed to stream one dataset into the
//! view: a piece source, a cache, a prioritizer and a sampler. The view drives
//! it through a fixed pass protocol and only reads back its [`StreamState`]
//! and current [`RenderOutput`].

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::math::Aabb;
use crate::streaming::cache::{CacheStats, PieceCache, Served};
use crate::streaming::options::{RefinementMode, StreamOptions};
use crate::streaming::piece::{PieceData, PieceId, PolyMesh};
use crate::streaming::priority::{ViewSnapshot, VisibilityPriority};
use crate::streaming::sampler::ResolutionSampler;
use crate::streaming::source::{PieceRequest, PieceSource, RangeSource, RangeTable};

/// Per-representation progress, read back by the view after every phase
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StreamState {
    /// Nothing new will be produced until a restart
    pub all_done: bool,
    /// Everything wanted at the current depth has been fetched
    pub wend_done: bool,
    pub current_piece: Option<PieceId>,
    pub current_resolution: f64,
    pub current_priority: f64,
    pub was_cache_hit: bool,
    pub was_from_aggregate: bool,
}

/// What a representation contributes to the current pass
#[derive(Clone, Copy, Debug)]
pub enum RenderOutput<'a> {
    Piece(&'a PieceData),
    Aggregate(&'a PolyMesh),
}

impl<'a> RenderOutput<'a> {
    pub fn mesh(&self) -> Option<&'a PolyMesh> {
        match *self {
            RenderOutput::Piece(data) => data.as_poly(),
            RenderOutput::Aggregate(mesh) => Some(mesh),
        }
    }

    /// Vertex position bytes, empty for non-polygonal output
    pub fn vertex_bytes(&self) -> &'a [u8] {
        self.mesh().map(PolyMesh::vertex_bytes).unwrap_or(&[])
    }
}

/// Pass protocol between the view and one streamed dataset
pub trait StreamingRepresentation {
    fn name(&self) -> &str;

    /// Non-streaming representations are only updated on the first pass of a sweep
    fn is_streaming(&self) -> bool {
        true
    }

    fn set_view(&mut self, view: &ViewSnapshot);

    fn apply_options(&mut self, options: &Arc<StreamOptions>);

    /// Start a sweep: rank pieces against the current view
    fn prepare_first_pass(&mut self);

    fn prepare_another_pass(&mut self);

    /// Fetch (or serve from cache) the next most important piece
    fn choose_next_piece(&mut self);

    /// Decide whether anything remains beyond the current sweep
    fn finish_pass(&mut self);

    fn refine(&mut self);

    fn coarsen(&mut self);

    fn state(&self) -> StreamState;

    fn output(&self) -> Option<RenderOutput<'_>>;

    /// Freeze the current level of detail
    fn set_locked(&mut self, locked: bool);

    fn is_locked(&self) -> bool;

    /// Counters of the piece cache, if the representation has one
    fn cache_stats(&self) -> Option<CacheStats> {
        None
    }
}

/// One piece of the refinement frontier
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Leaf {
    pub id: PieceId,
    pub depth: u32,
    /// Known world bounds, empty until the source or a fetch reports them
    pub bounds: Aabb,
    /// Priority from the last ranking
    pub priority: f64,
}

enum Output {
    Cached(PieceId),
    Owned(PieceData),
    Aggregate,
}

/// Streams a [`PieceSource`] through a refinement frontier of pieces.
///
/// Pieces at depth `d` are requested at resolution `d / tree_height`.
/// Refining splits frontier pieces into `branching_degree` children one depth
/// down; coarsening merges complete sibling groups back.
pub struct PieceStreamer<S: PieceSource, R: RangeSource = RangeTable> {
    name: String,
    options: Arc<StreamOptions>,
    source: S,
    ranges: R,
    cache: PieceCache,
    priority: VisibilityPriority,
    sampler: ResolutionSampler,
    leaves: Vec<Leaf>,
    /// Pieces left in this sweep, highest priority last
    todo: Vec<Leaf>,
    state: StreamState,
    output: Option<Output>,
    /// Scalar range of everything shown this sweep
    scalar_range: Option<[f64; 2]>,
    locked: bool,
}

impl<S: PieceSource> PieceStreamer<S, RangeTable> {
    pub fn new(name: impl Into<String>, source: S, options: Arc<StreamOptions>) -> Self {
        let ranges = RangeTable::new(options.branching_degree);
        Self::with_ranges(name, source, ranges, options)
    }
}

impl<S: PieceSource, R: RangeSource> PieceStreamer<S, R> {
    pub fn with_ranges(name: impl Into<String>, mut source: S, mut ranges: R, options: Arc<StreamOptions>) -> Self {
        let options = StreamOptions::sanitize_shared(&options);
        source.configure(&options);
        ranges.configure(&options);
        let mut sampler = ResolutionSampler::from_options(&options);
        sampler.set_whole_extent(source.whole_extent(), source.spacing());

        let mut streamer = Self {
            name: name.into(),
            cache: PieceCache::new(options.cache_size_limit),
            options,
            source,
            ranges,
            priority: VisibilityPriority::new(),
            sampler,
            leaves: Vec::new(),
            todo: Vec::new(),
            state: StreamState::default(),
            output: None,
            scalar_range: None,
            locked: false,
        };
        streamer.reset_frontier();
        streamer
    }

    pub fn cache(&self) -> &PieceCache {
        &self.cache
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn ranges(&self) -> &R {
        &self.ranges
    }

    pub fn options(&self) -> &StreamOptions {
        &self.options
    }

    /// Current refinement frontier
    pub fn leaves(&self) -> &[Leaf] {
        &self.leaves
    }

    /// Pieces still queued in this sweep
    pub fn remaining(&self) -> usize {
        self.todo.len()
    }

    /// Scalar range over everything shown since the sweep started
    pub fn scalar_range(&self) -> Option<[f64; 2]> {
        self.scalar_range
    }

    /// Deepest frontier level
    pub fn max_depth(&self) -> u32 {
        self.leaves.iter().map(|l| l.depth).max().unwrap_or(0)
    }

    fn resolution_of(&self, depth: u32) -> f64 {
        self.options.resolution_at_depth(depth)
    }

    /// Back to `initial_pieces` pieces at depth 0
    fn reset_frontier(&mut self) {
        let count = self.options.initial_pieces.max(1);
        let ghost_level = self.options.ghost_level;
        self.leaves = (0..count)
            .map(|i| {
                let id = PieceId::new(i, count).with_ghost_level(ghost_level);
                Leaf {
                    id,
                    depth: 0,
                    bounds: self.source.piece_bounds(&id),
                    priority: 1.0,
                }
            })
            .collect();
        self.todo.clear();
        self.output = None;
        self.state = StreamState::default();
    }

    fn is_refinable(&self, leaf: &Leaf) -> bool {
        leaf.depth < self.options.tree_height
            && leaf.id.count.checked_mul(self.options.branching_degree).is_some()
            && self
                .sampler
                .is_finer(self.resolution_of(leaf.depth), self.resolution_of(leaf.depth + 1))
    }

    /// Any visible leaf that could still be split
    pub fn can_refine(&self) -> bool {
        self.leaves.iter().any(|l| l.priority > 0.0 && self.is_refinable(l))
    }

    pub fn can_coarsen(&self) -> bool {
        !self.coarsen_groups().is_empty()
    }

    /// Parents of the deepest complete sibling groups on the frontier
    fn coarsen_groups(&self) -> Vec<PieceId> {
        let degree = self.options.branching_degree;
        let mut depths: Vec<u32> = self.leaves.iter().map(|l| l.depth).filter(|&d| d > 0).collect();
        depths.sort_unstable();
        depths.dedup();

        for &depth in depths.iter().rev() {
            let mut groups: BTreeMap<PieceId, u32> = BTreeMap::new();
            for leaf in self.leaves.iter().filter(|l| l.depth == depth) {
                if let Some(parent) = leaf.id.parent(degree) {
                    *groups.entry(parent).or_default() += 1;
                }
            }
            let complete: Vec<PieceId> = groups
                .into_iter()
                .filter(|&(_, n)| n == degree)
                .map(|(parent, _)| parent)
                .collect();
            if !complete.is_empty() {
                return complete;
            }
        }
        Vec::new()
    }

    fn score_leaves(&mut self) {
        for leaf in &mut self.leaves {
            leaf.priority = self.priority.score(&leaf.bounds, 1.0);
        }
    }

    /// True when every queued piece is cached at its resolution and nothing
    /// else is, so the aggregate shows exactly the visible frontier
    fn aggregate_covers_frontier(&self, generation: u64) -> bool {
        self.cache.len() == self.todo.len()
            && self.todo.iter().all(|leaf| {
                let resolution = self.resolution_of(leaf.depth);
                self.cache.lookup(&leaf.id).is_some_and(|e| {
                    e.satisfies(&leaf.id, resolution) && e.generation >= generation && e.data.as_poly().is_some()
                })
            })
    }
}

impl<S: PieceSource, R: RangeSource> StreamingRepresentation for PieceStreamer<S, R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_view(&mut self, view: &ViewSnapshot) {
        if self.priority.set_view(view) {
            log::trace!("{}: view changed", self.name);
        }
    }

    fn apply_options(&mut self, options: &Arc<StreamOptions>) {
        let options = &StreamOptions::sanitize_shared(options);
        let previous = std::mem::replace(&mut self.options, Arc::clone(options));
        if previous.cache_size_limit != options.cache_size_limit {
            self.cache.configure_capacity(options.cache_size_limit);
        }
        self.source.configure(options);
        self.ranges.configure(options);
        self.sampler
            .configure(options.sampling_rate, options.tree_height, options.branching_degree);
        self.sampler
            .set_whole_extent(self.source.whole_extent(), self.source.spacing());

        let shape = |o: &StreamOptions| (o.tree_height, o.branching_degree, o.initial_pieces, o.ghost_level);
        if shape(&*previous) != shape(&**options) {
            log::debug!("{}: piece tree changed, restarting from the coarsest level", self.name);
            self.reset_frontier();
        }
    }

    fn prepare_first_pass(&mut self) {
        self.state = StreamState::default();
        self.output = None;
        self.scalar_range = None;
        self.score_leaves();

        let mut todo: Vec<Leaf> = self.leaves.iter().copied().filter(|l| l.priority > 0.0).collect();
        todo.sort_by(|a, b| a.priority.total_cmp(&b.priority).then_with(|| b.id.cmp(&a.id)));
        self.todo = todo;

        if self.todo.is_empty() {
            log::debug!("{}: nothing visible", self.name);
            self.state.wend_done = true;
            return;
        }

        let generation = self.source.generation();
        if self.aggregate_covers_frontier(generation) {
            if let Some(mesh) = self.cache.build_aggregate() {
                self.scalar_range = mesh.scalar_range();
                self.output = Some(Output::Aggregate);
                self.state.was_from_aggregate = true;
                self.state.wend_done = true;
                self.state.current_resolution = self.resolution_of(self.max_depth());
                log::debug!("{}: showing aggregate of {} cached pieces", self.name, self.todo.len());
                self.todo.clear();
            }
        }
    }

    fn prepare_another_pass(&mut self) {
        self.output = None;
        self.state.current_piece = None;
        self.state.was_cache_hit = false;
        self.state.was_from_aggregate = false;
    }

    fn choose_next_piece(&mut self) {
        self.output = None;
        self.state.was_cache_hit = false;
        let generation = self.source.generation();

        while let Some(leaf) = self.todo.pop() {
            let resolution = self.resolution_of(leaf.depth);
            if self.cache.lookup(&leaf.id).is_some_and(|e| e.generation < generation) {
                self.cache.invalidate(&leaf.id);
                log::debug!("{}: dropped stale copy of piece {}", self.name, leaf.id);
            }

            let hint = self.ranges.range_hint(&leaf.id, resolution);
            let request = PieceRequest::new(leaf.id, resolution);
            let source = &mut self.source;
            let served = match self.cache.fetch_with(&leaf.id, resolution, generation, || source.fetch(&request)) {
                Ok(served) => served,
                Err(err) => {
                    log::warn!("{}: piece {} unavailable: {}", self.name, leaf.id, err);
                    continue;
                }
            };

            let hit = served.is_hit();
            let data = served.data();
            let (tagged, achieved, bounds) = (data.id, data.resolution, data.bounds);
            let hinted = hint.filter(|h| h.finer).map(|h| h.range);
            let range = hinted.or_else(|| data.scalar_range());
            let output = match served {
                Served::Hit(data) | Served::Stored(data) => Output::Cached(data.id),
                Served::PassThrough(data) => Output::Owned(data),
            };

            if let (None, Some(range)) = (hinted, range) {
                self.ranges.record(&tagged, achieved, range);
            }
            self.scalar_range = union_range(self.scalar_range, range);
            if !bounds.is_empty() {
                if let Some(known) = self.leaves.iter_mut().find(|l| l.id == leaf.id && l.bounds.is_empty()) {
                    known.bounds = bounds;
                }
            }

            if self.options.debug_stream_messages {
                log::debug!(
                    "{}: piece {} at {:.3} (priority {:.3}, {})",
                    self.name,
                    tagged,
                    achieved,
                    leaf.priority,
                    if hit { "cached" } else { "fetched" }
                );
            }
            self.output = Some(output);
            self.state.current_piece = Some(tagged);
            self.state.current_resolution = achieved;
            self.state.current_priority = leaf.priority;
            self.state.was_cache_hit = hit;
            break;
        }

        if self.todo.is_empty() {
            self.state.wend_done = true;
        }
    }

    fn finish_pass(&mut self) {
        if !self.state.wend_done {
            return;
        }
        self.state.all_done = self.locked
            || match self.options.refinement_mode {
                RefinementMode::AutoCoarsen => !self.can_coarsen(),
                _ => !self.can_refine(),
            };
    }

    fn refine(&mut self) {
        if self.locked {
            return;
        }
        let mut candidates: Vec<usize> = (0..self.leaves.len())
            .filter(|&i| self.leaves[i].priority > 0.0 && self.is_refinable(&self.leaves[i]))
            .collect();
        candidates.sort_by(|&a, &b| {
            let (a, b) = (&self.leaves[a], &self.leaves[b]);
            b.priority.total_cmp(&a.priority).then_with(|| a.id.cmp(&b.id))
        });
        if self.options.max_splits >= 0 {
            candidates.truncate(self.options.max_splits as usize);
        }
        if candidates.is_empty() {
            return;
        }

        let degree = self.options.branching_degree;
        let split: HashSet<usize> = candidates.iter().copied().collect();
        let mut leaves = Vec::with_capacity(self.leaves.len() + split.len() * degree as usize);
        for (i, leaf) in self.leaves.iter().enumerate() {
            if !split.contains(&i) {
                leaves.push(*leaf);
                continue;
            }
            // The children replace the parent on screen
            self.cache.invalidate(&leaf.id);
            for k in 0..degree {
                let id = leaf.id.child(degree, k);
                leaves.push(Leaf {
                    id,
                    depth: leaf.depth + 1,
                    bounds: self.source.piece_bounds(&id),
                    priority: leaf.priority,
                });
            }
        }
        self.leaves = leaves;
        self.state.all_done = false;
        log::debug!("{}: split {} pieces, {} leaves", self.name, split.len(), self.leaves.len());
    }

    fn coarsen(&mut self) {
        if self.locked {
            return;
        }
        let parents: HashSet<PieceId> = self.coarsen_groups().into_iter().collect();
        if parents.is_empty() {
            return;
        }

        let degree = self.options.branching_degree;
        let mut placed = HashSet::new();
        let mut leaves = Vec::with_capacity(self.leaves.len());
        for leaf in &self.leaves {
            match leaf.id.parent(degree).filter(|p| leaf.depth > 0 && parents.contains(p)) {
                Some(parent) => {
                    self.cache.invalidate(&leaf.id);
                    if placed.insert(parent) {
                        leaves.push(Leaf {
                            id: parent,
                            depth: leaf.depth - 1,
                            bounds: self.source.piece_bounds(&parent),
                            priority: leaf.priority,
                        });
                    }
                }
                None => leaves.push(*leaf),
            }
        }
        self.leaves = leaves;
        self.state.all_done = false;
        log::debug!("{}: merged {} groups, {} leaves", self.name, parents.len(), self.leaves.len());
    }

    fn state(&self) -> StreamState {
        self.state
    }

    fn output(&self) -> Option<RenderOutput<'_>> {
        match self.output.as_ref()? {
            Output::Cached(id) => self.cache.lookup(id).map(|e| RenderOutput::Piece(&e.data)),
            Output::Owned(data) => Some(RenderOutput::Piece(data)),
            Output::Aggregate => self.cache.aggregate().map(RenderOutput::Aggregate),
        }
    }

    fn set_locked(&mut self, locked: bool) {
        if locked != self.locked {
            log::debug!("{}: {}", self.name, if locked { "locked" } else { "unlocked" });
        }
        self.locked = locked;
    }

    fn is_locked(&self) -> bool {
        self.locked
    }

    fn cache_stats(&self) -> Option<CacheStats> {
        Some(self.cache.stats())
    }
}

fn union_range(a: Option<[f64; 2]>, b: Option<[f64; 2]>) -> Option<[f64; 2]> {
    match (a, b) {
        (Some(a), Some(b)) => Some([a[0].min(b[0]), a[1].max(b[1])]),
        (a, b) => a.or(b),
    }
}

/// A dataset shown in full on the first pass of every sweep
pub struct StaticRepresentation {
    name: String,
    data: PieceData,
    /// Drawn in the current pass
    fresh: bool,
    locked: bool,
}

impl StaticRepresentation {
    pub fn new(name: impl Into<String>, data: PieceData) -> Self {
        Self {
            name: name.into(),
            data,
            fresh: false,
            locked: false,
        }
    }
}

impl StreamingRepresentation for StaticRepresentation {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_streaming(&self) -> bool {
        false
    }

    fn set_view(&mut self, _view: &ViewSnapshot) {}

    fn apply_options(&mut self, _options: &Arc<StreamOptions>) {}

    fn prepare_first_pass(&mut self) {
        self.fresh = false;
    }

    fn prepare_another_pass(&mut self) {
        self.fresh = false;
    }

    fn choose_next_piece(&mut self) {
        self.fresh = true;
    }

    fn finish_pass(&mut self) {}

    fn refine(&mut self) {}

    fn coarsen(&mut self) {}

    fn state(&self) -> StreamState {
        StreamState {
            all_done: true,
            wend_done: true,
            current_piece: Some(self.data.id),
            current_resolution: self.data.resolution,
            current_priority: 1.0,
            was_cache_hit: false,
            was_from_aggregate: false,
        }
    }

    fn output(&self) -> Option<RenderOutput<'_>> {
        self.fresh.then_some(RenderOutput::Piece(&self.data))
    }

    fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }

    fn is_locked(&self) -> bool {
        self.locked
    }
}
