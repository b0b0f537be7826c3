//! Resolution-aware piece cache
//!
//! Stores the most recent copy of each fetched piece, keyed by its
//! (index, count) slot. A stored piece satisfies any request for the same
//! piece and ghost level at an equal or lower resolution. Capacity is a hard
//! ceiling: once full, new pieces pass through uncached instead of evicting.
//!
//! The cache also maintains an *aggregate*: every cached polygonal piece
//! merged into one mesh, rebuilt only when the set of cached
//! (index, count, resolution) triples changes.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::convert::Infallible;

use crate::streaming::piece::{PieceData, PieceId, PieceKey, PolyMesh};

/// Maximum number of cached pieces
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheCapacity {
    Unbounded,
    Limited(usize),
}

impl CacheCapacity {
    /// Interpret a configured limit: negative = unbounded, 0 = caching off
    pub fn from_limit(limit: i64) -> Self {
        if limit < 0 {
            CacheCapacity::Unbounded
        } else {
            CacheCapacity::Limited(limit as usize)
        }
    }

    /// True if a cache holding `len` pieces may store one more
    pub fn has_room(&self, len: usize) -> bool {
        match *self {
            CacheCapacity::Unbounded => true,
            CacheCapacity::Limited(max) => len < max,
        }
    }
}

/// A cached piece with its bookkeeping
#[derive(Clone, Debug)]
pub struct CacheEntry {
    /// Cache clock value at the last store or hit
    pub last_touched: u64,
    pub resolution: f64,
    /// Producer generation the copy was made from
    pub generation: u64,
    pub data: PieceData,
}

impl CacheEntry {
    /// Can this entry stand in for a request of `id` at `resolution`?
    pub fn satisfies(&self, id: &PieceId, resolution: f64) -> bool {
        self.data.id == *id && self.resolution >= resolution
    }
}

/// Result of serving a request through the cache
#[derive(Debug)]
pub enum Served<'a> {
    /// An existing entry satisfied the request
    Hit(&'a PieceData),
    /// Freshly produced data, now also held by the cache
    Stored(&'a PieceData),
    /// Freshly produced data that could not be cached
    PassThrough(PieceData),
}

impl Served<'_> {
    pub fn data(&self) -> &PieceData {
        match self {
            Served::Hit(data) | Served::Stored(data) => data,
            Served::PassThrough(data) => data,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, Served::Hit(_))
    }
}

/// Counters for cache activity
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stored: u64,
    pub pass_through: u64,
    pub invalidations: u64,
    pub aggregate_builds: u64,
}

impl CacheStats {
    /// Fraction of requests served from the cache
    pub fn hit_rate(&self) -> f32 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f32 / total as f32
    }
}

/// (index, count, resolution bits) of one aggregated piece
type Fingerprint = Vec<(u32, u32, u64)>;

/// Keyed store of fetched pieces
pub struct PieceCache {
    entries: HashMap<PieceKey, CacheEntry>,
    capacity: CacheCapacity,
    /// Monotonic clock used for `last_touched`
    clock: u64,
    aggregate: Option<PolyMesh>,
    aggregate_fingerprint: Fingerprint,
    /// Member set changed since the aggregate was last checked
    aggregate_dirty: bool,
    stats: CacheStats,
}

impl PieceCache {
    /// Create a cache from a configured limit (-1 = unbounded, 0 = off)
    pub fn new(limit: i64) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: CacheCapacity::from_limit(limit),
            clock: 0,
            aggregate: None,
            aggregate_fingerprint: Vec::new(),
            aggregate_dirty: false,
            stats: CacheStats::default(),
        }
    }

    /// Change the capacity.
    ///
    /// Any limit that differs from the current number of entries clears the
    /// cache; history is dropped rather than partially evicted.
    pub fn configure_capacity(&mut self, limit: i64) {
        self.capacity = CacheCapacity::from_limit(limit);
        if limit != self.entries.len() as i64 {
            if !self.entries.is_empty() {
                log::debug!("Cache resized to {:?}, dropping {} pieces", self.capacity, self.entries.len());
            }
            self.clear();
        }
    }

    pub fn capacity(&self) -> CacheCapacity {
        self.capacity
    }

    /// Get the number of pieces in the cache
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Entry stored for this piece's slot, if any. Does not count as a use.
    pub fn lookup(&self, id: &PieceId) -> Option<&CacheEntry> {
        self.entries.get(&id.key())
    }

    /// Check whether a request would be a hit, without touching the entry
    pub fn would_hit(&self, id: &PieceId, resolution: f64) -> bool {
        self.lookup(id).is_some_and(|e| e.satisfies(id, resolution))
    }

    /// Serve `id` at `resolution`, producing it only on a miss.
    ///
    /// The produced data is stored under the slot of the id it is *tagged*
    /// with, which may differ from the request. A failed producer leaves the
    /// cache untouched.
    pub fn fetch_with<F, E>(
        &mut self,
        id: &PieceId,
        resolution: f64,
        generation: u64,
        produce: F,
    ) -> std::result::Result<Served<'_>, E>
    where
        F: FnOnce() -> std::result::Result<PieceData, E>,
    {
        if self.would_hit(id, resolution) {
            return Ok(self.touch(id.key()));
        }
        self.stats.misses += 1;
        let data = produce()?;
        Ok(self.store(data, generation))
    }

    /// Serve `id` at `requested` resolution, falling back to `input`.
    ///
    /// On a hit the stored copy is returned and `input` is dropped. Otherwise
    /// `input` is cached (when there is room) and passed through.
    pub fn fetch_or_store(&mut self, id: &PieceId, requested: f64, input: PieceData, generation: u64) -> Served<'_> {
        match self.fetch_with(id, requested, generation, move || Ok::<_, Infallible>(input)) {
            Ok(served) => served,
            Err(never) => match never {},
        }
    }

    /// Store a copy of `data`, replacing the slot's previous entry.
    fn store(&mut self, data: PieceData, generation: u64) -> Served<'_> {
        let key = data.id.key();

        if let Some(existing) = self.entries.get(&key) {
            if existing.data.id == data.id && existing.resolution > data.resolution {
                // Never trade a finer copy for a coarser one
                self.stats.pass_through += 1;
                return Served::PassThrough(data);
            }
            self.entries.remove(&key);
            self.aggregate_dirty = true;
        }

        if !self.capacity.has_room(self.entries.len()) {
            self.stats.pass_through += 1;
            return Served::PassThrough(data);
        }

        self.clock += 1;
        self.stats.stored += 1;
        self.aggregate_dirty = true;
        let entry = CacheEntry {
            last_touched: self.clock,
            resolution: data.resolution,
            generation,
            data,
        };
        let stored = match self.entries.entry(key) {
            Entry::Occupied(mut slot) => {
                slot.insert(entry);
                slot.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(entry),
        };
        Served::Stored(&stored.data)
    }

    fn touch(&mut self, key: PieceKey) -> Served<'_> {
        self.clock += 1;
        self.stats.hits += 1;
        let clock = self.clock;
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.last_touched = clock;
        }
        Served::Hit(&self.entries[&key].data)
    }

    /// Evict one slot. Returns the evicted data if the slot was occupied.
    pub fn invalidate(&mut self, id: &PieceId) -> Option<PieceData> {
        let entry = self.entries.remove(&id.key())?;
        self.stats.invalidations += 1;
        self.aggregate_dirty = true;
        Some(entry.data)
    }

    /// Drop every entry and the aggregate
    pub fn clear(&mut self) {
        self.entries.clear();
        self.aggregate = None;
        self.aggregate_fingerprint.clear();
        self.aggregate_dirty = false;
    }

    /// Whether [`build_aggregate`](Self::build_aggregate) would rebuild
    pub fn is_aggregate_stale(&self) -> bool {
        self.aggregate_dirty && self.polygonal_fingerprint() != self.aggregate_fingerprint
    }

    /// Merge every cached polygonal piece into one mesh.
    ///
    /// The merged mesh is kept and returned again until the set of cached
    /// polygonal (index, count, resolution) triples changes. Non-polygonal
    /// entries are skipped. With no polygonal entries there is no aggregate.
    pub fn build_aggregate(&mut self) -> Option<&PolyMesh> {
        if self.aggregate_dirty {
            let fingerprint = self.polygonal_fingerprint();
            if fingerprint != self.aggregate_fingerprint {
                self.rebuild_aggregate(fingerprint);
            }
            self.aggregate_dirty = false;
        }
        self.aggregate.as_ref()
    }

    /// The last built aggregate, without checking staleness
    pub fn aggregate(&self) -> Option<&PolyMesh> {
        self.aggregate.as_ref()
    }

    fn rebuild_aggregate(&mut self, fingerprint: Fingerprint) {
        if fingerprint.is_empty() {
            self.aggregate = None;
            self.aggregate_fingerprint = fingerprint;
            return;
        }

        let mut merged = PolyMesh::new();
        for &(index, count, _) in &fingerprint {
            let key = PieceId::new(index, count).key();
            if let Some(mesh) = self.entries.get(&key).and_then(|e| e.data.as_poly()) {
                merged.append(mesh);
            }
        }
        log::debug!(
            "Rebuilt aggregate from {} pieces ({} points, {} triangles)",
            fingerprint.len(),
            merged.points.len(),
            merged.triangles.len()
        );
        self.stats.aggregate_builds += 1;
        self.aggregate = Some(merged);
        self.aggregate_fingerprint = fingerprint;
    }

    /// Sorted triples of every polygonal entry
    fn polygonal_fingerprint(&self) -> Fingerprint {
        let mut fingerprint: Fingerprint = self
            .entries
            .values()
            .filter(|e| e.data.as_poly().is_some())
            .map(|e| (e.data.id.index, e.data.id.count, e.resolution.to_bits()))
            .collect();
        fingerprint.sort_unstable_by_key(|&(index, count, _)| (count, index));
        fingerprint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::piece::{ImageBlock, PieceContent};

    fn mesh_piece(index: u32, count: u32, resolution: f64) -> PieceData {
        let z = index as f32;
        let mesh = PolyMesh {
            points: vec![[0.0, 0.0, z], [1.0, 0.0, z], [0.0, 1.0, z]],
            triangles: vec![[0, 1, 2]],
            scalars: vec![z; 3],
        };
        PieceData::new(PieceId::new(index, count), resolution, PieceContent::Poly(mesh))
    }

    fn image_piece(index: u32, count: u32, resolution: f64) -> PieceData {
        let image = ImageBlock {
            extent: [0, 1, 0, 1, 0, 0],
            origin: [0.0; 3],
            spacing: [1.0; 3],
            scalars: vec![0.0; 4],
        };
        PieceData::new(PieceId::new(index, count), resolution, PieceContent::Image(image))
    }

    fn fetch(cache: &mut PieceCache, index: u32, count: u32, resolution: f64) -> bool {
        let id = PieceId::new(index, count);
        cache.fetch_or_store(&id, resolution, mesh_piece(index, count, resolution), 0).is_hit()
    }

    #[test]
    fn test_cache_new() {
        let cache = PieceCache::new(10);
        assert_eq!(cache.len(), 0);
        assert!(cache.is_empty());
        assert_eq!(cache.capacity(), CacheCapacity::Limited(10));
        assert_eq!(PieceCache::new(-1).capacity(), CacheCapacity::Unbounded);
    }

    #[test]
    fn test_store_then_hit() {
        let mut cache = PieceCache::new(-1);
        assert!(!fetch(&mut cache, 0, 4, 0.5));
        assert!(fetch(&mut cache, 0, 4, 0.5));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_resolution_monotonic_hits() {
        let mut cache = PieceCache::new(-1);
        fetch(&mut cache, 2, 4, 0.8);
        for r in [0.0, 0.1, 0.5, 0.79, 0.8] {
            assert!(fetch(&mut cache, 2, 4, r), "request at {} should hit", r);
        }
        // Finer request misses and replaces the slot
        assert!(!fetch(&mut cache, 2, 4, 0.9));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.lookup(&PieceId::new(2, 4)).unwrap().resolution, 0.9);
    }

    #[test]
    fn test_hit_skips_producer() {
        let mut cache = PieceCache::new(-1);
        let id = PieceId::new(0, 1);
        cache.fetch_with(&id, 0.5, 0, || Ok::<_, ()>(mesh_piece(0, 1, 0.5))).unwrap();

        let mut produced = false;
        let served = cache
            .fetch_with(&id, 0.25, 0, || {
                produced = true;
                Ok::<_, ()>(mesh_piece(0, 1, 0.25))
            })
            .unwrap();
        assert!(served.is_hit());
        assert_eq!(served.data().resolution, 0.5);
        assert!(!produced);
    }

    #[test]
    fn test_failed_producer_leaves_cache_untouched() {
        let mut cache = PieceCache::new(-1);
        let id = PieceId::new(0, 1);
        let result = cache.fetch_with(&id, 0.5, 0, || Err("reader failed"));
        assert!(matches!(result, Err("reader failed")));
        assert!(cache.is_empty());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_ghost_level_must_match() {
        let mut cache = PieceCache::new(-1);
        fetch(&mut cache, 0, 2, 1.0);
        assert!(!cache.would_hit(&PieceId::new(0, 2).with_ghost_level(1), 0.0));
        assert!(cache.would_hit(&PieceId::new(0, 2), 0.0));
    }

    #[test]
    fn test_stored_under_tagged_slot() {
        let mut cache = PieceCache::new(-1);
        let requested = PieceId::new(0, 2);
        // Producer delivered a different piece than requested
        cache.fetch_or_store(&requested, 0.5, mesh_piece(1, 2, 0.5), 0);
        assert!(cache.lookup(&requested).is_none());
        assert!(cache.lookup(&PieceId::new(1, 2)).is_some());
    }

    #[test]
    fn test_capacity_scenario() {
        let mut cache = PieceCache::new(2);
        assert!(!fetch(&mut cache, 0, 3, 0.3));
        assert!(!fetch(&mut cache, 1, 3, 0.3));

        let id = PieceId::new(2, 3);
        let served = cache.fetch_or_store(&id, 0.3, mesh_piece(2, 3, 0.3), 0);
        assert!(matches!(served, Served::PassThrough(_)));
        assert_eq!(served.data().id, id);

        assert_eq!(cache.len(), 2);
        assert!(cache.lookup(&PieceId::new(0, 3)).is_some());
        assert!(cache.lookup(&PieceId::new(1, 3)).is_some());

        assert!(fetch(&mut cache, 0, 3, 0.2));
        for r in [0.0, 0.3, 1.0] {
            assert!(!fetch(&mut cache, 2, 3, r));
        }
        assert_eq!(cache.stats().pass_through, 4);
    }

    #[test]
    fn test_capacity_never_exceeded() {
        for limit in 0..5i64 {
            let mut cache = PieceCache::new(limit);
            for i in 0..20u32 {
                fetch(&mut cache, i % 7, 7, (i % 3) as f64 / 2.0);
                assert!(cache.len() as i64 <= limit);
            }
        }
    }

    #[test]
    fn test_full_cache_still_upgrades_slot() {
        let mut cache = PieceCache::new(2);
        fetch(&mut cache, 0, 2, 0.2);
        fetch(&mut cache, 1, 2, 0.2);
        assert!(!fetch(&mut cache, 0, 2, 0.6));
        assert_eq!(cache.lookup(&PieceId::new(0, 2)).unwrap().resolution, 0.6);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_coarser_copy_never_replaces_finer() {
        let mut cache = PieceCache::new(-1);
        let id = PieceId::new(0, 1);
        cache.fetch_or_store(&id, 0.9, mesh_piece(0, 1, 0.9), 0);
        // Request at a ghost level the entry cannot satisfy, producer returns coarse data
        let ghost = id.with_ghost_level(1);
        let served = cache.fetch_or_store(&ghost, 0.0, mesh_piece(0, 1, 0.1), 0);
        assert!(!served.is_hit());
        assert_eq!(cache.lookup(&id).unwrap().resolution, 0.9);
    }

    #[test]
    fn test_zero_capacity_disables_caching() {
        let mut cache = PieceCache::new(0);
        assert!(!fetch(&mut cache, 0, 1, 0.5));
        assert!(!fetch(&mut cache, 0, 1, 0.5));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_resize_clears() {
        let mut cache = PieceCache::new(-1);
        fetch(&mut cache, 0, 4, 0.5);
        fetch(&mut cache, 1, 4, 0.5);
        fetch(&mut cache, 2, 4, 0.5);

        // Matching occupancy keeps the entries
        cache.configure_capacity(3);
        assert_eq!(cache.len(), 3);

        cache.configure_capacity(8);
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.capacity(), CacheCapacity::Limited(8));

        fetch(&mut cache, 0, 4, 0.5);
        cache.configure_capacity(-1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_timestamps_advance_on_hit() {
        let mut cache = PieceCache::new(-1);
        fetch(&mut cache, 0, 2, 0.5);
        fetch(&mut cache, 1, 2, 0.5);
        let before = cache.lookup(&PieceId::new(0, 2)).unwrap().last_touched;
        fetch(&mut cache, 0, 2, 0.5);
        let after = cache.lookup(&PieceId::new(0, 2)).unwrap().last_touched;
        assert!(after > before);
        assert!(after > cache.lookup(&PieceId::new(1, 2)).unwrap().last_touched);
    }

    #[test]
    fn test_invalidate() {
        let mut cache = PieceCache::new(-1);
        fetch(&mut cache, 0, 2, 0.5);
        fetch(&mut cache, 1, 2, 0.5);
        assert_eq!(cache.build_aggregate().unwrap().triangles.len(), 2);

        assert!(cache.invalidate(&PieceId::new(0, 2)).is_some());
        assert!(cache.invalidate(&PieceId::new(0, 2)).is_none());
        assert!(cache.is_aggregate_stale());
        assert_eq!(cache.build_aggregate().unwrap().triangles.len(), 1);
        assert_eq!(cache.stats().invalidations, 1);
    }

    #[test]
    fn test_aggregate_idempotent() {
        let mut cache = PieceCache::new(-1);
        fetch(&mut cache, 0, 2, 0.5);
        fetch(&mut cache, 1, 2, 0.5);

        let first = cache.build_aggregate().unwrap() as *const PolyMesh;
        let second = cache.build_aggregate().unwrap() as *const PolyMesh;
        assert!(std::ptr::eq(first, second));
        assert_eq!(cache.stats().aggregate_builds, 1);

        // Hits do not change the member set
        fetch(&mut cache, 0, 2, 0.1);
        cache.build_aggregate();
        assert_eq!(cache.stats().aggregate_builds, 1);
    }

    #[test]
    fn test_aggregate_tracks_resolution_changes() {
        let mut cache = PieceCache::new(-1);
        fetch(&mut cache, 0, 1, 0.5);
        cache.build_aggregate();
        fetch(&mut cache, 0, 1, 0.75);
        assert!(cache.is_aggregate_stale());
        cache.build_aggregate();
        assert_eq!(cache.stats().aggregate_builds, 2);
    }

    #[test]
    fn test_aggregate_skips_non_polygonal() {
        let mut cache = PieceCache::new(-1);
        cache.fetch_or_store(&PieceId::new(0, 2), 0.5, image_piece(0, 2, 0.5), 0);
        assert!(cache.build_aggregate().is_none());

        fetch(&mut cache, 1, 2, 0.5);
        let aggregate = cache.build_aggregate().unwrap();
        assert_eq!(aggregate.triangles.len(), 1);
        assert_eq!(aggregate.points[0][2], 1.0);
    }

    #[test]
    fn test_empty_cache_clears_aggregate() {
        let mut cache = PieceCache::new(-1);
        fetch(&mut cache, 0, 1, 0.5);
        assert!(cache.build_aggregate().is_some());

        cache.invalidate(&PieceId::new(0, 1));
        assert!(cache.build_aggregate().is_none());

        fetch(&mut cache, 0, 1, 0.5);
        cache.build_aggregate();
        cache.clear();
        assert!(cache.aggregate().is_none());
        assert!(cache.build_aggregate().is_none());
    }

    #[test]
    fn test_hit_rate() {
        let mut cache = PieceCache::new(-1);
        fetch(&mut cache, 0, 1, 0.5);
        fetch(&mut cache, 0, 1, 0.5);
        assert!((cache.stats().hit_rate() - 0.5).abs() < 1e-6);
    }
}
