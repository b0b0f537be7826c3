//! Adaptive level-of-detail piece streaming

pub mod options;
pub mod sampler;
pub mod piece;
pub mod cache;
pub mod priority;
pub mod source;
pub mod representation;
pub mod display;
pub mod view;

pub use options::{RefinementMode, ShowOn, StreamOptions};
pub use sampler::{
    Extent, ResolutionSampler, Sampling,
    piece_extent, strided_extent, strided_indices, extent_sample_count,
};
pub use piece::{ImageBlock, PieceContent, PieceData, PieceId, PieceKey, PolyMesh};
pub use cache::{CacheCapacity, CacheEntry, CacheStats, PieceCache, Served};
pub use priority::{ViewSnapshot, VisibilityPriority, visibility_score};
pub use source::{
    HeightFieldOutput, HeightFieldParams, HeightFieldSource,
    PieceRequest, PieceSource, RangeHint, RangeSource, RangeTable,
};
pub use representation::{
    Leaf, PieceStreamer, RenderOutput, StaticRepresentation, StreamState, StreamingRepresentation,
};
pub use display::{DisplaySurface, DrawRecord, RecordingSurface, RenderItem, SurfaceEvents, SurfaceStats};
pub use view::{PassReport, RenderKind, StreamingView};
