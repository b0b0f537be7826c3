//! Streaming options
//!
//! A [`StreamOptions`] value is an immutable snapshot. The application owns
//! the current snapshot and hands new ones (as `Arc<StreamOptions>`) to the
//! view, which forwards them to every representation.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::Result;

/// When the back buffer is copied to the front buffer
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShowOn {
    /// Present after every pass
    EveryPiece,
    /// Present when a refinement sweep completes
    OnRefine,
    /// Present only when the view has nothing left to do
    #[default]
    OnFinish,
}

/// How refinement advances between sweeps
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefinementMode {
    /// Only explicit refine/coarsen commands change resolution
    Manual,
    /// Refine automatically whenever a sweep completes
    #[default]
    AutoRefine,
    /// Coarsen automatically whenever a sweep completes
    AutoCoarsen,
}

/// Process-wide streaming configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamOptions {
    /// Maximum cached pieces per representation. -1 = unbounded, 0 = caching off.
    pub cache_size_limit: i64,
    /// Number of refinement levels between coarsest and full resolution
    pub tree_height: u32,
    /// Children produced when a piece is split
    pub branching_degree: u32,
    /// Per-axis subsampling factor applied per split level
    pub sampling_rate: u32,
    /// Pieces split per refine step. -1 = every refinable piece.
    pub max_splits: i64,
    /// Number of pieces at the coarsest level
    pub initial_pieces: u32,
    /// Ghost level requested from readers
    pub ghost_level: u32,
    pub show_on: ShowOn,
    pub refinement_mode: RefinementMode,
    /// Emit per-piece stream decisions to the log
    pub debug_stream_messages: bool,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            cache_size_limit: -1,
            tree_height: 5,
            branching_degree: 2,
            sampling_rate: 2,
            max_splits: -1,
            initial_pieces: 1,
            ghost_level: 0,
            show_on: ShowOn::OnFinish,
            refinement_mode: RefinementMode::AutoRefine,
            debug_stream_messages: false,
        }
    }
}

impl StreamOptions {
    /// Clamp every option to its nearest legal value.
    ///
    /// Options are long-lived and read from many places, so bad values are
    /// corrected here instead of being reported.
    pub fn sanitized(mut self) -> Self {
        self.cache_size_limit = self.cache_size_limit.max(-1);
        self.tree_height = self.tree_height.max(1);
        self.branching_degree = self.branching_degree.max(2);
        self.sampling_rate = self.sampling_rate.max(1);
        self.max_splits = self.max_splits.max(-1);
        self.initial_pieces = self.initial_pieces.max(1);
        self
    }

    /// Clamp a shared snapshot, keeping the same allocation when it is
    /// already legal
    pub fn sanitize_shared(options: &Arc<StreamOptions>) -> Arc<StreamOptions> {
        let clamped = StreamOptions::clone(options).sanitized();
        if clamped == **options {
            Arc::clone(options)
        } else {
            log::debug!("Stream options clamped to legal values");
            Arc::new(clamped)
        }
    }

    /// Parse options from JSON text. Missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let options: StreamOptions = serde_json::from_str(text)?;
        Ok(options.sanitized())
    }

    /// Load options from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let options = Self::from_json(&text)?;
        log::info!("Loaded stream options from {}", path.display());
        Ok(options)
    }

    /// Write options as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Resolution assigned to pieces at refinement `depth`
    pub fn resolution_at_depth(&self, depth: u32) -> f64 {
        (depth as f64 / self.tree_height.max(1) as f64).min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = StreamOptions::default();
        assert_eq!(options.cache_size_limit, -1);
        assert_eq!(options.show_on, ShowOn::OnFinish);
        assert_eq!(options.refinement_mode, RefinementMode::AutoRefine);
        assert_eq!(options.clone().sanitized(), options);
    }

    #[test]
    fn test_sanitize_clamps() {
        let options = StreamOptions {
            cache_size_limit: -7,
            tree_height: 0,
            branching_degree: 1,
            sampling_rate: 0,
            max_splits: -3,
            initial_pieces: 0,
            ..Default::default()
        }
        .sanitized();

        assert_eq!(options.cache_size_limit, -1);
        assert_eq!(options.tree_height, 1);
        assert_eq!(options.branching_degree, 2);
        assert_eq!(options.sampling_rate, 1);
        assert_eq!(options.max_splits, -1);
        assert_eq!(options.initial_pieces, 1);
    }

    #[test]
    fn test_sanitize_shared() {
        let legal = Arc::new(StreamOptions::default());
        assert!(Arc::ptr_eq(&StreamOptions::sanitize_shared(&legal), &legal));

        let raw = Arc::new(StreamOptions { branching_degree: 0, ..Default::default() });
        let clamped = StreamOptions::sanitize_shared(&raw);
        assert!(!Arc::ptr_eq(&clamped, &raw));
        assert_eq!(clamped.branching_degree, 2);
    }

    #[test]
    fn test_partial_json() {
        let options = StreamOptions::from_json(
            r#"{ "cache_size_limit": 8, "show_on": "every_piece", "tree_height": 0 }"#,
        )
        .unwrap();
        assert_eq!(options.cache_size_limit, 8);
        assert_eq!(options.show_on, ShowOn::EveryPiece);
        assert_eq!(options.tree_height, 1); // clamped
        assert_eq!(options.branching_degree, 2); // default
    }

    #[test]
    fn test_bad_json_is_config_error() {
        let err = StreamOptions::from_json("{ not json").unwrap_err();
        assert!(matches!(err, crate::core::Error::Config(_)));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.json");

        let options = StreamOptions {
            refinement_mode: RefinementMode::Manual,
            max_splits: 4,
            ..Default::default()
        };
        options.save(&path).unwrap();

        let loaded = StreamOptions::load(&path).unwrap();
        assert_eq!(loaded, options);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = StreamOptions::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, crate::core::Error::Io(_)));
    }

    #[test]
    fn test_resolution_at_depth() {
        let options = StreamOptions { tree_height: 4, ..Default::default() };
        assert_eq!(options.resolution_at_depth(0), 0.0);
        assert_eq!(options.resolution_at_depth(2), 0.5);
        assert_eq!(options.resolution_at_depth(4), 1.0);
        assert_eq!(options.resolution_at_depth(9), 1.0);
    }
}
