//! Error types for lodstream

use thiserror::Error;

/// Main error type for the crate.
///
/// Only configuration loading and reader collaborators produce errors; the
/// streaming core itself degrades to "nothing available yet" instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Source error: {0}")]
    Source(String),
}
